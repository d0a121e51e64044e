use std::fmt;
use std::ops::Range;

use logos::Logos;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    // Keywords
    #[token("if")]
    If,
    #[token("elseif")]
    ElseIf,
    #[token("else")]
    Else,
    #[token("endif")]
    EndIf,
    #[token("while")]
    While,
    #[token("endwhile")]
    EndWhile,
    #[token("repeat")]
    Repeat,
    #[token("until")]
    Until,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("endfor")]
    EndFor,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("return")]
    Return,
    #[token("goto")]
    Goto,
    #[token("function")]
    Function,
    #[token("procedure")]
    Procedure,
    #[token("end")]
    End,
    #[token("load")]
    Load,
    #[token("this")]
    This,
    #[token("true")]
    True,
    #[token("false")]
    False,

    // Two-character operators
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("!~")]
    NotNearEq,
    #[token("<=")]
    Lte,
    #[token(">=")]
    Gte,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,

    // Punctuation and single-character operators
    #[token("(")]
    OParen,
    #[token(")")]
    CParen,
    #[token("[")]
    OSqb,
    #[token("]")]
    CSqb,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,
    #[token("`")]
    Backtick,
    #[token("=")]
    Assign,
    #[token("!")]
    Pling,
    #[token("~")]
    NearEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("&")]
    BitAnd,
    #[token("|")]
    BitOr,
    #[token("^")]
    Xor,
    #[token("@")]
    BitNot,
    #[token("+")]
    Add,
    #[token("-")]
    Sub,
    #[token("*")]
    Mul,
    #[token("/")]
    Div,
    #[token("%")]
    Perc,

    // Literals
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i32>().ok())]
    Int(i32),

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f32>().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f32>().ok())]
    Float(f32),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),

    // A leading `$` marks a name that always resolves to a global.
    #[regex(r"\$?[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Text after the `#`, kept so the compiler can emit it.
    #[regex(r"#[^\n]*", callback = |lex| lex.slice()[1..].to_string(), allow_greedy = true)]
    Comment(String),
}

impl Token {
    /// Keywords that close or continue a construct also end the
    /// expression before them.
    pub fn ends_expression(&self) -> bool {
        matches!(
            self,
            Token::Semi | Token::Colon | Token::Comment(_)
        ) || (self.is_keyword()
            && !matches!(self, Token::This | Token::True | Token::False | Token::Function | Token::Procedure))
    }

    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            Token::If
                | Token::ElseIf
                | Token::Else
                | Token::EndIf
                | Token::While
                | Token::EndWhile
                | Token::Repeat
                | Token::Until
                | Token::For
                | Token::In
                | Token::EndFor
                | Token::Break
                | Token::Continue
                | Token::Return
                | Token::Goto
                | Token::Function
                | Token::Procedure
                | Token::End
                | Token::Load
                | Token::This
                | Token::True
                | Token::False
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Token::If => "if",
            Token::ElseIf => "elseif",
            Token::Else => "else",
            Token::EndIf => "endif",
            Token::While => "while",
            Token::EndWhile => "endwhile",
            Token::Repeat => "repeat",
            Token::Until => "until",
            Token::For => "for",
            Token::In => "in",
            Token::EndFor => "endfor",
            Token::Break => "break",
            Token::Continue => "continue",
            Token::Return => "return",
            Token::Goto => "goto",
            Token::Function => "function",
            Token::Procedure => "procedure",
            Token::End => "end",
            Token::Load => "load",
            Token::This => "this",
            Token::True => "true",
            Token::False => "false",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::NotNearEq => "!~",
            Token::Lte => "<=",
            Token::Gte => ">=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::OParen => "(",
            Token::CParen => ")",
            Token::OSqb => "[",
            Token::CSqb => "]",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::Colon => ":",
            Token::Semi => ";",
            Token::Backtick => "`",
            Token::Assign => "=",
            Token::Pling => "!",
            Token::NearEq => "~",
            Token::Lt => "<",
            Token::Gt => ">",
            Token::BitAnd => "&",
            Token::BitOr => "|",
            Token::Xor => "^",
            Token::BitNot => "@",
            Token::Add => "+",
            Token::Sub => "-",
            Token::Mul => "*",
            Token::Div => "/",
            Token::Perc => "%",
            Token::Int(n) => return write!(f, "{n}"),
            Token::Float(x) => return write!(f, "{x}"),
            Token::Str(s) => return write!(f, "{s:?}"),
            Token::Ident(s) => s.as_str(),
            Token::Comment(s) => return write!(f, "#{s}"),
        };
        f.write_str(s)
    }
}

fn unescape(quoted: &str) -> Option<String> {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '"' => out.push('"'),
            '\\' => out.push('\\'),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Some(out)
}

/// Lex one line of source into tokens with their byte spans.
pub fn lex(source: &str) -> Result<Vec<(Token, Range<usize>)>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push((token, lexer.span())),
            Err(()) => {
                let span = lexer.span();
                return Err(LexError {
                    position: span.start,
                    snippet: source[span.clone()].to_string(),
                    suggestion: suggest_fix(&source[span]),
                });
            }
        }
    }

    Ok(tokens)
}

fn suggest_fix(bad_token: &str) -> String {
    if bad_token.starts_with('"') {
        "Close the string with a matching '\"'.".to_string()
    } else if bad_token.starts_with(|c: char| c.is_ascii_digit()) {
        format!("'{bad_token}' is not a valid number; integers must fit in 32 bits.")
    } else if bad_token == "{" || bad_token == "}" {
        "Blocks are closed with a keyword (endif, endwhile, endfor, until, end), not braces.".to_string()
    } else if bad_token == "'" {
        "Strings use double quotes.".to_string()
    } else {
        format!("Unexpected character(s): '{bad_token}'.")
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("lex error at position {position}: '{snippet}'. {suggestion}")]
pub struct LexError {
    pub position: usize,
    pub snippet: String,
    pub suggestion: String,
}

// ── TokenStream ──────────────────────────────────────────────────────

/// Cursor over one line of tokens. `next` returns `None` at end of line
/// but still advances, so a single `rewind` always undoes a single `next`.
#[derive(Debug, Clone)]
pub struct TokenStream {
    toks: Vec<(Token, Range<usize>)>,
    pos: usize,
    len: usize,
}

impl TokenStream {
    pub fn new(line: &str) -> Result<Self, LexError> {
        Ok(TokenStream { toks: lex(line)?, pos: 0, len: line.len() })
    }

    pub fn next(&mut self) -> Option<Token> {
        let t = self.toks.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        t
    }

    pub fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos).map(|(t, _)| t)
    }

    pub fn rewind(&mut self) {
        self.pos = self.pos.saturating_sub(1);
    }

    /// Span of the token most recently returned by `next`, or an empty
    /// span at the end of the line.
    pub fn span(&self) -> Range<usize> {
        match self.pos.checked_sub(1).and_then(|i| self.toks.get(i)) {
            Some((_, span)) => span.clone(),
            None => self.len..self.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.toks.is_empty()
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        lex(src).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn lex_statement() {
        assert_eq!(
            kinds("if x>=10: y = y + 1.5 endif"),
            vec![
                Token::If,
                Token::Ident("x".into()),
                Token::Gte,
                Token::Int(10),
                Token::Colon,
                Token::Ident("y".into()),
                Token::Assign,
                Token::Ident("y".into()),
                Token::Add,
                Token::Float(1.5),
                Token::EndIf,
            ]
        );
    }

    #[test]
    fn keywords_need_whole_words() {
        assert_eq!(kinds("endfor ending"), vec![Token::EndFor, Token::Ident("ending".into())]);
        assert_eq!(kinds("$Q"), vec![Token::Ident("$Q".into())]);
    }

    #[test]
    fn lex_string_escapes() {
        assert_eq!(kinds(r#""a\"b\n""#), vec![Token::Str("a\"b\n".into())]);
    }

    #[test]
    fn comment_runs_to_end_of_line() {
        let toks = lex("a=1 # set a").unwrap();
        assert_eq!(toks.last().unwrap().0, Token::Comment(" set a".into()));
        assert_eq!(toks.last().unwrap().1.start, 4);
    }

    #[test]
    fn bad_character_is_reported() {
        let err = lex("a = {").unwrap_err();
        assert_eq!(err.position, 4);
        assert!(err.suggestion.contains("not braces"));
    }

    #[test]
    fn stream_rewind_is_symmetric_at_end() {
        let mut ts = TokenStream::new("a").unwrap();
        assert_eq!(ts.next(), Some(Token::Ident("a".into())));
        assert_eq!(ts.next(), None);
        ts.rewind();
        assert_eq!(ts.next(), None);
        ts.rewind();
        ts.rewind();
        assert_eq!(ts.peek(), Some(&Token::Ident("a".into())));
    }

    #[test]
    fn expression_terminators() {
        assert!(Token::EndIf.ends_expression());
        assert!(Token::Semi.ends_expression());
        assert!(!Token::This.ends_expression());
        assert!(!Token::Function.ends_expression());
        assert!(!Token::Add.ends_expression());
    }
}
