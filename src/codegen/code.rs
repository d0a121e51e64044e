use crate::bytecode;

/// A code buffer that can be rolled back to a mark.
///
/// Words below the mark are only rewritten in place (jump patching), and
/// each rewrite logs the word it replaced.
#[derive(Debug, Clone, Default)]
pub struct Code {
    words: Vec<u32>,
    mark: usize,
    undo: Vec<(usize, u32)>,
}

impl From<Vec<u32>> for Code {
    fn from(words: Vec<u32>) -> Self {
        Code { words, mark: 0, undo: Vec::new() }
    }
}

impl Code {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn get(&self, at: usize) -> u32 {
        self.words[at]
    }

    pub fn op_at(&self, at: usize) -> u8 {
        bytecode::op(self.words[at])
    }

    pub fn push(&mut self, word: u32) {
        self.words.push(word);
    }

    pub fn set(&mut self, at: usize, word: u32) {
        if at < self.mark {
            self.undo.push((at, self.words[at]));
        }
        self.words[at] = word;
    }

    /// Start logging from the current end.
    pub fn mark(&mut self) {
        self.mark = self.words.len();
        self.undo.clear();
    }

    /// Back to exactly what the buffer held at the last mark.
    pub fn rollback(&mut self) {
        self.words.truncate(self.mark);
        while let Some((at, word)) = self.undo.pop() {
            self.words[at] = word;
        }
    }

    pub fn take(&mut self) -> Vec<u32> {
        self.mark = 0;
        self.undo.clear();
        std::mem::take(&mut self.words)
    }
}
