//! The tagged value every stack slot, variable and container entry holds.
//!
//! `Value` is a closed sum type: behaviour that the classic design spread
//! over a per-type dispatch table is a `match` here, with the arithmetic
//! and comparison rules in [`ops`].

pub mod ops;

use std::fmt;
use std::rc::Rc;

use crate::consts::ConstId;
use crate::heap::{DictKey, Gc, HeapObject};
use crate::natives::NativeId;
use crate::vm::{VmError, VmResult};

#[derive(Clone, Debug, Default)]
pub enum Value {
    /// No value. Reading it as data is an error.
    #[default]
    None,
    Int(i32),
    Float(f32),
    Bool(bool),
    Str(Rc<str>),
    /// A guest function, by the id of its function constant.
    Func(ConstId),
    Native(NativeId),
    /// A native method bound to the container it was looked up on.
    Method { this: Gc, native: NativeId },
    Obj(Gc),
    Ref(Reference),
}

/// Where a store or load lands. Variable references are slot indices that
/// the VM resolves; the rest point into heap containers.
#[derive(Clone, Debug)]
pub enum Reference {
    /// Absolute index into the VM's variable-slot array.
    Local(usize),
    Session(usize),
    Global(usize),
    Prop { obj: Gc, key: u32 },
    Index { list: Gc, index: i32 },
    Key { dict: Gc, key: DictKey },
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Func(_) => "function",
            Value::Native(_) => "native",
            Value::Method { .. } => "method",
            Value::Obj(gc) => gc.body.borrow().kind_name(),
            Value::Ref(_) => "ref",
        }
    }

    /// The heap object this value keeps alive, if any.
    pub fn gc(&self) -> Option<&Gc> {
        match self {
            Value::Obj(gc) | Value::Method { this: gc, .. } => Some(gc),
            Value::Ref(r) => r.gc(),
            _ => None,
        }
    }

    // ── Conversions ──────────────────────────────────────────────────

    pub fn to_int(&self) -> VmResult<i32> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Float(f) => Ok(*f as i32),
            Value::Bool(b) => Ok(*b as i32),
            Value::Str(s) => Ok(atoi(s)),
            Value::None => Err(VmError::Undefined),
            other => Err(VmError::Type(format!("cannot convert {} to int", other.type_name()))),
        }
    }

    pub fn to_float(&self) -> VmResult<f32> {
        match self {
            Value::Int(n) => Ok(*n as f32),
            Value::Float(f) => Ok(*f),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Str(s) => Ok(atof(s)),
            Value::None => Err(VmError::Undefined),
            other => Err(VmError::Type(format!("cannot convert {} to float", other.type_name()))),
        }
    }

    /// Only booleans are truthy or falsy; conditions on anything else fail.
    pub fn to_bool(&self) -> VmResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::None => Err(VmError::Undefined),
            other => Err(VmError::Type(format!("cannot convert {} to boolean", other.type_name()))),
        }
    }

    pub fn to_str(&self) -> Rc<str> {
        match self {
            Value::Str(s) => s.clone(),
            other => Rc::from(other.to_string()),
        }
    }

    /// Display form prefixed by the type name, as `printrepr` shows it.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("string:{s:?}"),
            other => format!("{}:{}", other.type_name(), other),
        }
    }

    /// The integer used to key objects by `x[k]` and returned by `hash()`.
    pub fn hash_key(&self) -> VmResult<i32> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Float(f) => Ok(f.to_bits() as i32),
            Value::Bool(b) => Ok(*b as i32),
            Value::Str(s) => Ok(fast_hash(s.as_bytes()) as i32),
            Value::Obj(gc) => Ok(Rc::as_ptr(gc) as usize as i32),
            Value::None => Err(VmError::Undefined),
            other => Err(VmError::Type(format!("cannot hash a {}", other.type_name()))),
        }
    }

    /// Element count for containers, byte length for strings.
    pub fn size(&self) -> VmResult<i32> {
        match self {
            Value::Str(s) => Ok(s.len() as i32),
            Value::Obj(gc) => match &*gc.body.borrow() {
                HeapObject::Object(o) => Ok(o.len() as i32),
                HeapObject::List(l) => Ok(l.len() as i32),
                HeapObject::Dict(d) => Ok(d.len() as i32),
                HeapObject::Iter(_) => Err(VmError::Type("cannot get the size of an iterator".into())),
                HeapObject::Host(h) => h
                    .size()
                    .ok_or_else(|| VmError::Type(format!("cannot get the size of a {}", h.kind_name()))),
            },
            other => Err(VmError::Type(format!("cannot get the size of a {}", other.type_name()))),
        }
    }

    /// Identity: same kind and same payload, objects by pointer.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Func(a), Value::Func(b)) => a == b,
            (Value::Native(a), Value::Native(b)) => a == b,
            (Value::Method { this: a, native: x }, Value::Method { this: b, native: y }) => {
                Rc::ptr_eq(a, b) && x == y
            }
            (Value::Obj(a), Value::Obj(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Reference {
    pub fn gc(&self) -> Option<&Gc> {
        match self {
            Reference::Prop { obj, .. } => Some(obj),
            Reference::Index { list, .. } => Some(list),
            Reference::Key { dict, .. } => Some(dict),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::None => f.write_str("none"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x:.6}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => f.write_str(s),
            Value::Func(id) => write!(f, "<function {id}>"),
            Value::Native(id) => write!(f, "<native {}>", id.0),
            Value::Method { native, .. } => write!(f, "<method {}>", native.0),
            Value::Obj(gc) => write!(f, "<{}>", gc.body.borrow().kind_name()),
            Value::Ref(_) => f.write_str("<ref>"),
        }
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<f32> for Value {
    fn from(x: f32) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

// ── String to number, C library style ───────────────────────────────

/// Leading-prefix integer parse: whitespace, optional sign, digits.
/// No digits gives 0.
pub fn atoi(s: &str) -> i32 {
    let s = s.trim_start();
    let (neg, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let mut n: i32 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        n = n.wrapping_mul(10).wrapping_add((b - b'0') as i32);
    }
    if neg { n.wrapping_neg() } else { n }
}

/// Leading-prefix float parse; the longest prefix that parses wins.
pub fn atof(s: &str) -> f32 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'-' | b'+')) {
        end = 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut e = end + 1;
        if e < bytes.len() && matches!(bytes[e], b'-' | b'+') {
            e += 1;
        }
        if e < bytes.len() && bytes[e].is_ascii_digit() {
            while e < bytes.len() && bytes[e].is_ascii_digit() {
                e += 1;
            }
            end = e;
        }
    }
    (1..=end).rev().find_map(|n| s[..n].parse::<f32>().ok()).unwrap_or(0.0)
}

/// FNV-1a over the bytes.
pub fn fast_hash(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5u32, |h, &b| (h ^ b as u32).wrapping_mul(0x0100_0193))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_prefix_parsing() {
        assert_eq!(atoi("  42abc"), 42);
        assert_eq!(atoi("-7"), -7);
        assert_eq!(atoi("abc"), 0);
        assert_eq!(atof("3.5kg"), 3.5);
        assert_eq!(atof("1e3x"), 1000.0);
        assert_eq!(atof("2e"), 2.0);
        assert_eq!(atof("."), 0.0);
    }

    #[test]
    fn conversions() {
        assert_eq!(Value::Float(3.9).to_int().unwrap(), 3);
        assert_eq!(Value::Bool(true).to_int().unwrap(), 1);
        assert_eq!(Value::str("12").to_float().unwrap(), 12.0);
        assert!(Value::None.to_int().is_err());
        assert_eq!(
            Value::Int(1).to_bool().unwrap_err().to_string(),
            "cannot convert int to boolean"
        );
    }

    #[test]
    fn display_forms() {
        assert_eq!(Value::Float(45.0).to_string(), "45.000000");
        assert_eq!(Value::Int(-3).to_string(), "-3");
        assert_eq!(Value::Bool(false).to_string(), "false");
        assert_eq!(Value::Int(5).repr(), "int:5");
        assert_eq!(Value::str("a").repr(), "string:\"a\"");
    }

    #[test]
    fn hashing_is_stable() {
        assert_eq!(Value::str("foo").hash_key().unwrap(), Value::str("foo").hash_key().unwrap());
        assert_ne!(Value::str("foo").hash_key().unwrap(), Value::str("bar").hash_key().unwrap());
        assert_eq!(Value::Int(9).hash_key().unwrap(), 9);
    }

    #[test]
    fn identity() {
        assert!(Value::Int(1).same(&Value::Int(1)));
        assert!(!Value::Int(1).same(&Value::Float(1.0)));
        assert!(Value::None.same(&Value::None));
    }
}
