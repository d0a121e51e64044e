//! Binary and unary operators. Dispatch is on the left operand, which may
//! look at the right operand to choose between int and float semantics.

use std::cmp::Ordering;
use std::rc::Rc;

use super::Value;
use crate::vm::{VmError, VmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    NearEq,
    NotNearEq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::NearEq => "~",
            CmpOp::NotNearEq => "!~",
            CmpOp::Lt => "<",
            CmpOp::Lte => "<=",
            CmpOp::Gt => ">",
            CmpOp::Gte => ">=",
        }
    }

    fn from_ordering(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq | CmpOp::NearEq => ord == Ordering::Equal,
            CmpOp::Ne | CmpOp::NotNearEq => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Lte => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Gte => ord != Ordering::Less,
        }
    }
}

// ── Arithmetic ───────────────────────────────────────────────────────

pub fn arith(op: ArithOp, a: &Value, b: &Value) -> VmResult<Value> {
    match a {
        Value::Int(x) => match b {
            Value::Float(y) => float_arith(op, *x as f32, *y, "integers"),
            _ => int_arith(op, *x, b.to_int()?),
        },
        Value::Float(x) => float_arith(op, *x, b.to_float()?, "floats"),
        Value::Str(s) => match (op, b) {
            (ArithOp::Mul, Value::Int(n)) => Ok(Value::Str(Rc::from(s.repeat((*n).max(0) as usize)))),
            (ArithOp::Add, Value::Str(t)) => {
                let mut out = String::with_capacity(s.len() + t.len());
                out.push_str(s);
                out.push_str(t);
                Ok(Value::Str(Rc::from(out)))
            }
            _ => float_arith(op, a.to_float()?, b.to_float()?, "strings"),
        },
        Value::None => Err(VmError::Undefined),
        other => Err(VmError::Type(format!("cannot do arithmetic on a {}", other.type_name()))),
    }
}

fn int_arith(op: ArithOp, x: i32, y: i32) -> VmResult<Value> {
    let r = match op {
        ArithOp::Add => x.wrapping_add(y),
        ArithOp::Sub => x.wrapping_sub(y),
        ArithOp::Mul => x.wrapping_mul(y),
        ArithOp::Div | ArithOp::Mod if y == 0 => return Err(VmError::DivisionByZero),
        ArithOp::Div => x.wrapping_div(y),
        ArithOp::Mod => x.wrapping_rem(y),
    };
    Ok(Value::Int(r))
}

fn float_arith(op: ArithOp, x: f32, y: f32, what: &str) -> VmResult<Value> {
    let r = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Mod => return Err(VmError::Type(format!("operation not permitted on {what}"))),
    };
    Ok(Value::Float(r))
}

// ── Comparison ───────────────────────────────────────────────────────

/// `epsilon` is the tolerance for `~` and `!~` on floats.
pub fn compare(op: CmpOp, a: &Value, b: &Value, epsilon: f32) -> VmResult<bool> {
    if a.is_none() || b.is_none() {
        return match op {
            CmpOp::Eq => Ok(a.same(b)),
            CmpOp::Ne => Ok(!a.same(b)),
            _ => Err(VmError::Undefined),
        };
    }
    if matches!(a, Value::Float(_)) || matches!(b, Value::Float(_)) {
        if matches!(a, Value::Int(_) | Value::Float(_) | Value::Str(_) | Value::Bool(_))
            && matches!(b, Value::Int(_) | Value::Float(_) | Value::Str(_) | Value::Bool(_))
        {
            let (x, y) = (a.to_float()?, b.to_float()?);
            return Ok(match op {
                CmpOp::NearEq => (x - y).abs() < epsilon,
                CmpOp::NotNearEq => (x - y).abs() >= epsilon,
                _ => match x.partial_cmp(&y) {
                    Some(ord) => op.from_ordering(ord),
                    None => op == CmpOp::Ne || op == CmpOp::NotNearEq,
                },
            });
        }
    }
    if matches!(a, Value::Int(_)) || matches!(b, Value::Int(_)) {
        if let (Ok(x), Ok(y)) = (a.to_int(), b.to_int()) {
            return Ok(op.from_ordering(x.cmp(&y)));
        }
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(compare_strs(op, x, y)),
        (Value::Str(x), other) => Ok(compare_strs(op, x, &other.to_str())),
        (other, Value::Str(y)) => Ok(compare_strs(op, &other.to_str(), y)),
        // a number or boolean never equals a container or a function
        _ if is_scalar(a) != is_scalar(b) => Err(incomparable(op, a, b)),
        _ => match op {
            CmpOp::Eq | CmpOp::NearEq => Ok(a.same(b)),
            CmpOp::Ne | CmpOp::NotNearEq => Ok(!a.same(b)),
            _ => Err(incomparable(op, a, b)),
        },
    }
}

fn is_scalar(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Float(_) | Value::Bool(_))
}

fn incomparable(op: CmpOp, a: &Value, b: &Value) -> VmError {
    VmError::Type(format!("cannot compare {} with {} using {}", a.type_name(), b.type_name(), op.symbol()))
}

fn compare_strs(op: CmpOp, x: &str, y: &str) -> bool {
    match op {
        CmpOp::NearEq | CmpOp::NotNearEq => {
            let ord = x.to_lowercase().cmp(&y.to_lowercase());
            op.from_ordering(ord)
        }
        _ => op.from_ordering(x.cmp(y)),
    }
}

// ── Logical, bitwise, unary ──────────────────────────────────────────

pub fn logical_and(a: &Value, b: &Value) -> VmResult<Value> {
    Ok(Value::Bool(a.to_bool()? && b.to_bool()?))
}

pub fn logical_or(a: &Value, b: &Value) -> VmResult<Value> {
    Ok(Value::Bool(a.to_bool()? || b.to_bool()?))
}

pub fn bitand(a: &Value, b: &Value) -> VmResult<Value> {
    Ok(Value::Int(a.to_int()? & b.to_int()?))
}

pub fn bitor(a: &Value, b: &Value) -> VmResult<Value> {
    Ok(Value::Int(a.to_int()? | b.to_int()?))
}

pub fn xor(a: &Value, b: &Value) -> VmResult<Value> {
    Ok(Value::Int(a.to_int()? ^ b.to_int()?))
}

pub fn bitnot(a: &Value) -> VmResult<Value> {
    Ok(Value::Int(!a.to_int()?))
}

pub fn negate(a: &Value) -> VmResult<Value> {
    match a {
        Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
        Value::Float(x) => Ok(Value::Float(-x)),
        other => Err(VmError::Type(format!("invalid value for unary minus: {}", other.type_name()))),
    }
}

pub fn not(a: &Value) -> VmResult<Value> {
    match a {
        Value::Bool(b) => Ok(Value::Bool(!b)),
        Value::Int(n) => Ok(Value::Int((*n == 0) as i32)),
        Value::Float(x) => Ok(Value::Int((*x as i32 == 0) as i32)),
        other => Err(VmError::Type(format!("invalid value for unary not: {}", other.type_name()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1.0e-3;

    fn ar(op: ArithOp, a: impl Into<Value>, b: impl Into<Value>) -> Value {
        arith(op, &a.into(), &b.into()).unwrap()
    }

    fn cmp(op: CmpOp, a: impl Into<Value>, b: impl Into<Value>) -> bool {
        compare(op, &a.into(), &b.into(), EPS).unwrap()
    }

    #[test]
    fn int_float_promotion() {
        assert!(matches!(ar(ArithOp::Add, 1, 2), Value::Int(3)));
        assert!(matches!(ar(ArithOp::Div, 7, 2), Value::Int(3)));
        assert!(matches!(ar(ArithOp::Div, 7, 2.0f32), Value::Float(x) if x == 3.5));
        assert!(matches!(ar(ArithOp::Mul, 2.5f32, 2), Value::Float(x) if x == 5.0));
        assert!(matches!(ar(ArithOp::Mod, 7, 3), Value::Int(1)));
    }

    #[test]
    fn division_by_zero() {
        assert_eq!(arith(ArithOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err(), VmError::DivisionByZero);
        assert_eq!(arith(ArithOp::Mod, &Value::Int(1), &Value::Int(0)).unwrap_err(), VmError::DivisionByZero);
    }

    #[test]
    fn float_modulo_is_rejected() {
        let err = arith(ArithOp::Mod, &Value::Float(1.0), &Value::Int(2)).unwrap_err();
        assert_eq!(err.to_string(), "operation not permitted on floats");
    }

    #[test]
    fn string_repeat_and_concat() {
        assert_eq!(ar(ArithOp::Mul, "ab", 3).to_string(), "ababab");
        assert_eq!(ar(ArithOp::Add, "ab", "cd").to_string(), "abcd");
        assert_eq!(ar(ArithOp::Mul, "ab", 0).to_string(), "");
    }

    #[test]
    fn float_rounding_and_near_equality() {
        let diff = ar(ArithOp::Sub, 1, 1.1f32);
        assert!(!compare(CmpOp::Eq, &diff, &Value::Float(-0.1), EPS).unwrap());
        assert!(compare(CmpOp::NearEq, &diff, &Value::Float(-0.1), EPS).unwrap());
    }

    #[test]
    fn coercing_equality() {
        assert!(cmp(CmpOp::Eq, 1, 1.0f32));
        assert!(cmp(CmpOp::Eq, "1", 1));
        assert!(cmp(CmpOp::Eq, 1, "1"));
        assert!(cmp(CmpOp::Lt, "abc", "abd"));
        assert!(cmp(CmpOp::NearEq, "Hello", "hELLO"));
        assert!(!cmp(CmpOp::Eq, "Hello", "hELLO"));
        assert!(cmp(CmpOp::Eq, "true", true));
        assert!(cmp(CmpOp::Ne, true, false));
    }

    #[test]
    fn ordering_incomparable_kinds_fails() {
        assert!(compare(CmpOp::Lt, &Value::Bool(true), &Value::Bool(false), EPS).is_err());
    }

    #[test]
    fn numbers_and_containers_do_not_compare() {
        let mut heap = crate::heap::Heap::new();
        let l = Value::Obj(heap.list(vec![]));
        let e = compare(CmpOp::Eq, &Value::Int(1), &l, EPS).unwrap_err();
        assert_eq!(e.to_string(), "cannot compare int with list using ==");
        assert!(compare(CmpOp::Ne, &l, &Value::Bool(true), EPS).is_err());
        assert!(compare(CmpOp::Eq, &l, &l.clone(), EPS).unwrap());
        assert!(compare(CmpOp::Ne, &l, &Value::Obj(heap.list(vec![])), EPS).unwrap());
    }

    #[test]
    fn unary() {
        assert!(matches!(negate(&Value::Int(3)).unwrap(), Value::Int(-3)));
        assert!(matches!(not(&Value::Bool(false)).unwrap(), Value::Bool(true)));
        assert!(matches!(not(&Value::Int(0)).unwrap(), Value::Int(1)));
        assert!(matches!(not(&Value::Int(-4)).unwrap(), Value::Int(0)));
        assert!(matches!(not(&Value::Float(0.5)).unwrap(), Value::Int(1)));
        assert!(matches!(bitnot(&Value::Int(0)).unwrap(), Value::Int(-1)));
        assert_eq!(negate(&Value::str("x")).unwrap_err().to_string(), "invalid value for unary minus: string");
    }
}
