use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::{bury, Collectable, Gc};
use crate::value::Value;
use crate::vm::{VmError, VmResult};

/// A dictionary key. Floats key by their bit pattern and objects by
/// identity, so every key has a total order.
#[derive(Debug, Clone)]
pub enum DictKey {
    Int(i32),
    Float(u32),
    Bool(bool),
    Str(Rc<str>),
    Obj(Gc),
}

impl DictKey {
    pub fn from_value(v: &Value) -> VmResult<DictKey> {
        match v {
            Value::Int(n) => Ok(DictKey::Int(*n)),
            Value::Float(f) => Ok(DictKey::Float(f.to_bits())),
            Value::Bool(b) => Ok(DictKey::Bool(*b)),
            Value::Str(s) => Ok(DictKey::Str(s.clone())),
            Value::Obj(gc) => Ok(DictKey::Obj(gc.clone())),
            Value::None => Err(VmError::Undefined),
            other => Err(VmError::Type(format!("cannot use a {} as a dictionary key", other.type_name()))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DictKey::Int(n) => Value::Int(*n),
            DictKey::Float(bits) => Value::Float(f32::from_bits(*bits)),
            DictKey::Bool(b) => Value::Bool(*b),
            DictKey::Str(s) => Value::Str(s.clone()),
            DictKey::Obj(gc) => Value::Obj(gc.clone()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            DictKey::Int(_) => 0,
            DictKey::Float(_) => 1,
            DictKey::Bool(_) => 2,
            DictKey::Str(_) => 3,
            DictKey::Obj(_) => 4,
        }
    }
}

impl Ord for DictKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (DictKey::Int(a), DictKey::Int(b)) => a.cmp(b),
            (DictKey::Float(a), DictKey::Float(b)) => a.cmp(b),
            (DictKey::Bool(a), DictKey::Bool(b)) => a.cmp(b),
            (DictKey::Str(a), DictKey::Str(b)) => a.cmp(b),
            (DictKey::Obj(a), DictKey::Obj(b)) => Rc::as_ptr(a).cmp(&Rc::as_ptr(b)),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for DictKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DictKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DictKey {}

#[derive(Debug, Default)]
pub struct Dict {
    entries: BTreeMap<DictKey, Value>,
}

impl Dict {
    pub fn new() -> Self {
        Dict::default()
    }

    pub fn get(&self, key: &DictKey) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn set(&mut self, key: DictKey, v: Value) {
        self.entries.insert(key, v);
    }

    pub fn remove(&mut self, key: &DictKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &DictKey> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }
}

impl Collectable for Dict {
    fn for_each_value(&self, f: &mut dyn FnMut(&Value)) {
        self.entries.values().for_each(f);
    }

    fn for_each_key(&self, f: &mut dyn FnMut(&Gc)) {
        for k in self.entries.keys() {
            if let DictKey::Obj(gc) = k {
                f(gc);
            }
        }
    }

    fn clear_zombie_refs(&mut self, is_zombie: &dyn Fn(&Gc) -> bool, graveyard: &mut Vec<Value>) {
        let doomed: Vec<DictKey> = self
            .entries
            .keys()
            .filter(|k| matches!(k, DictKey::Obj(gc) if is_zombie(gc)))
            .cloned()
            .collect();
        for k in doomed {
            if let Some(v) = self.entries.remove(&k) {
                graveyard.push(v);
            }
            graveyard.push(k.to_value());
        }
        for v in self.entries.values_mut() {
            bury(v, is_zombie, graveyard);
        }
    }
}
