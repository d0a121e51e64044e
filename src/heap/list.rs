use super::{bury, Collectable, Gc};
use crate::value::Value;
use crate::vm::{VmError, VmResult};

#[derive(Debug, Default)]
pub struct List {
    items: Vec<Value>,
}

impl From<Vec<Value>> for List {
    fn from(items: Vec<Value>) -> Self {
        List { items }
    }
}

fn unset() -> VmError {
    VmError::Type("unset value in list".into())
}

impl List {
    pub fn new() -> Self {
        List::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn get(&self, index: i32) -> VmResult<Value> {
        match usize::try_from(index).ok().and_then(|i| self.items.get(i)) {
            Some(Value::None) | None => Err(unset()),
            Some(v) => Ok(v.clone()),
        }
    }

    /// True if `index` holds a value.
    pub fn has(&self, index: i32) -> bool {
        self.get(index).is_ok()
    }

    /// Setting past the end grows the list, padding with unset slots.
    pub fn set(&mut self, index: i32, v: Value) -> VmResult<()> {
        let i = usize::try_from(index)
            .map_err(|_| VmError::Type(format!("negative list index {index}")))?;
        if i >= self.items.len() {
            self.items.resize(i + 1, Value::None);
        }
        self.items[i] = v;
        Ok(())
    }

    pub fn append(&mut self, v: Value) {
        self.items.push(v);
    }

    /// Insert before `index`; an out-of-range index appends.
    pub fn insert(&mut self, index: i32, v: Value) {
        match usize::try_from(index) {
            Ok(i) if i <= self.items.len() => self.items.insert(i, v),
            _ => self.items.push(v),
        }
    }

    /// Remove the item at `index`; false if there was none.
    pub fn remove(&mut self, index: i32) -> bool {
        match usize::try_from(index) {
            Ok(i) if i < self.items.len() => {
                self.items.remove(i);
                true
            }
            _ => false,
        }
    }

    pub fn pop(&mut self) -> VmResult<Value> {
        self.items.pop().ok_or_else(|| VmError::Type("pop on empty list".into()))
    }

    pub fn peek(&self) -> VmResult<Value> {
        self.items.last().cloned().ok_or_else(|| VmError::Type("peek on empty list".into()))
    }

    /// Push onto the front.
    pub fn shift(&mut self, v: Value) {
        self.items.insert(0, v);
    }

    /// Take from the front.
    pub fn unshift(&mut self) -> VmResult<Value> {
        if self.items.is_empty() {
            return Err(VmError::Type("unshift on empty list".into()));
        }
        Ok(self.items.remove(0))
    }
}

impl Collectable for List {
    fn for_each_value(&self, f: &mut dyn FnMut(&Value)) {
        self.items.iter().for_each(f);
    }

    fn clear_zombie_refs(&mut self, is_zombie: &dyn Fn(&Gc) -> bool, graveyard: &mut Vec<Value>) {
        for v in &mut self.items {
            bury(v, is_zombie, graveyard);
        }
    }
}
