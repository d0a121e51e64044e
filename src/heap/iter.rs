use super::{bury, Collectable, Gc, HeapObject};
use crate::value::Value;
use crate::vm::{VmError, VmResult};

#[derive(Debug)]
pub enum Cursor {
    /// Integers from `bottom` up to but not including `top`.
    Range { bottom: i32, top: i32, current: i32 },
    /// Walks a list in place, so appends during the loop are seen.
    List { index: usize },
    /// Values copied out of the source when the iterator was created.
    Snapshot { items: Vec<Value>, index: usize },
}

/// A restartable cursor over a container, a range or a string.
#[derive(Debug)]
pub struct IteratorObject {
    source: Value,
    cursor: Cursor,
}

impl IteratorObject {
    pub fn range(bottom: i32, top: i32) -> Self {
        IteratorObject { source: Value::None, cursor: Cursor::Range { bottom, top, current: bottom } }
    }

    /// An iterator over the values (or keys, if `keys`) of `source`.
    pub fn over(source: &Value, keys: bool) -> VmResult<Self> {
        let cursor = match source {
            Value::Obj(gc) => match &*gc.body.borrow() {
                HeapObject::List(l) if keys => Cursor::Range { bottom: 0, top: l.len() as i32, current: 0 },
                HeapObject::List(_) => Cursor::List { index: 0 },
                HeapObject::Dict(d) => {
                    let items = if keys { d.keys().map(|k| k.to_value()).collect() } else { d.values().cloned().collect() };
                    Cursor::Snapshot { items, index: 0 }
                }
                HeapObject::Object(o) => {
                    let items = if keys {
                        o.keys().map(|k| Value::Int(k as i32)).collect()
                    } else {
                        o.values().cloned().collect()
                    };
                    Cursor::Snapshot { items, index: 0 }
                }
                HeapObject::Iter(_) => {
                    return Err(VmError::Type("cannot make an iterator from an iterator".into()));
                }
                HeapObject::Host(h) => {
                    return Err(VmError::Type(format!("cannot iterate over a {}", h.kind_name())));
                }
            },
            Value::Str(s) if !keys => Cursor::Snapshot { items: s.chars().map(|c| Value::str(c.encode_utf8(&mut [0; 4]))).collect(), index: 0 },
            Value::None => return Err(VmError::Undefined),
            other => return Err(VmError::Type(format!("cannot iterate over a {}", other.type_name()))),
        };
        Ok(IteratorObject { source: source.clone(), cursor })
    }

    pub fn first(&mut self) {
        match &mut self.cursor {
            Cursor::Range { bottom, current, .. } => *current = *bottom,
            Cursor::List { index } | Cursor::Snapshot { index, .. } => *index = 0,
        }
    }

    pub fn next(&mut self) {
        match &mut self.cursor {
            Cursor::Range { current, .. } => *current = current.saturating_add(1),
            Cursor::List { index } | Cursor::Snapshot { index, .. } => *index += 1,
        }
    }

    pub fn is_done(&self) -> bool {
        match &self.cursor {
            Cursor::Range { top, current, .. } => current >= top,
            Cursor::List { index } => *index >= self.source_list_len(),
            Cursor::Snapshot { items, index } => *index >= items.len(),
        }
    }

    pub fn current(&self) -> VmResult<Value> {
        if self.is_done() {
            return Err(VmError::Type("iterator has no current value".into()));
        }
        match &self.cursor {
            Cursor::Range { current, .. } => Ok(Value::Int(*current)),
            Cursor::List { index } => match &self.source {
                Value::Obj(gc) => match &*gc.body.borrow() {
                    HeapObject::List(l) => Ok(l.items()[*index].clone()),
                    _ => Err(VmError::Type("list iterator lost its list".into())),
                },
                _ => Err(VmError::Type("list iterator lost its list".into())),
            },
            Cursor::Snapshot { items, index } => Ok(items[*index].clone()),
        }
    }

    fn source_list_len(&self) -> usize {
        match &self.source {
            Value::Obj(gc) => match &*gc.body.borrow() {
                HeapObject::List(l) => l.len(),
                _ => 0,
            },
            _ => 0,
        }
    }
}

impl Collectable for IteratorObject {
    fn for_each_value(&self, f: &mut dyn FnMut(&Value)) {
        f(&self.source);
        if let Cursor::Snapshot { items, .. } = &self.cursor {
            items.iter().for_each(f);
        }
    }

    fn clear_zombie_refs(&mut self, is_zombie: &dyn Fn(&Gc) -> bool, graveyard: &mut Vec<Value>) {
        bury(&mut self.source, is_zombie, graveyard);
        if let Cursor::Snapshot { items, .. } = &mut self.cursor {
            for v in items {
                bury(v, is_zombie, graveyard);
            }
        }
    }
}
