//! Named variable stores: one for globals (shared by every session on a
//! runtime) and one per session. Slots are stable for the life of a
//! variable, so compiled code refers to them by index.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use crate::arena::Pool;
use crate::consts::{ConstId, Constants};
use crate::value::Value;

/// The variable was created by user code rather than during setup.
pub const VAR_USER: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("var already exists")]
pub struct VarExists;

#[derive(Debug)]
pub struct Var {
    pub name: ConstId,
    pub value: Value,
    pub flags: u32,
}

#[derive(Debug, Default)]
pub struct Vars {
    pool: Pool<Var>,
    index: HashMap<ConstId, usize>,
}

impl Vars {
    pub fn new() -> Self {
        Vars::default()
    }

    pub fn find(&self, name: ConstId) -> Option<usize> {
        self.index.get(&name).copied()
    }

    /// Lookup by spelling rather than by name constant.
    pub fn find_by_name(&self, consts: &Constants, name: &str) -> Option<usize> {
        self.find(consts.find_string(name)?)
    }

    pub fn create(&mut self, name: ConstId, flags: u32) -> Result<usize, VarExists> {
        if self.index.contains_key(&name) {
            return Err(VarExists);
        }
        let slot = self.pool.alloc(Var { name, value: Value::None, flags });
        self.index.insert(name, slot);
        Ok(slot)
    }

    pub fn find_or_create(&mut self, name: ConstId, flags: u32) -> usize {
        match self.find(name) {
            Some(slot) => slot,
            None => {
                let slot = self.pool.alloc(Var { name, value: Value::None, flags });
                self.index.insert(name, slot);
                slot
            }
        }
    }

    pub fn get(&self, slot: usize) -> Option<&Value> {
        self.pool.get(slot).map(|v| &v.value)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Value> {
        self.pool.get_mut(slot).map(|v| &mut v.value)
    }

    pub fn name(&self, slot: usize) -> Option<ConstId> {
        self.pool.get(slot).map(|v| v.name)
    }

    pub fn flags(&self, slot: usize) -> u32 {
        self.pool.get(slot).map_or(0, |v| v.flags)
    }

    pub fn remove(&mut self, slot: usize) -> Option<Var> {
        let var = self.pool.free(slot).ok()?;
        self.index.remove(&var.name);
        Some(var)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Var)> {
        self.pool.iter()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Drop every variable. Values are released here, so heap objects they
    /// held go with them.
    pub fn clear(&mut self) {
        self.pool.clear();
        self.index.clear();
    }

    /// Reset every value to none, keeping the names and slots.
    pub fn clear_values(&mut self) {
        for (_, var) in self.pool.iter_mut() {
            var.value = Value::None;
        }
    }
}

/// The global store. Globals created after [`GlobalVars::mark_user`] are
/// flagged as user globals so [`GlobalVars::clear_user`] can remove them
/// while keeping the natives.
#[derive(Debug, Default)]
pub struct GlobalVars {
    vars: Vars,
    user: bool,
}

impl GlobalVars {
    pub fn new() -> Self {
        GlobalVars::default()
    }

    pub fn mark_user(&mut self) {
        self.user = true;
    }

    fn default_flags(&self) -> u32 {
        if self.user { VAR_USER } else { 0 }
    }

    pub fn create(&mut self, name: ConstId) -> Result<usize, VarExists> {
        let flags = self.default_flags();
        self.vars.create(name, flags)
    }

    pub fn find_or_create(&mut self, name: ConstId) -> usize {
        let flags = self.default_flags();
        self.vars.find_or_create(name, flags)
    }

    pub fn clear_user(&mut self) {
        let doomed: Vec<usize> = self
            .vars
            .iter()
            .filter(|(_, v)| v.flags & VAR_USER != 0)
            .map(|(slot, _)| slot)
            .collect();
        for slot in doomed {
            self.vars.remove(slot);
        }
    }
}

impl Deref for GlobalVars {
    type Target = Vars;

    fn deref(&self) -> &Vars {
        &self.vars
    }
}

impl DerefMut for GlobalVars {
    fn deref_mut(&mut self) -> &mut Vars {
        &mut self.vars
    }
}
