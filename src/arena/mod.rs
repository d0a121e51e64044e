//! Low-level containers shared by the constant pool, the variable stores,
//! the code generator and the VM: an append-only byte arena addressed by
//! offset, a slot pool with a free list, and a bounded stack.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapacityError {
    #[error("bad offset requested in growable")]
    BadOffset,
    #[error("cannot allocate constant more than 64K in size ({size} bytes)")]
    ConstantTooLarge { size: usize },
    #[error("{what} overflow")]
    StackOverflow { what: &'static str },
    #[error("stack underflow in {what}")]
    StackUnderflow { what: &'static str },
    #[error("double free of pool slot {slot}")]
    PoolDoubleFree { slot: usize },
    #[error("too many jumps to an unset label")]
    TooManyJumps,
}

pub type CapacityResult<T> = Result<T, CapacityError>;

// ── Growable ─────────────────────────────────────────────────────────

/// Append-only byte arena. Callers hold offsets, never slices, across
/// anything that may allocate.
#[derive(Debug, Clone)]
pub struct Growable {
    data: Vec<u8>,
    chunk: usize,
}

impl Growable {
    pub fn new(initial: usize, chunk: usize) -> Self {
        Growable { data: Vec::with_capacity(initial), chunk: chunk.max(1) }
    }

    /// Reserve `size` zeroed bytes at the end of the arena and return the
    /// offset of the first one.
    pub fn allocate(&mut self, size: usize) -> usize {
        let offset = self.data.len();
        let needed = offset + size;
        if needed > self.data.capacity() {
            // grow in whole chunks, like the rest of the arena users expect
            let extra = (needed - self.data.capacity()).div_ceil(self.chunk) * self.chunk;
            self.data.reserve(extra);
        }
        self.data.resize(needed, 0);
        offset
    }

    pub fn get(&self, offset: usize, len: usize) -> CapacityResult<&[u8]> {
        if !self.is_inside(offset, len) {
            return Err(CapacityError::BadOffset);
        }
        Ok(&self.data[offset..offset + len])
    }

    pub fn get_mut(&mut self, offset: usize, len: usize) -> CapacityResult<&mut [u8]> {
        if !self.is_inside(offset, len) {
            return Err(CapacityError::BadOffset);
        }
        Ok(&mut self.data[offset..offset + len])
    }

    /// The offset the next allocation will land at.
    pub fn offset(&self) -> usize {
        self.data.len()
    }

    /// Rewind to an earlier offset, discarding everything after it.
    pub fn truncate(&mut self, offset: usize) {
        self.data.truncate(offset);
    }

    pub fn is_inside(&self, offset: usize, len: usize) -> bool {
        offset.checked_add(len).is_some_and(|end| end <= self.data.len())
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

// ── Pool ─────────────────────────────────────────────────────────────

/// Slot allocator with stable indices and a free list.
#[derive(Debug, Clone)]
pub struct Pool<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Pool { slots: Vec::new(), free: Vec::new() }
    }
}

impl<T> Pool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, item: T) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(item);
                slot
            }
            None => {
                self.slots.push(Some(item));
                self.slots.len() - 1
            }
        }
    }

    pub fn free(&mut self, slot: usize) -> CapacityResult<T> {
        match self.slots.get_mut(slot).and_then(Option::take) {
            Some(item) => {
                self.free.push(slot);
                Ok(item)
            }
            None => Err(CapacityError::PoolDoubleFree { slot }),
        }
    }

    pub fn get(&self, slot: usize) -> Option<&T> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut T> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| s.as_ref().map(|v| (i, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| s.as_mut().map(|v| (i, v)))
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}

// ── Stack ────────────────────────────────────────────────────────────

/// A `Vec` with a hard ceiling; overflow and underflow are errors rather
/// than reallocations or panics.
#[derive(Debug, Clone)]
pub struct Stack<T> {
    items: Vec<T>,
    limit: usize,
    what: &'static str,
}

impl<T> Stack<T> {
    pub fn new(what: &'static str, limit: usize) -> Self {
        Stack { items: Vec::with_capacity(limit.min(256)), limit, what }
    }

    pub fn push(&mut self, item: T) -> CapacityResult<()> {
        if self.items.len() >= self.limit {
            return Err(CapacityError::StackOverflow { what: self.what });
        }
        self.items.push(item);
        Ok(())
    }

    pub fn pop(&mut self) -> CapacityResult<T> {
        self.items.pop().ok_or(CapacityError::StackUnderflow { what: self.what })
    }

    pub fn peek(&self) -> CapacityResult<&T> {
        self.peek_n(0)
    }

    /// `n` counts down from the top: 0 is the top item.
    pub fn peek_n(&self, n: usize) -> CapacityResult<&T> {
        self.items
            .len()
            .checked_sub(n + 1)
            .map(|i| &self.items[i])
            .ok_or(CapacityError::StackUnderflow { what: self.what })
    }

    pub fn peek_n_mut(&mut self, n: usize) -> CapacityResult<&mut T> {
        match self.items.len().checked_sub(n + 1) {
            Some(i) => Ok(&mut self.items[i]),
            None => Err(CapacityError::StackUnderflow { what: self.what }),
        }
    }

    /// Swap the top two items.
    pub fn swap_top(&mut self) -> CapacityResult<()> {
        let len = self.items.len();
        if len < 2 {
            return Err(CapacityError::StackUnderflow { what: self.what });
        }
        self.items.swap(len - 1, len - 2);
        Ok(())
    }

    pub fn truncate(&mut self, len: usize) {
        self.items.truncate(len);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growable_allocates_contiguously() {
        let mut g = Growable::new(4, 4);
        assert_eq!(g.allocate(10), 0);
        assert_eq!(g.allocate(6), 10);
        assert_eq!(g.offset(), 16);
        g.get_mut(10, 2).unwrap().copy_from_slice(&[7, 8]);
        assert_eq!(g.get(10, 2).unwrap(), &[7, 8]);
    }

    #[test]
    fn growable_rejects_reads_past_the_end() {
        let mut g = Growable::new(16, 16);
        g.allocate(100);
        assert!(g.get(0, 100).is_ok());
        assert_eq!(g.get(0, 200).unwrap_err(), CapacityError::BadOffset);
        assert_eq!(g.get(0, 200).unwrap_err().to_string(), "bad offset requested in growable");
        assert!(g.get(usize::MAX, 2).is_err());
    }

    #[test]
    fn growable_truncate_rewinds() {
        let mut g = Growable::new(8, 8);
        g.allocate(8);
        let mark = g.offset();
        g.allocate(32);
        g.truncate(mark);
        assert_eq!(g.offset(), 8);
        assert_eq!(g.allocate(4), 8);
    }

    #[test]
    fn pool_reuses_freed_slots() {
        let mut p = Pool::new();
        let a = p.alloc("a");
        let b = p.alloc("b");
        assert_eq!(p.free(a).unwrap(), "a");
        let c = p.alloc("c");
        assert_eq!(c, a);
        assert_eq!(p.get(b), Some(&"b"));
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn pool_double_free_is_an_error() {
        let mut p = Pool::new();
        let a = p.alloc(1);
        p.free(a).unwrap();
        assert_eq!(p.free(a).unwrap_err(), CapacityError::PoolDoubleFree { slot: a });
        assert!(p.free(99).is_err());
    }

    #[test]
    fn stack_bounds() {
        let mut s = Stack::new("test stack", 2);
        s.push(1).unwrap();
        s.push(2).unwrap();
        assert_eq!(s.push(3).unwrap_err(), CapacityError::StackOverflow { what: "test stack" });
        assert_eq!(*s.peek().unwrap(), 2);
        assert_eq!(*s.peek_n(1).unwrap(), 1);
        assert!(s.peek_n(2).is_err());
        s.swap_top().unwrap();
        assert_eq!(s.pop().unwrap(), 1);
        assert_eq!(s.pop().unwrap(), 2);
        assert!(matches!(s.pop(), Err(CapacityError::StackUnderflow { .. })));
    }
}
