//! Fixed-capacity boolean streak ring.
//!
//! A decision is only trusted once the ring is full and every slot agrees.
//! Until `capacity` values have been pushed the ring is never homogeneous,
//! so a freshly created (or cleared) ring cannot trigger anything.

/// Circular buffer of booleans with homogeneity checks.
#[derive(Debug, Clone)]
pub struct BoolRing {
    slots: Vec<bool>,
    /// Next write position.
    next: usize,
    /// Number of slots written since creation or the last `clear()`.
    filled: usize,
}

impl BoolRing {
    /// Create a ring holding `capacity` values (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![false; capacity.max(1)],
            next: 0,
            filled: 0,
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Values pushed since creation or the last clear, capped at capacity.
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// True once `capacity` values have been pushed.
    pub fn is_full(&self) -> bool {
        self.filled == self.slots.len()
    }

    /// Push a value, overwriting the oldest once full.
    pub fn push(&mut self, value: bool) {
        self.slots[self.next] = value;
        self.next = (self.next + 1) % self.slots.len();
        if self.filled < self.slots.len() {
            self.filled += 1;
        }
    }

    /// Full and every slot is `true`.
    pub fn all_true(&self) -> bool {
        self.is_full() && self.slots.iter().all(|&v| v)
    }

    /// Full and every slot is `false`.
    pub fn all_false(&self) -> bool {
        self.is_full() && self.slots.iter().all(|&v| !v)
    }

    /// Push `value`, then report whether the full ring is all `true`.
    pub fn push_and_check_all_true(&mut self, value: bool) -> bool {
        self.push(value);
        self.all_true()
    }

    /// Push `value`, then report whether the full ring is all `false`.
    pub fn push_and_check_all_false(&mut self, value: bool) -> bool {
        self.push(value);
        self.all_false()
    }

    /// Forget every value; the ring must be refilled before it can agree again.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|v| *v = false);
        self.next = 0;
        self.filled = 0;
    }
}
