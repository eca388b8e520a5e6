//! Outstanding downstream demand.

/// Saturating demand counter. `u64::MAX` means unbounded and never decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Demand(u64);

impl Demand {
    pub const UNBOUNDED: Demand = Demand(u64::MAX);

    pub const fn new() -> Self {
        Demand(0)
    }

    pub fn add(&mut self, n: u64) {
        self.0 = self.0.saturating_add(n);
    }

    pub fn set_unbounded(&mut self) {
        *self = Self::UNBOUNDED;
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn has(&self) -> bool {
        self.0 > 0
    }

    pub fn is_unbounded(&self) -> bool {
        self.0 == u64::MAX
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Consume one unit. Returns false when there was no demand.
    pub fn take_one(&mut self) -> bool {
        match self.0 {
            0 => false,
            u64::MAX => true,
            _ => {
                self.0 -= 1;
                true
            }
        }
    }
}
