use std::cell::Cell;

/// A flag that can be set from a shared reference and consumed once.
pub struct Dirty(Cell<bool>);

impl Dirty {
    pub fn smudged() -> Self {
        Self(Cell::new(true))
    }

    /// Mark the flag as dirty.
    pub fn smudge(&self) {
        self.0.replace(true);
    }

    pub fn is_dirty(&self) -> bool {
        self.0.get()
    }

    /// Returns whether the flag was dirty and resets it.
    pub fn take(&self) -> bool {
        self.0.replace(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_resets_the_flag() {
        let dirty = Dirty::smudged();
        assert!(dirty.take());
        assert!(!dirty.is_dirty());
        assert!(!dirty.take());

        dirty.smudge();
        assert!(dirty.is_dirty());
    }
}
