//! Working-state slot: the single block-in-progress state owned by the lifecycle.
//!
//! # Invariants
//! - At most one working state exists at a time.
//! - The slot is filled by FinalizeBlock and emptied by Commit (or by a failed FinalizeBlock).
//! - Opening over a leftover state discards it; a leftover means an earlier block was never
//!   committed and is logged as an error.

use tracing::error;

#[derive(Debug)]
struct Slot<S> {
    height: u64,
    state: S,
}

#[derive(Debug)]
pub struct WorkingState<S> {
    slot: Option<Slot<S>>,
}

impl<S> Default for WorkingState<S> {
    fn default() -> Self {
        Self { slot: None }
    }
}

impl<S> WorkingState<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `state` as the working state for `height` and returns it for mutation.
    pub fn open(&mut self, height: u64, state: S) -> &mut S {
        if let Some(stale) = self.slot.take() {
            error!(
                stale_height = stale.height,
                height, "discarding uncommitted working state"
            );
        }
        &mut self.slot.insert(Slot { height, state }).state
    }

    /// Empties the slot, handing back the state and its height.
    pub fn take(&mut self) -> Option<(u64, S)> {
        self.slot.take().map(|slot| (slot.height, slot.state))
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }

    pub fn is_clear(&self) -> bool {
        self.slot.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_take_clears() {
        let mut working = WorkingState::new();
        assert!(working.is_clear());
        *working.open(3, 10u32) += 1;
        assert_eq!(working.take(), Some((3, 11)));
        assert!(working.is_clear());
        assert_eq!(working.take(), None);
    }

    #[test]
    fn test_open_replaces_leftover() {
        let mut working = WorkingState::new();
        working.open(1, "stale");
        working.open(2, "fresh");
        assert_eq!(working.take(), Some((2, "fresh")));
    }

    #[test]
    fn test_clear() {
        let mut working = WorkingState::new();
        working.open(1, 0u8);
        working.clear();
        assert!(working.is_clear());
        assert_eq!(working.take(), None);
    }
}
