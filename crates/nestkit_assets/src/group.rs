//! Settle barrier for in-flight completions.
//!
//! The group is idle only when no completion is being handled and no
//! commit of their staged writes is outstanding. The member whose departure
//! empties the group receives a [`Settlement`] and keeps the group busy
//! until it reports the flush done.

use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct GroupState {
    active: usize,
    settling: bool,
    // A member left while a settlement was flushing.
    dirty: bool,
}

/// Counts completions being handled and hands the last one the commit.
#[derive(Default)]
pub struct CompletionGroup {
    state: Arc<Mutex<GroupState>>,
}

impl CompletionGroup {
    /// Creates an idle group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a completion; the returned ticket must be left when done.
    pub fn enter(&self) -> GroupTicket {
        self.state.lock().active += 1;
        GroupTicket {
            state: Some(Arc::clone(&self.state)),
        }
    }

    /// Returns the number of completions being handled.
    pub fn active(&self) -> usize {
        self.state.lock().active
    }

    /// Returns true if nothing is being handled or committed.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.active == 0 && !state.settling
    }
}

/// Membership in a [`CompletionGroup`]. Dropping it leaves the group.
pub struct GroupTicket {
    state: Option<Arc<Mutex<GroupState>>>,
}

impl GroupTicket {
    /// Leaves the group.
    ///
    /// Returns a settlement if the caller is responsible for committing
    /// what the group staged.
    pub fn leave(mut self) -> Option<Settlement> {
        self.release()
    }

    fn release(&mut self) -> Option<Settlement> {
        let state = self.state.take()?;
        let settle = {
            let mut guard = state.lock();
            guard.active -= 1;
            if guard.settling {
                guard.dirty = true;
                false
            } else if guard.active == 0 {
                guard.settling = true;
                true
            } else {
                false
            }
        };
        settle.then(|| Settlement { state: Some(state) })
    }
}

impl Drop for GroupTicket {
    fn drop(&mut self) {
        // A dropped settlement releases the group without a commit.
        drop(self.release());
    }
}

/// What a settlement holder does after a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleStep {
    /// Members left during the flush; flush again.
    Again,
    /// Everything is committed and the group is idle.
    Idle,
    /// New members are still running; the last of them settles.
    Busy,
}

/// The obligation to commit a group's staged writes.
pub struct Settlement {
    state: Option<Arc<Mutex<GroupState>>>,
}

impl Settlement {
    /// Reports a finished flush.
    pub fn flushed(&mut self) -> SettleStep {
        let Some(state) = &self.state else {
            return SettleStep::Idle;
        };
        let step = {
            let mut guard = state.lock();
            if guard.dirty && guard.active == 0 {
                guard.dirty = false;
                SettleStep::Again
            } else {
                guard.dirty = false;
                guard.settling = false;
                if guard.active == 0 {
                    SettleStep::Idle
                } else {
                    SettleStep::Busy
                }
            }
        };
        if step != SettleStep::Again {
            self.state = None;
        }
        step
    }
}

impl Drop for Settlement {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            let mut guard = state.lock();
            guard.settling = false;
            guard.dirty = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_ticket_settles() {
        let group = CompletionGroup::new();
        let a = group.enter();
        let b = group.enter();
        assert_eq!(group.active(), 2);

        assert!(a.leave().is_none());
        let mut settlement = b.leave().unwrap();
        assert_eq!(group.active(), 0);
        assert!(!group.is_idle());

        assert_eq!(settlement.flushed(), SettleStep::Idle);
        assert!(group.is_idle());
    }

    #[test]
    fn leaving_during_flush_requires_another() {
        let group = CompletionGroup::new();
        let mut settlement = group.enter().leave().unwrap();

        // Enters and leaves while the first commit is running.
        assert!(group.enter().leave().is_none());
        assert!(!group.is_idle());

        assert_eq!(settlement.flushed(), SettleStep::Again);
        assert!(!group.is_idle());
        assert_eq!(settlement.flushed(), SettleStep::Idle);
        assert!(group.is_idle());
    }

    #[test]
    fn running_member_takes_over() {
        let group = CompletionGroup::new();
        let mut settlement = group.enter().leave().unwrap();
        let late = group.enter();

        assert_eq!(settlement.flushed(), SettleStep::Busy);
        assert!(!group.is_idle());

        let mut next = late.leave().unwrap();
        assert_eq!(next.flushed(), SettleStep::Idle);
        assert!(group.is_idle());
    }

    #[test]
    fn dropped_ticket_and_settlement_release_the_group() {
        let group = CompletionGroup::new();
        drop(group.enter());
        assert!(group.is_idle());
    }
}
