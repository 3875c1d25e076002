// src/cluster/state.rs

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a cluster instance.
///
/// `NotStarted → Starting → Ready ↔ Busy`; any live state can fall to
/// `Crashed` on external failure; orderly teardown goes through
/// `Stopping → Destroyed`. A `Destroyed` instance is never re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InstanceState {
    NotStarted = 0,
    Starting = 1,
    Ready = 2,
    Busy = 3,
    Stopping = 4,
    Crashed = 5,
    Destroyed = 6,
}

impl InstanceState {
    fn from_u8(v: u8) -> InstanceState {
        match v {
            0 => InstanceState::NotStarted,
            1 => InstanceState::Starting,
            2 => InstanceState::Ready,
            3 => InstanceState::Busy,
            4 => InstanceState::Stopping,
            5 => InstanceState::Crashed,
            _ => InstanceState::Destroyed,
        }
    }

    /// States that count against the pool's desired capacity.
    pub fn is_live(self) -> bool {
        !matches!(self, InstanceState::Crashed | InstanceState::Destroyed)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::NotStarted => "not-started",
            InstanceState::Starting => "starting",
            InstanceState::Ready => "ready",
            InstanceState::Busy => "busy",
            InstanceState::Stopping => "stopping",
            InstanceState::Crashed => "crashed",
            InstanceState::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Atomic cell over [`InstanceState`].
///
/// The engine core is the only writer; liveness watchers and other workers
/// read it off-loop, which is why this is the one piece of engine state
/// behind an atomic.
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: InstanceState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> InstanceState {
        InstanceState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, state: InstanceState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Transition `from → to`; returns false if the current state is not
    /// `from` (somebody else already moved it).
    pub fn compare_swap(&self, from: InstanceState, to: InstanceState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl fmt::Debug for StateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateCell({})", self.load())
    }
}
