// Padmap Virtual Devices
// Per-user virtual pad records, snapshots and change callbacks

use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::axis::{StickShape, StickState, TriggerState};
use crate::control::{builtin_type, CellRef};
use crate::slot::ButtonCell;
use crate::Key;

/// Upper bound on virtual pads
pub const MAX_USERS: usize = 8;

/// Buttons in a pad report
pub const BUTTON_COUNT: usize = 15;

/// Live state of one virtual pad
#[derive(Debug, Clone)]
pub struct PadState {
    pub buttons: [ButtonCell; BUTTON_COUNT],
    pub triggers: [TriggerState; 2],
    pub sticks: [StickState; 2],
    pub connected: bool,
    version: u64,
    timestamp_ms: u64,
}

impl Default for PadState {
    fn default() -> Self {
        Self {
            buttons: Default::default(),
            triggers: Default::default(),
            sticks: Default::default(),
            connected: true,
            version: 0,
            timestamp_ms: 0,
        }
    }
}

impl PadState {
    /// Number of committed changes
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Record one committed change
    pub(crate) fn commit(&mut self, timestamp_ms: u64) {
        self.version += 1;
        self.timestamp_ms = timestamp_ms;
    }

    /// Bitmask of pressed buttons in report order
    pub fn button_mask(&self) -> u16 {
        self.buttons
            .iter()
            .enumerate()
            .filter(|(_, b)| b.pressed())
            .fold(0, |mask, (i, _)| mask | (1 << i))
    }

    /// Copy out the visible values
    pub fn snapshot(&self, user: usize) -> PadSnapshot {
        let (lx, ly) = self.sticks[0].value();
        let (rx, ry) = self.sticks[1].value();
        PadSnapshot {
            user,
            connected: self.connected,
            buttons: self.button_mask(),
            triggers: [self.triggers[0].value(), self.triggers[1].value()],
            axes: [lx, ly, rx, ry],
            version: self.version,
            timestamp_ms: self.timestamp_ms,
        }
    }

    /// Drop every contribution; true if any visible value changed
    pub fn release_all(&mut self) -> bool {
        let mut changed = false;
        for button in &mut self.buttons {
            changed |= button.release_all();
        }
        for trigger in &mut self.triggers {
            changed |= trigger.release_all();
        }
        for stick in &mut self.sticks {
            changed |= stick.release_all();
        }
        changed
    }

    /// Return to the power-on state, forgetting slot ownership
    ///
    /// Version and timestamp survive so readers keep seeing a monotonic counter.
    pub fn reset(&mut self, shape: StickShape, connected: bool) -> bool {
        let before = self.snapshot(0);
        let version = self.version;
        let timestamp_ms = self.timestamp_ms;
        *self = PadState {
            version,
            timestamp_ms,
            connected,
            ..PadState::default()
        };
        for stick in &mut self.sticks {
            stick.shape = shape;
        }
        self.snapshot(0) != before
    }
}

/// Consistent copy of one pad, as seen by readers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PadSnapshot {
    pub user: usize,
    pub connected: bool,
    /// Pressed buttons, bit `i` for report button `i`
    pub buttons: u16,
    /// Left and right trigger, 0.0..=1.0
    pub triggers: [f64; 2],
    /// LX, LY, RX, RY in -1.0..=1.0, up and right positive
    pub axes: [f64; 4],
    pub version: u64,
    pub timestamp_ms: u64,
}

impl PadSnapshot {
    /// True if the given gamepad button control is pressed
    pub fn button(&self, key: Key) -> bool {
        match builtin_type(key).cell {
            CellRef::Button(index) => self.buttons & (1 << index) != 0,
            _ => false,
        }
    }

    /// Trigger value for `PadLT` / `PadRT`
    pub fn trigger(&self, key: Key) -> f64 {
        match builtin_type(key).cell {
            CellRef::Trigger(index) => self.triggers[index],
            _ => 0.0,
        }
    }

    /// (x, y) of stick 0 (left) or 1 (right)
    pub fn stick(&self, stick: usize) -> (f64, f64) {
        (self.axes[stick * 2], self.axes[stick * 2 + 1])
    }
}

/// Callback fired after a pad change has been committed
pub type PadCallback = Arc<dyn Fn(&PadSnapshot) + Send + Sync>;

#[derive(Default)]
struct UserRecord {
    state: Mutex<PadState>,
    callbacks: Mutex<Vec<PadCallback>>,
}

/// All virtual pads, shared between the event thread and readers
///
/// Each pad has its own lock. Readers take one lock at a time; only a change
/// batch holds several, always releasing them before callbacks run.
pub struct Users {
    records: Vec<UserRecord>,
    count: AtomicUsize,
}

impl std::fmt::Debug for Users {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Users").field("count", &self.len()).finish()
    }
}

impl Users {
    /// Create `count` pads (clamped to 1..=MAX_USERS)
    pub fn new(count: usize) -> Self {
        Self {
            records: (0..MAX_USERS).map(|_| UserRecord::default()).collect(),
            count: AtomicUsize::new(count.clamp(1, MAX_USERS)),
        }
    }

    /// Number of configured pads
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn set_len(&self, count: usize) {
        self.count.store(count.clamp(1, MAX_USERS), Ordering::Release);
    }

    /// Consistent snapshot of one pad
    pub fn snapshot(&self, user: usize) -> Option<PadSnapshot> {
        if user >= self.len() {
            return None;
        }
        Some(self.records[user].state.lock().snapshot(user))
    }

    /// Register a callback fired after every committed change of `user`
    pub fn register_callback<F>(&self, user: usize, callback: F) -> bool
    where
        F: Fn(&PadSnapshot) + Send + Sync + 'static,
    {
        let Some(record) = self.records.get(user) else {
            return false;
        };
        record.callbacks.lock().push(Arc::new(callback));
        true
    }

    /// Drop every callback registered for `user`
    pub fn clear_callbacks(&self, user: usize) {
        if let Some(record) = self.records.get(user) {
            record.callbacks.lock().clear();
        }
    }

    pub(crate) fn lock(&self, user: usize) -> MutexGuard<'_, PadState> {
        self.records[user].state.lock()
    }

    pub(crate) fn callbacks(&self, user: usize) -> Vec<PadCallback> {
        self.records[user].callbacks.lock().clone()
    }
}
