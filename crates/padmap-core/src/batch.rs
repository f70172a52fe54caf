// Padmap Change Batch
// Collects every mutation of one input event and commits it once

use parking_lot::MutexGuard;
use smallvec::SmallVec;

use crate::device::{PadState, Users};
use crate::output::{CommandRequest, Host};
use crate::Key;

/// Host effect queued until commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Effect {
    Key { key: Key, down: bool },
    MouseButton { key: Key, down: bool },
    Custom { key: Key, down: bool },
}

/// Transaction scoped to one external event (input or timer tick)
///
/// Pads are locked lazily, once each. On drop the batch bumps the version of
/// every changed pad, releases all locks, then fires callbacks and flushes
/// host output. Readers therefore never observe half of an event.
pub(crate) struct ChangeBatch<'a> {
    users: &'a Users,
    host: &'a Host,
    guards: SmallVec<[(usize, MutexGuard<'a, PadState>); 4]>,
    changed: SmallVec<[(usize, u64); 4]>,
    effects: Vec<Effect>,
    pointer: (f64, f64),
    wheel: (f64, f64),
    motion: bool,
    commands: Vec<CommandRequest>,
}

impl<'a> ChangeBatch<'a> {
    pub(crate) fn new(users: &'a Users, host: &'a Host) -> Self {
        Self {
            users,
            host,
            guards: SmallVec::new(),
            changed: SmallVec::new(),
            effects: Vec::new(),
            pointer: (0.0, 0.0),
            wheel: (0.0, 0.0),
            motion: false,
            commands: Vec::new(),
        }
    }

    pub(crate) fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Lock `user` (once per batch) and borrow its state
    pub(crate) fn user(&mut self, user: usize) -> &mut PadState {
        let index = match self.guards.iter().position(|(u, _)| *u == user) {
            Some(index) => index,
            None => {
                let users = self.users;
                self.guards.push((user, users.lock(user)));
                self.guards.len() - 1
            }
        };
        &mut self.guards[index].1
    }

    /// Mark `user` as changed; the first timestamp of the batch wins
    pub(crate) fn change_user(&mut self, user: usize, timestamp_ms: u64) {
        if !self.changed.iter().any(|(u, _)| *u == user) {
            self.changed.push((user, timestamp_ms));
        }
    }

    pub(crate) fn effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    /// Queue pointer motion, flushed once at commit
    pub(crate) fn change_mouse_motion(&mut self, dx: f64, dy: f64) {
        self.pointer.0 += dx;
        self.pointer.1 += dy;
        self.motion = true;
    }

    pub(crate) fn change_wheel(&mut self, dx: f64, dy: f64) {
        self.wheel.0 += dx;
        self.wheel.1 += dy;
        self.motion = true;
    }

    pub(crate) fn command(&mut self, request: CommandRequest) {
        self.commands.push(request);
    }
}

impl Drop for ChangeBatch<'_> {
    fn drop(&mut self) {
        let mut snapshots: SmallVec<[_; 4]> = SmallVec::new();
        for &(user, timestamp_ms) in &self.changed {
            if let Some((_, guard)) = self.guards.iter_mut().find(|(u, _)| *u == user) {
                guard.commit(timestamp_ms);
                snapshots.push(guard.snapshot(user));
            }
        }
        self.guards.clear();

        for snapshot in &snapshots {
            for callback in self.users.callbacks(snapshot.user) {
                callback(snapshot);
            }
        }

        if !self.effects.is_empty() {
            let mut output = self.host.output();
            for effect in self.effects.drain(..) {
                match effect {
                    Effect::Key { key, down } => output.send_key(key, down),
                    Effect::MouseButton { key, down } => output.send_mouse_button(key, down),
                    Effect::Custom { key, down } => output.custom_key(key, down),
                }
            }
        }

        if self.motion {
            self.host.flush_motion(self.pointer, self.wheel);
        }

        for request in self.commands.drain(..) {
            self.host.push_command(request);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{OutputEvent, RecordingOutput};
    use crate::slot::Slot;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_version_bumps_once_per_batch() {
        let users = Users::new(2);
        let host = Host::new();
        {
            let mut batch = ChangeBatch::new(&users, &host);
            batch.user(0).buttons[0].set(Slot::new(0).unwrap(), true, false);
            batch.change_user(0, 10);
            batch.user(0).buttons[1].set(Slot::new(0).unwrap(), true, false);
            batch.change_user(0, 20);
        }
        let snap = users.snapshot(0).unwrap();
        assert_eq!(snap.version, 1);
        assert_eq!(snap.timestamp_ms, 10);
        assert_eq!(snap.buttons, 0b11);
        assert_eq!(users.snapshot(1).unwrap().version, 0);
    }

    #[test]
    fn test_callbacks_run_unlocked() {
        let users = Arc::new(Users::new(1));
        let host = Host::new();
        let reader = Arc::clone(&users);
        let saw = Arc::new(AtomicU64::new(0));
        let saw_cb = Arc::clone(&saw);
        // Reading the pad from inside the callback would deadlock if the lock were still held
        users.register_callback(0, move |snap| {
            let again = reader.snapshot(0).unwrap();
            assert_eq!(again.version, snap.version);
            saw_cb.store(snap.version, Ordering::SeqCst);
        });
        {
            let mut batch = ChangeBatch::new(&users, &host);
            batch.user(0).connected = false;
            batch.change_user(0, 1);
        }
        assert_eq!(saw.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unchanged_user_fires_nothing() {
        let users = Users::new(1);
        let host = Host::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        users.register_callback(0, move |_| flag.store(true, Ordering::SeqCst));
        {
            let mut batch = ChangeBatch::new(&users, &host);
            batch.user(0);
        }
        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(users.snapshot(0).unwrap().version, 0);
    }

    #[test]
    fn test_effects_and_motion_flush_after_commit() {
        let users = Users::new(1);
        let host = Host::new();
        let recorder = RecordingOutput::new();
        host.set_output(Box::new(recorder.clone()));
        {
            let mut batch = ChangeBatch::new(&users, &host);
            batch.effect(Effect::Key { key: Key::A, down: true });
            batch.change_mouse_motion(2.0, 0.0);
            batch.change_mouse_motion(3.0, 1.0);
            assert!(recorder.events().is_empty());
        }
        assert_eq!(
            recorder.take(),
            vec![
                OutputEvent::Key { key: Key::A, down: true },
                OutputEvent::Motion { dx: 5, dy: 1 }
            ]
        );
    }
}
