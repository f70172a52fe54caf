// Padmap Host Output
// Keyboard, mouse and command effects handed back to the embedding host

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::control::Command;
use crate::Key;

/// Receiver of keyboard and mouse output
///
/// Called only while the engine holds no pad lock.
pub trait HostOutput: Send {
    fn send_key(&mut self, key: Key, down: bool);
    fn send_mouse_button(&mut self, key: Key, down: bool);
    fn move_mouse(&mut self, dx: i32, dy: i32);
    fn scroll(&mut self, dx: i32, dy: i32);
    fn custom_key(&mut self, key: Key, down: bool);
}

/// A command the engine cannot complete by itself
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub command: Command,
    /// Destination user the command applies to
    pub user: usize,
    /// Press edge (only `HoldActiveUser` is dispatched on press)
    pub pressed: bool,
    /// Configuration name for `LoadConfig`
    pub payload: Option<String>,
    pub(crate) mapping: usize,
}

/// Receiver of `Reload` and `LoadConfig`
pub trait CommandSink: Send {
    fn command(&mut self, request: &CommandRequest);
}

/// Output that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl HostOutput for NullOutput {
    fn send_key(&mut self, _key: Key, _down: bool) {}
    fn send_mouse_button(&mut self, _key: Key, _down: bool) {}
    fn move_mouse(&mut self, _dx: i32, _dy: i32) {}
    fn scroll(&mut self, _dx: i32, _dy: i32) {}
    fn custom_key(&mut self, _key: Key, _down: bool) {}
}

impl CommandSink for NullOutput {
    fn command(&mut self, request: &CommandRequest) {
        log::debug!("Dropping command {} (no sink installed)", request.command);
    }
}

/// One emitted host effect
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    Key { key: Key, down: bool },
    MouseButton { key: Key, down: bool },
    Motion { dx: i32, dy: i32 },
    Scroll { dx: i32, dy: i32 },
    Custom { key: Key, down: bool },
    Command(CommandRequest),
}

/// Output and sink that remember everything they receive
///
/// Clones share one buffer, so a test can keep a handle after giving the
/// engine its own copy.
#[derive(Debug, Clone, Default)]
pub struct RecordingOutput {
    events: Arc<Mutex<Vec<OutputEvent>>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything recorded so far
    pub fn take(&self) -> Vec<OutputEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn events(&self) -> Vec<OutputEvent> {
        self.events.lock().clone()
    }

    /// Sum of all recorded pointer motion
    pub fn total_motion(&self) -> (i32, i32) {
        self.events.lock().iter().fold((0, 0), |(x, y), e| match e {
            OutputEvent::Motion { dx, dy } => (x + dx, y + dy),
            _ => (x, y),
        })
    }

    fn push(&self, event: OutputEvent) {
        self.events.lock().push(event);
    }
}

impl HostOutput for RecordingOutput {
    fn send_key(&mut self, key: Key, down: bool) {
        self.push(OutputEvent::Key { key, down });
    }

    fn send_mouse_button(&mut self, key: Key, down: bool) {
        self.push(OutputEvent::MouseButton { key, down });
    }

    fn move_mouse(&mut self, dx: i32, dy: i32) {
        self.push(OutputEvent::Motion { dx, dy });
    }

    fn scroll(&mut self, dx: i32, dy: i32) {
        self.push(OutputEvent::Scroll { dx, dy });
    }

    fn custom_key(&mut self, key: Key, down: bool) {
        self.push(OutputEvent::Custom { key, down });
    }
}

impl CommandSink for RecordingOutput {
    fn command(&mut self, request: &CommandRequest) {
        self.push(OutputEvent::Command(request.clone()));
    }
}

/// Fractional motion carried between flushes
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct MotionRemainder {
    pointer: (f64, f64),
    wheel: (f64, f64),
}

fn whole(acc: &mut f64) -> i32 {
    let whole = acc.trunc();
    *acc -= whole;
    whole as i32
}

/// Host-facing endpoints owned by the engine
pub(crate) struct Host {
    output: Mutex<Box<dyn HostOutput>>,
    sink: Mutex<Box<dyn CommandSink>>,
    remainder: Mutex<MotionRemainder>,
    pending: Mutex<VecDeque<CommandRequest>>,
}

impl Host {
    pub(crate) fn new() -> Self {
        Self {
            output: Mutex::new(Box::new(NullOutput)),
            sink: Mutex::new(Box::new(NullOutput)),
            remainder: Mutex::new(MotionRemainder::default()),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn set_output(&self, output: Box<dyn HostOutput>) {
        *self.output.lock() = output;
    }

    pub(crate) fn set_sink(&self, sink: Box<dyn CommandSink>) {
        *self.sink.lock() = sink;
    }

    pub(crate) fn output(&self) -> parking_lot::MutexGuard<'_, Box<dyn HostOutput>> {
        self.output.lock()
    }

    /// Add fractional motion and emit whatever whole units accumulated
    pub(crate) fn flush_motion(&self, pointer: (f64, f64), wheel: (f64, f64)) {
        let (mx, my, wx, wy) = {
            let mut rem = self.remainder.lock();
            rem.pointer.0 += pointer.0;
            rem.pointer.1 += pointer.1;
            rem.wheel.0 += wheel.0;
            rem.wheel.1 += wheel.1;
            (
                whole(&mut rem.pointer.0),
                whole(&mut rem.pointer.1),
                whole(&mut rem.wheel.0),
                whole(&mut rem.wheel.1),
            )
        };
        let mut output = self.output.lock();
        if mx != 0 || my != 0 {
            output.move_mouse(mx, my);
        }
        if wx != 0 || wy != 0 {
            output.scroll(wx, wy);
        }
    }

    pub(crate) fn push_command(&self, request: CommandRequest) {
        self.pending.lock().push_back(request);
    }

    pub(crate) fn pop_command(&self) -> Option<CommandRequest> {
        self.pending.lock().pop_front()
    }

    pub(crate) fn forward_command(&self, request: &CommandRequest) {
        self.sink.lock().command(request);
    }

    pub(crate) fn clear_motion(&self) {
        *self.remainder.lock() = MotionRemainder::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motion_carries_fraction() {
        let host = Host::new();
        let recorder = RecordingOutput::new();
        host.set_output(Box::new(recorder.clone()));
        host.flush_motion((0.6, 0.0), (0.0, 0.0));
        assert!(recorder.events().is_empty());
        host.flush_motion((0.6, -2.5), (0.0, 0.0));
        assert_eq!(recorder.take(), vec![OutputEvent::Motion { dx: 1, dy: -2 }]);
        host.flush_motion((0.0, -0.5), (0.0, 1.0));
        assert_eq!(
            recorder.take(),
            vec![
                OutputEvent::Motion { dx: 0, dy: -1 },
                OutputEvent::Scroll { dx: 0, dy: 1 }
            ]
        );
    }

    #[test]
    fn test_commands_queue_in_order() {
        let host = Host::new();
        for user in 0..3 {
            host.push_command(CommandRequest {
                command: Command::SetActiveUser,
                user,
                pressed: false,
                payload: None,
                mapping: 0,
            });
        }
        assert_eq!(host.pop_command().map(|r| r.user), Some(0));
        assert_eq!(host.pop_command().map(|r| r.user), Some(1));
        assert_eq!(host.pop_command().map(|r| r.user), Some(2));
        assert!(host.pop_command().is_none());
    }
}
