// Padmap Timers
// Scheduler seam and a manual clock for deterministic tests

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Opaque handle identifying one scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(pub u64);

/// Source of timer ticks
///
/// The engine only asks for timers; the host delivers expirations back
/// through `Engine::on_timer` on the event thread.
pub trait Scheduler: Send {
    fn schedule_once(&mut self, delay: Duration, token: TimerToken);
    fn schedule_repeating(&mut self, period: Duration, token: TimerToken);
    fn cancel(&mut self, token: TimerToken);
}

#[derive(Debug, Clone, Copy)]
struct PendingTimer {
    token: TimerToken,
    due: Duration,
    period: Option<Duration>,
    seq: u64,
}

#[derive(Debug, Default)]
struct ManualClock {
    now: Duration,
    timers: Vec<PendingTimer>,
    seq: u64,
}

impl ManualClock {
    fn insert(&mut self, token: TimerToken, due: Duration, period: Option<Duration>) {
        self.timers.retain(|t| t.token != token);
        self.seq += 1;
        self.timers.push(PendingTimer {
            token,
            due,
            period,
            seq: self.seq,
        });
    }
}

/// Fake clock driven explicitly by tests and replays
///
/// Clones share the same clock, so one handle can be boxed into the engine
/// while another advances time.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    inner: Arc<Mutex<ManualClock>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current fake time
    pub fn now(&self) -> Duration {
        self.inner.lock().now
    }

    pub fn now_ms(&self) -> u64 {
        self.now().as_millis() as u64
    }

    /// Number of armed timers
    pub fn pending(&self) -> usize {
        self.inner.lock().timers.len()
    }

    pub fn is_armed(&self, token: TimerToken) -> bool {
        self.inner.lock().timers.iter().any(|t| t.token == token)
    }

    /// Pop the earliest timer due at or before `until`
    ///
    /// The clock moves to the timer's due time. Repeating timers are re-armed
    /// one period later; ties fire in scheduling order.
    pub fn next_due(&self, until: Duration) -> Option<(TimerToken, Duration)> {
        let mut clock = self.inner.lock();
        let index = clock
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= until)
            .min_by_key(|(_, t)| (t.due, t.seq))
            .map(|(i, _)| i)?;
        let timer = clock.timers.remove(index);
        clock.now = clock.now.max(timer.due);
        if let Some(period) = timer.period {
            let due = timer.due + period;
            clock.insert(timer.token, due, Some(period));
        }
        Some((timer.token, timer.due))
    }

    /// Move the clock forward without firing anything
    pub fn advance_to(&self, time: Duration) {
        let mut clock = self.inner.lock();
        clock.now = clock.now.max(time);
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&mut self, delay: Duration, token: TimerToken) {
        let mut clock = self.inner.lock();
        let due = clock.now + delay;
        clock.insert(token, due, None);
    }

    fn schedule_repeating(&mut self, period: Duration, token: TimerToken) {
        let mut clock = self.inner.lock();
        let due = clock.now + period;
        clock.insert(token, due, Some(period.max(Duration::from_millis(1))));
    }

    fn cancel(&mut self, token: TimerToken) {
        self.inner.lock().timers.retain(|t| t.token != token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_once_fires_once() {
        let mut clock = ManualScheduler::new();
        clock.schedule_once(ms(50), TimerToken(1));
        assert_eq!(clock.next_due(ms(49)), None);
        assert_eq!(clock.next_due(ms(100)), Some((TimerToken(1), ms(50))));
        assert_eq!(clock.now(), ms(50));
        assert_eq!(clock.next_due(ms(100)), None);
    }

    #[test]
    fn test_repeating_rearms() {
        let mut clock = ManualScheduler::new();
        clock.schedule_repeating(ms(10), TimerToken(7));
        let fired: Vec<_> = std::iter::from_fn(|| clock.next_due(ms(35))).collect();
        assert_eq!(
            fired,
            vec![(TimerToken(7), ms(10)), (TimerToken(7), ms(20)), (TimerToken(7), ms(30))]
        );
        assert!(clock.is_armed(TimerToken(7)));
    }

    #[test]
    fn test_cancel_and_order() {
        let mut clock = ManualScheduler::new();
        clock.schedule_once(ms(20), TimerToken(1));
        clock.schedule_once(ms(10), TimerToken(2));
        clock.schedule_once(ms(10), TimerToken(3));
        clock.cancel(TimerToken(1));
        assert_eq!(clock.next_due(ms(100)).map(|t| t.0), Some(TimerToken(2)));
        assert_eq!(clock.next_due(ms(100)).map(|t| t.0), Some(TimerToken(3)));
        assert_eq!(clock.next_due(ms(100)), None);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn test_schedule_relative_to_now() {
        let mut clock = ManualScheduler::new();
        clock.advance_to(ms(100));
        clock.schedule_once(ms(5), TimerToken(9));
        assert_eq!(clock.next_due(ms(200)), Some((TimerToken(9), ms(105))));
    }
}
