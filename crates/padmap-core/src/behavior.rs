// Padmap Mapping Behavior
// Per-mapping transforms (toggle, turbo, add) and timer selection

use std::time::Duration;

use crate::control::{CellRef, ControlType};
use crate::mapping::{Mapping, TimerKind};
use crate::settings::{EngineSettings, MAX_RATE};

/// Outcome of pre-processing one source transition
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Transition {
    /// Effective state before this event
    pub old: bool,
    /// Effective state after this event
    pub new: bool,
    /// Whether the destination should be written at all
    pub emit: bool,
    /// Source strength scaled by the mapping multiplier
    pub strength: f64,
}

/// What to do with the mapping's timer after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerPlan {
    Keep,
    Stop,
    Once(Duration, TimerKind),
    Repeating(Duration, TimerKind),
}

/// Apply the mapping's transforms to a raw source transition
///
/// Returns `None` when the event is swallowed entirely.
pub(crate) fn pre_process(
    mapping: &mut Mapping,
    src: &ControlType,
    dst: &ControlType,
    down: bool,
    strength: f64,
    reset: bool,
) -> Option<Transition> {
    let options = mapping.options;
    let rt = &mut mapping.runtime;
    let old = rt.active;

    if dst.flags.relative && !down {
        rt.raw_down = false;
        rt.active = false;
        return Some(Transition {
            old,
            new: false,
            emit: false,
            strength: 0.0,
        });
    }

    // Conditional accumulation outlives the press until its conditions drop
    if options.add && !down && !mapping.conditions.is_empty() && !reset {
        rt.raw_down = false;
        return None;
    }

    let rising = down && !rt.raw_down;
    rt.raw_down = down && !reset;

    let new = if options.toggle {
        if reset {
            rt.toggle_value = false;
        } else if rising {
            rt.toggle_value = !rt.toggle_value;
        }
        rt.toggle_value
    } else {
        down && !reset
    };

    let filtered = (!dst.flags.repeatable && src.flags.repeatable)
        || options.toggle
        || options.turbo
        || options.reset
        || reset;
    if new == old && filtered {
        return None;
    }

    let mut emit = true;
    if options.turbo {
        if new {
            rt.turbo_value = true;
        } else {
            if !rt.turbo_value {
                emit = false;
            }
            rt.turbo_value = false;
        }
    }

    rt.active = new;
    let strength = if new { strength * mapping.strength } else { 0.0 };
    Some(Transition {
        old,
        new,
        emit,
        strength,
    })
}

fn seconds(rate: f64) -> Duration {
    Duration::try_from_secs_f64(rate.clamp(0.001, MAX_RATE)).unwrap_or(Duration::from_millis(1))
}

/// Pick the timer that follows a transition; at most one runs per mapping
pub(crate) fn post_process(
    mapping: &Mapping,
    src: &ControlType,
    dst: &ControlType,
    settings: &EngineSettings,
    old: bool,
    new: bool,
) -> TimerPlan {
    if !new {
        return TimerPlan::Stop;
    }
    let rising = !old;
    let start = |plan: TimerPlan| if rising { plan } else { TimerPlan::Keep };

    if mapping.options.turbo {
        return start(TimerPlan::Repeating(seconds(mapping.rate), TimerKind::Turbo));
    }
    if matches!(dst.cell, CellRef::Rotator { .. }) {
        return start(TimerPlan::Repeating(settings.rotate_interval, TimerKind::Rotate));
    }
    if src.flags.relative && !dst.flags.relative {
        // Every relative event extends the hold
        return TimerPlan::Once(seconds(mapping.rate), TimerKind::Release);
    }
    if !src.flags.relative && (dst.flags.relative || mapping.options.add) {
        return start(TimerPlan::Repeating(settings.motion_interval, TimerKind::Repeat));
    }
    if (!src.flags.repeatable || mapping.options.toggle) && dst.flags.repeatable {
        return start(TimerPlan::Once(settings.key_repeat_delay, TimerKind::KeyRepeatDelay));
    }
    TimerPlan::Keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;
    use crate::control::builtin_type;
    use crate::mapping::MappingOption;
    use crate::Key;

    fn run(m: &mut Mapping, down: bool) -> Option<Transition> {
        let src = builtin_type(m.source);
        let dst = builtin_type(m.target);
        pre_process(m, &src, &dst, down, 1.0, false)
    }

    fn plan(m: &Mapping, old: bool, new: bool) -> TimerPlan {
        let src = builtin_type(m.source);
        let dst = builtin_type(m.target);
        post_process(m, &src, &dst, &EngineSettings::default(), old, new)
    }

    #[test]
    fn test_plain_press_release() {
        let mut m = Mapping::new(Key::A, Key::PAD_A).with_strength(0.5);
        let t = run(&mut m, true).unwrap();
        assert!(!t.old && t.new && t.emit);
        assert_eq!(t.strength, 0.5);
        // Keyboard auto-repeat into a pad button is a no-op
        assert_eq!(run(&mut m, true), None);
        let t = run(&mut m, false).unwrap();
        assert!(t.old && !t.new);
    }

    #[test]
    fn test_toggle_flips_on_press_only() {
        let mut m = Mapping::new(Key::PAD_A, Key::PAD_B).with_option(MappingOption::Toggle);
        assert!(run(&mut m, true).unwrap().new);
        assert_eq!(run(&mut m, false), None);
        assert!(!run(&mut m, true).unwrap().new);
        assert_eq!(run(&mut m, false), None);
        assert!(!m.runtime.active);
    }

    #[test]
    fn test_reset_pass_forces_toggle_off() {
        let mut m = Mapping::new(Key::PAD_A, Key::PAD_B).with_option(MappingOption::Toggle);
        run(&mut m, true);
        run(&mut m, false);
        let src = builtin_type(m.source);
        let dst = builtin_type(m.target);
        let t = pre_process(&mut m, &src, &dst, false, 0.0, true).unwrap();
        assert!(t.old && !t.new);
        assert!(!m.runtime.toggle_value);
        assert_eq!(pre_process(&mut m, &src, &dst, false, 0.0, true), None);
    }

    #[test]
    fn test_turbo_release_while_off_is_silent() {
        let mut m = Mapping::new(Key::PAD_A, Key::PAD_B).with_option(MappingOption::Turbo);
        assert!(run(&mut m, true).unwrap().emit);
        m.runtime.turbo_value = false;
        let t = run(&mut m, false).unwrap();
        assert!(!t.emit);
    }

    #[test]
    fn test_relative_destination_ignores_release() {
        let mut m = Mapping::new(Key::PAD_A, Key::MOUSE_RIGHT);
        run(&mut m, true);
        let t = run(&mut m, false).unwrap();
        assert!(!t.new && !t.emit);
    }

    #[test]
    fn test_conditional_add_release_is_swallowed() {
        let mut m = Mapping::new(Key::PAD_A, Key::L_STICK_RIGHT)
            .with_option(MappingOption::Add)
            .with_condition(Condition::pressed(Key::L_SHIFT));
        assert!(run(&mut m, true).is_some());
        assert_eq!(run(&mut m, false), None);
        assert!(m.runtime.active);

        let mut m = Mapping::new(Key::PAD_A, Key::L_STICK_RIGHT).with_option(MappingOption::Add);
        run(&mut m, true);
        assert!(!run(&mut m, false).unwrap().new);
    }

    #[test]
    fn test_timer_selection() {
        let turbo = Mapping::new(Key::A, Key::PAD_A).with_option(MappingOption::Turbo).with_rate(0.1);
        assert_eq!(
            plan(&turbo, false, true),
            TimerPlan::Repeating(Duration::from_secs_f64(0.1), TimerKind::Turbo)
        );
        assert_eq!(plan(&turbo, true, true), TimerPlan::Keep);
        assert_eq!(plan(&turbo, true, false), TimerPlan::Stop);

        let release = Mapping::new(Key::MOUSE_LEFT, Key::PAD_X).with_rate(0.2);
        assert_eq!(
            plan(&release, true, true),
            TimerPlan::Once(Duration::from_secs_f64(0.2), TimerKind::Release)
        );

        let motion = Mapping::new(Key::PAD_A, Key::MOUSE_UP);
        assert!(matches!(plan(&motion, false, true), TimerPlan::Repeating(_, TimerKind::Repeat)));

        let repeat = Mapping::new(Key::PAD_A, Key::SPACE);
        assert!(matches!(plan(&repeat, false, true), TimerPlan::Once(_, TimerKind::KeyRepeatDelay)));

        let passthrough = Mapping::new(Key::A, Key::B);
        assert_eq!(plan(&passthrough, false, true), TimerPlan::Keep);

        let rotate = Mapping::new(Key::Q, Key::L_STICK_ROTATE_CW);
        assert!(matches!(plan(&rotate, false, true), TimerPlan::Repeating(_, TimerKind::Rotate)));
    }

    #[test]
    fn test_out_of_range_rates_stay_schedulable() {
        let period = |rate: f64| {
            let m = Mapping::new(Key::A, Key::PAD_A).with_option(MappingOption::Turbo).with_rate(rate);
            match plan(&m, false, true) {
                TimerPlan::Repeating(period, TimerKind::Turbo) => period,
                other => panic!("unexpected plan {:?}", other),
            }
        };
        assert_eq!(period(1e20), Duration::from_secs_f64(MAX_RATE));
        assert_eq!(period(0.0), Duration::from_millis(1));
        assert_eq!(period(f64::NAN), Duration::from_millis(1));
    }
}
