// Padmap Mapping
// One compiled source → destination rule and its runtime latch state

use std::fmt;
use std::str::FromStr;
use strum_macros::{Display, EnumIter, EnumString};

use crate::condition::Condition;
use crate::slot::Slot;
use crate::timer::TimerToken;
use crate::Key;

/// Which user a mapping endpoint refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UserRef {
    /// Whoever is the active user when the event happens
    #[default]
    Active,
    /// A fixed user, 0-based
    Index(usize),
    /// Every configured user
    All,
}

impl UserRef {
    /// True if an event from `user` matches this reference
    pub fn matches(self, user: usize, active_user: usize) -> bool {
        match self {
            UserRef::Active => user == active_user,
            UserRef::Index(index) => user == index,
            UserRef::All => true,
        }
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRef::Active => write!(f, "active"),
            UserRef::Index(index) => write!(f, "{}", index + 1),
            UserRef::All => write!(f, "all"),
        }
    }
}

impl FromStr for UserRef {
    type Err = String;

    /// Parses `active`, `all` or a 1-based user number
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(UserRef::Active),
            "all" => Ok(UserRef::All),
            other => match other.parse::<usize>() {
                Ok(n) if n >= 1 => Ok(UserRef::Index(n - 1)),
                _ => Err(format!("Invalid user reference: {}", s)),
            },
        }
    }
}

/// Behavioral option names as written in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MappingOption {
    /// Let the physical event through to the OS as well
    Forward,
    /// Mask non-replacing contributions to the same cell while held
    Replace,
    /// Press toggles the output on and off
    Toggle,
    /// Output blinks at `rate` while held
    Turbo,
    /// Accumulate into the destination over time
    Add,
    /// A press clears accumulated `Add` contributions in the destination
    Reset,
}

/// Option flags of a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MappingOptions {
    pub forward: bool,
    pub replace: bool,
    pub toggle: bool,
    pub turbo: bool,
    pub add: bool,
    pub reset: bool,
}

impl MappingOptions {
    pub fn set(&mut self, option: MappingOption, on: bool) {
        match option {
            MappingOption::Forward => self.forward = on,
            MappingOption::Replace => self.replace = on,
            MappingOption::Toggle => self.toggle = on,
            MappingOption::Turbo => self.turbo = on,
            MappingOption::Add => self.add = on,
            MappingOption::Reset => self.reset = on,
        }
    }

    pub fn with(mut self, option: MappingOption) -> Self {
        self.set(option, true);
        self
    }
}

/// Why a mapping's timer is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum TimerKind {
    /// Blink the turbo value
    Turbo,
    /// Release a hold started by a relative source
    Release,
    /// Feed relative motion or accumulate an `Add` destination
    Repeat,
    /// Advance a stick rotator
    Rotate,
    /// Wait out the key-repeat delay
    KeyRepeatDelay,
    /// Re-send a held key
    KeyRepeat,
}

/// Mutable per-mapping state
#[derive(Debug, Clone, Default)]
pub struct MappingRuntime {
    /// Last raw (pre-transform) state seen from the source
    pub raw_down: bool,
    /// Effective down state after transforms; the release latch
    pub active: bool,
    pub toggle_value: bool,
    pub turbo_value: bool,
    /// Strength last pushed to the destination
    pub strength: f64,
    /// Source user of the event that latched the mapping
    pub source_user: usize,
    /// Users whose cells hold this mapping's contribution
    pub applied: u32,
    pub timer: Option<(TimerToken, TimerKind)>,
    /// Active user to restore when a `HoldActiveUser` press ends
    pub restore_user: Option<usize>,
}

/// A compiled mapping
#[derive(Debug, Clone)]
pub struct Mapping {
    pub source: Key,
    pub source_user: UserRef,
    pub target: Key,
    pub target_user: UserRef,
    /// Multiplier applied to the source strength
    pub strength: f64,
    /// Period in seconds for turbo, delayed release, add ramps and rotation
    pub rate: f64,
    pub options: MappingOptions,
    /// ANDed; empty means unconditional
    pub conditions: Vec<Condition>,
    /// Configuration name for `LoadConfig`
    pub payload: Option<String>,
    /// Slot held in every destination cell, `None` if the pool was exhausted
    pub slot: Option<Slot>,
    pub runtime: MappingRuntime,
}

impl Mapping {
    /// Unconditional mapping with default strength and rate
    pub fn new(source: Key, target: Key) -> Self {
        Self {
            source,
            source_user: UserRef::Index(0),
            target,
            target_user: UserRef::Active,
            strength: 1.0,
            rate: 1.0,
            options: MappingOptions::default(),
            conditions: Vec::new(),
            payload: None,
            slot: None,
            runtime: MappingRuntime::default(),
        }
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_option(mut self, option: MappingOption) -> Self {
        self.options.set(option, true);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_users(mut self, source: UserRef, target: UserRef) -> Self {
        self.source_user = source;
        self.target_user = target;
        self
    }

    /// True while the mapping holds anything that a reset pass must undo
    pub fn is_latched(&self) -> bool {
        self.runtime.active || self.runtime.raw_down || self.runtime.timer.is_some()
    }
}

impl fmt::Display for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} -> {}@{} (x{})",
            self.source, self.source_user, self.target, self.target_user, self.strength
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_ref_parse() {
        assert_eq!("1".parse::<UserRef>().unwrap(), UserRef::Index(0));
        assert_eq!("Active".parse::<UserRef>().unwrap(), UserRef::Active);
        assert_eq!("all".parse::<UserRef>().unwrap(), UserRef::All);
        assert!("0".parse::<UserRef>().is_err());
        assert!("x".parse::<UserRef>().is_err());
    }

    #[test]
    fn test_user_ref_matches() {
        assert!(UserRef::Active.matches(2, 2));
        assert!(!UserRef::Active.matches(1, 2));
        assert!(UserRef::Index(1).matches(1, 0));
        assert!(UserRef::All.matches(5, 0));
    }

    #[test]
    fn test_option_names() {
        assert_eq!("turbo".parse::<MappingOption>().unwrap(), MappingOption::Turbo);
        assert_eq!("Replace".parse::<MappingOption>().unwrap(), MappingOption::Replace);
        assert_eq!(MappingOption::Add.to_string(), "add");
        assert!("sticky".parse::<MappingOption>().is_err());
    }

    #[test]
    fn test_builder() {
        let m = Mapping::new(Key::A, Key::PAD_A)
            .with_strength(0.5)
            .with_option(MappingOption::Toggle)
            .with_condition(Condition::pressed(Key::SHIFT));
        assert_eq!(m.strength, 0.5);
        assert!(m.options.toggle);
        assert_eq!(m.conditions.len(), 1);
        assert!(!m.is_latched());
        assert_eq!(m.to_string(), "A@1 -> PadA@active (x0.5)");
    }
}
