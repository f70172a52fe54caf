// Padmap Control Registry
// Per-source mapping chains, reset chains and live press/toggle bits

use smallvec::SmallVec;
use std::collections::HashMap;

use crate::condition::ConditionState;
use crate::Key;

/// Everything the engine tracks for one source control
#[derive(Debug, Clone, Default)]
pub struct Input {
    /// Mappings sourced from this control, in declaration order
    pub mappings: Vec<usize>,
    /// Mappings whose conditions read this control
    pub resets: Vec<usize>,
    /// Or/and pairs this control is a component of
    pub parents: SmallVec<[Key; 2]>,
    pressed: u32,
    toggled: u32,
}

/// Bit of `user` in a per-user mask; users past the mask width have none
fn user_bit(user: usize) -> u32 {
    u32::try_from(user).ok().and_then(|u| 1u32.checked_shl(u)).unwrap_or(0)
}

impl Input {
    pub fn is_down(&self, user: usize) -> bool {
        self.pressed & user_bit(user) != 0
    }

    pub fn is_toggled(&self, user: usize) -> bool {
        self.toggled & user_bit(user) != 0
    }

    /// Record a new pressed state; a rising edge flips the toggle bit.
    /// Returns true if the pressed bit changed.
    pub fn set_down(&mut self, user: usize, down: bool) -> bool {
        let bit = user_bit(user);
        if bit == 0 {
            return false;
        }
        let was = self.pressed & bit != 0;
        if down && !was {
            self.toggled ^= bit;
        }
        if down {
            self.pressed |= bit;
        } else {
            self.pressed &= !bit;
        }
        was != down
    }
}

/// Control → `Input` lookup
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inputs: HashMap<Key, Input>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: Key) -> Option<&Input> {
        self.inputs.get(&key)
    }

    pub fn get_mut(&mut self, key: Key) -> Option<&mut Input> {
        self.inputs.get_mut(&key)
    }

    /// Get or create the `Input` for `key`
    pub fn register(&mut self, key: Key) -> &mut Input {
        self.inputs.entry(key).or_default()
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn clear(&mut self) {
        self.inputs.clear();
    }
}

impl ConditionState for Registry {
    fn is_down(&self, key: Key, user: usize) -> Option<bool> {
        self.inputs.get(&key).map(|i| i.is_down(user))
    }

    fn is_toggled(&self, key: Key, user: usize) -> Option<bool> {
        self.inputs.get(&key).map(|i| i.is_toggled(user))
    }
}
