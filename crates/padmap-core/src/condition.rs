// Padmap Conditions
// Compiled AND/OR trees over live control state

use crate::mapping::UserRef;
use crate::Key;

/// Read access to live control bits
pub trait ConditionState {
    /// Pressed bit of `key` for `user`; `None` if the control is not tracked
    fn is_down(&self, key: Key, user: usize) -> Option<bool>;
    /// Toggle bit of `key` for `user`; `None` if the control is not tracked
    fn is_toggled(&self, key: Key, user: usize) -> Option<bool>;
}

/// One test against a single control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionLeaf {
    pub key: Key,
    pub user: UserRef,
    /// State the control must be in
    pub desired: bool,
    /// Test the toggle bit instead of the pressed bit
    pub toggle: bool,
}

/// Condition tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Leaf(ConditionLeaf),
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

impl Condition {
    /// Leaf requiring `key` to be pressed
    pub fn pressed(key: Key) -> Self {
        Condition::Leaf(ConditionLeaf {
            key,
            user: UserRef::Index(0),
            desired: true,
            toggle: false,
        })
    }

    /// Leaf requiring `key` to be released
    pub fn released(key: Key) -> Self {
        Condition::Leaf(ConditionLeaf {
            key,
            user: UserRef::Index(0),
            desired: false,
            toggle: false,
        })
    }

    /// Evaluate against live state
    ///
    /// Untracked controls read as false. `All([])` holds, `Any([])` does not.
    pub fn evaluate(&self, state: &impl ConditionState, active_user: usize) -> bool {
        match self {
            Condition::Leaf(leaf) => {
                let test = |user: usize| {
                    let bit = if leaf.toggle {
                        state.is_toggled(leaf.key, user)
                    } else {
                        state.is_down(leaf.key, user)
                    };
                    bit.map(|b| b == leaf.desired).unwrap_or(false)
                };
                match leaf.user {
                    UserRef::Index(user) => test(user),
                    UserRef::Active => test(active_user),
                    // Any user satisfies an @all leaf
                    UserRef::All => (0..crate::device::MAX_USERS).any(test),
                }
            }
            Condition::All(children) => children.iter().all(|c| c.evaluate(state, active_user)),
            Condition::Any(children) => children.iter().any(|c| c.evaluate(state, active_user)),
        }
    }

    /// Every control this tree reads
    pub fn keys(&self, out: &mut Vec<Key>) {
        match self {
            Condition::Leaf(leaf) => {
                if !out.contains(&leaf.key) {
                    out.push(leaf.key);
                }
            }
            Condition::All(children) | Condition::Any(children) => {
                for child in children {
                    child.keys(out);
                }
            }
        }
    }
}

/// A mapping's condition list: absent or empty means always true
pub fn evaluate_all(conditions: &[Condition], state: &impl ConditionState, active_user: usize) -> bool {
    conditions.iter().all(|c| c.evaluate(state, active_user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeState {
        down: HashMap<(Key, usize), bool>,
        toggled: HashMap<(Key, usize), bool>,
    }

    impl ConditionState for FakeState {
        fn is_down(&self, key: Key, user: usize) -> Option<bool> {
            self.down.get(&(key, user)).copied()
        }

        fn is_toggled(&self, key: Key, user: usize) -> Option<bool> {
            self.toggled.get(&(key, user)).copied()
        }
    }

    fn state(entries: &[(Key, bool)]) -> FakeState {
        let mut s = FakeState::default();
        for &(key, down) in entries {
            s.down.insert((key, 0), down);
            s.toggled.insert((key, 0), false);
        }
        s
    }

    #[test]
    fn test_leaf_pressed_and_released() {
        let s = state(&[(Key::A, true), (Key::B, false)]);
        assert!(Condition::pressed(Key::A).evaluate(&s, 0));
        assert!(!Condition::pressed(Key::B).evaluate(&s, 0));
        assert!(Condition::released(Key::B).evaluate(&s, 0));
    }

    #[test]
    fn test_untracked_is_false() {
        let s = state(&[]);
        assert!(!Condition::pressed(Key::C).evaluate(&s, 0));
        assert!(!Condition::released(Key::C).evaluate(&s, 0));
    }

    #[test]
    fn test_empty_combinators() {
        let s = state(&[]);
        assert!(Condition::All(vec![]).evaluate(&s, 0));
        assert!(!Condition::Any(vec![]).evaluate(&s, 0));
        assert!(evaluate_all(&[], &s, 0));
    }

    #[test]
    fn test_and_or_truth_table() {
        for a in [false, true] {
            for b in [false, true] {
                let s = state(&[(Key::A, a), (Key::B, b)]);
                let and = Condition::All(vec![Condition::pressed(Key::A), Condition::pressed(Key::B)]);
                let or = Condition::Any(vec![Condition::pressed(Key::A), Condition::pressed(Key::B)]);
                assert_eq!(and.evaluate(&s, 0), a && b);
                assert_eq!(or.evaluate(&s, 0), a || b);
            }
        }
    }

    #[test]
    fn test_nested() {
        let s = state(&[(Key::A, true), (Key::B, false), (Key::C, true)]);
        let tree = Condition::All(vec![
            Condition::Any(vec![Condition::pressed(Key::B), Condition::pressed(Key::C)]),
            Condition::All(vec![Condition::pressed(Key::A), Condition::released(Key::B)]),
        ]);
        assert!(tree.evaluate(&s, 0));
    }

    #[test]
    fn test_toggle_leaf_and_users() {
        let mut s = state(&[]);
        s.toggled.insert((Key::CAPS_LOCK, 0), true);
        s.down.insert((Key::PAD_A, 1), true);
        let caps = Condition::Leaf(ConditionLeaf {
            key: Key::CAPS_LOCK,
            user: UserRef::Index(0),
            desired: true,
            toggle: true,
        });
        assert!(caps.evaluate(&s, 0));
        let active_a = Condition::Leaf(ConditionLeaf {
            key: Key::PAD_A,
            user: UserRef::Active,
            desired: true,
            toggle: false,
        });
        assert!(!active_a.evaluate(&s, 0));
        assert!(active_a.evaluate(&s, 1));
    }

    #[test]
    fn test_keys_are_collected_once() {
        let tree = Condition::Any(vec![
            Condition::pressed(Key::A),
            Condition::All(vec![Condition::released(Key::A), Condition::pressed(Key::B)]),
        ]);
        let mut keys = Vec::new();
        tree.keys(&mut keys);
        assert_eq!(keys, vec![Key::A, Key::B]);
    }
}
