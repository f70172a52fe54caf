// Padmap Control Types
// Static descriptor table mapping every control to its domain, flags and state cell

use indexmap::IndexMap;
use std::sync::OnceLock;
use strum_macros::{Display, EnumIter, EnumString};

use crate::Key;

/// Where a control comes from or goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ControlDomain {
    None,
    Keyboard,
    Mouse,
    Gamepad,
    Command,
    Meta,
    Custom,
}

/// Behavioral flags of a control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlFlags {
    /// The platform auto-repeats this control while held
    pub repeatable: bool,
    /// Motion-like control with no persistent down state
    pub relative: bool,
    /// Belongs to a specific user (virtual or physical pad)
    pub of_user: bool,
    /// Scales other controls multiplicatively while held
    pub modifier: bool,
    /// Really two controls: pressed if either is pressed
    pub or_pair: bool,
    /// Really two controls: pressed only if both are pressed
    pub and_pair: bool,
    /// Can only be a mapping destination
    pub output_only: bool,
}

/// Horizontal or vertical stick axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
}

/// Side of an axis; `Neg` is left/down, `Pos` is right/up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Neg,
    Pos,
}

/// Commands dispatched on release rather than stored in a state cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum Command {
    Reload,
    ToggleDisable,
    SetActiveUser,
    HoldActiveUser,
    ToggleConnected,
    LoadConfig,
}

/// Condition tree combinators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaKind {
    And,
    Or,
}

/// The state cell a control reads from or writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellRef {
    /// Inert (unknown key, unmapped code)
    None,
    KeyboardKey,
    MouseButton,
    /// Relative pointer motion, unit direction
    MouseMotion { dx: i8, dy: i8 },
    /// Relative wheel motion, unit direction
    Wheel { dx: i8, dy: i8 },
    /// Gamepad button, report bit index
    Button(usize),
    /// Gamepad trigger, 0 = left, 1 = right
    Trigger(usize),
    /// One direction of a stick
    StickDir { stick: usize, axis: Axis, side: Side },
    /// Diagonal of a stick, drives both axes
    StickDiagonal { stick: usize, x: Side, y: Side },
    StickModifier(usize),
    TriggerModifier(usize),
    Rotator { stick: usize, clockwise: bool },
    RotateModifier(usize),
    Command(Command),
    Meta(MetaKind),
    /// User-less boolean variable, usable as a condition
    Var,
    /// Extension-defined output forwarded to the host
    CustomKey,
}

/// Static descriptor of a control
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlType {
    pub domain: ControlDomain,
    pub flags: ControlFlags,
    pub cell: CellRef,
    /// Component controls of an or/and pair
    pub pair: Option<[Key; 2]>,
}

impl ControlType {
    const NONE: ControlType = ControlType {
        domain: ControlDomain::None,
        flags: ControlFlags {
            repeatable: false,
            relative: false,
            of_user: false,
            modifier: false,
            or_pair: false,
            and_pair: false,
            output_only: false,
        },
        cell: CellRef::None,
        pair: None,
    };

    fn new(domain: ControlDomain, cell: CellRef) -> Self {
        Self {
            domain,
            cell,
            ..Self::NONE
        }
    }

    fn keyboard() -> Self {
        let mut t = Self::new(ControlDomain::Keyboard, CellRef::KeyboardKey);
        t.flags.repeatable = true;
        t
    }

    fn gamepad(cell: CellRef) -> Self {
        let mut t = Self::new(ControlDomain::Gamepad, cell);
        t.flags.of_user = true;
        t
    }

    /// True if this control may appear as a mapping source
    pub fn is_source(&self) -> bool {
        !self.flags.output_only && !matches!(self.cell, CellRef::Meta(_) | CellRef::None)
    }

    /// True if a mapping may target this control
    pub fn is_destination(&self) -> bool {
        !matches!(self.cell, CellRef::Meta(_) | CellRef::None)
    }

    /// True for controls whose value is driven by a per-user pad record
    pub fn is_pad_cell(&self) -> bool {
        matches!(
            self.cell,
            CellRef::Button(_)
                | CellRef::Trigger(_)
                | CellRef::StickDir { .. }
                | CellRef::StickDiagonal { .. }
                | CellRef::StickModifier(_)
                | CellRef::TriggerModifier(_)
                | CellRef::RotateModifier(_)
        )
    }
}

const STICK_DIRS: [(Axis, Side); 4] = [
    (Axis::Y, Side::Pos),
    (Axis::Y, Side::Neg),
    (Axis::X, Side::Neg),
    (Axis::X, Side::Pos),
];

const STICK_DIAGONALS: [(Side, Side); 4] = [
    (Side::Neg, Side::Pos),
    (Side::Pos, Side::Pos),
    (Side::Neg, Side::Neg),
    (Side::Pos, Side::Neg),
];

fn classify(code: u16) -> ControlType {
    let key = Key(code);
    if key.name().is_none() {
        return ControlType::NONE;
    }

    match code {
        0x000 => ControlType::NONE,
        0x10 | 0x11 | 0x12 | 0xFF => {
            let mut t = ControlType::keyboard();
            t.flags.or_pair = true;
            t.pair = Some(match code {
                0x10 => [Key::L_SHIFT, Key::R_SHIFT],
                0x11 => [Key::L_CTRL, Key::R_CTRL],
                0x12 => [Key::L_ALT, Key::R_ALT],
                _ => [Key::L_WIN, Key::R_WIN],
            });
            t
        }
        0x001..=0x0FF => ControlType::keyboard(),
        0x101..=0x105 => ControlType::new(ControlDomain::Mouse, CellRef::MouseButton),
        0x110..=0x113 => {
            let (dx, dy) = [(-1, 0), (1, 0), (0, -1), (0, 1)][(code - 0x110) as usize];
            let mut t = ControlType::new(ControlDomain::Mouse, CellRef::MouseMotion { dx, dy });
            t.flags.relative = true;
            t
        }
        0x118..=0x11B => {
            let (dx, dy) = [(0, 1), (0, -1), (-1, 0), (1, 0)][(code - 0x118) as usize];
            let mut t = ControlType::new(ControlDomain::Mouse, CellRef::Wheel { dx, dy });
            t.flags.relative = true;
            t
        }
        0x200..=0x20E => ControlType::gamepad(CellRef::Button((code - 0x200) as usize)),
        0x210..=0x211 => ControlType::gamepad(CellRef::Trigger((code - 0x210) as usize)),
        0x220..=0x227 => {
            let index = (code - 0x220) as usize;
            let (axis, side) = STICK_DIRS[index % 4];
            ControlType::gamepad(CellRef::StickDir {
                stick: index / 4,
                axis,
                side,
            })
        }
        0x228..=0x22F => {
            let index = (code - 0x228) as usize;
            let stick = index / 4;
            let (x, y) = STICK_DIAGONALS[index % 4];
            let mut t = ControlType::gamepad(CellRef::StickDiagonal { stick, x, y });
            t.flags.and_pair = true;
            let base = 0x220 + (stick as u16) * 4;
            let vertical = if y == Side::Pos { base } else { base + 1 };
            let horizontal = if x == Side::Neg { base + 2 } else { base + 3 };
            t.pair = Some([Key(vertical), Key(horizontal)]);
            t
        }
        0x230..=0x231 => {
            let mut t = ControlType::gamepad(CellRef::StickModifier((code - 0x230) as usize));
            t.flags.modifier = true;
            t
        }
        0x232..=0x233 => {
            let mut t = ControlType::gamepad(CellRef::TriggerModifier((code - 0x232) as usize));
            t.flags.modifier = true;
            t
        }
        0x240..=0x243 => {
            let index = code - 0x240;
            ControlType::gamepad(CellRef::Rotator {
                stick: (index / 2) as usize,
                clockwise: index % 2 == 0,
            })
        }
        0x244..=0x245 => {
            let mut t = ControlType::gamepad(CellRef::RotateModifier((code - 0x244) as usize));
            t.flags.modifier = true;
            t
        }
        0x300..=0x305 => {
            let command = [
                Command::Reload,
                Command::ToggleDisable,
                Command::SetActiveUser,
                Command::HoldActiveUser,
                Command::ToggleConnected,
                Command::LoadConfig,
            ][(code - 0x300) as usize];
            let mut t = ControlType::new(ControlDomain::Command, CellRef::Command(command));
            t.flags.output_only = true;
            t
        }
        0x3F0 => ControlType::new(ControlDomain::Meta, CellRef::Meta(MetaKind::And)),
        0x3F1 => ControlType::new(ControlDomain::Meta, CellRef::Meta(MetaKind::Or)),
        _ => ControlType::NONE,
    }
}

fn builtin_table() -> &'static [ControlType] {
    static TABLE: OnceLock<Vec<ControlType>> = OnceLock::new();
    TABLE.get_or_init(|| (0..Key::FIRST_CUSTOM).map(classify).collect())
}

/// Descriptor of a built-in control; custom codes resolve to `None` here
pub fn builtin_type(key: Key) -> ControlType {
    builtin_table()
        .get(key.code() as usize)
        .copied()
        .unwrap_or(ControlType::NONE)
}

/// Kind of a custom control registered by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CustomKind {
    Var,
    Key,
}

/// Errors raised while registering custom controls
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NamespaceError {
    #[error("custom control name '{0}' shadows a built-in control")]
    ShadowsBuiltin(String),

    #[error("custom control '{0}' is already registered")]
    Duplicate(String),

    #[error("custom control space exhausted")]
    Exhausted,
}

/// Name resolution for built-in and custom controls
///
/// Custom controls are handed consecutive codes starting at
/// [`Key::FIRST_CUSTOM`] in registration order.
#[derive(Debug, Clone, Default)]
pub struct ControlNamespace {
    custom: IndexMap<String, (String, Key, CustomKind)>,
}

impl ControlNamespace {
    /// Create a namespace containing only the built-in controls
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom control and return its key
    pub fn register(&mut self, name: &str, kind: CustomKind) -> Result<Key, NamespaceError> {
        if crate::key::key_from_name(name).is_some() {
            return Err(NamespaceError::ShadowsBuiltin(name.to_string()));
        }
        let folded = name.to_ascii_lowercase();
        if self.custom.contains_key(&folded) {
            return Err(NamespaceError::Duplicate(name.to_string()));
        }
        let offset = u16::try_from(self.custom.len()).map_err(|_| NamespaceError::Exhausted)?;
        let code = Key::FIRST_CUSTOM
            .checked_add(offset)
            .ok_or(NamespaceError::Exhausted)?;
        let key = Key(code);
        self.custom.insert(folded, (name.to_string(), key, kind));
        log::debug!("Registered custom {} '{}' as {:#x}", kind, name, code);
        Ok(key)
    }

    /// Resolve a control name (built-in first, then custom; case-insensitive)
    pub fn resolve(&self, name: &str) -> Option<Key> {
        crate::key::key_from_name(name).or_else(|| {
            self.custom
                .get(&name.to_ascii_lowercase())
                .map(|&(_, key, _)| key)
        })
    }

    /// Descriptor of any control, built-in or custom
    pub fn control_type(&self, key: Key) -> ControlType {
        if !key.is_custom() {
            return builtin_type(key);
        }
        let index = (key.code() - Key::FIRST_CUSTOM) as usize;
        match self.custom.get_index(index) {
            Some((_, (_, _, CustomKind::Var))) => ControlType::new(ControlDomain::Custom, CellRef::Var),
            Some((_, (_, _, CustomKind::Key))) => {
                let mut t = ControlType::new(ControlDomain::Custom, CellRef::CustomKey);
                t.flags.output_only = true;
                t
            }
            None => ControlType::NONE,
        }
    }

    /// Human-readable name of any control
    pub fn display_name(&self, key: Key) -> String {
        if key.is_custom() {
            let index = (key.code() - Key::FIRST_CUSTOM) as usize;
            if let Some((_, (name, _, _))) = self.custom.get_index(index) {
                return name.clone();
            }
        }
        key.to_string()
    }

    /// Number of registered custom controls
    pub fn custom_len(&self) -> usize {
        self.custom.len()
    }

    /// Iterate custom controls in registration order
    pub fn custom(&self) -> impl Iterator<Item = (&str, Key, CustomKind)> {
        self.custom
            .values()
            .map(|(name, key, kind)| (name.as_str(), *key, *kind))
    }
}
