// Padmap Axis Combination
// Opposite-direction merge, modifiers, stick shape and rotator walking

use serde::Deserialize;
use strum_macros::{Display, EnumString};

use crate::control::{Axis, Side};
use crate::slot::{ModifierCell, StrengthCell};

const EPSILON: f64 = 1e-6;

/// Length of the unit square's perimeter; one full rotator turn
pub const PERIMETER: f64 = 8.0;

/// Octant boundaries counter-clockwise from +x: edge midpoints and corners
const COMPASS: [(f64, f64); 8] = [
    (1.0, 0.0),
    (1.0, 1.0),
    (0.0, 1.0),
    (-1.0, 1.0),
    (-1.0, 0.0),
    (-1.0, -1.0),
    (0.0, -1.0),
    (1.0, -1.0),
];

/// Envelope traced by a stick at full deflection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StickShape {
    #[default]
    Square,
    Circle,
}

/// Combine two opposite sides into one signed value
///
/// Each side contributes its strength scaled by its weight (live slot count).
/// The sum is renormalized by the heavier weight so several same-direction
/// sources never push past what one full-strength source would.
pub fn combine_sides(neg: &StrengthCell, pos: &StrengthCell) -> f64 {
    let wn = neg.weight();
    let wp = pos.weight();
    let heaviest = wn.max(wp);
    if heaviest == 0 {
        return 0.0;
    }
    let n = neg.value().clamp(0.0, 1.0);
    let p = pos.value().clamp(0.0, 1.0);
    let raw = p * f64::from(wp) - n * f64::from(wn);
    (raw / f64::from(heaviest)).clamp(-1.0, 1.0)
}

/// Rescale a square-space vector onto the given envelope
pub fn apply_shape(x: f64, y: f64, shape: StickShape) -> (f64, f64) {
    if shape == StickShape::Square || (x.abs() < EPSILON && y.abs() < EPSILON) {
        return (x, y);
    }
    let chebyshev = x.abs().max(y.abs());
    let euclid = x.hypot(y);
    let k = chebyshev / euclid;
    (x * k, y * k)
}

/// One axis: two opposite raw cells sharing a single signed value
#[derive(Debug, Clone)]
pub struct AxisState {
    pub neg: StrengthCell,
    pub pos: StrengthCell,
    value: f64,
    rotate_multiplier: f64,
    rotate_fake_pressed: bool,
}

impl Default for AxisState {
    fn default() -> Self {
        Self {
            neg: StrengthCell::default(),
            pos: StrengthCell::default(),
            value: 0.0,
            rotate_multiplier: 1.0,
            rotate_fake_pressed: false,
        }
    }
}

impl AxisState {
    pub fn side_mut(&mut self, side: Side) -> &mut StrengthCell {
        match side {
            Side::Neg => &mut self.neg,
            Side::Pos => &mut self.pos,
        }
    }

    pub fn side(&self, side: Side) -> &StrengthCell {
        match side {
            Side::Neg => &self.neg,
            Side::Pos => &self.pos,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// True while the rotator alone is holding this axis away from center
    pub fn rotate_fake_pressed(&self) -> bool {
        self.rotate_fake_pressed
    }

    fn release_all(&mut self) {
        self.neg.release_all();
        self.pos.release_all();
    }
}

/// Position of a rotating stick on the unit square's perimeter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation {
    x: f64,
    y: f64,
    engaged: bool,
    last_direction: (f64, f64),
}

impl Default for Rotation {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 1.0,
            engaged: false,
            last_direction: (0.0, 0.0),
        }
    }
}

impl Rotation {
    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// Start rotating from the current direction
    ///
    /// A held direction is projected onto the perimeter as-is. With nothing
    /// held, the last direction snaps to the nearest of the 8 compass
    /// directions by angle; with no history the walk starts straight up.
    fn engage(&mut self, direct: (f64, f64)) {
        let held = direct.0.abs() > EPSILON || direct.1.abs() > EPSILON;
        let (dx, dy) = if held { direct } else { self.last_direction };
        let chebyshev = dx.abs().max(dy.abs());
        let (x, y) = if chebyshev < EPSILON {
            (0.0, 1.0)
        } else if held {
            (dx / chebyshev, dy / chebyshev)
        } else {
            let octant = (dy.atan2(dx) / std::f64::consts::FRAC_PI_4).round().rem_euclid(8.0);
            COMPASS[octant as usize % COMPASS.len()]
        };
        self.x = x;
        self.y = y;
        self.engaged = true;
    }

    /// Which component moves, and in which direction, on the current edge
    fn edge(&self, clockwise: bool) -> (Axis, f64) {
        let (x, y) = (self.x, self.y);
        if clockwise {
            if y >= 1.0 && x < 1.0 {
                (Axis::X, 1.0)
            } else if x >= 1.0 && y > -1.0 {
                (Axis::Y, -1.0)
            } else if y <= -1.0 && x > -1.0 {
                (Axis::X, -1.0)
            } else {
                (Axis::Y, 1.0)
            }
        } else if y >= 1.0 && x > -1.0 {
            (Axis::X, -1.0)
        } else if x <= -1.0 && y > -1.0 {
            (Axis::Y, -1.0)
        } else if y <= -1.0 && x < 1.0 {
            (Axis::X, 1.0)
        } else {
            (Axis::Y, 1.0)
        }
    }

    /// Walk `delta` perimeter units, one octant boundary at a time
    ///
    /// Octant boundaries sit at the corners and edge midpoints. When the moving
    /// component saturates, the overflow carries into the next octant.
    pub fn advance(&mut self, delta: f64, clockwise: bool) {
        let mut remaining = delta.abs() % PERIMETER;
        let mut steps = 0;
        while remaining > EPSILON && steps < 9 {
            let (axis, direction) = self.edge(clockwise);
            let current = match axis {
                Axis::X => self.x,
                Axis::Y => self.y,
            };
            let boundary = if direction > 0.0 {
                if current < 0.0 { 0.0 } else { 1.0 }
            } else if current > 0.0 {
                0.0
            } else {
                -1.0
            };
            let room = (boundary - current).abs();
            let next = if room > remaining {
                let moved = current + direction * remaining;
                remaining = 0.0;
                moved
            } else {
                remaining -= room;
                boundary
            };
            match axis {
                Axis::X => self.x = next,
                Axis::Y => self.y = next,
            }
            steps += 1;
        }
    }
}

/// A stick: two axes, their modifiers, shape and rotator state
#[derive(Debug, Clone, Default)]
pub struct StickState {
    pub x: AxisState,
    pub y: AxisState,
    pub modifier: ModifierCell,
    pub rotate_modifier: ModifierCell,
    pub rotation: Rotation,
    pub shape: StickShape,
}

impl StickState {
    pub fn axis_mut(&mut self, axis: Axis) -> &mut AxisState {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
        }
    }

    pub fn axis(&self, axis: Axis) -> &AxisState {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
        }
    }

    /// Current output (x, y)
    pub fn value(&self) -> (f64, f64) {
        (self.x.value, self.y.value)
    }

    fn direct(&self) -> (f64, f64) {
        (
            combine_sides(&self.x.neg, &self.x.pos),
            combine_sides(&self.y.neg, &self.y.pos),
        )
    }

    /// Hand control back from the rotator to direct input
    pub fn disengage_rotation(&mut self) {
        self.rotation.engaged = false;
    }

    /// Advance the rotator by `delta` perimeter units; true if the output changed
    pub fn rotate(&mut self, delta: f64, clockwise: bool) -> bool {
        if !self.rotation.engaged {
            let direct = self.direct();
            self.rotation.engage(direct);
        }
        self.rotation.advance(delta, clockwise);
        self.recompute()
    }

    /// Recompute both axes from their slots; true if either output changed
    pub fn recompute(&mut self) -> bool {
        let (bx, by) = self.direct();
        if bx.abs() > EPSILON || by.abs() > EPSILON {
            self.rotation.last_direction = (bx, by);
        }

        let (mut x, mut y) = if self.rotation.engaged {
            let mut magnitude = bx.abs().max(by.abs());
            let fake = magnitude < EPSILON;
            if fake {
                magnitude = 1.0;
            }
            self.x.rotate_multiplier = self.rotation.x;
            self.y.rotate_multiplier = self.rotation.y;
            self.x.rotate_fake_pressed = fake;
            self.y.rotate_fake_pressed = fake;
            (
                magnitude * self.x.rotate_multiplier,
                magnitude * self.y.rotate_multiplier,
            )
        } else {
            self.x.rotate_multiplier = 1.0;
            self.y.rotate_multiplier = 1.0;
            self.x.rotate_fake_pressed = false;
            self.y.rotate_fake_pressed = false;
            (bx, by)
        };

        let scale = self.modifier.product();
        x = (x * scale).clamp(-1.0, 1.0);
        y = (y * scale).clamp(-1.0, 1.0);
        let (x, y) = apply_shape(x, y, self.shape);

        let changed = x != self.x.value || y != self.y.value;
        self.x.value = x;
        self.y.value = y;
        changed
    }

    /// Drop every contribution and rotation, keeping slot ownership
    pub fn release_all(&mut self) -> bool {
        self.x.release_all();
        self.y.release_all();
        self.modifier.release_all();
        self.rotate_modifier.release_all();
        self.rotation = Rotation::default();
        self.recompute()
    }
}

/// One trigger: magnitude cell scaled by its modifier
#[derive(Debug, Clone, Default)]
pub struct TriggerState {
    pub cell: StrengthCell,
    pub modifier: ModifierCell,
    value: f64,
    pressed: bool,
}

impl TriggerState {
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn pressed(&self) -> bool {
        self.pressed
    }

    /// Recompute from slots and modifier; true if value or pressed changed
    pub fn recompute(&mut self) -> bool {
        let value = (self.cell.value() * self.modifier.product()).clamp(0.0, 1.0);
        let pressed = self.cell.pressed();
        let changed = value != self.value || pressed != self.pressed;
        self.value = value;
        self.pressed = pressed;
        changed
    }

    pub fn release_all(&mut self) -> bool {
        self.cell.release_all();
        self.modifier.release_all();
        self.recompute()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::Slot;

    fn slot(i: usize) -> Slot {
        Slot::new(i).unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_single_side_is_full_extent() {
        let mut axis = AxisState::default();
        axis.pos.set(slot(0), true, 1.0, false);
        assert_eq!(combine_sides(&axis.neg, &axis.pos), 1.0);
        axis.pos.set(slot(0), false, 0.0, false);
        axis.neg.set(slot(1), true, 1.0, false);
        assert_eq!(combine_sides(&axis.neg, &axis.pos), -1.0);
    }

    #[test]
    fn test_weighted_sides_never_exceed_one() {
        let mut axis = AxisState::default();
        axis.neg.set(slot(0), true, 1.0, false);
        for i in 1..4 {
            axis.pos.set(slot(i), true, 1.0, false);
        }
        let value = combine_sides(&axis.neg, &axis.pos);
        assert!(value <= 1.0);
        assert!(value > 0.0);
        assert!(approx(value, 2.0 / 3.0));
    }

    #[test]
    fn test_heavy_single_side_is_full_extent() {
        let mut axis = AxisState::default();
        for i in 0..3 {
            axis.pos.set(slot(i), true, 1.0, false);
        }
        assert_eq!(combine_sides(&axis.neg, &axis.pos), 1.0);
    }

    #[test]
    fn test_equal_weights_cancel() {
        let mut axis = AxisState::default();
        axis.neg.set(slot(0), true, 1.0, false);
        axis.pos.set(slot(1), true, 1.0, false);
        assert_eq!(combine_sides(&axis.neg, &axis.pos), 0.0);
    }

    #[test]
    fn test_circle_shape() {
        let (x, y) = apply_shape(1.0, 1.0, StickShape::Circle);
        assert!(approx(x, 1.0 / 2f64.sqrt()));
        assert!(approx(y, 1.0 / 2f64.sqrt()));
        assert_eq!(apply_shape(0.0, 0.0, StickShape::Circle), (0.0, 0.0));
        assert_eq!(apply_shape(0.5, 0.0, StickShape::Circle), (0.5, 0.0));
        assert_eq!(apply_shape(1.0, 1.0, StickShape::Square), (1.0, 1.0));
    }

    #[test]
    fn test_stick_modifier_scales_and_clamps() {
        let mut stick = StickState::default();
        stick.x.pos.set(slot(0), true, 1.0, false);
        stick.modifier.set(slot(0), true, 0.5);
        assert!(stick.recompute());
        assert_eq!(stick.value(), (0.5, 0.0));
        stick.modifier.set(slot(0), true, 3.0);
        stick.recompute();
        assert_eq!(stick.value(), (1.0, 0.0));
    }

    #[test]
    fn test_recompute_reports_change_once() {
        let mut stick = StickState::default();
        stick.y.pos.set(slot(0), true, 0.5, false);
        assert!(stick.recompute());
        assert!(!stick.recompute());
    }

    #[test]
    fn test_rotation_walks_clockwise_with_carry() {
        let mut rotation = Rotation::default();
        rotation.engage((0.0, 0.0));
        assert_eq!(rotation.position(), (0.0, 1.0));
        rotation.advance(1.0, true);
        assert_eq!(rotation.position(), (1.0, 1.0));
        rotation.advance(1.5, true);
        assert_eq!(rotation.position(), (1.0, -0.5));
        rotation.advance(2.5, true);
        assert_eq!(rotation.position(), (-1.0, -1.0));
    }

    #[test]
    fn test_rotation_walks_counter_clockwise() {
        let mut rotation = Rotation::default();
        rotation.engage((0.0, 0.0));
        rotation.advance(2.0, false);
        assert_eq!(rotation.position(), (-1.0, 0.0));
        rotation.advance(PERIMETER, false);
        assert_eq!(rotation.position(), (-1.0, 0.0));
    }

    #[test]
    fn test_rotation_snaps_to_octant_boundary() {
        let mut rotation = Rotation::default();
        rotation.last_direction = (0.9, -0.8);
        rotation.engage((0.0, 0.0));
        assert_eq!(rotation.position(), (1.0, -1.0));

        let mut rotation = Rotation::default();
        rotation.last_direction = (-0.6, 0.1);
        rotation.engage((0.0, 0.0));
        assert_eq!(rotation.position(), (-1.0, 0.0));
    }

    #[test]
    fn test_rotation_snaps_by_angle() {
        let start = |last: (f64, f64)| {
            let mut rotation = Rotation::default();
            rotation.last_direction = last;
            rotation.engage((0.0, 0.0));
            rotation.position()
        };
        // 24 degrees is closer to the diagonal than to the x axis
        assert_eq!(start((1.0, 0.45)), (1.0, 1.0));
        assert_eq!(start((1.0, 0.4)), (1.0, 0.0));
        assert_eq!(start((0.7, 0.7)), (1.0, 1.0));
        assert_eq!(start((-0.3, -0.35)), (-1.0, -1.0));
        assert_eq!(start((-1.0, -0.01)), (-1.0, 0.0));
    }

    #[test]
    fn test_stick_rotates_from_released_diagonal() {
        let mut stick = StickState::default();
        stick.x.neg.set(slot(0), true, 1.0, false);
        stick.y.pos.set(slot(0), true, 1.0, false);
        stick.recompute();
        stick.x.neg.set(slot(0), false, 0.0, false);
        stick.y.pos.set(slot(0), false, 0.0, false);
        stick.recompute();
        assert_eq!(stick.value(), (0.0, 0.0));

        stick.rotate(0.5, true);
        assert_eq!(stick.value(), (-0.5, 1.0));
    }

    #[test]
    fn test_rotation_projects_held_direction() {
        let mut rotation = Rotation::default();
        rotation.engage((0.5, 0.25));
        assert_eq!(rotation.position(), (1.0, 0.5));
    }

    #[test]
    fn test_stick_rotate_holds_after_release() {
        let mut stick = StickState::default();
        assert!(stick.rotate(1.0, true));
        assert_eq!(stick.value(), (1.0, 1.0));
        assert!(stick.x.rotate_fake_pressed());
        assert!(!stick.recompute());
        assert_eq!(stick.value(), (1.0, 1.0));
        stick.disengage_rotation();
        assert!(stick.recompute());
        assert_eq!(stick.value(), (0.0, 0.0));
    }

    #[test]
    fn test_stick_rotate_keeps_held_magnitude() {
        let mut stick = StickState::default();
        stick.x.pos.set(slot(0), true, 0.5, false);
        stick.recompute();
        stick.rotate(1.0, true);
        assert_eq!(stick.value(), (0.5, -0.5));
        assert!(!stick.x.rotate_fake_pressed());
    }

    #[test]
    fn test_trigger_modifier() {
        let mut trigger = TriggerState::default();
        trigger.cell.set(slot(0), true, 0.8, false);
        trigger.modifier.set(slot(0), true, 0.5);
        assert!(trigger.recompute());
        assert!(approx(trigger.value(), 0.4));
        assert!(trigger.pressed());
        assert!(trigger.release_all());
        assert_eq!(trigger.value(), 0.0);
    }

    #[test]
    fn test_shape_parse() {
        assert_eq!("circle".parse::<StickShape>().unwrap(), StickShape::Circle);
        assert_eq!("Square".parse::<StickShape>().unwrap(), StickShape::Square);
    }
}
