// Padmap Slot Cells
// Multi-source merge: every (mapping, destination) pair owns one slot of a cell

/// Number of slots in every destination cell
pub const SLOT_COUNT: usize = 32;

/// Bit set over the slots of one cell
pub type SlotMask = u32;

/// Index of one slot within a cell's pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(u8);

impl Slot {
    /// Create a slot from an index; `None` if out of range
    pub fn new(index: usize) -> Option<Self> {
        (index < SLOT_COUNT).then(|| Slot(index as u8))
    }

    /// Index within the pool
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Mask with only this slot set
    pub fn bit(self) -> SlotMask {
        1 << self.0
    }
}

/// Ownership record of a cell's slots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotPool {
    owned: SlotMask,
}

impl SlotPool {
    /// Lowest slot not set in an ownership mask
    ///
    /// Destinations shared between users must hold the same slot in every
    /// user's copy of the cell, so callers pass the union of owners.
    pub fn lowest_free(owned: SlotMask) -> Option<Slot> {
        let free = !owned;
        if free == 0 {
            return None;
        }
        Slot::new(free.trailing_zeros() as usize)
    }

    /// Mark a slot as owned
    pub fn claim(&mut self, slot: Slot) {
        debug_assert!(!self.is_owned(slot), "slot {:?} claimed twice", slot);
        self.owned |= slot.bit();
    }

    pub fn is_owned(&self, slot: Slot) -> bool {
        self.owned & slot.bit() != 0
    }

    pub fn owned(&self) -> SlotMask {
        self.owned
    }
}

/// Live slots of a cell with replace masking applied
///
/// While any replacing slot is live, only replacing slots count.
fn effective(active: SlotMask, replace: SlotMask) -> SlotMask {
    let replacing = active & replace;
    if replacing != 0 {
        replacing
    } else {
        active
    }
}

fn set_bit(mask: &mut SlotMask, slot: Slot, on: bool) {
    if on {
        *mask |= slot.bit();
    } else {
        *mask &= !slot.bit();
    }
}

/// Boolean cell: pressed iff any effective slot is live
#[derive(Debug, Clone, Default)]
pub struct ButtonCell {
    pub pool: SlotPool,
    active: SlotMask,
    replace: SlotMask,
    pressed: bool,
}

impl ButtonCell {
    /// Set or clear one slot; returns true if the combined state changed
    pub fn set(&mut self, slot: Slot, down: bool, replace: bool) -> bool {
        set_bit(&mut self.active, slot, down);
        set_bit(&mut self.replace, slot, down && replace);
        self.recompute()
    }

    fn recompute(&mut self) -> bool {
        let pressed = effective(self.active, self.replace) != 0;
        let changed = pressed != self.pressed;
        self.pressed = pressed;
        changed
    }

    pub fn pressed(&self) -> bool {
        self.pressed
    }

    pub fn active(&self) -> SlotMask {
        self.active
    }

    /// Drop every contribution, keeping slot ownership
    pub fn release_all(&mut self) -> bool {
        self.active = 0;
        self.replace = 0;
        self.recompute()
    }
}

/// Magnitude cell: value is the max of the effective slots
#[derive(Debug, Clone)]
pub struct StrengthCell {
    pub pool: SlotPool,
    active: SlotMask,
    replace: SlotMask,
    adders: SlotMask,
    values: [f64; SLOT_COUNT],
    value: f64,
    weight: u32,
}

impl Default for StrengthCell {
    fn default() -> Self {
        Self {
            pool: SlotPool::default(),
            active: 0,
            replace: 0,
            adders: 0,
            values: [0.0; SLOT_COUNT],
            value: 0.0,
            weight: 0,
        }
    }
}

impl StrengthCell {
    /// Push one slot's strength (or release it); true if value or weight changed
    pub fn set(&mut self, slot: Slot, down: bool, strength: f64, replace: bool) -> bool {
        set_bit(&mut self.active, slot, down);
        set_bit(&mut self.replace, slot, down && replace);
        set_bit(&mut self.adders, slot, false);
        self.values[slot.index()] = if down { strength.max(0.0) } else { 0.0 };
        self.recompute()
    }

    /// Accumulate into one slot, saturating at 1.0
    pub fn add(&mut self, slot: Slot, delta: f64, replace: bool) -> bool {
        let value = (self.values[slot.index()] + delta).clamp(0.0, 1.0);
        self.values[slot.index()] = value;
        set_bit(&mut self.active, slot, true);
        set_bit(&mut self.adders, slot, true);
        set_bit(&mut self.replace, slot, replace);
        self.recompute()
    }

    /// Clear everything accumulated through `add`
    pub fn reset_adds(&mut self) -> bool {
        let adders = self.adders;
        for index in 0..SLOT_COUNT {
            if adders & (1 << index) != 0 {
                self.values[index] = 0.0;
            }
        }
        self.active &= !adders;
        self.replace &= !adders;
        self.adders = 0;
        self.recompute()
    }

    fn recompute(&mut self) -> bool {
        let live = effective(self.active, self.replace);
        let mut value: f64 = 0.0;
        for index in 0..SLOT_COUNT {
            if live & (1 << index) != 0 {
                value = value.max(self.values[index]);
            }
        }
        let weight = live.count_ones();
        let changed = value != self.value || weight != self.weight;
        self.value = value;
        self.weight = weight;
        changed
    }

    /// Combined magnitude
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Number of simultaneously live slots
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// True if any slot is live
    pub fn pressed(&self) -> bool {
        self.weight > 0
    }

    pub fn active(&self) -> SlotMask {
        self.active
    }

    /// Drop every contribution, keeping slot ownership
    pub fn release_all(&mut self) -> bool {
        self.active = 0;
        self.replace = 0;
        self.adders = 0;
        self.values = [0.0; SLOT_COUNT];
        self.recompute()
    }
}

/// Modifier cell: product of live slot strengths, neutral 1.0
#[derive(Debug, Clone)]
pub struct ModifierCell {
    pub pool: SlotPool,
    active: SlotMask,
    values: [f64; SLOT_COUNT],
    product: f64,
}

impl Default for ModifierCell {
    fn default() -> Self {
        Self {
            pool: SlotPool::default(),
            active: 0,
            values: [1.0; SLOT_COUNT],
            product: 1.0,
        }
    }
}

impl ModifierCell {
    /// Hold or release one modifier slot; true if the product changed
    pub fn set(&mut self, slot: Slot, down: bool, strength: f64) -> bool {
        set_bit(&mut self.active, slot, down);
        self.values[slot.index()] = if down { strength } else { 1.0 };
        self.recompute()
    }

    fn recompute(&mut self) -> bool {
        let mut product = 1.0;
        for index in 0..SLOT_COUNT {
            if self.active & (1 << index) != 0 {
                product *= self.values[index];
            }
        }
        let changed = product != self.product;
        self.product = product;
        changed
    }

    /// Combined multiplier
    pub fn product(&self) -> f64 {
        self.product
    }

    pub fn active(&self) -> SlotMask {
        self.active
    }

    /// Drop every contribution, keeping slot ownership
    pub fn release_all(&mut self) -> bool {
        self.active = 0;
        self.values = [1.0; SLOT_COUNT];
        self.recompute()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(i: usize) -> Slot {
        Slot::new(i).unwrap()
    }

    #[test]
    fn test_lowest_free_skips_owned() {
        let mut pool = SlotPool::default();
        assert_eq!(SlotPool::lowest_free(pool.owned()), Some(slot(0)));
        pool.claim(slot(0));
        pool.claim(slot(2));
        assert_eq!(SlotPool::lowest_free(pool.owned()), Some(slot(1)));
        assert!(pool.is_owned(slot(2)));
    }

    #[test]
    fn test_lowest_free_across_users() {
        let mut a = SlotPool::default();
        let mut b = SlotPool::default();
        a.claim(slot(0));
        b.claim(slot(1));
        assert_eq!(SlotPool::lowest_free(a.owned() | b.owned()), Some(slot(2)));
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut pool = SlotPool::default();
        for i in 0..SLOT_COUNT {
            let s = SlotPool::lowest_free(pool.owned()).unwrap();
            assert_eq!(s.index(), i);
            pool.claim(s);
        }
        assert_eq!(SlotPool::lowest_free(pool.owned()), None);
    }

    #[test]
    fn test_button_release_keeps_other_contributor() {
        let mut cell = ButtonCell::default();
        assert!(cell.set(slot(0), true, false));
        assert!(!cell.set(slot(3), true, false));
        assert!(!cell.set(slot(0), false, false));
        assert!(cell.pressed());
        assert!(cell.set(slot(3), false, false));
        assert!(!cell.pressed());
        assert_eq!(cell.active(), 0);
    }

    #[test]
    fn test_strength_is_max_of_slots() {
        let mut cell = StrengthCell::default();
        cell.set(slot(0), true, 0.25, false);
        cell.set(slot(1), true, 0.75, false);
        assert_eq!(cell.value(), 0.75);
        assert_eq!(cell.weight(), 2);
        cell.set(slot(1), false, 0.0, false);
        assert_eq!(cell.value(), 0.25);
        cell.set(slot(0), false, 0.0, false);
        assert_eq!(cell.value(), 0.0);
        assert!(!cell.pressed());
    }

    #[test]
    fn test_replace_masks_other_slots() {
        let mut cell = StrengthCell::default();
        cell.set(slot(0), true, 1.0, false);
        cell.set(slot(1), true, 0.2, true);
        assert_eq!(cell.value(), 0.2);
        assert_eq!(cell.weight(), 1);
        cell.set(slot(1), false, 0.0, true);
        assert_eq!(cell.value(), 1.0);
    }

    #[test]
    fn test_add_accumulates_and_resets() {
        let mut cell = StrengthCell::default();
        cell.set(slot(0), true, 0.1, false);
        cell.add(slot(2), 0.3, false);
        cell.add(slot(2), 0.3, false);
        assert!((cell.value() - 0.6).abs() < 1e-9);
        cell.add(slot(2), 5.0, false);
        assert_eq!(cell.value(), 1.0);
        assert!(cell.reset_adds());
        assert_eq!(cell.value(), 0.1);
    }

    #[test]
    fn test_modifier_product_and_neutral() {
        let mut cell = ModifierCell::default();
        assert_eq!(cell.product(), 1.0);
        cell.set(slot(0), true, 0.5);
        cell.set(slot(1), true, 0.5);
        assert_eq!(cell.product(), 0.25);
        cell.set(slot(0), false, 0.0);
        assert_eq!(cell.product(), 0.5);
        cell.set(slot(1), false, 0.0);
        assert_eq!(cell.product(), 1.0);
    }

    #[test]
    fn test_release_all_returns_to_neutral() {
        let mut button = ButtonCell::default();
        button.set(slot(4), true, false);
        assert!(button.release_all());
        assert!(!button.pressed());

        let mut modifier = ModifierCell::default();
        modifier.set(slot(4), true, 3.0);
        assert!(modifier.release_all());
        assert_eq!(modifier.product(), 1.0);
    }
}
