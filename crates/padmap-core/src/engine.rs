// Padmap Engine
// Input events in, virtual pad state and host output out
//
// Features:
// - Mapping chains run in declaration order, then the reset chain
// - Slot merge so many mappings can share one button or axis
// - Toggle, turbo, add, replace, reset and forward options
// - Timer-driven repeat, delayed release, turbo blink and rotation
// - One committed snapshot per input event or timer tick
// - Commands applied after every lock is released

use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::axis::PERIMETER;
use crate::batch::{ChangeBatch, Effect};
use crate::behavior::{post_process, pre_process, TimerPlan, Transition};
use crate::condition::evaluate_all;
use crate::config::CompiledConfig;
use crate::control::{CellRef, Command, ControlNamespace, ControlType, Side};
use crate::device::{PadState, Users, MAX_USERS};
use crate::mapping::{Mapping, TimerKind, UserRef};
use crate::output::{CommandRequest, CommandSink, Host, HostOutput};
use crate::registry::Registry;
use crate::settings::{EngineSettings, PadSettings};
use crate::slot::{ButtonCell, Slot, SlotPool};
use crate::timer::{ManualScheduler, Scheduler, TimerToken};
use crate::Key;

/// Nesting limit for var destinations feeding other mappings
const MAX_DEPTH: usize = 8;

/// What the capture layer should do with the physical event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Disposition {
    /// Swallow the event instead of passing it to the OS
    pub suppress: bool,
}

#[derive(Debug, Clone, Copy)]
struct TimerEntry {
    mapping: usize,
    kind: TimerKind,
}

/// The mapping and virtual-device state engine
///
/// All mutation happens on the caller's thread through `&mut self`. Pad state
/// is shared through [`Engine::users`] and may be read from any thread.
pub struct Engine {
    settings: EngineSettings,
    pads: Vec<PadSettings>,
    namespace: ControlNamespace,
    mappings: Vec<Mapping>,
    registry: Registry,
    /// Slot cells for user-less destinations (keys, mouse buttons, custom keys, vars)
    outputs: HashMap<Key, ButtonCell>,
    users: Arc<Users>,
    host: Arc<Host>,
    scheduler: Box<dyn Scheduler>,
    timers: HashMap<TimerToken, TimerEntry>,
    next_token: u64,
    active_user: usize,
    disabled: bool,
    had_error: bool,
    last_timestamp_ms: u64,
}

/// Slot pools backing a pad destination
fn cell_pools(pad: &mut PadState, cell: CellRef) -> SmallVec<[&mut SlotPool; 2]> {
    let mut pools: SmallVec<[&mut SlotPool; 2]> = SmallVec::new();
    match cell {
        CellRef::Button(b) => pools.push(&mut pad.buttons[b].pool),
        CellRef::Trigger(t) => pools.push(&mut pad.triggers[t].cell.pool),
        CellRef::StickDir { stick, axis, side } => {
            pools.push(&mut pad.sticks[stick].axis_mut(axis).side_mut(side).pool)
        }
        CellRef::StickDiagonal { stick, x, y } => {
            let stick = &mut pad.sticks[stick];
            pools.push(&mut stick.x.side_mut(x).pool);
            pools.push(&mut stick.y.side_mut(y).pool);
        }
        CellRef::StickModifier(s) => pools.push(&mut pad.sticks[s].modifier.pool),
        CellRef::TriggerModifier(t) => pools.push(&mut pad.triggers[t].modifier.pool),
        CellRef::RotateModifier(s) => pools.push(&mut pad.sticks[s].rotate_modifier.pool),
        _ => {}
    }
    pools
}

/// Write one mapping's contribution into a pad cell; true if visible state changed
fn write_pad_cell(
    pad: &mut PadState,
    cell: CellRef,
    slot: Slot,
    down: bool,
    strength: f64,
    replace: bool,
    add: bool,
) -> bool {
    match cell {
        CellRef::Button(b) => pad.buttons[b].set(slot, down, replace),
        CellRef::Trigger(t) => {
            let trigger = &mut pad.triggers[t];
            if add && down {
                trigger.cell.add(slot, 0.0, replace);
            } else {
                trigger.cell.set(slot, down, strength, replace);
            }
            trigger.recompute()
        }
        CellRef::StickDir { stick, axis, side } => {
            let stick = &mut pad.sticks[stick];
            let side = stick.axis_mut(axis).side_mut(side);
            let touched = if add && down {
                side.add(slot, 0.0, replace)
            } else {
                side.set(slot, down, strength, replace)
            };
            if touched {
                stick.disengage_rotation();
            }
            stick.recompute()
        }
        CellRef::StickDiagonal { stick, x, y } => {
            let stick = &mut pad.sticks[stick];
            let mut touched = false;
            for (axis_side, is_x) in [(x, true), (y, false)] {
                let cell = if is_x {
                    stick.x.side_mut(axis_side)
                } else {
                    stick.y.side_mut(axis_side)
                };
                touched |= if add && down {
                    cell.add(slot, 0.0, replace)
                } else {
                    cell.set(slot, down, strength, replace)
                };
            }
            if touched {
                stick.disengage_rotation();
            }
            stick.recompute()
        }
        CellRef::StickModifier(s) => {
            pad.sticks[s].modifier.set(slot, down, strength);
            pad.sticks[s].recompute()
        }
        CellRef::TriggerModifier(t) => {
            pad.triggers[t].modifier.set(slot, down, strength);
            pad.triggers[t].recompute()
        }
        CellRef::RotateModifier(s) => {
            // Only scales rotation speed; the visible value is unaffected
            pad.sticks[s].rotate_modifier.set(slot, down, strength);
            false
        }
        _ => {
            debug_assert!(false, "not a pad cell: {:?}", cell);
            false
        }
    }
}

/// Accumulate into an `Add` destination; true if visible state changed
fn add_pad_cell(pad: &mut PadState, cell: CellRef, slot: Slot, delta: f64, replace: bool) -> bool {
    match cell {
        CellRef::Trigger(t) => {
            pad.triggers[t].cell.add(slot, delta, replace);
            pad.triggers[t].recompute()
        }
        CellRef::StickDir { stick, axis, side } => {
            let stick = &mut pad.sticks[stick];
            stick.axis_mut(axis).side_mut(side).add(slot, delta, replace);
            stick.recompute()
        }
        CellRef::StickDiagonal { stick, x, y } => {
            let stick = &mut pad.sticks[stick];
            stick.x.side_mut(x).add(slot, delta, replace);
            stick.y.side_mut(y).add(slot, delta, replace);
            stick.recompute()
        }
        _ => false,
    }
}

/// Clear every `Add` contribution in a destination; true if visible state changed
fn reset_pad_adds(pad: &mut PadState, cell: CellRef) -> bool {
    match cell {
        CellRef::Trigger(t) => {
            pad.triggers[t].cell.reset_adds();
            pad.triggers[t].recompute()
        }
        CellRef::StickDir { stick, axis, side } => {
            let stick = &mut pad.sticks[stick];
            stick.axis_mut(axis).side_mut(side).reset_adds();
            stick.recompute()
        }
        CellRef::StickDiagonal { stick, x, y } => {
            let stick = &mut pad.sticks[stick];
            stick.x.side_mut(x).reset_adds();
            stick.y.side_mut(y).reset_adds();
            stick.recompute()
        }
        _ => false,
    }
}

fn is_output_cell(cell: CellRef) -> bool {
    matches!(
        cell,
        CellRef::KeyboardKey | CellRef::MouseButton | CellRef::CustomKey | CellRef::Var
    )
}

fn needs_slot(dst: &ControlType) -> bool {
    dst.is_pad_cell() || is_output_cell(dst.cell)
}

fn user_mask(users: impl IntoIterator<Item = usize>) -> u32 {
    users
        .into_iter()
        .filter(|&u| u < MAX_USERS)
        .fold(0, |mask, u| mask | (1 << u))
}

fn mask_users(mask: u32) -> impl Iterator<Item = usize> {
    (0..MAX_USERS).filter(move |u| mask & (1 << u) != 0)
}

impl Engine {
    /// Create an engine running `config`
    pub fn new(config: CompiledConfig, scheduler: Box<dyn Scheduler>) -> Self {
        let users = Arc::new(Users::new(config.settings.users));
        let mut engine = Self {
            settings: EngineSettings::default(),
            pads: Vec::new(),
            namespace: ControlNamespace::new(),
            mappings: Vec::new(),
            registry: Registry::new(),
            outputs: HashMap::new(),
            users,
            host: Arc::new(Host::new()),
            scheduler,
            timers: HashMap::new(),
            next_token: 0,
            active_user: 0,
            disabled: false,
            had_error: false,
            last_timestamp_ms: 0,
        };
        engine.install(config, 0);
        engine
    }

    /// Shared pad records, readable from any thread
    pub fn users(&self) -> Arc<Users> {
        Arc::clone(&self.users)
    }

    pub fn set_output(&mut self, output: Box<dyn HostOutput>) {
        self.host.set_output(output);
    }

    pub fn set_command_sink(&mut self, sink: Box<dyn CommandSink>) {
        self.host.set_sink(sink);
    }

    pub fn active_user(&self) -> usize {
        self.active_user
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// True if the running configuration produced diagnostics
    pub fn had_error(&self) -> bool {
        self.had_error
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn namespace(&self) -> &ControlNamespace {
        &self.namespace
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    /// Pressed state of a control as the engine sees it
    pub fn is_key_down(&self, key: Key, user: usize) -> bool {
        let ty = self.namespace.control_type(key);
        let user = if ty.flags.of_user { user } else { 0 };
        if let Some(input) = self.registry.get(key) {
            return input.is_down(user);
        }
        if let Some(cell) = self.outputs.get(&key) {
            return cell.pressed();
        }
        if user >= self.users.len() {
            return false;
        }
        let pad = self.users.lock(user);
        match ty.cell {
            CellRef::Button(b) => pad.buttons[b].pressed(),
            CellRef::Trigger(t) => pad.triggers[t].pressed(),
            CellRef::StickDir { stick, axis, side } => {
                let state = pad.sticks[stick].axis(axis);
                // A rotator alone holds the stick out; count the side it points to
                let toward = match side {
                    Side::Neg => state.value() < 0.0,
                    Side::Pos => state.value() > 0.0,
                };
                state.side(side).pressed() || (state.rotate_fake_pressed() && toward)
            }
            _ => false,
        }
    }

    /// Toggle bit of a tracked source control
    pub fn is_toggled(&self, key: Key, user: usize) -> bool {
        let user = if self.namespace.control_type(key).flags.of_user { user } else { 0 };
        self.registry
            .get(key)
            .map(|input| input.is_toggled(user))
            .unwrap_or(false)
    }

    /// Feed one digital or analog source transition
    pub fn process_input(
        &mut self,
        key: Key,
        user: usize,
        down: bool,
        strength: f64,
        timestamp_ms: u64,
    ) -> Disposition {
        if user >= MAX_USERS {
            log::warn!("Ignoring {} from user {} (out of range)", key, user + 1);
            return Disposition::default();
        }
        self.last_timestamp_ms = timestamp_ms;
        let strength = if strength.is_finite() { strength.clamp(0.0, 1.0) } else { 1.0 };
        log::trace!("input {} user {} down {} strength {:.3}", key, user + 1, down, strength);

        let users = Arc::clone(&self.users);
        let host = Arc::clone(&self.host);
        let suppress = {
            let mut batch = ChangeBatch::new(&users, &host);
            self.handle_source(&mut batch, key, user, down, strength, timestamp_ms, 0)
        };
        self.drain_commands(timestamp_ms);
        Disposition { suppress }
    }

    /// Feed relative motion; a zero magnitude cancels a hold
    pub fn process_relative(
        &mut self,
        key: Key,
        user: usize,
        magnitude: f64,
        timestamp_ms: u64,
    ) -> Disposition {
        if user >= MAX_USERS || !magnitude.is_finite() {
            return Disposition::default();
        }
        self.last_timestamp_ms = timestamp_ms;
        log::trace!("relative {} user {} magnitude {:.3}", key, user + 1, magnitude);

        let users = Arc::clone(&self.users);
        let host = Arc::clone(&self.host);
        let down = magnitude != 0.0;
        let suppress = {
            let mut batch = ChangeBatch::new(&users, &host);
            self.handle_source(&mut batch, key, user, down, magnitude.abs(), timestamp_ms, 0)
        };
        self.drain_commands(timestamp_ms);
        Disposition { suppress }
    }

    /// Deliver a timer expiration; unknown or cancelled tokens are ignored
    pub fn on_timer(&mut self, token: TimerToken, timestamp_ms: u64) {
        let Some(entry) = self.timers.get(&token).copied() else {
            log::trace!("stale timer {:?}", token);
            return;
        };
        self.last_timestamp_ms = timestamp_ms;

        let users = Arc::clone(&self.users);
        let host = Arc::clone(&self.host);
        {
            let mut batch = ChangeBatch::new(&users, &host);
            self.tick(&mut batch, token, entry, timestamp_ms);
        }
        self.drain_commands(timestamp_ms);
    }

    /// Fire every timer of `clock` due up to `until_ms`, then move the clock there
    pub fn run_until(&mut self, clock: &ManualScheduler, until_ms: u64) {
        let until = Duration::from_millis(until_ms);
        while let Some((token, due)) = clock.next_due(until) {
            self.on_timer(token, due.as_millis() as u64);
        }
        clock.advance_to(until);
    }

    /// Force-release every mapping, stop all timers and return the pads to neutral
    pub fn release_all(&mut self, timestamp_ms: u64) {
        self.force_release_all(timestamp_ms);
        self.drain_commands(timestamp_ms);
    }

    /// Swap in a new configuration
    ///
    /// Everything held by the old mappings is released first and their timers
    /// are cancelled before the mappings are dropped.
    pub fn reload(&mut self, config: CompiledConfig) {
        let timestamp_ms = self.last_timestamp_ms;
        log::info!("Reloading configuration ({} mappings)", config.mappings.len());
        self.force_release_all(timestamp_ms);
        // Requests from the forced releases still index the old mappings
        self.drain_commands(timestamp_ms);
        for (token, _) in self.timers.drain() {
            self.scheduler.cancel(token);
        }
        self.install(config, timestamp_ms);
        self.drain_commands(timestamp_ms);
    }

    fn install(&mut self, config: CompiledConfig, timestamp_ms: u64) {
        let CompiledConfig {
            settings,
            pads,
            namespace,
            mappings,
            diagnostics,
        } = config;
        self.had_error = !diagnostics.is_empty();
        self.users.set_len(settings.users);
        self.settings = settings;
        self.pads = pads;
        self.namespace = namespace;
        self.mappings = mappings;
        for mapping in &mut self.mappings {
            mapping.slot = None;
            mapping.runtime = Default::default();
        }
        self.outputs.clear();
        self.timers.clear();
        self.disabled = false;
        if self.active_user >= self.users.len() {
            self.active_user = 0;
        }
        self.build_registry();

        let users = Arc::clone(&self.users);
        let host = Arc::clone(&self.host);
        host.clear_motion();
        let mut batch = ChangeBatch::new(&users, &host);
        for user in 0..MAX_USERS {
            let pad = self.pads.get(user).copied().unwrap_or_default();
            let changed = batch.user(user).reset(pad.stick_shape, pad.connected);
            if changed && user < users.len() {
                batch.change_user(user, timestamp_ms);
            }
        }
        self.allocate_slots(&mut batch);
        drop(batch);

        log::debug!(
            "Installed {} mappings over {} inputs for {} users",
            self.mappings.len(),
            self.registry.len(),
            self.users.len()
        );
    }

    fn build_registry(&mut self) {
        self.registry.clear();
        let mut condition_keys = Vec::new();
        for (id, mapping) in self.mappings.iter().enumerate() {
            self.registry.register(mapping.source).mappings.push(id);
            Self::register_pair(&mut self.registry, &self.namespace, mapping.source);

            if self.namespace.control_type(mapping.target).cell == CellRef::Var {
                self.registry.register(mapping.target);
            }

            condition_keys.clear();
            for condition in &mapping.conditions {
                condition.keys(&mut condition_keys);
            }
            for &key in &condition_keys {
                let input = self.registry.register(key);
                if !input.resets.contains(&id) {
                    input.resets.push(id);
                }
                Self::register_pair(&mut self.registry, &self.namespace, key);
            }
        }
    }

    /// Make the components of an or/and pair report to the pair
    fn register_pair(registry: &mut Registry, namespace: &ControlNamespace, key: Key) {
        let Some(components) = namespace.control_type(key).pair else {
            return;
        };
        for component in components {
            let input = registry.register(component);
            if !input.parents.contains(&key) {
                input.parents.push(key);
            }
        }
    }

    fn allocate_slots(&mut self, batch: &mut ChangeBatch<'_>) {
        let count = batch.user_count();
        let mut skipped: Vec<usize> = Vec::new();
        for id in 0..self.mappings.len() {
            let (target, target_user) = (self.mappings[id].target, self.mappings[id].target_user);
            let dst = self.namespace.control_type(target);
            let slot = if dst.is_pad_cell() {
                let users: SmallVec<[usize; MAX_USERS]> = match target_user {
                    UserRef::Index(u) => std::iter::once(u).collect(),
                    UserRef::Active | UserRef::All => (0..count).collect(),
                };
                let mut owned = 0;
                for &u in &users {
                    for pool in cell_pools(batch.user(u), dst.cell) {
                        owned |= pool.owned();
                    }
                }
                let slot = SlotPool::lowest_free(owned);
                if let Some(slot) = slot {
                    for &u in &users {
                        for pool in cell_pools(batch.user(u), dst.cell) {
                            pool.claim(slot);
                        }
                    }
                }
                slot
            } else if is_output_cell(dst.cell) {
                let cell = self.outputs.entry(target).or_default();
                let slot = SlotPool::lowest_free(cell.pool.owned());
                if let Some(slot) = slot {
                    cell.pool.claim(slot);
                }
                slot
            } else {
                continue;
            };
            if slot.is_none() {
                skipped.push(id + 1);
            }
            self.mappings[id].slot = slot;
        }
        if !skipped.is_empty() {
            let ids: Vec<String> = skipped.iter().map(|id| format!("#{}", id)).collect();
            log::warn!(
                "Destinations ran out of slots; {} mapping(s) will be ignored: {}",
                skipped.len(),
                ids.join(", ")
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_source(
        &mut self,
        batch: &mut ChangeBatch<'_>,
        key: Key,
        user: usize,
        down: bool,
        strength: f64,
        timestamp_ms: u64,
        depth: usize,
    ) -> bool {
        if depth > MAX_DEPTH {
            log::warn!("Mapping recursion through {} exceeds depth {}", key, MAX_DEPTH);
            return false;
        }
        // User-less controls keep their bits under user 0
        let user = if self.namespace.control_type(key).flags.of_user { user } else { 0 };
        let Some(input) = self.registry.get_mut(key) else {
            return false;
        };
        let changed = input.set_down(user, down);
        let chain = input.mappings.clone();
        let parents = input.parents.clone();
        let resets = if changed { input.resets.clone() } else { Vec::new() };

        let mut suppress = false;
        for id in chain {
            suppress |= self.run_mapping(batch, id, user, down, strength, timestamp_ms, false, depth);
        }

        for parent in parents {
            let ty = self.namespace.control_type(parent);
            let Some([a, b]) = ty.pair else {
                continue;
            };
            let is_down = |k: Key| self.registry.get(k).map(|i| i.is_down(user)).unwrap_or(false);
            let want = if ty.flags.and_pair {
                is_down(a) && is_down(b)
            } else {
                is_down(a) || is_down(b)
            };
            if want != is_down(parent) {
                suppress |= self.handle_source(batch, parent, user, want, strength, timestamp_ms, depth + 1);
            }
        }

        if !resets.is_empty() {
            self.run_resets(batch, &resets, timestamp_ms, depth);
        }
        suppress
    }

    /// Release latched mappings whose conditions no longer hold
    fn run_resets(&mut self, batch: &mut ChangeBatch<'_>, resets: &[usize], timestamp_ms: u64, depth: usize) {
        for &id in resets {
            let mapping = &self.mappings[id];
            if !mapping.is_latched() || evaluate_all(&mapping.conditions, &self.registry, self.active_user) {
                continue;
            }
            let user = mapping.runtime.source_user;
            log::trace!("reset pass for mapping #{} ({})", id + 1, mapping);
            self.run_mapping(batch, id, user, false, 0.0, timestamp_ms, true, depth);
        }
    }

    fn target_users(&self, target: UserRef) -> u32 {
        match target {
            UserRef::Index(u) => user_mask([u]),
            UserRef::Active => user_mask([self.active_user]),
            UserRef::All => user_mask(0..self.users.len()),
        }
    }

    /// Run one mapping for one source transition; returns whether to suppress
    #[allow(clippy::too_many_arguments)]
    fn run_mapping(
        &mut self,
        batch: &mut ChangeBatch<'_>,
        id: usize,
        user: usize,
        down: bool,
        strength: f64,
        timestamp_ms: u64,
        reset: bool,
        depth: usize,
    ) -> bool {
        let mapping = &self.mappings[id];
        let src = self.namespace.control_type(mapping.source);
        let dst = self.namespace.control_type(mapping.target);

        if !reset {
            if self.disabled && dst.cell != CellRef::Command(Command::ToggleDisable) {
                return false;
            }
            if src.flags.of_user && !mapping.source_user.matches(user, self.active_user) {
                return false;
            }
            if needs_slot(&dst) && mapping.slot.is_none() {
                return false;
            }
            if down && !evaluate_all(&mapping.conditions, &self.registry, self.active_user) {
                return false;
            }
            if !down && !mapping.is_latched() {
                return false;
            }
        }
        let suppress = !reset && !mapping.options.forward;

        let Some(transition) = pre_process(&mut self.mappings[id], &src, &dst, down, strength, reset) else {
            return suppress;
        };
        if transition.new && !transition.old {
            let applied = self.target_users(self.mappings[id].target_user);
            let runtime = &mut self.mappings[id].runtime;
            runtime.source_user = user;
            runtime.applied = applied;
            if self.mappings[id].options.reset {
                self.reset_adds(batch, id, &dst, timestamp_ms);
            }
        }

        if let CellRef::Command(command) = dst.cell {
            self.queue_command(batch, id, command, &transition, reset);
        } else if transition.emit {
            let runtime = &self.mappings[id].runtime;
            let down = transition.new && (!self.mappings[id].options.turbo || runtime.turbo_value);
            if transition.new {
                self.mappings[id].runtime.strength = transition.strength;
            }
            self.write_destination(batch, id, &src, &dst, down, transition.strength, timestamp_ms, depth);
        }

        let plan = post_process(&self.mappings[id], &src, &dst, &self.settings, transition.old, transition.new);
        self.apply_timer_plan(id, plan);

        if !transition.new {
            self.mappings[id].runtime.applied = 0;
        }
        suppress
    }

    fn queue_command(
        &mut self,
        batch: &mut ChangeBatch<'_>,
        id: usize,
        command: Command,
        transition: &Transition,
        reset: bool,
    ) {
        let rising = transition.new && !transition.old;
        let falling = transition.old && !transition.new;
        let hold = command == Command::HoldActiveUser;
        // Forced releases only undo holds; they never dispatch fresh commands
        let fire = if reset { falling && hold } else { falling || (rising && hold) };
        if !fire {
            return;
        }
        let mapping = &self.mappings[id];
        let mask = if falling && mapping.runtime.applied != 0 {
            mapping.runtime.applied
        } else {
            self.target_users(mapping.target_user)
        };
        for user in mask_users(mask) {
            batch.command(CommandRequest {
                command,
                user,
                pressed: rising,
                payload: mapping.payload.clone(),
                mapping: id,
            });
        }
    }

    /// Push a mapping's current contribution into its destination
    #[allow(clippy::too_many_arguments)]
    fn write_destination(
        &mut self,
        batch: &mut ChangeBatch<'_>,
        id: usize,
        src: &ControlType,
        dst: &ControlType,
        down: bool,
        strength: f64,
        timestamp_ms: u64,
        depth: usize,
    ) {
        let mapping = &self.mappings[id];
        let (target, slot, applied) = (mapping.target, mapping.slot, mapping.runtime.applied);
        let (replace, add) = (mapping.options.replace, mapping.options.add);

        match dst.cell {
            CellRef::MouseMotion { dx, dy } => {
                if down && src.flags.relative {
                    batch.change_mouse_motion(f64::from(dx) * strength, f64::from(dy) * strength);
                }
            }
            CellRef::Wheel { dx, dy } => {
                if down && src.flags.relative {
                    batch.change_wheel(f64::from(dx) * strength, f64::from(dy) * strength);
                }
            }
            cell if dst.is_pad_cell() => {
                let Some(slot) = slot else {
                    return;
                };
                for user in mask_users(applied) {
                    if write_pad_cell(batch.user(user), cell, slot, down, strength, replace, add) {
                        batch.change_user(user, timestamp_ms);
                    }
                }
            }
            cell if is_output_cell(cell) => {
                let Some(slot) = slot else {
                    return;
                };
                let Some(output) = self.outputs.get_mut(&target) else {
                    return;
                };
                let changed = output.set(slot, down, replace);
                let pressed = output.pressed();
                match cell {
                    CellRef::KeyboardKey if changed || (down && pressed) => {
                        batch.effect(Effect::Key { key: target, down: pressed });
                    }
                    CellRef::MouseButton if changed => {
                        batch.effect(Effect::MouseButton { key: target, down: pressed });
                    }
                    CellRef::CustomKey if changed => {
                        batch.effect(Effect::Custom { key: target, down: pressed });
                    }
                    CellRef::Var if changed => {
                        self.handle_source(batch, target, 0, pressed, 1.0, timestamp_ms, depth + 1);
                    }
                    _ => {}
                }
            }
            // Rotators move on their timer and keep their angle on release
            _ => {}
        }
    }

    /// `Reset` option: a press clears accumulated `Add` contributions
    fn reset_adds(&mut self, batch: &mut ChangeBatch<'_>, id: usize, dst: &ControlType, timestamp_ms: u64) {
        let applied = self.mappings[id].runtime.applied;
        for user in mask_users(applied) {
            if reset_pad_adds(batch.user(user), dst.cell) {
                batch.change_user(user, timestamp_ms);
            }
        }
    }

    fn apply_timer_plan(&mut self, id: usize, plan: TimerPlan) {
        match plan {
            TimerPlan::Keep => {}
            TimerPlan::Stop => self.stop_timer(id),
            TimerPlan::Once(delay, kind) => self.start_timer(id, delay, kind, false),
            TimerPlan::Repeating(period, kind) => self.start_timer(id, period, kind, true),
        }
    }

    fn start_timer(&mut self, id: usize, duration: Duration, kind: TimerKind, repeating: bool) {
        self.stop_timer(id);
        self.next_token += 1;
        let token = TimerToken(self.next_token);
        if repeating {
            self.scheduler.schedule_repeating(duration, token);
        } else {
            self.scheduler.schedule_once(duration, token);
        }
        self.timers.insert(token, TimerEntry { mapping: id, kind });
        self.mappings[id].runtime.timer = Some((token, kind));
        log::trace!("timer {:?} {} for mapping #{} every {:?}", token, kind, id + 1, duration);
    }

    fn stop_timer(&mut self, id: usize) {
        if let Some((token, _)) = self.mappings[id].runtime.timer.take() {
            self.scheduler.cancel(token);
            self.timers.remove(&token);
        }
    }

    fn tick(&mut self, batch: &mut ChangeBatch<'_>, token: TimerToken, entry: TimerEntry, timestamp_ms: u64) {
        let id = entry.mapping;
        let src = self.namespace.control_type(self.mappings[id].source);
        let dst = self.namespace.control_type(self.mappings[id].target);

        match entry.kind {
            TimerKind::Turbo => {
                let runtime = &mut self.mappings[id].runtime;
                runtime.turbo_value = !runtime.turbo_value;
                let down = runtime.active && runtime.turbo_value;
                let strength = runtime.strength;
                if let CellRef::Command(_) = dst.cell {
                    return;
                }
                self.write_destination(batch, id, &src, &dst, down, strength, timestamp_ms, 0);
            }
            TimerKind::Release => {
                self.timers.remove(&token);
                self.mappings[id].runtime.timer = None;
                let user = self.mappings[id].runtime.source_user;
                self.run_mapping(batch, id, user, false, 0.0, timestamp_ms, false, 0);
            }
            TimerKind::Repeat => {
                let mapping = &self.mappings[id];
                let strength = mapping.runtime.strength;
                match dst.cell {
                    CellRef::MouseMotion { dx, dy } => {
                        let amount = strength * self.settings.mouse_speed;
                        batch.change_mouse_motion(f64::from(dx) * amount, f64::from(dy) * amount);
                    }
                    CellRef::Wheel { dx, dy } => {
                        let amount = strength * self.settings.wheel_speed;
                        batch.change_wheel(f64::from(dx) * amount, f64::from(dy) * amount);
                    }
                    cell if mapping.options.add => {
                        let Some(slot) = mapping.slot else {
                            return;
                        };
                        let delta = strength * self.settings.motion_interval.as_secs_f64() / mapping.rate;
                        let replace = mapping.options.replace;
                        for user in mask_users(mapping.runtime.applied) {
                            if add_pad_cell(batch.user(user), cell, slot, delta, replace) {
                                batch.change_user(user, timestamp_ms);
                            }
                        }
                    }
                    _ => {}
                }
            }
            TimerKind::Rotate => {
                let CellRef::Rotator { stick, clockwise } = dst.cell else {
                    return;
                };
                let mapping = &self.mappings[id];
                let base = self.settings.rotate_interval.as_secs_f64() / mapping.rate * PERIMETER;
                for user in mask_users(mapping.runtime.applied) {
                    let stick_state = &mut batch.user(user).sticks[stick];
                    let delta = base * stick_state.rotate_modifier.product();
                    if stick_state.rotate(delta, clockwise) {
                        batch.change_user(user, timestamp_ms);
                    }
                }
            }
            TimerKind::KeyRepeatDelay => {
                self.start_timer(id, self.settings.key_repeat_interval, TimerKind::KeyRepeat, true);
                self.repeat_key(batch, id);
            }
            TimerKind::KeyRepeat => self.repeat_key(batch, id),
        }
    }

    /// Re-send a held keyboard destination
    fn repeat_key(&self, batch: &mut ChangeBatch<'_>, id: usize) {
        let target = self.mappings[id].target;
        if self.namespace.control_type(target).cell != CellRef::KeyboardKey {
            return;
        }
        if self.outputs.get(&target).map(|c| c.pressed()).unwrap_or(false) {
            batch.effect(Effect::Key { key: target, down: true });
        }
    }

    /// Release latched mappings, stop their timers and return every pad to neutral
    ///
    /// Clearing the pads also drops conditional `Add` totals and rotator angles,
    /// which outlive their mappings on an ordinary release.
    fn force_release_all(&mut self, timestamp_ms: u64) {
        let users = Arc::clone(&self.users);
        let host = Arc::clone(&self.host);
        let mut batch = ChangeBatch::new(&users, &host);
        for id in 0..self.mappings.len() {
            if self.mappings[id].is_latched() {
                let user = self.mappings[id].runtime.source_user;
                self.run_mapping(&mut batch, id, user, false, 0.0, timestamp_ms, true, 0);
            }
            self.stop_timer(id);
        }
        for user in 0..users.len() {
            if batch.user(user).release_all() {
                batch.change_user(user, timestamp_ms);
            }
        }
        log::debug!("Released all mappings");
    }

    fn set_active_user(&mut self, user: usize) {
        if user < self.users.len() && user != self.active_user {
            log::info!("Active user is now {}", user + 1);
            self.active_user = user;
        }
    }

    /// Apply queued commands now that no pad lock is held
    fn drain_commands(&mut self, timestamp_ms: u64) {
        while let Some(request) = self.host.pop_command() {
            log::debug!("Command {} for user {}", request.command, request.user + 1);
            match request.command {
                Command::ToggleDisable => {
                    if self.disabled {
                        self.disabled = false;
                        log::info!("Mappings enabled");
                    } else {
                        self.force_release_all(timestamp_ms);
                        self.disabled = true;
                        log::info!("Mappings disabled");
                    }
                }
                Command::SetActiveUser => self.set_active_user(request.user),
                Command::HoldActiveUser => {
                    let previous = self.active_user;
                    let Some(mapping) = self.mappings.get_mut(request.mapping) else {
                        continue;
                    };
                    if request.pressed {
                        mapping.runtime.restore_user = Some(previous);
                        self.set_active_user(request.user);
                    } else if let Some(previous) = mapping.runtime.restore_user.take() {
                        self.set_active_user(previous);
                    }
                }
                Command::ToggleConnected => {
                    if request.user >= self.users.len() {
                        continue;
                    }
                    let users = Arc::clone(&self.users);
                    let host = Arc::clone(&self.host);
                    let mut batch = ChangeBatch::new(&users, &host);
                    let pad = batch.user(request.user);
                    pad.connected = !pad.connected;
                    log::info!(
                        "Pad {} {}",
                        request.user + 1,
                        if pad.connected { "connected" } else { "disconnected" }
                    );
                    batch.change_user(request.user, timestamp_ms);
                }
                Command::Reload | Command::LoadConfig => self.host.forward_command(&request),
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("mappings", &self.mappings.len())
            .field("users", &self.users.len())
            .field("active_user", &self.active_user)
            .field("disabled", &self.disabled)
            .finish()
    }
}
