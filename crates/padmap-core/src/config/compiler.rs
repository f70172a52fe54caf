// Padmap Config Compiler
// Turns parsed [[mapping]] tables into engine mappings, collecting diagnostics

use std::path::Path;
use strum::IntoEnumIterator;

use super::condition_parser::{parse_condition, parse_control_ref, ConditionParseError};
use super::parser::{ConfigError, ConfigToml, MappingToml};
use crate::condition::Condition;
use crate::control::{CellRef, Command, ControlNamespace, CustomKind, NamespaceError};
use crate::mapping::{Mapping, MappingOption, MappingOptions, MappingRuntime, UserRef};
use crate::settings::{EngineSettings, PadSettings, SettingsError, MAX_RATE};
use crate::Key;

/// A recoverable problem found while compiling mappings
///
/// Each one is logged and skipped; compilation always completes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("mapping #{index}: unknown control '{name}'")]
    UnknownControl { index: usize, name: String },

    #[error("mapping #{index}: bad condition: {error}")]
    BadCondition { index: usize, error: ConditionParseError },

    #[error("mapping #{index}: user {user} is out of range (1..={users})")]
    UserOutOfRange { index: usize, user: usize, users: usize },

    #[error("mapping #{index}: {reason}")]
    BadOption { index: usize, reason: String },

    #[error("mapping #{index}: {reason}")]
    BadMapping { index: usize, reason: String },

    #[error("mapping #{index}: invalid {field} {value}, using {default}")]
    InvalidValue {
        index: usize,
        field: &'static str,
        value: f64,
        default: f64,
    },

    #[error("custom control: {0}")]
    Namespace(#[from] NamespaceError),

    #[error("[general]: {0}")]
    Settings(#[from] SettingsError),

    #[error("{count} [[pad]] tables for {users} users, ignoring the rest")]
    ExtraPads { count: usize, users: usize },
}

/// Everything the engine needs to run one configuration
#[derive(Debug, Clone)]
pub struct CompiledConfig {
    pub settings: EngineSettings,
    pub pads: Vec<PadSettings>,
    pub namespace: ControlNamespace,
    pub mappings: Vec<Mapping>,
    pub diagnostics: Vec<CompileError>,
}

impl Default for CompiledConfig {
    fn default() -> Self {
        Self::new(EngineSettings::default(), Vec::new())
    }
}

impl CompiledConfig {
    /// Build a configuration directly from mappings
    pub fn new(settings: EngineSettings, mappings: Vec<Mapping>) -> Self {
        let pads = vec![PadSettings::default(); settings.users];
        Self {
            settings,
            pads,
            namespace: ControlNamespace::new(),
            mappings,
            diagnostics: Vec::new(),
        }
    }

    /// Load and compile a TOML file
    pub fn from_toml_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = ConfigToml::from_toml_path(path)?;
        Ok(compile(&config))
    }

    /// Compile a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(compile(&ConfigToml::from_toml(content)?))
    }

    /// True if any mapping or custom control was rejected or patched
    pub fn had_error(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

struct Compiler<'a> {
    settings: &'a EngineSettings,
    namespace: &'a ControlNamespace,
    diagnostics: Vec<CompileError>,
}

impl Compiler<'_> {
    fn report(&mut self, error: CompileError) {
        log::warn!("{}", error);
        self.diagnostics.push(error);
    }

    fn check_user(&mut self, index: usize, user: UserRef) -> bool {
        match user {
            UserRef::Index(u) if u >= self.settings.users => {
                self.report(CompileError::UserOutOfRange {
                    index,
                    user: u + 1,
                    users: self.settings.users,
                });
                false
            }
            _ => true,
        }
    }

    fn endpoint(&mut self, index: usize, text: &str) -> Option<(Key, Option<UserRef>)> {
        match parse_control_ref(text, self.namespace) {
            Ok(endpoint) => Some(endpoint),
            Err(ConditionParseError::UnknownControl(name)) => {
                self.report(CompileError::UnknownControl { index, name });
                None
            }
            Err(error) => {
                self.report(CompileError::BadMapping {
                    index,
                    reason: format!("'{}': {}", text, error),
                });
                None
            }
        }
    }

    /// Condition leaves must name a configured user
    fn check_condition_users(&mut self, index: usize, condition: &Condition) -> bool {
        match condition {
            Condition::Leaf(leaf) => self.check_user(index, leaf.user),
            Condition::All(children) | Condition::Any(children) => children
                .iter()
                .fold(true, |ok, child| self.check_condition_users(index, child) && ok),
        }
    }

    fn number(
        &mut self,
        index: usize,
        field: &'static str,
        value: Option<f64>,
        default: f64,
        allow_zero: bool,
        max: f64,
    ) -> f64 {
        match value {
            None => default,
            Some(v) if v.is_finite() && v <= max && (v > 0.0 || (allow_zero && v == 0.0)) => v,
            Some(v) => {
                self.report(CompileError::InvalidValue {
                    index,
                    field,
                    value: v,
                    default,
                });
                default
            }
        }
    }

    fn mapping(&mut self, index: usize, entry: &MappingToml) -> Option<Mapping> {
        let (source, source_user) = self.endpoint(index, &entry.source)?;
        let (target, target_user) = self.endpoint(index, &entry.target)?;
        let src = self.namespace.control_type(source);
        let dst = self.namespace.control_type(target);

        if !src.is_source() {
            self.report(CompileError::BadMapping {
                index,
                reason: format!("'{}' cannot be used as a source", entry.source),
            });
            return None;
        }
        if !dst.is_destination() {
            self.report(CompileError::BadMapping {
                index,
                reason: format!("'{}' cannot be used as a destination", entry.target),
            });
            return None;
        }

        // User-less controls keep their state under user 0
        let source_user = if src.flags.of_user {
            source_user.unwrap_or(UserRef::Index(0))
        } else {
            UserRef::Index(0)
        };
        let target_user = if dst.flags.of_user || matches!(dst.cell, CellRef::Command(_)) {
            target_user.unwrap_or(UserRef::Active)
        } else {
            UserRef::Index(0)
        };
        if !self.check_user(index, source_user) || !self.check_user(index, target_user) {
            return None;
        }

        let mut options = MappingOptions::default();
        for name in &entry.options {
            match name.parse::<MappingOption>() {
                Ok(option) => options.set(option, true),
                Err(_) => {
                    let known: Vec<String> = MappingOption::iter().map(|o| o.to_string()).collect();
                    self.report(CompileError::BadOption {
                        index,
                        reason: format!("unknown option '{}' (expected one of {})", name, known.join(", ")),
                    });
                }
            }
        }
        let magnitude = matches!(
            dst.cell,
            CellRef::Trigger(_) | CellRef::StickDir { .. } | CellRef::StickDiagonal { .. }
        );
        if options.add && !magnitude {
            options.add = false;
            self.report(CompileError::BadOption {
                index,
                reason: format!("'add' needs a trigger or stick destination, not '{}'", entry.target),
            });
        }
        if options.turbo && dst.flags.relative {
            options.turbo = false;
            self.report(CompileError::BadOption {
                index,
                reason: "'turbo' has no effect on relative destinations".to_string(),
            });
        }

        match dst.cell {
            CellRef::Command(Command::LoadConfig) if entry.payload.is_none() => {
                self.report(CompileError::BadMapping {
                    index,
                    reason: "LoadConfig needs a payload".to_string(),
                });
                return None;
            }
            CellRef::Command(Command::SetActiveUser | Command::HoldActiveUser)
                if target_user == UserRef::All =>
            {
                self.report(CompileError::BadMapping {
                    index,
                    reason: "the active user cannot be @all".to_string(),
                });
                return None;
            }
            CellRef::Command(Command::LoadConfig) => {}
            _ if entry.payload.is_some() => {
                self.report(CompileError::BadOption {
                    index,
                    reason: "payload is only used by LoadConfig".to_string(),
                });
            }
            _ => {}
        }

        let mut conditions = Vec::new();
        if let Some(expr) = &entry.when {
            match parse_condition(expr, self.namespace) {
                Ok(condition) => {
                    if !self.check_condition_users(index, &condition) {
                        return None;
                    }
                    conditions.push(condition);
                }
                Err(error) => {
                    self.report(CompileError::BadCondition { index, error });
                    return None;
                }
            }
        }

        let strength = self.number(index, "strength", entry.strength, 1.0, true, f64::MAX);
        let rate = self.number(index, "rate", entry.rate, self.settings.default_rate, false, MAX_RATE);

        Some(Mapping {
            source,
            source_user,
            target,
            target_user,
            strength,
            rate,
            options,
            conditions,
            payload: entry.payload.clone(),
            slot: None,
            runtime: MappingRuntime::default(),
        })
    }
}

/// Compile a parsed configuration
///
/// Never fails: every problem is patched or skipped and reported through
/// `CompiledConfig::diagnostics`.
pub fn compile(config: &ConfigToml) -> CompiledConfig {
    let mut diagnostics = Vec::new();
    let mut report = |error: CompileError| {
        log::warn!("{}", error);
        diagnostics.push(error);
    };

    let (settings, errors) = config.engine_settings();
    errors.into_iter().map(CompileError::from).for_each(&mut report);
    let pads = config.pad_settings(settings.users);
    if config.pad.len() > settings.users {
        report(CompileError::ExtraPads {
            count: config.pad.len(),
            users: settings.users,
        });
    }

    let mut namespace = ControlNamespace::new();
    let customs = config
        .custom
        .vars
        .iter()
        .map(|n| (n, CustomKind::Var))
        .chain(config.custom.keys.iter().map(|n| (n, CustomKind::Key)));
    for (name, kind) in customs {
        if let Err(error) = namespace.register(name, kind) {
            report(CompileError::from(error));
        }
    }

    let mut compiler = Compiler {
        settings: &settings,
        namespace: &namespace,
        diagnostics,
    };
    let mappings: Vec<Mapping> = config
        .mapping
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| compiler.mapping(i + 1, entry))
        .collect();
    let diagnostics = compiler.diagnostics;

    log::debug!(
        "Compiled {} of {} mappings ({} diagnostics)",
        mappings.len(),
        config.mapping.len(),
        diagnostics.len()
    );

    CompiledConfig {
        settings,
        pads,
        namespace,
        mappings,
        diagnostics,
    }
}
