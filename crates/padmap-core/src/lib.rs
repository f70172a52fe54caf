// Padmap Core Library
// Keyboard, mouse and gamepad input remapped onto virtual gamepads

pub mod axis;
mod batch;
mod behavior;
pub mod condition;
pub mod config;
pub mod control;
pub mod device;
pub mod engine;
pub mod key;
pub mod mapping;
pub mod output;
pub mod registry;
pub mod settings;
pub mod slot;
pub mod timer;

pub use axis::StickShape;
pub use condition::{Condition, ConditionLeaf, ConditionState};
pub use config::{
    compile, parse_condition, CompileError, CompiledConfig, ConditionParseError, ConfigError,
    ConfigToml,
};
pub use control::{CellRef, Command, ControlNamespace, ControlType, CustomKind};
pub use device::{PadSnapshot, Users, MAX_USERS};
pub use engine::{Disposition, Engine};
pub use key::Key;
pub use mapping::{Mapping, MappingOption, MappingOptions, UserRef};
pub use output::{CommandRequest, CommandSink, HostOutput, NullOutput, OutputEvent, RecordingOutput};
pub use settings::{EngineSettings, PadSettings, SettingsError};
pub use timer::{ManualScheduler, Scheduler, TimerToken};
