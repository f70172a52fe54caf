// Padmap Config API
// TOML loading, condition parsing and mapping compilation

pub mod compiler;
pub mod condition_parser;
pub mod parser;

pub use compiler::{compile, CompileError, CompiledConfig};
pub use condition_parser::{parse_condition, parse_control_ref, ConditionParseError};
pub use parser::{ConfigError, ConfigToml, CustomConfig, GeneralConfig, MappingToml, PadConfig};
