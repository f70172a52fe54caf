// Padmap CLI
// Validate configurations, list controls and replay scripted input offline

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use serde::Deserialize;

use padmap_core::config::parse_control_ref;
use padmap_core::control::builtin_type;
use padmap_core::key::BUILTIN_CONTROLS;
use padmap_core::{
    CompiledConfig, Engine, ManualScheduler, OutputEvent, PadSnapshot, RecordingOutput, UserRef,
};

/// Keyboard, mouse and gamepad remapper onto virtual gamepads
#[derive(Parser, Debug)]
#[command(name = "padmap")]
#[command(version)]
#[command(about = "Remap keyboard, mouse and gamepad input onto virtual gamepads", long_about = None)]
struct Args {
    /// TOML configuration file (defaults to <config dir>/padmap/config.toml)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Validate config and exit
    #[arg(long)]
    check_config: bool,

    /// List every control name and exit
    #[arg(long)]
    list_controls: bool,

    /// Feed a scripted event file through the engine and print the results
    #[arg(long, value_name = "EVENTS")]
    replay: Option<PathBuf>,
}

/// A scripted input file
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReplayScript {
    /// Keep the clock running this long after the last event
    #[serde(default)]
    tail_ms: u64,

    #[serde(default)]
    event: Vec<ReplayEvent>,
}

/// One `[[event]]` table
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReplayEvent {
    at_ms: u64,

    /// Control name, optionally suffixed with `@user`
    control: String,

    /// 1-based source user; overrides an `@user` suffix
    user: Option<usize>,

    #[serde(default = "default_down")]
    down: bool,

    strength: Option<f64>,

    /// Relative motion; the event is fed as relative input when present
    magnitude: Option<f64>,
}

fn default_down() -> bool {
    true
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("padmap").join("config.toml"))
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

fn load_config(args: &Args) -> Result<CompiledConfig> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path().ok_or_else(|| anyhow!("no configuration directory; pass --config"))?,
    };
    log::info!("Loading configuration from {}", path.display());
    CompiledConfig::from_toml_path(&path).with_context(|| format!("failed to load {}", path.display()))
}

fn check_config(config: &CompiledConfig) -> Result<()> {
    for diagnostic in &config.diagnostics {
        println!("warning: {}", diagnostic);
    }
    println!(
        "{} mappings for {} users, {} custom controls",
        config.mappings.len(),
        config.settings.users,
        config.namespace.custom_len()
    );
    if config.had_error() {
        bail!("configuration has {} problem(s)", config.diagnostics.len());
    }
    println!("Configuration is valid");
    Ok(())
}

fn list_controls(config: Option<&CompiledConfig>) {
    for &(name, code) in BUILTIN_CONTROLS {
        let ty = builtin_type(padmap_core::Key(code));
        if !ty.is_source() && !ty.is_destination() {
            continue;
        }
        let role = match (ty.is_source(), ty.is_destination()) {
            (true, true) => "in/out",
            (true, false) => "in",
            _ => "out",
        };
        println!("{:#06x}  {:<20} {:<8} {}", code, name, ty.domain, role);
    }
    if let Some(config) = config {
        for (name, key, kind) in config.namespace.custom() {
            println!("{:#06x}  {:<20} {:<8} {}", key.code(), name, "Custom", kind);
        }
    }
}

fn format_snapshot(s: &PadSnapshot) -> String {
    let (lx, ly) = s.stick(0);
    let (rx, ry) = s.stick(1);
    format!(
        "pad {} v{} {}buttons={:#06x} lt={:.2} rt={:.2} ls=({:.2}, {:.2}) rs=({:.2}, {:.2})",
        s.user + 1,
        s.version,
        if s.connected { "" } else { "disconnected " },
        s.buttons,
        s.triggers[0],
        s.triggers[1],
        lx,
        ly,
        rx,
        ry
    )
}

fn format_output(event: &OutputEvent) -> String {
    let edge = |down: bool| if down { "down" } else { "up" };
    match event {
        OutputEvent::Key { key, down } => format!("key {} {}", key, edge(*down)),
        OutputEvent::MouseButton { key, down } => format!("mouse {} {}", key, edge(*down)),
        OutputEvent::Motion { dx, dy } => format!("motion {} {}", dx, dy),
        OutputEvent::Scroll { dx, dy } => format!("scroll {} {}", dx, dy),
        OutputEvent::Custom { key, down } => format!("custom {} {}", key, edge(*down)),
        OutputEvent::Command(request) => format!(
            "command {} user {}{}",
            request.command,
            request.user + 1,
            request
                .payload
                .as_deref()
                .map(|p| format!(" '{}'", p))
                .unwrap_or_default()
        ),
    }
}

fn replay(config: CompiledConfig, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut script: ReplayScript =
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
    script.event.sort_by_key(|e| e.at_ms);

    let clock = ManualScheduler::new();
    let recorder = RecordingOutput::new();
    let mut engine = Engine::new(config, Box::new(clock.clone()));
    engine.set_output(Box::new(recorder.clone()));
    engine.set_command_sink(Box::new(recorder.clone()));

    let committed: Arc<Mutex<Vec<PadSnapshot>>> = Arc::default();
    let users = engine.users();
    for user in 0..users.len() {
        let committed = Arc::clone(&committed);
        users.register_callback(user, move |snapshot| committed.lock().push(*snapshot));
    }

    let flush = |at_ms: u64| {
        for snapshot in committed.lock().drain(..) {
            println!("[{:>6} ms] {}", snapshot.timestamp_ms, format_snapshot(&snapshot));
        }
        for event in recorder.take() {
            println!("[{:>6} ms] {}", at_ms, format_output(&event));
        }
    };

    for event in &script.event {
        engine.run_until(&clock, event.at_ms);
        flush(event.at_ms);

        let (key, user) = parse_control_ref(&event.control, engine.namespace())
            .with_context(|| format!("bad control '{}'", event.control))?;
        let user = match event.user.map(|u| UserRef::Index(u.saturating_sub(1))).or(user) {
            None => 0,
            Some(UserRef::Index(u)) => u,
            Some(UserRef::Active) => engine.active_user(),
            Some(UserRef::All) => bail!("'{}': input events need a single user", event.control),
        };
        let disposition = match event.magnitude {
            Some(magnitude) => engine.process_relative(key, user, magnitude, event.at_ms),
            None => engine.process_input(key, user, event.down, event.strength.unwrap_or(1.0), event.at_ms),
        };
        log::debug!("{} -> suppress {}", event.control, disposition.suppress);
        flush(event.at_ms);
    }

    let end = script.event.last().map(|e| e.at_ms).unwrap_or(0) + script.tail_ms;
    engine.run_until(&clock, end);
    flush(end);

    for user in 0..users.len() {
        if let Some(snapshot) = users.snapshot(user) {
            println!("final {}", format_snapshot(&snapshot));
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.list_controls {
        let config = if args.config.is_some() { Some(load_config(&args)?) } else { None };
        list_controls(config.as_ref());
        return Ok(());
    }

    let config = load_config(&args)?;

    if args.check_config {
        return check_config(&config);
    }

    match &args.replay {
        Some(path) => replay(config, path),
        None => bail!("nothing to do: pass --check-config, --list-controls or --replay"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["padmap", "--config", "/tmp/test.toml"]);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/test.toml")));
        assert!(!args.verbose);
        assert!(!args.check_config);
        assert!(!args.list_controls);
        assert!(args.replay.is_none());
    }

    #[test]
    fn test_args_replay() {
        let args = Args::parse_from(["padmap", "-c", "pad.toml", "--replay", "events.toml", "-v"]);
        assert_eq!(args.replay, Some(PathBuf::from("events.toml")));
        assert!(args.verbose);
    }

    #[test]
    fn test_replay_script_parsing() {
        let script: ReplayScript = toml::from_str(
            r#"
            tail_ms = 100

            [[event]]
            at_ms = 0
            control = "A"

            [[event]]
            at_ms = 50
            control = "A"
            down = false

            [[event]]
            at_ms = 55
            control = "PadA"
            user = 2

            [[event]]
            at_ms = 60
            control = "MouseRight"
            magnitude = 4.0
            "#,
        )
        .unwrap();
        assert_eq!(script.tail_ms, 100);
        assert_eq!(script.event.len(), 4);
        assert!(script.event[0].down);
        assert!(!script.event[1].down);
        assert_eq!(script.event[2].user, Some(2));
        assert_eq!(script.event[3].magnitude, Some(4.0));
    }

    #[test]
    fn test_replay_rejects_unknown_fields() {
        assert!(toml::from_str::<ReplayScript>("[[event]]\nat_ms = 0\ncontrol = \"A\"\nspeed = 1\n").is_err());
    }
}
