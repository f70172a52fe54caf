// Padmap Configuration Loading Tests
//
// Load real TOML files, run them through the engine and check how
// problems in user configuration are reported.
//
// Run with: cargo test -p padmap-core --test config_loading

use std::path::PathBuf;

use padmap_core::{
    CompileError, CompiledConfig, ConfigError, Engine, EngineSettings, Key, ManualScheduler,
    SettingsError, StickShape, MAX_USERS,
};

fn demo_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos/default.toml")
}

fn engine_for(config: CompiledConfig) -> (Engine, ManualScheduler) {
    let clock = ManualScheduler::new();
    (Engine::new(config, Box::new(clock.clone())), clock)
}

#[test]
fn test_demo_config_compiles_cleanly() {
    let config = CompiledConfig::from_toml_path(demo_config()).unwrap();
    assert!(!config.had_error(), "{:?}", config.diagnostics);
    assert_eq!(config.settings.users, 2);
    assert_eq!(config.pads.len(), 2);
    assert!(config.pads.iter().all(|p| p.stick_shape == StickShape::Circle));
    assert_eq!(config.namespace.custom_len(), 1);
}

#[test]
fn test_demo_config_drives_two_players() {
    let config = CompiledConfig::from_toml_path(demo_config()).unwrap();
    let (mut engine, _clock) = engine_for(config);

    engine.process_input(Key::W, 0, true, 1.0, 0);
    engine.process_input(Key::D, 0, true, 1.0, 1);
    engine.process_input(Key::UP, 0, true, 1.0, 2);

    let users = engine.users();
    let (x, y) = users.snapshot(0).unwrap().stick(0);
    let diagonal = std::f64::consts::FRAC_1_SQRT_2;
    assert!((x - diagonal).abs() < 1e-9 && (y - diagonal).abs() < 1e-9);
    assert_eq!(users.snapshot(1).unwrap().stick(0), (0.0, 1.0));

    // CapsLock toggles the walk var, which halves player one's stick
    engine.process_input(Key::CAPS_LOCK, 0, true, 1.0, 3);
    engine.process_input(Key::CAPS_LOCK, 0, false, 0.0, 4);
    assert!(engine.is_toggled(Key::CAPS_LOCK, 0));
    let (x, _) = users.snapshot(0).unwrap().stick(0);
    assert!((x - diagonal / 2.0).abs() < 1e-9);
    assert_eq!(users.snapshot(1).unwrap().stick(0), (0.0, 1.0));
}

#[test]
fn test_missing_file_is_io_error() {
    let err = CompiledConfig::from_toml_path("/nonexistent/padmap.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn test_bad_mappings_are_reported_and_skipped() {
    let config = CompiledConfig::from_toml(
        r#"
        [general]
        users = 2

        [[mapping]]
        source = "NoSuchKey"
        target = "PadA"

        [[mapping]]
        source = "A"
        target = "PadA@3"

        [[mapping]]
        source = "B"
        target = "PadB"
        options = ["sticky"]

        [[mapping]]
        source = "C"
        target = "PadX"
        when = "LShift &"

        [[mapping]]
        source = "D"
        target = "PadY"
        "#,
    )
    .unwrap();

    assert!(config.had_error());
    assert_eq!(config.diagnostics.len(), 4);
    assert!(matches!(
        config.diagnostics[0],
        CompileError::UnknownControl { index: 1, .. }
    ));
    assert!(matches!(
        config.diagnostics[1],
        CompileError::UserOutOfRange { index: 2, user: 3, users: 2 }
    ));
    assert!(matches!(config.diagnostics[2], CompileError::BadOption { index: 3, .. }));
    assert!(matches!(config.diagnostics[3], CompileError::BadCondition { index: 4, .. }));

    // The unknown option only drops the option; the mapping survives
    let targets: Vec<Key> = config.mappings.iter().map(|m| m.target).collect();
    assert_eq!(targets, vec![Key::PAD_B, Key::PAD_Y]);

    let (mut engine, _clock) = engine_for(config);
    assert!(engine.had_error());
    engine.process_input(Key::D, 0, true, 1.0, 0);
    assert!(engine.users().snapshot(0).unwrap().button(Key::PAD_Y));
}

#[test]
fn test_only_toml_errors_are_fatal() {
    assert!(matches!(
        CompiledConfig::from_toml("[[mapping]]\nsource = \"A\"\ntarget = \"PadA\"\nspeed = 2\n"),
        Err(ConfigError::TomlParse(_))
    ));
    assert!(matches!(
        CompiledConfig::from_toml("[general\nusers = 2\n"),
        Err(ConfigError::TomlParse(_))
    ));
}

#[test]
fn test_bad_general_values_fall_back() {
    let config = CompiledConfig::from_toml(
        r#"
        [general]
        users = 1
        motion_interval_ms = 0
        mouse_speed = -3.0

        [[pad]]
        stick_shape = "circle"

        [[pad]]
        connected = false

        [[mapping]]
        source = "A"
        target = "PadA"
        "#,
    )
    .unwrap();

    assert!(config.had_error());
    assert_eq!(config.diagnostics.len(), 3);
    assert!(matches!(
        config.diagnostics.last(),
        Some(CompileError::ExtraPads { count: 2, users: 1 })
    ));
    assert_eq!(config.settings.users, 1);
    assert_eq!(config.settings.mouse_speed, EngineSettings::default().mouse_speed);
    assert_eq!(config.pads.len(), 1);
    assert_eq!(config.pads[0].stick_shape, StickShape::Circle);

    let (mut engine, _clock) = engine_for(config);
    assert!(engine.had_error());
    engine.process_input(Key::A, 0, true, 1.0, 0);
    assert!(engine.users().snapshot(0).unwrap().button(Key::PAD_A));
}

#[test]
fn test_user_count_out_of_range_is_clamped() {
    let config = CompiledConfig::from_toml("[general]\nusers = 9\n").unwrap();
    assert_eq!(config.settings.users, MAX_USERS);
    assert!(matches!(
        config.diagnostics[..],
        [CompileError::Settings(SettingsError::UserCount(9))]
    ));
}

#[test]
fn test_condition_users_outside_the_config_are_rejected() {
    let config = CompiledConfig::from_toml(
        r#"
        [general]
        users = 4

        [[mapping]]
        source = "A"
        target = "PadA"
        when = "PadB@40"

        [[mapping]]
        source = "B"
        target = "PadB"
        when = "PadX@6"

        [[mapping]]
        source = "C"
        target = "PadY"
        when = "!PadX@4"
        "#,
    )
    .unwrap();

    assert!(config.had_error());
    assert!(matches!(
        config.diagnostics[..],
        [
            CompileError::UserOutOfRange { index: 1, user: 40, users: 4 },
            CompileError::UserOutOfRange { index: 2, user: 6, users: 4 },
        ]
    ));
    assert_eq!(config.mappings.len(), 1);

    let (mut engine, _clock) = engine_for(config);
    assert!(engine.had_error());
    assert!(!engine.process_input(Key::A, 0, true, 1.0, 0).suppress);
    engine.process_input(Key::C, 0, true, 1.0, 1);
    let pad = engine.users().snapshot(0).unwrap();
    assert!(!pad.button(Key::PAD_A));
    assert!(pad.button(Key::PAD_Y));
}

#[test]
fn test_huge_rate_is_replaced() {
    let config = CompiledConfig::from_toml(
        r#"
        [[mapping]]
        source = "A"
        target = "PadA"
        rate = 1e20
        options = ["turbo"]
        "#,
    )
    .unwrap();
    assert!(matches!(
        config.diagnostics[..],
        [CompileError::InvalidValue { index: 1, field: "rate", .. }]
    ));
    assert_eq!(config.mappings[0].rate, 1.0);

    let (mut engine, clock) = engine_for(config);
    engine.process_input(Key::A, 0, true, 1.0, 0);
    assert!(engine.users().snapshot(0).unwrap().button(Key::PAD_A));
    engine.run_until(&clock, 1000);
    assert!(!engine.users().snapshot(0).unwrap().button(Key::PAD_A));
}

#[test]
fn test_disconnected_pad_from_config() {
    let config = CompiledConfig::from_toml("[general]\nusers = 2\n\n[[pad]]\n\n[[pad]]\nconnected = false\n").unwrap();
    let (engine, _clock) = engine_for(config);
    let users = engine.users();
    assert!(users.snapshot(0).unwrap().connected);
    assert!(!users.snapshot(1).unwrap().connected);
}
