use std::env;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Built-in control table: (constant name, display name, code).
///
/// Keyboard codes follow Windows virtual-key numbering. Mouse controls start at
/// 0x100, gamepad controls at 0x200, commands at 0x300 and condition meta keys
/// at 0x3F0. Codes from 0x400 upward are handed out to custom controls.
fn builtin_controls() -> Vec<(String, String, u16)> {
    let mut out: Vec<(String, String, u16)> = Vec::new();
    let mut push = |c: &str, n: &str, code: u16| out.push((c.to_string(), n.to_string(), code));

    push("UNKNOWN", "Unknown", 0x000);

    // Keyboard
    push("BACKSPACE", "Backspace", 0x08);
    push("TAB", "Tab", 0x09);
    push("ENTER", "Enter", 0x0D);
    push("SHIFT", "Shift", 0x10);
    push("CTRL", "Ctrl", 0x11);
    push("ALT", "Alt", 0x12);
    push("PAUSE", "Pause", 0x13);
    push("CAPS_LOCK", "CapsLock", 0x14);
    push("ESCAPE", "Escape", 0x1B);
    push("SPACE", "Space", 0x20);
    push("PAGE_UP", "PageUp", 0x21);
    push("PAGE_DOWN", "PageDown", 0x22);
    push("END", "End", 0x23);
    push("HOME", "Home", 0x24);
    push("LEFT", "Left", 0x25);
    push("UP", "Up", 0x26);
    push("RIGHT", "Right", 0x27);
    push("DOWN", "Down", 0x28);
    push("INSERT", "Insert", 0x2D);
    push("DELETE", "Delete", 0x2E);
    for d in 0..10u16 {
        push(format!("KEY_{d}").as_str(), d.to_string().as_str(), 0x30 + d);
    }
    for (i, ch) in ('A'..='Z').enumerate() {
        push(ch.to_string().as_str(), ch.to_string().as_str(), 0x41 + i as u16);
    }
    push("L_WIN", "LWin", 0x5B);
    push("R_WIN", "RWin", 0x5C);
    push("APPS", "Apps", 0x5D);
    for d in 0..10u16 {
        push(format!("NUMPAD_{d}").as_str(), format!("Numpad{d}").as_str(), 0x60 + d);
    }
    push("NUMPAD_MULTIPLY", "NumpadMultiply", 0x6A);
    push("NUMPAD_ADD", "NumpadAdd", 0x6B);
    push("NUMPAD_SUBTRACT", "NumpadSubtract", 0x6D);
    push("NUMPAD_DECIMAL", "NumpadDecimal", 0x6E);
    push("NUMPAD_DIVIDE", "NumpadDivide", 0x6F);
    for f in 1..=24u16 {
        push(format!("F{f}").as_str(), format!("F{f}").as_str(), 0x6F + f);
    }
    push("NUM_LOCK", "NumLock", 0x90);
    push("SCROLL_LOCK", "ScrollLock", 0x91);
    push("L_SHIFT", "LShift", 0xA0);
    push("R_SHIFT", "RShift", 0xA1);
    push("L_CTRL", "LCtrl", 0xA2);
    push("R_CTRL", "RCtrl", 0xA3);
    push("L_ALT", "LAlt", 0xA4);
    push("R_ALT", "RAlt", 0xA5);
    push("SEMICOLON", "Semicolon", 0xBA);
    push("EQUALS", "Equals", 0xBB);
    push("COMMA", "Comma", 0xBC);
    push("MINUS", "Minus", 0xBD);
    push("PERIOD", "Period", 0xBE);
    push("SLASH", "Slash", 0xBF);
    push("GRAVE", "Grave", 0xC0);
    push("L_BRACKET", "LBracket", 0xDB);
    push("BACKSLASH", "Backslash", 0xDC);
    push("R_BRACKET", "RBracket", 0xDD);
    push("QUOTE", "Quote", 0xDE);
    push("WIN", "Win", 0xFF);

    // Mouse
    push("L_BUTTON", "LButton", 0x101);
    push("R_BUTTON", "RButton", 0x102);
    push("M_BUTTON", "MButton", 0x103);
    push("X_BUTTON_1", "XButton1", 0x104);
    push("X_BUTTON_2", "XButton2", 0x105);
    push("MOUSE_LEFT", "MouseLeft", 0x110);
    push("MOUSE_RIGHT", "MouseRight", 0x111);
    push("MOUSE_UP", "MouseUp", 0x112);
    push("MOUSE_DOWN", "MouseDown", 0x113);
    push("WHEEL_UP", "WheelUp", 0x118);
    push("WHEEL_DOWN", "WheelDown", 0x119);
    push("WHEEL_LEFT", "WheelLeft", 0x11A);
    push("WHEEL_RIGHT", "WheelRight", 0x11B);

    // Gamepad buttons, in report bit order
    let buttons = [
        ("PAD_A", "PadA"),
        ("PAD_B", "PadB"),
        ("PAD_X", "PadX"),
        ("PAD_Y", "PadY"),
        ("PAD_LB", "PadLB"),
        ("PAD_RB", "PadRB"),
        ("PAD_BACK", "PadBack"),
        ("PAD_START", "PadStart"),
        ("PAD_GUIDE", "PadGuide"),
        ("PAD_L_THUMB", "PadLThumb"),
        ("PAD_R_THUMB", "PadRThumb"),
        ("PAD_D_UP", "PadDUp"),
        ("PAD_D_DOWN", "PadDDown"),
        ("PAD_D_LEFT", "PadDLeft"),
        ("PAD_D_RIGHT", "PadDRight"),
    ];
    for (i, (c, n)) in buttons.iter().enumerate() {
        push(*c, *n, 0x200 + i as u16);
    }
    push("PAD_LT", "PadLT", 0x210);
    push("PAD_RT", "PadRT", 0x211);

    let mut code = 0x220;
    for (sc, sn) in [("L_STICK", "LStick"), ("R_STICK", "RStick")] {
        for (dc, dn) in [("UP", "Up"), ("DOWN", "Down"), ("LEFT", "Left"), ("RIGHT", "Right")] {
            push(format!("{sc}_{dc}").as_str(), format!("{sn}{dn}").as_str(), code);
            code += 1;
        }
    }
    for (sc, sn) in [("L_STICK", "LStick"), ("R_STICK", "RStick")] {
        for (dc, dn) in [
            ("UP_LEFT", "UpLeft"),
            ("UP_RIGHT", "UpRight"),
            ("DOWN_LEFT", "DownLeft"),
            ("DOWN_RIGHT", "DownRight"),
        ] {
            push(format!("{sc}_{dc}").as_str(), format!("{sn}{dn}").as_str(), code);
            code += 1;
        }
    }
    push("L_STICK_MOD", "LStickMod", 0x230);
    push("R_STICK_MOD", "RStickMod", 0x231);
    push("LT_MOD", "LTMod", 0x232);
    push("RT_MOD", "RTMod", 0x233);
    push("L_STICK_ROTATE_CW", "LStickRotateCW", 0x240);
    push("L_STICK_ROTATE_CCW", "LStickRotateCCW", 0x241);
    push("R_STICK_ROTATE_CW", "RStickRotateCW", 0x242);
    push("R_STICK_ROTATE_CCW", "RStickRotateCCW", 0x243);
    push("L_STICK_ROTATE_MOD", "LStickRotateMod", 0x244);
    push("R_STICK_ROTATE_MOD", "RStickRotateMod", 0x245);

    // Commands
    push("RELOAD", "Reload", 0x300);
    push("TOGGLE_DISABLE", "ToggleDisable", 0x301);
    push("SET_ACTIVE_USER", "SetActiveUser", 0x302);
    push("HOLD_ACTIVE_USER", "HoldActiveUser", 0x303);
    push("TOGGLE_CONNECTED", "ToggleConnected", 0x304);
    push("LOAD_CONFIG", "LoadConfig", 0x305);

    // Condition meta keys
    push("AND", "And", 0x3F0);
    push("OR", "Or", 0x3F1);

    out
}

fn main() {
    let out_dir = env::var("OUT_DIR").unwrap();
    let dest_path = Path::new(&out_dir).join("key_codes.rs");
    let mut f = File::create(&dest_path).unwrap();

    let controls = builtin_controls();

    writeln!(
        f,
        r#"
/// Identifies any input or output control.
///
/// This is a newtype wrapper around u16 for type safety. Built-in controls have
/// associated constants; codes from [`Key::FIRST_CUSTOM`] upward belong to
/// custom controls registered at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Key(pub u16);

impl Key {{
    /// First code handed out to custom controls
    pub const FIRST_CUSTOM: u16 = 0x400;

    /// Get the raw numeric code value
    pub fn code(self) -> u16 {{
        self.0
    }}
"#
    )
    .unwrap();

    for (konst, name, code) in &controls {
        writeln!(f, "    /// `{name}`").unwrap();
        writeln!(f, "    pub const {konst}: Key = Key({code:#06x});").unwrap();
    }
    writeln!(f, "}}").unwrap();

    writeln!(f, "\n/// Display names of every built-in control, sorted by code").unwrap();
    writeln!(f, "pub const BUILTIN_CONTROLS: &[(&str, u16)] = &[").unwrap();
    let mut sorted = controls.clone();
    sorted.sort_by_key(|(_, _, code)| *code);
    for (_, name, code) in &sorted {
        writeln!(f, "    ({name:?}, {code:#06x}),").unwrap();
    }
    writeln!(f, "];").unwrap();

    writeln!(
        f,
        r#"
impl From<u16> for Key {{
    fn from(code: u16) -> Self {{
        Key(code)
    }}
}}

impl From<Key> for u16 {{
    fn from(key: Key) -> Self {{
        key.0
    }}
}}
"#
    )
    .unwrap();

    println!("cargo:rerun-if-changed=build.rs");
}
