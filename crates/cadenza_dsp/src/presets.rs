//! Built-in EQ Presets
//!
//! Gains are in dB for the standard 10 bands and stay within the ±12 dB band range.

/// Named EQ preset with 10 band gains
pub type Preset = (&'static str, [f32; 10]);

/// List of built-in presets
pub const PRESETS: &[Preset] = &[
    ("Flat", [0.0; 10]),
    ("Bass Boost", [6.0, 5.0, 3.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
    ("Treble Boost", [0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 3.0, 5.0, 6.0, 6.0]),
    ("Vocal", [-2.0, -1.0, 0.0, 2.0, 4.0, 4.0, 3.0, 2.0, 1.0, 0.0]),
    ("Rock", [5.0, 4.0, 2.0, -1.0, -2.0, -1.0, 2.0, 3.0, 4.0, 4.0]),
    ("Classical", [4.0, 3.0, 2.0, 1.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0]),
    ("Loudness", [4.0, 3.0, 0.0, -1.0, -1.0, 0.0, 1.0, 2.0, 3.0, 4.0]),
    ("Electronic", [4.0, 3.0, 1.0, 0.0, -2.0, -2.0, 0.0, 1.0, 3.0, 4.0]),
];

/// Look up a preset by name, ignoring ASCII case
pub fn find_preset(name: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|(n, _)| n.eq_ignore_ascii_case(name))
}
