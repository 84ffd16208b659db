use rand::seq::SliceRandom;
use rand::Rng;

use crate::model::Color;

/// Base colors for physical strips, cycled by strip number.
pub const DEFAULT_STRIP_COLORS: [Color; 5] = [
    [0x00, 0xff, 0x00],
    [0x80, 0x00, 0xff],
    [0xff, 0x00, 0x00],
    [0xff, 0x80, 0x00],
    [0xff, 0xff, 0x00],
];

const POOL: [&str; 37] = [
    "#f0ffff", "#f5f5dc", "#0000ff", "#a52a2a", "#00ffff", "#00008b", "#008b8b",
    "#a9a9a9", "#006400", "#bdb76b", "#8b008b", "#556b2f", "#ff8c00", "#9932cc",
    "#8b0000", "#e9967a", "#9400d3", "#ff00ff", "#ffd700", "#008000", "#4b0082",
    "#f0e68c", "#add8e6", "#e0ffff", "#90ee90", "#d3d3d3", "#ffb6c1", "#ffffb0",
    "#00ff00", "#ff00ff", "#800000", "#808000", "#ffa500", "#ffc0cb", "#800080",
    "#ff0000", "#ffff00",
];

/// Display colors handed out to new groups.
pub struct ColorPool;

impl ColorPool {
    pub fn colors() -> impl Iterator<Item = Color> {
        POOL.iter().filter_map(|hex| parse_hex(hex))
    }

    pub fn random() -> Color {
        Self::random_with(&mut rand::thread_rng())
    }

    pub fn random_with<R: Rng + ?Sized>(rng: &mut R) -> Color {
        POOL.choose(rng)
            .and_then(|hex| parse_hex(hex))
            .unwrap_or([0xff, 0x00, 0x00])
    }
}

/// Parses `#rrggbb` (leading `#` optional).
pub fn parse_hex(s: &str) -> Option<Color> {
    let s = s.trim().trim_start_matches('#');
    if s.len() != 6 || !s.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&s[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

pub fn to_hex(c: Color) -> String {
    format!("#{:02x}{:02x}{:02x}", c[0], c[1], c[2])
}
