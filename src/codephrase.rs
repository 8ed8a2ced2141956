//! Memorable code-phrase generation.
//!
//! The phrase is the authentication factor for a transfer, so every draw
//! comes from the system CSPRNG.

use rand::{rngs::OsRng, Rng};

const ADJECTIVES: [&str; 10] = [
    "swift", "bright", "calm", "bold", "warm", "cool", "fast", "sharp", "soft", "wild",
];

const NOUNS: [&str; 10] = [
    "tiger", "river", "mountain", "forest", "ocean", "castle", "dragon", "phoenix", "falcon",
    "storm",
];

const COLORS: [&str; 10] = [
    "red", "blue", "green", "gold", "silver", "amber", "jade", "coral", "ivory", "onyx",
];

/// Generates a phrase of the form `<adjective>-<noun>-<color>-<0..99>`.
pub fn generate() -> String {
    let mut rng = OsRng;
    format!(
        "{}-{}-{}-{}",
        ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())],
        NOUNS[rng.gen_range(0..NOUNS.len())],
        COLORS[rng.gen_range(0..COLORS.len())],
        rng.gen_range(0..100u32),
    )
}
