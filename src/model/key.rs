use crate::error::{ScoreError, ScoreResult};

pub const MAJOR_NAMES: [&str; 5] = ["M", "Maj", "Major", "maj", "major"];
pub const MINOR_NAMES: [&str; 5] = ["m", "Min", "Minor", "min", "minor"];

pub const PITCH_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

// Conventional names by number of sharps (positive) or flats (negative), -7..=7.
const MAJOR_BY_SHARPS: [&str; 15] = [
    "Cb", "Gb", "Db", "Ab", "Eb", "Bb", "F", "C", "G", "D", "A", "E", "B", "F#", "C#",
];
const MINOR_BY_SHARPS: [&str; 15] = [
    "Abm", "Ebm", "Bbm", "Fm", "Cm", "Gm", "Dm", "Am", "Em", "Bm", "F#m", "C#m", "G#m", "D#m",
    "A#m",
];

// Sharps (or flats, negative) of the major key on each pitch class.
const SHARPS_BY_PITCH_CLASS: [i8; 12] = [0, -5, 2, -3, 4, -1, 6, 1, -4, 3, -2, 5];

/// Parse a key name into a key number in `[0, 23]`: `0..=11` major, `12..=23` minor.
///
/// Accepted form: a letter `A-G` (a lowercase letter means minor unless a major mode is
/// given), an optional `#` or `b`, an optional single space, and an optional mode suffix
/// from [`MAJOR_NAMES`] or [`MINOR_NAMES`].
pub fn key_name_to_key_number(name: &str) -> ScoreResult<u8> {
    let invalid = || ScoreError::InvalidKey(name.to_string());

    let mut chars = name.chars();
    let letter = chars.next().ok_or_else(invalid)?;
    let mut pitch_class: i32 = match letter.to_ascii_lowercase() {
        'c' => 0,
        'd' => 2,
        'e' => 4,
        'f' => 5,
        'g' => 7,
        'a' => 9,
        'b' => 11,
        _ => return Err(invalid()),
    };

    let mut rest = chars.as_str();
    if let Some(r) = rest.strip_prefix('#') {
        pitch_class += 1;
        rest = r;
    } else if let Some(r) = rest.strip_prefix('b') {
        pitch_class -= 1;
        rest = r;
    }
    let mode = rest.strip_prefix(' ').unwrap_or(rest);

    let is_minor = if mode.is_empty() {
        letter.is_ascii_lowercase()
    } else if MAJOR_NAMES.contains(&mode) {
        false
    } else if MINOR_NAMES.contains(&mode) {
        true
    } else {
        return Err(invalid());
    };

    let key_number = pitch_class.rem_euclid(12) as u8;
    Ok(if is_minor { key_number + 12 } else { key_number })
}

/// Canonical sharp-spelled name for a key number, e.g. `1 -> "C#"`, `21 -> "Am"`.
pub fn key_number_to_key_name(key_number: u8) -> Option<String> {
    let name = PITCH_NAMES.get((key_number % 12) as usize)?;
    match key_number {
        0..=11 => Some(name.to_string()),
        12..=23 => Some(format!("{}m", name)),
        _ => None,
    }
}

/// Conventional key name for a key-signature meta event.
pub fn key_signature_to_name(sharps: i8, minor: bool) -> Option<&'static str> {
    if !(-7..=7).contains(&sharps) {
        return None;
    }

    let idx = (sharps + 7) as usize;
    Some(if minor {
        MINOR_BY_SHARPS[idx]
    } else {
        MAJOR_BY_SHARPS[idx]
    })
}

/// Sharps/flats and mode for a key name, preferring the conventional spelling when the
/// name is one of them (so `Cb` stays 7 flats instead of becoming `B`).
pub fn key_name_to_signature(name: &str) -> ScoreResult<(i8, bool)> {
    if let Some(idx) = MAJOR_BY_SHARPS.iter().position(|n| *n == name) {
        return Ok((idx as i8 - 7, false));
    }
    if let Some(idx) = MINOR_BY_SHARPS.iter().position(|n| *n == name) {
        return Ok((idx as i8 - 7, true));
    }

    let key_number = key_name_to_key_number(name)?;
    let minor = key_number >= 12;
    let major_pitch_class = if minor {
        (key_number + 3) % 12
    } else {
        key_number
    };

    Ok((SHARPS_BY_PITCH_CLASS[major_pitch_class as usize], minor))
}
