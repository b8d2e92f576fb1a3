use crate::error::{ScoreError, ScoreResult};
use crate::model::key::key_name_to_key_number;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_BPM: f64 = 120.0;
pub const SUSTAIN_PEDAL: u8 = 64;
pub const DRUM_CHANNEL: u8 = 9;

/// A note event. Times are absolute ticks; a valid note has `end > start`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Note {
    pub velocity: u8,
    pub pitch: u8,
    pub start: u64,
    pub end: u64,
}

impl Note {
    pub fn new(velocity: u8, pitch: u8, start: u64, end: u64) -> Self {
        Self {
            velocity,
            pitch,
            start,
            end,
        }
    }

    /// Duration in ticks, zero for notes with `end <= start`.
    pub fn duration(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_valid(&self) -> bool {
        self.end > self.start
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Note(start={}, end={}, pitch={}, velocity={})",
            self.start, self.end, self.pitch, self.velocity
        )
    }
}

/// A sustain pedal span collapsed from an on/off controller pair.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pedal {
    pub start: u64,
    pub end: u64,
}

impl Pedal {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

/// Pitch bend amount in `[-8192, 8191]`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PitchBend {
    pub pitch: i16,
    pub time: u64,
}

impl PitchBend {
    pub fn new(pitch: i16, time: u64) -> Self {
        Self { pitch, time }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlChange {
    pub number: u8,
    pub value: u8,
    pub time: u64,
}

impl ControlChange {
    pub fn new(number: u8, value: u8, time: u64) -> Self {
        Self {
            number,
            value,
            time,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
    pub time: u64,
}

impl TimeSignature {
    /// Fails when either the numerator or the denominator is zero.
    pub fn new(numerator: u32, denominator: u32, time: u64) -> ScoreResult<Self> {
        if numerator == 0 || denominator == 0 {
            return Err(ScoreError::InvalidTimeSignature {
                numerator,
                denominator,
            });
        }

        Ok(Self {
            numerator,
            denominator,
            time,
        })
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} at {} ticks",
            self.numerator, self.denominator, self.time
        )
    }
}

/// A key signature; `key_number` is `0..=11` for major keys and `12..=23` for minor ones.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KeySignature {
    pub key_name: String,
    pub key_number: u8,
    pub time: u64,
}

impl KeySignature {
    pub fn new(key_name: impl Into<String>, time: u64) -> ScoreResult<Self> {
        let key_name = key_name.into();
        let key_number = key_name_to_key_number(&key_name)?;

        Ok(Self {
            key_name,
            key_number,
            time,
        })
    }
}

impl fmt::Display for KeySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] at {} ticks",
            self.key_name, self.key_number, self.time
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub text: String,
    pub time: u64,
}

impl Marker {
    pub fn new(text: impl Into<String>, time: u64) -> Self {
        Self {
            text: text.into(),
            time,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Lyric {
    pub text: String,
    pub time: u64,
}

impl Lyric {
    pub fn new(text: impl Into<String>, time: u64) -> Self {
        Self {
            text: text.into(),
            time,
        }
    }
}

/// A tempo breakpoint in beats per minute.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TempoChange {
    pub tempo: f64,
    pub time: u64,
}

impl TempoChange {
    pub fn new(tempo: f64, time: u64) -> ScoreResult<Self> {
        if !(tempo.is_finite() && tempo > 0.0) {
            return Err(ScoreError::InvalidArgument(format!(
                "{} is not a valid tempo",
                tempo
            )));
        }

        Ok(Self { tempo, time })
    }
}

impl fmt::Display for TempoChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} BPM at {} ticks", self.tempo, self.time)
    }
}

/// One instrument, exclusively owning its notes and controller streams.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Instrument {
    pub program: u8,
    pub is_drum: bool,
    pub name: String,
    pub notes: Vec<Note>,
    pub pitch_bends: Vec<PitchBend>,
    pub control_changes: Vec<ControlChange>,
    pub pedals: Vec<Pedal>,
}

impl Instrument {
    pub fn new(program: u8, is_drum: bool, name: impl Into<String>) -> Self {
        Self {
            program,
            is_drum,
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn num_notes(&self) -> usize {
        self.notes.len()
    }

    /// Drop every note whose end is at or before its start, returning how many were removed.
    pub fn remove_invalid_notes(&mut self) -> usize {
        let before = self.notes.len();
        self.notes.retain(Note::is_valid);
        before - self.notes.len()
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Instrument(program={}, is_drum={}, name=\"{}\")",
            self.program,
            self.is_drum,
            self.name.replace('"', "\\\"")
        )
    }
}
