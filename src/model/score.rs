use crate::model::containers::*;
use crate::tempo::TempoMap;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_TICKS_PER_BEAT: u16 = 480;

/// The symbolic model of a multi-track recording. All times are ticks relative to
/// `ticks_per_beat`; seconds are always derived through a [`TempoMap`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Score {
    pub ticks_per_beat: u16,
    pub max_tick: u64,
    pub tempo_changes: Vec<TempoChange>,
    pub time_signature_changes: Vec<TimeSignature>,
    pub key_signature_changes: Vec<KeySignature>,
    pub lyrics: Vec<Lyric>,
    pub markers: Vec<Marker>,

    /// In order of first materialization while loading.
    pub instruments: Vec<Instrument>,
}

impl Default for Score {
    fn default() -> Self {
        Self::new(DEFAULT_TICKS_PER_BEAT)
    }
}

impl Score {
    pub fn new(ticks_per_beat: u16) -> Self {
        Self {
            ticks_per_beat,
            max_tick: 0,
            tempo_changes: Vec::new(),
            time_signature_changes: Vec::new(),
            key_signature_changes: Vec::new(),
            lyrics: Vec::new(),
            markers: Vec::new(),
            instruments: Vec::new(),
        }
    }

    pub fn num_instruments(&self) -> usize {
        self.instruments.len()
    }

    /// Purge notes with `end <= start` from every instrument.
    pub fn remove_invalid_notes(&mut self) -> usize {
        self.instruments
            .iter_mut()
            .map(Instrument::remove_invalid_notes)
            .sum()
    }

    pub fn tick_to_time_mapping(&self) -> TempoMap {
        TempoMap::new(&self.tempo_changes, self.ticks_per_beat, self.max_tick)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ticks per beat: {}", self.ticks_per_beat)?;
        writeln!(f, "max tick: {}", self.max_tick)?;
        writeln!(f, "tempo changes: {}", self.tempo_changes.len())?;
        writeln!(f, "time sig: {}", self.time_signature_changes.len())?;
        writeln!(f, "key sig: {}", self.key_signature_changes.len())?;
        writeln!(f, "markers: {}", self.markers.len())?;
        writeln!(f, "lyrics: {}", !self.lyrics.is_empty())?;
        write!(f, "instruments: {}", self.num_instruments())
    }
}
