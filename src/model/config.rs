use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::PathBuf;

/// How a note-off is paired with the note-ons pending on the same channel and pitch.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingPolicy {
    /// Close only the earliest pending note-on.
    #[default]
    Fifo,

    /// Close every pending note-on that did not start on the closing tick. Matches files
    /// written by tools that treat one note-off as releasing the whole key.
    CloseAll,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(default)]
pub struct LoadOptions {
    pub pairing: PairingPolicy,
}

/// Which instruments a dump writes, by index into [`crate::Score::instruments`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub enum InstrumentSelection {
    #[default]
    All,
    Only(Vec<usize>),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DumpOptions {
    /// Half-open `[start, end)` tick window to keep.
    pub segment: Option<(u64, u64)>,

    /// Re-anchor kept events so the segment starts at tick 0.
    pub shift: bool,

    pub instruments: InstrumentSelection,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            segment: None,
            shift: true,
            instruments: InstrumentSelection::All,
        }
    }
}

/// Where a dump is written.
pub enum Output<'w> {
    Path(PathBuf),
    Writer(&'w mut dyn Write),
}

impl fmt::Debug for Output<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Output::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

/// Rounding applied to tick times when the pianoroll time axis is resampled.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rounding {
    /// Nearest, ties to even.
    #[default]
    Round,
    Floor,
    Ceil,
}

impl Rounding {
    pub fn apply(self, value: f64) -> u64 {
        let rounded = match self {
            Rounding::Round => value.round_ties_even(),
            Rounding::Floor => value.floor(),
            Rounding::Ceil => value.ceil(),
        };
        rounded.max(0.0) as u64
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PianorollOptions {
    /// Inclusive pitch range to keep. Without one the grid is trimmed to the played pitches.
    pub pitch_range: Option<(u8, u8)>,

    /// Padding added below and above the pitch range.
    pub pitch_offset: u8,

    pub resample_factor: Option<f64>,
    pub rounding: Rounding,

    /// Notes quieter than this are discarded.
    pub velocity_threshold: u8,

    /// `[start, end)` tick window to rasterize.
    pub time_portion: Option<(u64, u64)>,

    /// Stretch zero-length notes to one tick instead of dropping them.
    pub keep_zero_duration: bool,
}

impl Default for PianorollOptions {
    fn default() -> Self {
        Self {
            pitch_range: None,
            pitch_offset: 0,
            resample_factor: None,
            rounding: Rounding::Round,
            velocity_threshold: 0,
            time_portion: None,
            keep_zero_duration: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(default)]
pub struct RollOptions {
    pub resample_factor: Option<f64>,
}
