use crate::error::{ScoreError, ScoreResult};
use crate::model::config::{PianorollOptions, RollOptions};
use crate::model::containers::Note;
use serde::{Deserialize, Serialize};

pub const PITCH_RANGE: (u8, u8) = (0, 127);

/// A time × pitch grid of velocities, stored row-major (one row per tick). Column `c`
/// holds pitch `low_pitch + c`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Pianoroll {
    frames: usize,
    low_pitch: u8,
    pitches: usize,
    cells: Vec<u8>,
}

impl Pianoroll {
    /// An empty grid covering `frames` ticks and pitches `low_pitch..=high_pitch`.
    pub fn new(frames: usize, low_pitch: u8, high_pitch: u8) -> ScoreResult<Self> {
        if low_pitch > high_pitch || high_pitch > PITCH_RANGE.1 {
            return Err(ScoreError::InvalidArgument(format!(
                "pitch range {}..={} is not valid",
                low_pitch, high_pitch
            )));
        }

        let pitches = (high_pitch - low_pitch) as usize + 1;
        Ok(Self {
            frames,
            low_pitch,
            pitches,
            cells: vec![0; frames * pitches],
        })
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn low_pitch(&self) -> u8 {
        self.low_pitch
    }

    pub fn high_pitch(&self) -> u8 {
        self.low_pitch + (self.pitches - 1) as u8
    }

    pub fn pitches(&self) -> usize {
        self.pitches
    }

    pub fn get(&self, frame: usize, pitch: u8) -> Option<u8> {
        let col = self.column(pitch)?;
        if frame >= self.frames {
            return None;
        }
        Some(self.cells[frame * self.pitches + col])
    }

    /// Returns false when the cell lies outside the grid.
    pub fn set(&mut self, frame: usize, pitch: u8, velocity: u8) -> bool {
        match self.column(pitch) {
            Some(col) if frame < self.frames => {
                self.cells[frame * self.pitches + col] = velocity;
                true
            }
            _ => false,
        }
    }

    pub fn row(&self, frame: usize) -> Option<&[u8]> {
        let start = frame.checked_mul(self.pitches)?;
        self.cells.get(start..start + self.pitches)
    }

    /// Sum velocities into 12 pitch classes per frame.
    pub fn to_chroma(&self) -> Vec<[u32; 12]> {
        (0..self.frames)
            .map(|frame| {
                let mut chroma = [0u32; 12];
                for (col, &value) in self.cells[frame * self.pitches..(frame + 1) * self.pitches]
                    .iter()
                    .enumerate()
                {
                    let pitch = self.low_pitch as usize + col;
                    chroma[pitch % 12] += value as u32;
                }
                chroma
            })
            .collect()
    }

    fn column(&self, pitch: u8) -> Option<usize> {
        let col = pitch.checked_sub(self.low_pitch)? as usize;
        (col < self.pitches).then_some(col)
    }

    /// Keep frames `from..` and pitches `low..=high`.
    fn cropped(&self, from: usize, low: u8, high: u8) -> Self {
        let frames = self.frames.saturating_sub(from);
        let pitches = (high - low) as usize + 1;
        let offset = (low - self.low_pitch) as usize;

        let mut cells = Vec::with_capacity(frames * pitches);
        for frame in from..self.frames {
            let row = frame * self.pitches + offset;
            cells.extend_from_slice(&self.cells[row..row + pitches]);
        }

        Self {
            frames,
            low_pitch: low,
            pitches,
            cells,
        }
    }
}

/// Rasterize notes into a grid. Overlapping notes on the same pitch collapse: notes are
/// written in `(end, start, velocity)` order and later writes win.
pub fn notes_to_grid(notes: &[Note], options: &PianorollOptions) -> ScoreResult<Pianoroll> {
    if notes.is_empty() {
        return Err(ScoreError::InvalidArgument(
            "no notes were provided, at least one is required".into(),
        ));
    }
    if options.velocity_threshold > 127 {
        return Err(ScoreError::InvalidArgument(
            "the velocity threshold must be within 0..=127".into(),
        ));
    }
    if options.pitch_offset >= 127 {
        return Err(ScoreError::InvalidArgument(
            "the pitch offset must be within 0..=126".into(),
        ));
    }
    if let Some((low, high)) = options.pitch_range
        && (low > high || high > PITCH_RANGE.1)
    {
        return Err(ScoreError::InvalidArgument(format!(
            "pitch range {}..={} is not valid",
            low, high
        )));
    }

    let mut stream = notes.to_vec();
    stream.sort_by_key(|n| (n.end, n.start, n.velocity));

    let (start_tick, mut max_tick) = match options.time_portion {
        Some(portion) => portion,
        None => (0, stream.last().map_or(0, |n| n.end)),
    };

    let (mut low_pitch, mut high_pitch) = match options.pitch_range {
        Some((low, high)) => (
            low.saturating_sub(options.pitch_offset),
            high.saturating_add(options.pitch_offset).min(PITCH_RANGE.1),
        ),
        None => PITCH_RANGE,
    };

    if let Some(factor) = options.resample_factor {
        max_tick = options.rounding.apply(max_tick as f64 * factor);
        for note in stream.iter_mut() {
            note.start = options.rounding.apply(note.start as f64 * factor);
            note.end = options.rounding.apply(note.end as f64 * factor);
        }
    }

    let mut spans: Vec<(u64, u64, u8, u8)> = Vec::with_capacity(stream.len());
    for note in stream.iter() {
        if note.velocity < options.velocity_threshold
            || note.end < start_tick
            || note.start > max_tick
        {
            continue;
        }
        if let Some((low, high)) = options.pitch_range
            && (note.pitch < low || note.pitch > high)
        {
            continue;
        }

        let start = note.start.max(start_tick);
        let mut end = note.end.min(max_tick);
        if options.keep_zero_duration && start == end {
            end += 1;
        }
        spans.push((start, end, note.pitch, note.velocity));
    }

    let frames = spans
        .iter()
        .map(|&(_, end, _, _)| end)
        .fold(max_tick, u64::max) as usize;
    let mut grid = Pianoroll::new(frames, PITCH_RANGE.0, PITCH_RANGE.1)?;
    for &(start, end, pitch, velocity) in spans.iter() {
        for frame in start..end {
            grid.set(frame as usize, pitch, velocity);
        }
    }

    if options.pitch_range.is_none() {
        let played = |pitch: &u8| (0..grid.frames).any(|f| grid.get(f, *pitch).unwrap_or(0) > 0);
        let lowest = (PITCH_RANGE.0..=PITCH_RANGE.1).find(played);
        let highest = (PITCH_RANGE.0..=PITCH_RANGE.1).rev().find(played);
        if let (Some(lowest), Some(highest)) = (lowest, highest) {
            low_pitch = lowest.saturating_sub(options.pitch_offset);
            high_pitch = highest.saturating_add(options.pitch_offset).min(PITCH_RANGE.1);
        }
    }

    Ok(grid.cropped(start_tick as usize, low_pitch, high_pitch))
}

/// Decode a grid back into notes by run-length decoding each pitch column. A run starts
/// where a cell turns positive, takes that cell's velocity, and ends at the next zero.
/// Notes are returned sorted by start tick.
pub fn grid_to_notes(grid: &Pianoroll, options: &RollOptions) -> Vec<Note> {
    let mut notes: Vec<Note> = Vec::new();
    let scale = |tick: usize| match options.resample_factor {
        Some(factor) => (tick as f64 * factor).max(0.0) as u64,
        None => tick as u64,
    };

    for col in 0..grid.pitches {
        let pitch = grid.low_pitch + col as u8;
        let mut open: Option<(usize, u8)> = None;

        for frame in 0..=grid.frames {
            let value = if frame < grid.frames {
                grid.cells[frame * grid.pitches + col]
            } else {
                0
            };

            match (open, value > 0) {
                (None, true) => open = Some((frame, value.min(127))),
                (Some((start, velocity)), false) => {
                    notes.push(Note::new(velocity, pitch, scale(start), scale(frame)));
                    open = None;
                }
                _ => {}
            }
        }
    }

    notes.sort_by_key(|n| n.start);
    notes
}
