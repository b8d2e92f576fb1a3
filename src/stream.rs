//! The decoded message stream exchanged with the byte-level codec.
//!
//! A [`MessageStream`] holds one [`Track`] per SMF track. Times are delta ticks when the
//! stream crosses the codec boundary and absolute ticks while the core works on it; the
//! normalizer functions here convert between the two in place.

use serde::{Deserialize, Serialize};

pub const MICROSECONDS_PER_MINUTE: f64 = 60_000_000.0;

/// A channel or meta message, already decoded from (or ready to be encoded to) bytes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Message {
    NoteOn { channel: u8, pitch: u8, velocity: u8 },
    NoteOff { channel: u8, pitch: u8, velocity: u8 },
    ProgramChange { channel: u8, program: u8 },
    PitchBend { channel: u8, amount: i16 },
    ControlChange { channel: u8, number: u8, value: u8 },
    TrackName(String),
    Marker(String),
    Lyric(String),
    /// Microseconds per quarter note.
    Tempo(u32),
    TimeSignature { numerator: u32, denominator: u32 },
    KeySignature(String),
    EndOfTrack,
    /// Anything the core does not model (sysex, aftertouch, other meta events).
    Other,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TimedMessage {
    pub time: u64,
    pub message: Message,
}

impl TimedMessage {
    pub fn new(time: u64, message: Message) -> Self {
        Self { time, message }
    }
}

pub type Track = Vec<TimedMessage>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MessageStream {
    pub ticks_per_beat: u16,
    pub tracks: Vec<Track>,
}

impl MessageStream {
    pub fn new(ticks_per_beat: u16) -> Self {
        Self {
            ticks_per_beat,
            tracks: Vec::new(),
        }
    }
}

/// Replace each delta time with the running sum of deltas within the track.
pub fn to_cumulative(track: &mut [TimedMessage]) {
    let mut tick: u64 = 0;
    for event in track.iter_mut() {
        tick = tick.saturating_add(event.time);
        event.time = tick;
    }
}

/// Inverse of [`to_cumulative`]. Expects a track sorted by absolute time.
pub fn to_delta(track: &mut [TimedMessage]) {
    let mut previous: u64 = 0;
    for event in track.iter_mut() {
        let absolute = event.time;
        event.time = absolute.saturating_sub(previous);
        previous = absolute.max(previous);
    }
}

pub fn micros_to_bpm(micros_per_beat: u32) -> f64 {
    MICROSECONDS_PER_MINUTE / micros_per_beat as f64
}

pub fn bpm_to_micros(bpm: f64) -> u32 {
    (MICROSECONDS_PER_MINUTE / bpm).round_ties_even() as u32
}

#[cfg(test)]
mod test {
    use super::*;

    fn track_of(times: &[u64]) -> Track {
        times
            .iter()
            .map(|&t| TimedMessage::new(t, Message::Other))
            .collect()
    }

    fn times(track: &[TimedMessage]) -> Vec<u64> {
        track.iter().map(|e| e.time).collect()
    }

    #[test]
    fn cumulative_is_running_sum() {
        let mut track = track_of(&[0, 10, 0, 5, 120]);
        to_cumulative(&mut track);
        assert_eq!(times(&track), vec![0, 10, 10, 15, 135]);
        assert!(track.windows(2).all(|w| w[0].time <= w[1].time));
    }

    #[test]
    fn delta_restores_input_deltas() {
        let mut track = track_of(&[3, 7, 0, 90]);
        to_cumulative(&mut track);
        to_delta(&mut track);
        assert_eq!(times(&track), vec![3, 7, 0, 90]);
    }

    #[test]
    fn tempo_conversions() {
        assert_eq!(micros_to_bpm(500_000), 120.0);
        assert_eq!(bpm_to_micros(120.0), 500_000);
        assert_eq!(bpm_to_micros(90.0), 666_667);
    }
}
