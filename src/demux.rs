//! Turns a decoded message stream into a [`Score`].
//!
//! Each track keeps its own per-channel program registers, a FIFO of pending note-ons per
//! `(channel, pitch)`, a sustain pedal edge per channel, and a straggler bucket per channel
//! for controller traffic that arrives before the instrument it belongs to exists.
//! Instruments are keyed by `(program, channel, track)` and kept in first-materialization
//! order. Nothing in here fails: malformed orderings are dropped.

use crate::model::config::{LoadOptions, PairingPolicy};
use crate::model::containers::*;
use crate::model::score::Score;
use crate::stream::{Message, MessageStream, TimedMessage, micros_to_bpm, to_cumulative};
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};

const CHANNELS: usize = 16;

/// Build a [`Score`] from a delta-timed stream.
pub fn load(stream: &MessageStream, options: &LoadOptions) -> Score {
    let mut tracks = stream.tracks.clone();
    for track in tracks.iter_mut() {
        to_cumulative(track);
    }

    let mut score = Score::new(stream.ticks_per_beat);
    score.tempo_changes = load_tempo_changes(&tracks);
    score.time_signature_changes = load_time_signatures(&tracks);
    score.key_signature_changes = load_key_signatures(&tracks);
    score.markers = load_markers(&tracks);
    score.lyrics = load_lyrics(&tracks);

    score.max_tick = tracks
        .iter()
        .filter_map(|track| track.iter().map(|e| e.time).max())
        .max()
        .map_or(0, |tick| tick + 1);

    let mut book = InstrumentBook::default();
    for (track_idx, track) in tracks.iter().enumerate() {
        book.read_track(track_idx, track, options.pairing);
    }
    score.instruments = book.instruments;

    debug!(
        "Loaded {} track(s) into {} instrument(s), max tick {}",
        tracks.len(),
        score.instruments.len(),
        score.max_tick
    );

    score
}

fn all_events(tracks: &[Vec<TimedMessage>]) -> impl Iterator<Item = &TimedMessage> {
    tracks.iter().flat_map(|track| track.iter())
}

fn load_tempo_changes(tracks: &[Vec<TimedMessage>]) -> Vec<TempoChange> {
    let mut raw: Vec<(u64, u32)> = all_events(tracks)
        .filter_map(|e| match e.message {
            Message::Tempo(micros) => Some((e.time, micros)),
            _ => None,
        })
        .collect();
    raw.sort_by_key(|(tick, _)| *tick);

    let mut tempo_changes = vec![TempoChange {
        tempo: DEFAULT_BPM,
        time: 0,
    }];

    for (tick, micros) in raw {
        if micros == 0 {
            warn!("Ignoring zero-length tempo at tick {}", tick);
            continue;
        }

        let tempo = micros_to_bpm(micros);
        if tick == 0 {
            tempo_changes = vec![TempoChange { tempo, time: 0 }];
        } else if tempo_changes.last().is_none_or(|last| last.tempo != tempo) {
            tempo_changes.push(TempoChange { tempo, time: tick });
        }
    }

    tempo_changes
}

fn load_time_signatures(tracks: &[Vec<TimedMessage>]) -> Vec<TimeSignature> {
    let mut signatures: Vec<TimeSignature> = all_events(tracks)
        .filter_map(|e| match e.message {
            Message::TimeSignature {
                numerator,
                denominator,
            } => match TimeSignature::new(numerator, denominator, e.time) {
                Ok(ts) => Some(ts),
                Err(err) => {
                    warn!("Skipping time signature at tick {}: {}", e.time, err);
                    None
                }
            },
            _ => None,
        })
        .collect();

    signatures.sort_by_key(|ts| ts.time);
    signatures
}

fn load_key_signatures(tracks: &[Vec<TimedMessage>]) -> Vec<KeySignature> {
    let mut signatures: Vec<KeySignature> = all_events(tracks)
        .filter_map(|e| match &e.message {
            Message::KeySignature(name) => match KeySignature::new(name.as_str(), e.time) {
                Ok(ks) => Some(ks),
                Err(err) => {
                    warn!("Skipping key signature at tick {}: {}", e.time, err);
                    None
                }
            },
            _ => None,
        })
        .collect();

    signatures.sort_by_key(|ks| ks.time);
    signatures
}

fn load_markers(tracks: &[Vec<TimedMessage>]) -> Vec<Marker> {
    let mut markers: Vec<Marker> = all_events(tracks)
        .filter_map(|e| match &e.message {
            Message::Marker(text) => Some(Marker::new(text.as_str(), e.time)),
            _ => None,
        })
        .collect();

    markers.sort_by_key(|m| m.time);
    markers
}

fn load_lyrics(tracks: &[Vec<TimedMessage>]) -> Vec<Lyric> {
    let mut lyrics: Vec<Lyric> = all_events(tracks)
        .filter_map(|e| match &e.message {
            Message::Lyric(text) => Some(Lyric::new(text.as_str(), e.time)),
            _ => None,
        })
        .collect();

    lyrics.sort_by_key(|l| l.time);
    lyrics
}

/// Controller traffic seen on a channel before any instrument exists for it.
#[derive(Debug, Default)]
struct Stragglers {
    pitch_bends: Vec<PitchBend>,
    control_changes: Vec<ControlChange>,
    pedals: Vec<Pedal>,
}

impl Stragglers {
    fn is_empty(&self) -> bool {
        self.pitch_bends.is_empty() && self.control_changes.is_empty() && self.pedals.is_empty()
    }
}

/// Where a controller event lands: an existing instrument or the channel's bucket.
enum Sink<'a> {
    Instrument(&'a mut Instrument),
    Stragglers(&'a mut Stragglers),
}

impl Sink<'_> {
    fn push_pitch_bend(&mut self, bend: PitchBend) {
        match self {
            Sink::Instrument(instrument) => instrument.pitch_bends.push(bend),
            Sink::Stragglers(bucket) => bucket.pitch_bends.push(bend),
        }
    }

    fn push_control_change(&mut self, cc: ControlChange) {
        match self {
            Sink::Instrument(instrument) => instrument.control_changes.push(cc),
            Sink::Stragglers(bucket) => bucket.control_changes.push(cc),
        }
    }

    fn push_pedal(&mut self, pedal: Pedal) {
        match self {
            Sink::Instrument(instrument) => instrument.pedals.push(pedal),
            Sink::Stragglers(bucket) => bucket.pedals.push(pedal),
        }
    }
}

/// Per-track demultiplexing state.
#[derive(Debug)]
struct TrackState {
    track_idx: usize,
    programs: [u8; CHANNELS],
    open_notes: HashMap<(u8, u8), VecDeque<(u64, u8)>>,
    pedal_on: [Option<u64>; CHANNELS],
    stragglers: [Stragglers; CHANNELS],
    name: Option<String>,
    materialized: Vec<usize>,
}

impl TrackState {
    fn new(track_idx: usize) -> Self {
        Self {
            track_idx,
            programs: [0; CHANNELS],
            open_notes: HashMap::new(),
            pedal_on: [None; CHANNELS],
            stragglers: Default::default(),
            name: None,
            materialized: Vec::new(),
        }
    }
}

/// Instruments in first-materialization order plus an index by identity.
#[derive(Debug, Default)]
struct InstrumentBook {
    instruments: Vec<Instrument>,
    index: HashMap<(u8, u8, usize), usize>,
}

impl InstrumentBook {
    fn read_track(&mut self, track_idx: usize, track: &[TimedMessage], pairing: PairingPolicy) {
        let mut state = TrackState::new(track_idx);

        for event in track {
            let tick = event.time;
            match &event.message {
                Message::TrackName(name) => state.name = Some(name.clone()),
                Message::ProgramChange { channel, program } => {
                    if let Some(slot) = state.programs.get_mut(*channel as usize) {
                        *slot = *program;
                    }
                }
                Message::NoteOn {
                    channel,
                    pitch,
                    velocity,
                } if *velocity > 0 => {
                    state
                        .open_notes
                        .entry((*channel, *pitch))
                        .or_default()
                        .push_back((tick, *velocity));
                }
                Message::NoteOn { channel, pitch, .. } | Message::NoteOff { channel, pitch, .. } => {
                    self.close_notes(&mut state, *channel, *pitch, tick, pairing);
                }
                Message::PitchBend { channel, amount } => {
                    if let Some(mut sink) = self.sink(&mut state, *channel) {
                        sink.push_pitch_bend(PitchBend::new(*amount, tick));
                    }
                }
                Message::ControlChange {
                    channel,
                    number,
                    value,
                } => self.control_change(&mut state, *channel, *number, *value, tick),
                _ => {}
            }
        }

        let unterminated: usize = state.open_notes.values().map(VecDeque::len).sum();
        if unterminated > 0 {
            debug!(
                "Dropping {} unterminated note(s) at the end of track {}",
                unterminated, track_idx
            );
        }

        if let Some(name) = state.name.as_ref() {
            for &idx in state.materialized.iter() {
                self.instruments[idx].name = name.clone();
            }
        }
    }

    fn close_notes(
        &mut self,
        state: &mut TrackState,
        channel: u8,
        pitch: u8,
        tick: u64,
        pairing: PairingPolicy,
    ) {
        let Some(queue) = state.open_notes.get_mut(&(channel, pitch)) else {
            debug!(
                "Orphaned note-off for {} ch{} at tick {}",
                pitch, channel, tick
            );
            return;
        };

        let closing: Vec<(u64, u8)> = match pairing {
            PairingPolicy::Fifo => queue.pop_front().into_iter().collect(),
            PairingPolicy::CloseAll => {
                let (closing, keeping): (Vec<_>, Vec<_>) =
                    queue.drain(..).partition(|(start, _)| *start != tick);
                // Notes opened on this tick survive only when something else was closed.
                if !closing.is_empty() {
                    queue.extend(keeping);
                }
                closing
            }
        };

        if queue.is_empty() {
            state.open_notes.remove(&(channel, pitch));
        }

        if closing.is_empty() {
            return;
        }

        let idx = self.materialize(state, channel);
        let instrument = &mut self.instruments[idx];
        for (start, velocity) in closing {
            instrument.notes.push(Note::new(velocity, pitch, start, tick));
        }
    }

    fn control_change(
        &mut self,
        state: &mut TrackState,
        channel: u8,
        number: u8,
        value: u8,
        tick: u64,
    ) {
        let ch = channel as usize;
        if ch >= CHANNELS {
            return;
        }

        let pedal = if number == SUSTAIN_PEDAL {
            match (state.pedal_on[ch], value) {
                (Some(start), 0) => {
                    state.pedal_on[ch] = None;
                    Some(Pedal::new(start, tick))
                }
                (None, 127) => {
                    state.pedal_on[ch] = Some(tick);
                    None
                }
                _ => None,
            }
        } else {
            None
        };

        if let Some(mut sink) = self.sink(state, channel) {
            sink.push_control_change(ControlChange::new(number, value, tick));
            if let Some(pedal) = pedal {
                sink.push_pedal(pedal);
            }
        }
    }

    /// Resolve the instrument for the channel's current program without creating one.
    fn sink<'a>(&'a mut self, state: &'a mut TrackState, channel: u8) -> Option<Sink<'a>> {
        let ch = channel as usize;
        let program = *state.programs.get(ch)?;

        Some(match self.index.get(&(program, channel, state.track_idx)) {
            Some(&idx) => Sink::Instrument(&mut self.instruments[idx]),
            None => Sink::Stragglers(&mut state.stragglers[ch]),
        })
    }

    /// Find or create the instrument for the channel's current program.
    fn materialize(&mut self, state: &mut TrackState, channel: u8) -> usize {
        let ch = (channel as usize).min(CHANNELS - 1);
        let program = state.programs[ch];
        let key = (program, channel, state.track_idx);

        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }

        let mut instrument = Instrument::new(
            program,
            channel == DRUM_CHANNEL,
            state.name.clone().unwrap_or_default(),
        );

        let bucket = std::mem::take(&mut state.stragglers[ch]);
        if !bucket.is_empty() {
            debug!(
                "Merging early controller events into program {} ch{} on track {}",
                program, channel, state.track_idx
            );
        }
        instrument.pitch_bends = bucket.pitch_bends;
        instrument.control_changes = bucket.control_changes;
        instrument.pedals = bucket.pedals;

        let idx = self.instruments.len();
        self.instruments.push(instrument);
        self.index.insert(key, idx);
        state.materialized.push(idx);
        idx
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn on(time: u64, channel: u8, pitch: u8, velocity: u8) -> TimedMessage {
        TimedMessage::new(
            time,
            Message::NoteOn {
                channel,
                pitch,
                velocity,
            },
        )
    }

    fn off(time: u64, channel: u8, pitch: u8) -> TimedMessage {
        TimedMessage::new(
            time,
            Message::NoteOff {
                channel,
                pitch,
                velocity: 0,
            },
        )
    }

    fn cc(time: u64, channel: u8, number: u8, value: u8) -> TimedMessage {
        TimedMessage::new(
            time,
            Message::ControlChange {
                channel,
                number,
                value,
            },
        )
    }

    fn program(time: u64, channel: u8, program: u8) -> TimedMessage {
        TimedMessage::new(time, Message::ProgramChange { channel, program })
    }

    /// Builds a delta-timed stream from absolute-timed tracks.
    fn stream(tracks: Vec<Vec<TimedMessage>>) -> MessageStream {
        let mut stream = MessageStream::new(480);
        for mut track in tracks {
            crate::stream::to_delta(&mut track);
            stream.tracks.push(track);
        }
        stream
    }

    fn load_default(tracks: Vec<Vec<TimedMessage>>) -> Score {
        env_logger::try_init().unwrap_or(());
        load(&stream(tracks), &LoadOptions::default())
    }

    #[test]
    fn simple_notes() {
        let score = load_default(vec![vec![
            on(0, 0, 60, 100),
            off(480, 0, 60),
            on(480, 0, 62, 90),
            on(960, 0, 62, 0),
        ]]);

        assert_eq!(score.instruments.len(), 1);
        assert_eq!(
            score.instruments[0].notes,
            vec![Note::new(100, 60, 0, 480), Note::new(90, 62, 480, 960)]
        );
        assert_eq!(score.max_tick, 961);
        assert_eq!(score.tempo_changes, vec![TempoChange { tempo: 120.0, time: 0 }]);
    }

    #[test]
    fn overlapping_same_pitch_pairs_fifo() {
        let score = load_default(vec![vec![
            on(0, 0, 60, 10),
            on(100, 0, 60, 20),
            off(200, 0, 60),
            off(300, 0, 60),
        ]]);

        assert_eq!(
            score.instruments[0].notes,
            vec![Note::new(10, 60, 0, 200), Note::new(20, 60, 100, 300)]
        );
    }

    #[test]
    fn close_all_pairing_releases_every_earlier_note() {
        let tracks = vec![vec![
            on(0, 0, 60, 10),
            on(100, 0, 60, 20),
            off(200, 0, 60),
            off(300, 0, 60),
        ]];
        let options = LoadOptions {
            pairing: PairingPolicy::CloseAll,
        };
        let score = load(&stream(tracks), &options);

        assert_eq!(
            score.instruments[0].notes,
            vec![Note::new(10, 60, 0, 200), Note::new(20, 60, 100, 200)]
        );
    }

    #[test]
    fn close_all_keeps_note_opened_on_closing_tick() {
        let tracks = vec![vec![
            on(0, 0, 60, 10),
            on(200, 0, 60, 20),
            off(200, 0, 60),
            off(400, 0, 60),
        ]];
        let options = LoadOptions {
            pairing: PairingPolicy::CloseAll,
        };
        let score = load(&stream(tracks), &options);

        assert_eq!(
            score.instruments[0].notes,
            vec![Note::new(10, 60, 0, 200), Note::new(20, 60, 200, 400)]
        );
    }

    #[test]
    fn spurious_and_unterminated_notes_are_dropped() {
        let score = load_default(vec![vec![
            off(0, 0, 64),
            on(10, 0, 60, 100),
            off(20, 0, 60),
            off(30, 0, 60),
            on(40, 0, 67, 100),
        ]]);

        assert_eq!(score.instruments.len(), 1);
        assert_eq!(score.instruments[0].notes, vec![Note::new(100, 60, 10, 20)]);
    }

    #[test]
    fn stragglers_merge_into_first_instrument() {
        let score = load_default(vec![vec![
            cc(0, 0, 7, 100),
            TimedMessage::new(5, Message::PitchBend { channel: 0, amount: -200 }),
            on(10, 0, 60, 100),
            off(20, 0, 60),
            cc(30, 0, 10, 64),
            cc(40, 1, 7, 90),
        ]]);

        assert_eq!(score.instruments.len(), 1);
        let instrument = &score.instruments[0];
        assert_eq!(
            instrument.control_changes,
            vec![ControlChange::new(7, 100, 0), ControlChange::new(10, 64, 30)]
        );
        assert_eq!(instrument.pitch_bends, vec![PitchBend::new(-200, 5)]);
    }

    #[test]
    fn sustain_pedal_edges() {
        let score = load_default(vec![vec![
            on(0, 0, 60, 100),
            off(10, 0, 60),
            cc(100, 0, 64, 127),
            cc(150, 0, 64, 127),
            cc(200, 0, 64, 0),
            cc(250, 0, 64, 0),
            cc(300, 0, 64, 127),
            cc(400, 0, 64, 0),
        ]]);

        let instrument = &score.instruments[0];
        assert_eq!(instrument.pedals, vec![Pedal::new(100, 200), Pedal::new(300, 400)]);
        assert_eq!(instrument.control_changes.len(), 6);
    }

    #[test]
    fn pedal_before_first_note_is_buffered() {
        let score = load_default(vec![vec![
            cc(0, 3, 64, 127),
            cc(50, 3, 64, 0),
            on(60, 3, 60, 100),
            off(70, 3, 60),
        ]]);

        assert_eq!(score.instruments[0].pedals, vec![Pedal::new(0, 50)]);
    }

    #[test]
    fn program_changes_split_instruments() {
        let score = load_default(vec![vec![
            program(0, 0, 5),
            on(0, 0, 60, 100),
            off(10, 0, 60),
            program(20, 0, 40),
            on(20, 0, 60, 100),
            off(30, 0, 60),
            on(40, 9, 36, 100),
            off(50, 9, 36),
        ]]);

        let programs: Vec<(u8, bool)> = score
            .instruments
            .iter()
            .map(|i| (i.program, i.is_drum))
            .collect();
        assert_eq!(programs, vec![(5, false), (40, false), (0, true)]);
    }

    #[test]
    fn instrument_order_follows_first_materialization_across_tracks() {
        let score = load_default(vec![
            vec![
                program(0, 2, 30),
                on(0, 2, 50, 80),
                on(5, 1, 50, 80),
                off(10, 1, 50),
                off(20, 2, 50),
            ],
            vec![on(0, 0, 70, 80), off(1, 0, 70)],
        ]);

        let programs: Vec<u8> = score.instruments.iter().map(|i| i.program).collect();
        assert_eq!(programs, vec![0, 30, 0]);
    }

    #[test]
    fn track_name_applies_retroactively() {
        let score = load_default(vec![
            vec![
                on(0, 0, 60, 100),
                off(10, 0, 60),
                TimedMessage::new(20, Message::TrackName("Lead".into())),
            ],
            vec![on(0, 1, 60, 100), off(10, 1, 60)],
        ]);

        assert_eq!(score.instruments[0].name, "Lead");
        assert_eq!(score.instruments[1].name, "");
    }

    #[test]
    fn meta_lists() {
        let score = load_default(vec![
            vec![
                TimedMessage::new(0, Message::Tempo(600_000)),
                TimedMessage::new(
                    10,
                    Message::TimeSignature {
                        numerator: 0,
                        denominator: 4,
                    },
                ),
                TimedMessage::new(40, Message::Marker("B".into())),
                TimedMessage::new(100, Message::Tempo(600_000)),
                TimedMessage::new(200, Message::Tempo(500_000)),
                TimedMessage::new(300, Message::KeySignature("Dm".into())),
            ],
            vec![
                TimedMessage::new(0, Message::KeySignature("G".into())),
                TimedMessage::new(20, Message::Marker("A".into())),
                TimedMessage::new(
                    50,
                    Message::TimeSignature {
                        numerator: 3,
                        denominator: 4,
                    },
                ),
            ],
        ]);

        assert_eq!(
            score.tempo_changes,
            vec![
                TempoChange { tempo: 100.0, time: 0 },
                TempoChange { tempo: 120.0, time: 200 },
            ]
        );
        assert_eq!(score.time_signature_changes, vec![TimeSignature::new(3, 4, 50).unwrap()]);
        let keys: Vec<(&str, u64)> = score
            .key_signature_changes
            .iter()
            .map(|k| (k.key_name.as_str(), k.time))
            .collect();
        assert_eq!(keys, vec![("G", 0), ("Dm", 300)]);
        let markers: Vec<&str> = score.markers.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(markers, vec!["A", "B"]);
        assert_eq!(score.max_tick, 301);
    }

    #[test]
    fn twenty_notes_three_channels_two_instruments() {
        // Channel 2 only carries controller traffic, so it never materializes.
        let mut track = vec![program(0, 0, 1), program(0, 1, 33), cc(0, 2, 7, 100)];
        for i in 0..20u64 {
            let channel = (i % 2) as u8;
            track.push(on(i * 100, channel, 60 + i as u8, 100));
            track.push(off(i * 100 + 50, channel, 60 + i as u8));
        }
        let score = load_default(vec![track]);

        assert_eq!(score.instruments.len(), 2);
        assert!(score.instruments.iter().all(|i| !i.is_drum));
        assert_eq!(score.instruments[0].num_notes(), 10);
        assert_eq!(score.instruments[1].num_notes(), 10);
    }

    #[test]
    fn empty_stream() {
        let score = load(&MessageStream::new(96), &LoadOptions::default());
        assert_eq!(score.ticks_per_beat, 96);
        assert_eq!(score.max_tick, 0);
        assert!(score.instruments.is_empty());
        assert_eq!(score.tempo_changes.len(), 1);
    }
}
