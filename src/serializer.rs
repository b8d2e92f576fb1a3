//! Re-linearizes a [`Score`] into a delta-timed [`MessageStream`].
//!
//! Track 0 carries tempo, meter, key, marker and lyric events; every selected instrument
//! gets its own track after it. Events are ordered by tick, then by [`Category`], and
//! note-ons sharing a tick by their intended note-off, so that FIFO pairing on reload
//! reproduces the same notes.

use crate::error::{ScoreError, ScoreResult};
use crate::model::config::{DumpOptions, InstrumentSelection};
use crate::model::containers::*;
use crate::model::score::Score;
use crate::stream::{Message, MessageStream, TimedMessage, Track, bpm_to_micros, to_delta};
use log::{debug, warn};

/// Channels available to non-drum instruments, in assignment order.
const MELODIC_CHANNELS: [u8; 15] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 11, 12, 13, 14, 15];

/// Tie-break rank of events sharing a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    Tempo = 1,
    TimeSignature,
    KeySignature,
    Marker,
    Lyric,
    ProgramChange,
    PitchBend,
    ControlChange,
    NoteOff,
    NoteOn,
    EndOfTrack,
}

impl Category {
    pub fn of(message: &Message) -> Option<Category> {
        match message {
            Message::Tempo(_) => Some(Category::Tempo),
            Message::TimeSignature { .. } => Some(Category::TimeSignature),
            Message::KeySignature(_) => Some(Category::KeySignature),
            Message::Marker(_) => Some(Category::Marker),
            Message::Lyric(_) => Some(Category::Lyric),
            Message::ProgramChange { .. } => Some(Category::ProgramChange),
            Message::PitchBend { .. } => Some(Category::PitchBend),
            Message::ControlChange { .. } => Some(Category::ControlChange),
            Message::NoteOff { .. } => Some(Category::NoteOff),
            Message::NoteOn { .. } => Some(Category::NoteOn),
            Message::EndOfTrack => Some(Category::EndOfTrack),
            Message::TrackName(_) | Message::Other => None,
        }
    }
}

/// An absolute-time event awaiting ordering. `until` is the intended note-off tick of a
/// note-on and zero for everything else.
#[derive(Debug, Clone, PartialEq)]
struct Pending {
    time: u64,
    until: u64,
    message: Message,
}

impl Pending {
    fn new(time: u64, message: Message) -> Self {
        Self {
            time,
            until: 0,
            message,
        }
    }

    fn sort_key(&self) -> (u64, u8, u64) {
        // Uncategorized events keep their relative order ahead of categorized ones.
        let rank = Category::of(&self.message).map_or(0, |c| c as u8);
        (self.time, rank, self.until)
    }
}

fn sort_events(events: &mut [Pending]) {
    events.sort_by_key(Pending::sort_key);
}

/// Append an end-of-track one tick after the last event and convert to a delta track.
fn finish_track(mut events: Vec<Pending>) -> Track {
    let last = events.last().map_or(0, |e| e.time);
    events.push(Pending::new(last + 1, Message::EndOfTrack));

    let mut track: Track = events
        .into_iter()
        .map(|e| TimedMessage::new(e.time, e.message))
        .collect();
    to_delta(&mut track);
    track
}

/// Keep events in `[start, end)`. With `carry`, the latest event before `start` is moved to
/// `start` when nothing sits exactly there, so state lists have a value from the first tick.
/// Expects `events` sorted by time.
fn crop_events(events: Vec<Pending>, start: u64, end: u64, shift: bool, carry: bool) -> Vec<Pending> {
    let before = events.iter().rposition(|e| e.time < start);
    let mut kept: Vec<Pending> = Vec::with_capacity(events.len());
    let mut carried: Option<Pending> = None;

    for (idx, event) in events.into_iter().enumerate() {
        if event.time >= start && event.time < end {
            kept.push(event);
        } else if carry && Some(idx) == before {
            carried = Some(event);
        }
    }

    if let Some(mut event) = carried
        && kept.first().is_none_or(|first| first.time != start)
    {
        event.time = start;
        kept.insert(0, event);
    }

    if shift {
        for event in kept.iter_mut() {
            event.time = event.time.saturating_sub(start);
        }
    }

    kept
}

/// Clip a note to `[start, end)`; `None` when nothing of it remains.
fn crop_note(note: &Note, start: u64, end: u64, shift: bool) -> Option<(u64, u64)> {
    let new_start = start.max(note.start);
    let new_end = start.max(note.end.min(end));
    if new_end <= new_start {
        return None;
    }

    if shift {
        Some((new_start - start, new_end - start))
    } else {
        Some((new_start, new_end))
    }
}

fn selected_indices(score: &Score, selection: &InstrumentSelection) -> ScoreResult<Vec<usize>> {
    match selection {
        InstrumentSelection::All => Ok((0..score.instruments.len()).collect()),
        InstrumentSelection::Only(indices) if indices.is_empty() => Err(
            ScoreError::InvalidInstrumentSelection("no instrument index given".into()),
        ),
        InstrumentSelection::Only(indices) => {
            if let Some(bad) = indices.iter().find(|&&i| i >= score.instruments.len()) {
                return Err(ScoreError::InvalidInstrumentSelection(format!(
                    "index {} out of range for {} instrument(s)",
                    bad,
                    score.instruments.len()
                )));
            }
            Ok(indices.clone())
        }
    }
}

fn meta_track(score: &Score, segment: Option<(u64, u64)>, shift: bool) -> Vec<Pending> {
    let mut time_signatures: Vec<Pending> = Vec::new();
    if score.time_signature_changes.iter().all(|ts| ts.time > 0) {
        time_signatures.push(Pending::new(
            0,
            Message::TimeSignature {
                numerator: 4,
                denominator: 4,
            },
        ));
    }
    time_signatures.extend(score.time_signature_changes.iter().map(|ts| {
        Pending::new(
            ts.time,
            Message::TimeSignature {
                numerator: ts.numerator,
                denominator: ts.denominator,
            },
        )
    }));

    let mut tempi: Vec<Pending> = Vec::new();
    if score.tempo_changes.iter().all(|tc| tc.time > 0) {
        tempi.push(Pending::new(0, Message::Tempo(bpm_to_micros(DEFAULT_BPM))));
    }
    tempi.extend(
        score
            .tempo_changes
            .iter()
            .map(|tc| Pending::new(tc.time, Message::Tempo(bpm_to_micros(tc.tempo)))),
    );

    let mut lyrics: Vec<Pending> = score
        .lyrics
        .iter()
        .map(|l| Pending::new(l.time, Message::Lyric(l.text.clone())))
        .collect();
    let mut markers: Vec<Pending> = score
        .markers
        .iter()
        .map(|m| Pending::new(m.time, Message::Marker(m.text.clone())))
        .collect();
    let mut keys: Vec<Pending> = score
        .key_signature_changes
        .iter()
        .map(|k| Pending::new(k.time, Message::KeySignature(k.key_name.clone())))
        .collect();

    for list in [
        &mut time_signatures,
        &mut tempi,
        &mut lyrics,
        &mut markers,
        &mut keys,
    ] {
        list.sort_by_key(|e| e.time);
    }

    if let Some((start, end)) = segment {
        time_signatures = crop_events(time_signatures, start, end, shift, true);
        tempi = crop_events(tempi, start, end, shift, true);
        lyrics = crop_events(lyrics, start, end, shift, false);
        markers = crop_events(markers, start, end, shift, false);
        keys = crop_events(keys, start, end, shift, true);
    }

    let mut events = time_signatures;
    events.extend(tempi);
    events.extend(lyrics);
    events.extend(markers);
    events.extend(keys);
    sort_events(&mut events);
    events
}

fn instrument_track(
    instrument: &Instrument,
    channel: u8,
    segment: Option<(u64, u64)>,
    shift: bool,
) -> Vec<Pending> {
    let mut events: Vec<Pending> = Vec::new();

    if !instrument.name.is_empty() {
        events.push(Pending::new(0, Message::TrackName(instrument.name.clone())));
    }
    events.push(Pending::new(
        0,
        Message::ProgramChange {
            channel,
            program: instrument.program,
        },
    ));

    let mut bends: Vec<Pending> = instrument
        .pitch_bends
        .iter()
        .map(|b| {
            Pending::new(
                b.time,
                Message::PitchBend {
                    channel,
                    amount: b.pitch,
                },
            )
        })
        .collect();

    let mut controls: Vec<Pending> = if instrument.control_changes.is_empty() {
        instrument
            .pedals
            .iter()
            .flat_map(|p| {
                [(p.start, 127), (p.end, 0)].map(|(time, value)| {
                    Pending::new(
                        time,
                        Message::ControlChange {
                            channel,
                            number: SUSTAIN_PEDAL,
                            value,
                        },
                    )
                })
            })
            .collect()
    } else {
        instrument
            .control_changes
            .iter()
            .map(|cc| {
                Pending::new(
                    cc.time,
                    Message::ControlChange {
                        channel,
                        number: cc.number,
                        value: cc.value,
                    },
                )
            })
            .collect()
    };

    if let Some((start, end)) = segment {
        bends.sort_by_key(|e| e.time);
        controls.sort_by_key(|e| e.time);
        bends = crop_events(bends, start, end, shift, true);
        controls = crop_events(controls, start, end, shift, false);
    }
    events.extend(bends);
    events.extend(controls);

    let mut dropped = 0usize;
    for note in instrument.notes.iter() {
        let (start, end) = match segment {
            Some((seg_start, seg_end)) => match crop_note(note, seg_start, seg_end, shift) {
                Some(span) => span,
                None => {
                    dropped += 1;
                    continue;
                }
            },
            None => (note.start, note.end),
        };

        events.push(Pending {
            time: start,
            until: end,
            message: Message::NoteOn {
                channel,
                pitch: note.pitch,
                velocity: note.velocity,
            },
        });
        events.push(Pending::new(
            end,
            Message::NoteOff {
                channel,
                pitch: note.pitch,
                velocity: note.velocity,
            },
        ));
    }

    if dropped > 0 {
        debug!(
            "Cropped away {} note(s) of instrument '{}'",
            dropped, instrument.name
        );
    }

    sort_events(&mut events);
    events
}

/// Serialize `score` into a delta-timed stream: a meta track followed by one track per
/// selected instrument.
pub fn serialize(score: &Score, options: &DumpOptions) -> ScoreResult<MessageStream> {
    let indices = selected_indices(score, &options.instruments)?;

    if let Some((start, end)) = options.segment
        && start >= end
    {
        return Err(ScoreError::InvalidArgument(format!(
            "segment [{}, {}) is empty",
            start, end
        )));
    }

    let mut stream = MessageStream::new(score.ticks_per_beat);
    stream
        .tracks
        .push(finish_track(meta_track(score, options.segment, options.shift)));

    for idx in indices {
        let instrument = &score.instruments[idx];
        let channel = if instrument.is_drum {
            DRUM_CHANNEL
        } else {
            if idx >= MELODIC_CHANNELS.len() {
                warn!(
                    "Instrument {} shares channel {} with an earlier instrument",
                    idx,
                    MELODIC_CHANNELS[idx % MELODIC_CHANNELS.len()]
                );
            }
            MELODIC_CHANNELS[idx % MELODIC_CHANNELS.len()]
        };

        let events = instrument_track(instrument, channel, options.segment, options.shift);
        stream.tracks.push(finish_track(events));
    }

    Ok(stream)
}
