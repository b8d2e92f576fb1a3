//! Boundary between the core and the Standard MIDI File byte codec (`midly`).

use crate::demux::load;
use crate::error::ScoreError;
use crate::model::config::{DumpOptions, LoadOptions, Output};
use crate::model::key::{key_name_to_signature, key_signature_to_name};
use crate::model::score::Score;
use crate::serializer::serialize;
use crate::stream::{Message, MessageStream, TimedMessage};
use anyhow::{Result, anyhow};
use log::debug;
use midly::num::{u4, u7, u15, u24, u28};
use midly::{
    Arena, Format, Header, MetaMessage, MidiMessage, PitchBend, Smf, Timing, TrackEvent,
    TrackEventKind,
};
use std::fs;
use std::io::Read;
use std::path::Path;

const MAX_DELTA: u64 = 0x0FFF_FFFF;
const MAX_TEMPO: u32 = 0x00FF_FFFF;
const CLOCKS_PER_CLICK: u8 = 24;
const NOTATED_32NDS_PER_BEAT: u8 = 8;

/// Text payloads are stored as latin-1.
fn decode_text(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn encode_text(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(c as u32).unwrap_or(b'?'))
        .collect()
}

/// Parse SMF bytes into a delta-timed message stream.
pub fn decode_smf(bytes: &[u8]) -> Result<MessageStream> {
    let smf = Smf::parse(bytes).map_err(|e| anyhow!("Failed to parse MIDI: {:?}", e))?;

    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(t) => t.as_int(),
        Timing::Timecode(_fps, _subframe) => {
            return Err(
                ScoreError::Unsupported("SMPTE timecode midi timing".to_string()).into(),
            );
        }
    };

    debug!(
        "MIDI format: {:?}, tracks: {}, ticks per beat: {}",
        smf.header.format,
        smf.tracks.len(),
        ticks_per_beat
    );

    let tracks = smf
        .tracks
        .iter()
        .map(|track| {
            track
                .iter()
                .map(|event| TimedMessage::new(event.delta.as_int() as u64, decode_kind(event.kind)))
                .collect()
        })
        .collect();

    Ok(MessageStream {
        ticks_per_beat,
        tracks,
    })
}

fn decode_kind(kind: TrackEventKind) -> Message {
    match kind {
        TrackEventKind::Midi { channel, message } => {
            let channel = channel.as_int();
            match message {
                MidiMessage::NoteOn { key, vel } => Message::NoteOn {
                    channel,
                    pitch: key.as_int(),
                    velocity: vel.as_int(),
                },
                MidiMessage::NoteOff { key, vel } => Message::NoteOff {
                    channel,
                    pitch: key.as_int(),
                    velocity: vel.as_int(),
                },
                MidiMessage::Controller { controller, value } => Message::ControlChange {
                    channel,
                    number: controller.as_int(),
                    value: value.as_int(),
                },
                MidiMessage::ProgramChange { program } => Message::ProgramChange {
                    channel,
                    program: program.as_int(),
                },
                MidiMessage::PitchBend { bend } => Message::PitchBend {
                    channel,
                    amount: bend.as_int(),
                },
                MidiMessage::Aftertouch { .. } | MidiMessage::ChannelAftertouch { .. } => {
                    Message::Other
                }
            }
        }
        TrackEventKind::Meta(meta) => match meta {
            MetaMessage::TrackName(bytes) => Message::TrackName(decode_text(bytes)),
            MetaMessage::Marker(bytes) => Message::Marker(decode_text(bytes)),
            MetaMessage::Lyric(bytes) => Message::Lyric(decode_text(bytes)),
            MetaMessage::Tempo(micros) => Message::Tempo(micros.as_int()),
            MetaMessage::TimeSignature(numerator, denominator_pow, _, _) => {
                match 1u32.checked_shl(denominator_pow as u32) {
                    Some(denominator) => Message::TimeSignature {
                        numerator: numerator as u32,
                        denominator,
                    },
                    None => Message::Other,
                }
            }
            MetaMessage::KeySignature(sharps, minor) => match key_signature_to_name(sharps, minor) {
                Some(name) => Message::KeySignature(name.to_string()),
                None => Message::Other,
            },
            MetaMessage::EndOfTrack => Message::EndOfTrack,
            _ => Message::Other,
        },
        TrackEventKind::SysEx(_) | TrackEventKind::Escape(_) => Message::Other,
    }
}

fn channel_of(channel: u8) -> Result<u4> {
    if channel > 15 {
        return Err(ScoreError::InvalidArgument(format!("channel {} out of range", channel)).into());
    }
    Ok(u4::new(channel))
}

fn data_of(value: u8) -> Result<u7> {
    if value > 127 {
        return Err(
            ScoreError::InvalidArgument(format!("data byte {} out of range", value)).into(),
        );
    }
    Ok(u7::new(value))
}

/// `None` for messages that have no byte representation.
fn encode_message<'a>(message: &Message, arena: &'a Arena) -> Result<Option<TrackEventKind<'a>>> {
    let midi = |channel: u8, message: MidiMessage| -> Result<Option<TrackEventKind<'a>>> {
        Ok(Some(TrackEventKind::Midi {
            channel: channel_of(channel)?,
            message,
        }))
    };

    match message {
        Message::NoteOn {
            channel,
            pitch,
            velocity,
        } => midi(
            *channel,
            MidiMessage::NoteOn {
                key: data_of(*pitch)?,
                vel: data_of(*velocity)?,
            },
        ),
        Message::NoteOff {
            channel,
            pitch,
            velocity,
        } => midi(
            *channel,
            MidiMessage::NoteOff {
                key: data_of(*pitch)?,
                vel: data_of(*velocity)?,
            },
        ),
        Message::ProgramChange { channel, program } => midi(
            *channel,
            MidiMessage::ProgramChange {
                program: data_of(*program)?,
            },
        ),
        Message::PitchBend { channel, amount } => midi(
            *channel,
            MidiMessage::PitchBend {
                bend: PitchBend::from_int((*amount).clamp(-0x2000, 0x1FFF)),
            },
        ),
        Message::ControlChange {
            channel,
            number,
            value,
        } => midi(
            *channel,
            MidiMessage::Controller {
                controller: data_of(*number)?,
                value: data_of(*value)?,
            },
        ),
        Message::TrackName(text) => Ok(Some(TrackEventKind::Meta(MetaMessage::TrackName(
            arena.add(&encode_text(text)),
        )))),
        Message::Marker(text) => Ok(Some(TrackEventKind::Meta(MetaMessage::Marker(
            arena.add(&encode_text(text)),
        )))),
        Message::Lyric(text) => Ok(Some(TrackEventKind::Meta(MetaMessage::Lyric(
            arena.add(&encode_text(text)),
        )))),
        Message::Tempo(micros) => {
            if *micros == 0 || *micros > MAX_TEMPO {
                return Err(ScoreError::Unsupported(format!(
                    "tempo of {} us per beat",
                    micros
                ))
                .into());
            }
            Ok(Some(TrackEventKind::Meta(MetaMessage::Tempo(u24::new(
                *micros,
            )))))
        }
        Message::TimeSignature {
            numerator,
            denominator,
        } => {
            let numerator = u8::try_from(*numerator).map_err(|_| {
                ScoreError::Unsupported(format!("time signature numerator {}", numerator))
            })?;
            if !denominator.is_power_of_two() {
                return Err(ScoreError::Unsupported(format!(
                    "time signature denominator {}",
                    denominator
                ))
                .into());
            }
            Ok(Some(TrackEventKind::Meta(MetaMessage::TimeSignature(
                numerator,
                denominator.trailing_zeros() as u8,
                CLOCKS_PER_CLICK,
                NOTATED_32NDS_PER_BEAT,
            ))))
        }
        Message::KeySignature(name) => {
            let (sharps, minor) = key_name_to_signature(name)?;
            Ok(Some(TrackEventKind::Meta(MetaMessage::KeySignature(
                sharps, minor,
            ))))
        }
        Message::EndOfTrack => Ok(Some(TrackEventKind::Meta(MetaMessage::EndOfTrack))),
        Message::Other => Ok(None),
    }
}

fn build_smf<'a>(stream: &MessageStream, arena: &'a Arena) -> Result<Smf<'a>> {
    if stream.ticks_per_beat == 0 || stream.ticks_per_beat > 0x7FFF {
        return Err(ScoreError::Unsupported(format!(
            "{} ticks per beat",
            stream.ticks_per_beat
        ))
        .into());
    }

    let format = if stream.tracks.len() == 1 {
        Format::SingleTrack
    } else {
        Format::Parallel
    };
    let mut smf = Smf::new(Header::new(
        format,
        Timing::Metrical(u15::new(stream.ticks_per_beat)),
    ));

    for track in stream.tracks.iter() {
        let mut events: Vec<TrackEvent<'a>> = Vec::with_capacity(track.len());
        // Deltas of skipped messages roll into the next written event.
        let mut pending: u64 = 0;

        for event in track.iter() {
            let delta = pending.saturating_add(event.time);
            match encode_message(&event.message, arena)? {
                Some(kind) => {
                    if delta > MAX_DELTA {
                        return Err(ScoreError::Unsupported(format!(
                            "delta time of {} ticks",
                            delta
                        ))
                        .into());
                    }
                    events.push(TrackEvent {
                        delta: u28::new(delta as u32),
                        kind,
                    });
                    pending = 0;
                }
                None => pending = delta,
            }
        }

        smf.tracks.push(events);
    }

    Ok(smf)
}

/// Encode a delta-timed message stream as SMF bytes.
pub fn encode_smf(stream: &MessageStream) -> Result<Vec<u8>> {
    let arena = Arena::new();
    let smf = build_smf(stream, &arena)?;

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes)
        .map_err(|e| anyhow!("Failed to encode MIDI: {}", e))?;
    Ok(bytes)
}

impl Score {
    pub fn from_bytes(bytes: &[u8], options: &LoadOptions) -> Result<Score> {
        Ok(load(&decode_smf(bytes)?, options))
    }

    pub fn from_reader<R: Read>(mut reader: R, options: &LoadOptions) -> Result<Score> {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| anyhow!("Failed to read MIDI data: {}", e))?;
        Score::from_bytes(&bytes, options)
    }

    pub fn from_file<P: AsRef<Path>>(path: P, options: &LoadOptions) -> Result<Score> {
        let bytes = fs::read(path.as_ref()).map_err(|e| {
            anyhow!(
                "Failed to read MIDI file {}: {}",
                path.as_ref().display(),
                e
            )
        })?;

        Score::from_bytes(&bytes, options)
    }

    pub fn to_bytes(&self, options: &DumpOptions) -> Result<Vec<u8>> {
        encode_smf(&serialize(self, options)?)
    }

    /// Serialize and write the score. Usage errors surface as [`ScoreError`] values inside
    /// the returned error and leave nothing written.
    pub fn dump(&self, output: Option<Output<'_>>, options: &DumpOptions) -> Result<()> {
        let Some(output) = output else {
            return Err(ScoreError::MissingOutput.into());
        };

        let bytes = self.to_bytes(options)?;
        match output {
            Output::Path(path) => fs::write(&path, &bytes).map_err(|e| {
                anyhow!("Failed to write MIDI file {}: {}", path.display(), e)
            })?,
            Output::Writer(writer) => writer
                .write_all(&bytes)
                .map_err(|e| anyhow!("Failed to write MIDI data: {}", e))?,
        }

        debug!("Wrote {} bytes of MIDI data", bytes.len());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::containers::*;
    use midly::Fps;

    fn event(delta: u32, kind: TrackEventKind<'_>) -> TrackEvent<'_> {
        TrackEvent {
            delta: u28::new(delta),
            kind,
        }
    }

    fn note_on(delta: u32, key: u8, vel: u8) -> TrackEvent<'static> {
        event(
            delta,
            TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOn {
                    key: u7::new(key),
                    vel: u7::new(vel),
                },
            },
        )
    }

    fn write(smf: &Smf) -> Vec<u8> {
        let mut bytes = Vec::new();
        smf.write_std(&mut bytes).unwrap();
        bytes
    }

    fn sample_bytes() -> Vec<u8> {
        let mut smf = Smf::new(Header::new(
            Format::Parallel,
            Timing::Metrical(u15::new(96)),
        ));
        smf.tracks.push(vec![
            event(0, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(400_000)))),
            event(0, TrackEventKind::Meta(MetaMessage::TimeSignature(3, 2, 24, 8))),
            event(0, TrackEventKind::Meta(MetaMessage::KeySignature(-3, true))),
            event(10, TrackEventKind::Meta(MetaMessage::Marker("Caf\u{e9}".as_bytes()))),
            event(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)),
        ]);
        smf.tracks.push(vec![
            event(0, TrackEventKind::Meta(MetaMessage::TrackName(b"Lead"))),
            note_on(0, 60, 100),
            note_on(96, 60, 0),
            event(
                0,
                TrackEventKind::Midi {
                    channel: u4::new(0),
                    message: MidiMessage::PitchBend {
                        bend: midly::PitchBend::from_int(-100),
                    },
                },
            ),
            event(0, TrackEventKind::SysEx(&[0x7E, 0xF7])),
            event(1, TrackEventKind::Meta(MetaMessage::EndOfTrack)),
        ]);
        write(&smf)
    }

    #[test]
    fn decode_sample() {
        env_logger::try_init().unwrap_or(());

        let stream = decode_smf(&sample_bytes()).unwrap();
        assert_eq!(stream.ticks_per_beat, 96);
        assert_eq!(stream.tracks.len(), 2);
        assert_eq!(stream.tracks[0][0].message, Message::Tempo(400_000));
        assert_eq!(
            stream.tracks[0][1].message,
            Message::TimeSignature {
                numerator: 3,
                denominator: 4
            }
        );
        assert_eq!(stream.tracks[0][2].message, Message::KeySignature("Cm".into()));
        assert_eq!(stream.tracks[1][3].message, Message::PitchBend { channel: 0, amount: -100 });
        assert_eq!(stream.tracks[1][4].message, Message::Other);
    }

    #[test]
    fn load_sample() {
        env_logger::try_init().unwrap_or(());

        let score = Score::from_bytes(&sample_bytes(), &LoadOptions::default()).unwrap();
        assert_eq!(score.tempo_changes, vec![TempoChange { tempo: 150.0, time: 0 }]);
        assert_eq!(score.key_signature_changes[0].key_number, 12);
        // "Café" in UTF-8 read back byte-per-char.
        assert_eq!(score.markers[0].text, "Caf\u{c3}\u{a9}");
        assert_eq!(score.instruments.len(), 1);
        assert_eq!(score.instruments[0].name, "Lead");
        assert_eq!(score.instruments[0].notes, vec![Note::new(100, 60, 0, 96)]);
        assert_eq!(score.max_tick, 98);
    }

    #[test]
    fn text_is_latin1() {
        assert_eq!(decode_text(&[0x43, 0xE9]), "C\u{e9}");
        assert_eq!(encode_text("C\u{e9}\u{263a}"), vec![0x43, 0xE9, b'?']);
    }

    #[test]
    fn smpte_timing_is_unsupported() {
        let smf = Smf::new(Header::new(Format::SingleTrack, Timing::Timecode(Fps::Fps25, 40)));
        let err = decode_smf(&write(&smf)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ScoreError>(),
            Some(ScoreError::Unsupported(_))
        ));
    }

    #[test]
    fn encode_skips_other_and_keeps_timing() {
        let mut stream = MessageStream::new(480);
        stream.tracks.push(vec![
            TimedMessage::new(0, Message::Tempo(500_000)),
            TimedMessage::new(10, Message::Other),
            TimedMessage::new(5, Message::Marker("x".into())),
            TimedMessage::new(1, Message::EndOfTrack),
        ]);

        let decoded = decode_smf(&encode_smf(&stream).unwrap()).unwrap();
        let times: Vec<u64> = decoded.tracks[0].iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0, 15, 1]);
        assert_eq!(decoded.tracks[0][1].message, Message::Marker("x".into()));
    }

    #[test]
    fn encode_rejects_unencodable_values() {
        let mut stream = MessageStream::new(480);
        stream.tracks.push(vec![TimedMessage::new(
            0,
            Message::TimeSignature {
                numerator: 3,
                denominator: 6,
            },
        )]);
        assert!(encode_smf(&stream).is_err());

        stream.tracks[0][0].message = Message::NoteOn {
            channel: 16,
            pitch: 60,
            velocity: 1,
        };
        assert!(encode_smf(&stream).is_err());
    }

    #[test]
    fn dump_requires_output() {
        let score = Score::new(480);
        let err = score.dump(None, &DumpOptions::default()).unwrap_err();
        assert_eq!(err.downcast_ref::<ScoreError>(), Some(&ScoreError::MissingOutput));
    }

    #[test]
    fn dump_to_writer_and_reload() {
        env_logger::try_init().unwrap_or(());

        let mut score = Score::new(480);
        let mut instrument = Instrument::new(25, false, "Guitar");
        instrument.notes.push(Note::new(90, 64, 0, 240));
        instrument.notes.push(Note::new(70, 67, 240, 480));
        score.instruments.push(instrument);
        score.lyrics.push(Lyric::new("hey", 240));

        let mut buffer: Vec<u8> = Vec::new();
        score
            .dump(Some(Output::Writer(&mut buffer)), &DumpOptions::default())
            .unwrap();

        let reloaded = Score::from_reader(buffer.as_slice(), &LoadOptions::default()).unwrap();
        assert_eq!(reloaded.instruments.len(), 1);
        assert_eq!(reloaded.instruments[0].program, 25);
        assert_eq!(reloaded.instruments[0].name, "Guitar");
        assert_eq!(reloaded.instruments[0].notes, score.instruments[0].notes);
        assert_eq!(reloaded.lyrics, score.lyrics);
        assert_eq!(reloaded.time_signature_changes, vec![TimeSignature::new(4, 4, 0).unwrap()]);
    }
}
