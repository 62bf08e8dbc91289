// MIDI rendering of melodies.
//
// A melody becomes a single-track Standard MIDI File (format 0): one tempo
// event, one program change selecting the melody's instrument, then a note-on
// and note-off per note. One offset/duration unit is one tick; the file uses
// 96 ticks per quarter note at 120 BPM, so a unit lasts 1/192 s.
//
// Notes may overlap or be out of time order (mutation doesn't re-sort), so
// events are laid out on an absolute tick timeline first and converted to
// delta times afterwards. At equal ticks note-offs come before note-ons so a
// repeated key is re-struck instead of cut short.
//
// Uses the `midly` crate for MIDI writing.

use std::path::Path;
use std::time::Duration;

use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};

use crate::evaluation::{EvaluationError, Rendition, Renderer};
use crate::melody::Melody;

/// Ticks per quarter note in MIDI output.
pub const TICKS_PER_QUARTER: u16 = 96;

pub const TEMPO_BPM: u32 = 120;

const CHANNEL: u8 = 0;

/// Wall-clock length of `ticks` at the fixed tempo.
pub fn ticks_to_duration(ticks: u32) -> Duration {
    let micros_per_quarter = 60_000_000 / u64::from(TEMPO_BPM);
    Duration::from_micros(u64::from(ticks) * micros_per_quarter / u64::from(TICKS_PER_QUARTER))
}

/// Real-time length of a melody from tick 0 to its last note-off.
pub fn melody_duration(melody: &Melody) -> Duration {
    ticks_to_duration(melody.end().max(0) as u32)
}

/// Encode a melody as SMF bytes.
pub fn to_midi_bytes(melody: &Melody) -> std::io::Result<Vec<u8>> {
    let smf = melody_to_smf(melody);
    let mut buf = Vec::new();
    smf.write_std(&mut buf)?;
    Ok(buf)
}

/// Encode a melody and write it to `path`.
pub fn write_midi(melody: &Melody, path: &Path) -> std::io::Result<()> {
    std::fs::write(path, to_midi_bytes(melody)?)
}

fn melody_to_smf(melody: &Melody) -> Smf<'static> {
    let mut smf = Smf::new(Header::new(
        Format::SingleTrack,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));
    let channel = u4::new(CHANNEL);

    // (tick, is_on, key, velocity)
    let mut timeline: Vec<(u32, bool, u8, u8)> = Vec::with_capacity(melody.len() * 2);
    for note in melody.notes() {
        let key = note.pitch() as u8;
        timeline.push((note.offset() as u32, true, key, note.velocity() as u8));
        timeline.push((note.end() as u32, false, key, 0));
    }
    timeline.sort_by_key(|&(tick, is_on, _, _)| (tick, is_on));

    let mut track: Track<'static> = Vec::with_capacity(timeline.len() + 3);
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(60_000_000 / TEMPO_BPM))),
    });
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Midi {
            channel,
            message: MidiMessage::ProgramChange {
                program: u7::new((melody.instrument() - 1) as u8),
            },
        },
    });

    let mut last_tick = 0;
    for (tick, is_on, key, vel) in timeline {
        let message = if is_on {
            MidiMessage::NoteOn {
                key: u7::new(key),
                vel: u7::new(vel),
            }
        } else {
            MidiMessage::NoteOff {
                key: u7::new(key),
                vel: u7::new(0),
            }
        };
        track.push(TrackEvent {
            delta: u28::new(tick - last_tick),
            kind: TrackEventKind::Midi { channel, message },
        });
        last_tick = tick;
    }

    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    smf.tracks.push(track);
    smf
}

/// `Renderer` producing Standard MIDI File bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct MidiRenderer;

impl Renderer for MidiRenderer {
    fn render(&self, melody: &Melody) -> Result<Rendition, EvaluationError> {
        let bytes = to_midi_bytes(melody).map_err(|e| EvaluationError::Render(e.to_string()))?;
        Ok(Rendition {
            bytes,
            length: melody_duration(melody),
        })
    }
}
