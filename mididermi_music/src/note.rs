// A single note: the gene of a melody chromosome.
//
// Every attribute is saturated into its valid range on every write, including
// construction and deserialization. Out-of-range input is never rejected;
// mutation operators rely on this so they can add raw deltas and let the
// setters clamp.
//
// Ranges:
// - pitch:    0..=127   (MIDI key number)
// - offset:   1..=10000 (start time from the beginning of the melody, ticks)
// - duration: 1..=100   (ticks)
// - velocity: 0..=127
//
// Equality is structural over all four fields.

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const MIN_PITCH: i32 = 0;
pub const MAX_PITCH: i32 = 127;
pub const MIN_OFFSET: i32 = 1;
pub const MAX_OFFSET: i32 = 10_000;
pub const MIN_DURATION: i32 = 1;
pub const MAX_DURATION: i32 = 100;
pub const MIN_VELOCITY: i32 = 0;
pub const MAX_VELOCITY: i32 = 127;

/// A bounded, value-semantics musical note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawNote")]
pub struct Note {
    pitch: u8,
    offset: u16,
    duration: u8,
    velocity: u8,
}

/// Unchecked wire shape. Converting into `Note` clamps every field, so a
/// hand-edited or hostile payload can't smuggle an out-of-range value in.
#[derive(Deserialize)]
struct RawNote {
    pitch: i32,
    offset: i32,
    duration: i32,
    velocity: i32,
}

impl From<RawNote> for Note {
    fn from(raw: RawNote) -> Self {
        Note::new(raw.pitch, raw.offset, raw.duration, raw.velocity)
    }
}

impl Note {
    pub fn new(pitch: i32, offset: i32, duration: i32, velocity: i32) -> Self {
        let mut note = Note {
            pitch: 0,
            offset: MIN_OFFSET as u16,
            duration: MIN_DURATION as u8,
            velocity: 0,
        };
        note.set_pitch(pitch);
        note.set_offset(offset);
        note.set_duration(duration);
        note.set_velocity(velocity);
        note
    }

    /// A note with every attribute drawn uniformly from its full range.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Note::new(
            rng.random_range(MIN_PITCH..=MAX_PITCH),
            rng.random_range(MIN_OFFSET..=MAX_OFFSET),
            rng.random_range(MIN_DURATION..=MAX_DURATION),
            rng.random_range(MIN_VELOCITY..=MAX_VELOCITY),
        )
    }

    pub fn pitch(&self) -> i32 {
        i32::from(self.pitch)
    }

    pub fn offset(&self) -> i32 {
        i32::from(self.offset)
    }

    pub fn duration(&self) -> i32 {
        i32::from(self.duration)
    }

    pub fn velocity(&self) -> i32 {
        i32::from(self.velocity)
    }

    /// First tick after the note has released.
    pub fn end(&self) -> i32 {
        self.offset() + self.duration()
    }

    pub fn set_pitch(&mut self, pitch: i32) {
        self.pitch = pitch.clamp(MIN_PITCH, MAX_PITCH) as u8;
    }

    pub fn set_offset(&mut self, offset: i32) {
        self.offset = offset.clamp(MIN_OFFSET, MAX_OFFSET) as u16;
    }

    pub fn set_duration(&mut self, duration: i32) {
        self.duration = duration.clamp(MIN_DURATION, MAX_DURATION) as u8;
    }

    pub fn set_velocity(&mut self, velocity: i32) {
        self.velocity = velocity.clamp(MIN_VELOCITY, MAX_VELOCITY) as u8;
    }
}
