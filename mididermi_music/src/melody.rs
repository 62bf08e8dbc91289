// Melody: the chromosome evolved by the DE engine.
//
// An ordered list of `Note`s plus instrument, genre tag, process-unique id and
// a signed, unbounded fitness score. Note order is musical time order only
// after an explicit `sort()`; mutation operators are free to leave offsets out
// of order.
//
// Identity vs. fitness: `PartialEq` compares the note sequence, instrument and
// genre. `id` and `score` are excluded, so two workers that independently
// rediscover the same candidate produce equal melodies whose scores the
// reservoir can fold together.
//
// Ids come from `MelodyIdAllocator`, an atomic counter created once per process
// and injected into every component that creates melodies.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::note::Note;

pub const MIN_INSTRUMENT: i32 = 1;
pub const MAX_INSTRUMENT: i32 = 128;

/// Process-wide, monotonically increasing melody id source.
///
/// Shared by `Arc` between providers; `next()` is safe under concurrent
/// allocation and never hands out the same id twice.
#[derive(Debug)]
pub struct MelodyIdAllocator {
    next: AtomicU64,
}

impl MelodyIdAllocator {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Start counting at `first`. Used after loading a persisted pool so that
    /// fresh ids don't collide with stored ones.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Ensure every future id is strictly greater than `seen`.
    pub fn observe(&self, seen: u64) {
        self.next.fetch_max(seen.saturating_add(1), Ordering::Relaxed);
    }
}

impl Default for MelodyIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// A candidate melody.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawMelody")]
pub struct Melody {
    id: u64,
    notes: Vec<Note>,
    instrument: u8,
    genre: i32,
    score: i64,
}

/// Unchecked wire shape; converting clamps the instrument like `set_instrument`.
#[derive(Deserialize)]
struct RawMelody {
    id: u64,
    notes: Vec<Note>,
    instrument: i32,
    genre: i32,
    score: i64,
}

impl From<RawMelody> for Melody {
    fn from(raw: RawMelody) -> Self {
        let mut melody = Melody::with_notes(raw.id, raw.instrument, raw.notes);
        melody.genre = raw.genre;
        melody.score = raw.score;
        melody
    }
}

impl Melody {
    /// An empty melody for the given instrument (clamped to 1..=128).
    pub fn new(id: u64, instrument: i32) -> Self {
        let mut melody = Melody {
            id,
            notes: Vec::new(),
            instrument: MIN_INSTRUMENT as u8,
            genre: 0,
            score: 0,
        };
        melody.set_instrument(instrument);
        melody
    }

    pub fn with_notes(id: u64, instrument: i32, notes: Vec<Note>) -> Self {
        let mut melody = Melody::new(id, instrument);
        melody.notes = notes;
        melody
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn notes_mut(&mut self) -> &mut [Note] {
        &mut self.notes
    }

    pub fn add_note(&mut self, note: Note) {
        self.notes.push(note);
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn instrument(&self) -> i32 {
        i32::from(self.instrument)
    }

    pub fn set_instrument(&mut self, instrument: i32) {
        // MIDI programs are 0..=127; the melody stores them 1-based.
        self.instrument = instrument.clamp(MIN_INSTRUMENT, MAX_INSTRUMENT) as u8;
    }

    pub fn genre(&self) -> i32 {
        self.genre
    }

    pub fn set_genre(&mut self, genre: i32) {
        self.genre = genre;
    }

    pub fn score(&self) -> i64 {
        self.score
    }

    pub fn set_score(&mut self, score: i64) {
        self.score = score;
    }

    pub fn add_score(&mut self, delta: i64) {
        self.score = self.score.saturating_add(delta);
    }

    pub fn score_up(&mut self) {
        self.add_score(1);
    }

    pub fn score_down(&mut self) {
        self.add_score(-1);
    }

    /// Re-establish time order. Stable, so simultaneous notes keep their
    /// relative order.
    pub fn sort(&mut self) {
        self.notes.sort_by_key(Note::offset);
    }

    /// Tick of the earliest note onset, or 0 for an empty melody.
    pub fn start(&self) -> i32 {
        self.notes.iter().map(Note::offset).min().unwrap_or(0)
    }

    /// Tick at which the last note releases, or 0 for an empty melody.
    pub fn end(&self) -> i32 {
        self.notes.iter().map(Note::end).max().unwrap_or(0)
    }

    /// The note sounding at a normalised playback position in [0, 1].
    ///
    /// Positions are mapped linearly onto `start()..end()`, with 1.0 landing on
    /// the last sounding tick. When several notes overlap, the one latest in
    /// sequence order wins. Returns `None` in gaps and for empty melodies.
    pub fn note_at(&self, position: f64) -> Option<&Note> {
        if self.notes.is_empty() {
            return None;
        }
        let position = position.clamp(0.0, 1.0);
        let (start, end) = (self.start(), self.end());
        let tick = (start + (position * f64::from(end - start)).floor() as i32).min(end - 1);
        self.notes
            .iter()
            .rev()
            .find(|n| n.offset() <= tick && tick < n.end())
    }

    /// Flat "pitch offset duration velocity ..." encoding used by the
    /// persistent store.
    pub fn notes_in_numbers(&self) -> String {
        let mut out = String::new();
        for note in &self.notes {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&format!(
                "{} {} {} {}",
                note.pitch(),
                note.offset(),
                note.duration(),
                note.velocity()
            ));
        }
        out
    }

    /// Inverse of `notes_in_numbers`. Trailing incomplete groups and
    /// unparsable numbers are dropped.
    pub fn parse_notes_in_numbers(text: &str) -> Vec<Note> {
        let numbers: Vec<i32> = text
            .split_whitespace()
            .map_while(|t| t.parse().ok())
            .collect();
        numbers
            .chunks_exact(4)
            .map(|c| Note::new(c[0], c[1], c[2], c[3]))
            .collect()
    }
}

impl PartialEq for Melody {
    fn eq(&self, other: &Self) -> bool {
        self.instrument == other.instrument
            && self.genre == other.genre
            && self.notes == other.notes
    }
}

impl Eq for Melody {}

impl fmt::Display for Melody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "melody #{} [instrument {}, genre {}, score {}, {} notes]",
            self.id,
            self.instrument,
            self.genre,
            self.score,
            self.notes.len()
        )
    }
}
