// Melody sources used to seed the reservoir.
//
// Every source implements `MelodySource::provide`, returning a batch of fresh
// melodies with ids drawn from the shared `MelodyIdAllocator` and every
// attribute already clamped. A source that cannot produce anything at all
// (missing directory, unreachable store) returns `SourceError`; the reservoir
// treats that as "contributes zero melodies". Per-item problems inside a
// batch (one malformed descriptor file) are logged and skipped.
//
// Generators:
// - `RandomMelodies`: notes drawn uniformly over every attribute range.
// - `FractalMelodies`: each pitch is nudged one semitone back toward the
//   previous one, which flattens jumps into smoother, locally monotonic
//   contours.
// Both produce 3..=15 notes per melody, a random instrument, sorted by
// offset, and batches of 3..=5 melodies unless a count is configured.
//
// Descriptor files are plain text, tokens separated by whitespace (line breaks
// included). The first token is the instrument (1..=128). Each further token
// is one note written `<octave><letter>[#]<duration>`:
//   octave   -1..=9
//   letter   A-G; `#` is accepted on A, C, D, F, G
//   duration integer ticks
// e.g. `4C#12` is C#4 (pitch 61) lasting 12 ticks. Pitch is
// (octave + 1) * 12 + semitone. Notes follow each other without gaps starting
// at offset 1; velocity is 64.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, warn};

use crate::melody::{MAX_INSTRUMENT, MIN_INSTRUMENT, Melody, MelodyIdAllocator};
use crate::note::{MIN_OFFSET, Note};
use crate::population::{MAX_RANDOM_POPULATION, MIN_RANDOM_POPULATION};

pub const MIN_SEQUENCE: usize = 3;
pub const MAX_SEQUENCE: usize = 15;

/// Velocity given to every note read from a descriptor file.
pub const DESCRIPTOR_VELOCITY: i32 = 64;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("instrument is missing")]
    MissingInstrument,
    #[error("instrument is not a number [{0}]")]
    BadInstrument(String),
    #[error("instrument {0} is not between 1 and 128")]
    InstrumentOutOfRange(i64),
    #[error("octave is not correct [{0}]")]
    BadOctave(String),
    #[error("note name is not correct [{0}]")]
    BadNoteName(String),
    #[error("duration is not a number [{0}]")]
    BadDuration(String),
}

/// Something that can contribute melodies to the reservoir.
pub trait MelodySource: Send {
    /// Short name for logs.
    fn name(&self) -> &str;

    fn provide(&mut self) -> Result<Vec<Melody>, SourceError>;
}

/// Uniformly random melodies.
pub struct RandomMelodies {
    ids: Arc<MelodyIdAllocator>,
    count: Option<usize>,
    rng: StdRng,
}

impl RandomMelodies {
    /// `count: None` draws a batch size from 3..=5 on every call.
    pub fn new(ids: Arc<MelodyIdAllocator>, count: Option<usize>, seed: u64) -> Self {
        RandomMelodies {
            ids,
            count,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn melody(&mut self) -> Melody {
        let length = self.rng.random_range(MIN_SEQUENCE..=MAX_SEQUENCE);
        let notes = (0..length).map(|_| Note::random(&mut self.rng)).collect();
        finish(&self.ids, &mut self.rng, notes)
    }
}

impl MelodySource for RandomMelodies {
    fn name(&self) -> &str {
        "random"
    }

    fn provide(&mut self) -> Result<Vec<Melody>, SourceError> {
        let count = batch_size(self.count, &mut self.rng);
        Ok((0..count).map(|_| self.melody()).collect())
    }
}

/// Random melodies with smoothed pitch contours.
pub struct FractalMelodies {
    ids: Arc<MelodyIdAllocator>,
    count: Option<usize>,
    rng: StdRng,
}

impl FractalMelodies {
    pub fn new(ids: Arc<MelodyIdAllocator>, count: Option<usize>, seed: u64) -> Self {
        FractalMelodies {
            ids,
            count,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn melody(&mut self) -> Melody {
        let length = self.rng.random_range(MIN_SEQUENCE..=MAX_SEQUENCE);
        let mut notes: Vec<Note> = Vec::with_capacity(length);
        for _ in 0..length {
            let mut next = Note::random(&mut self.rng);
            if let Some(previous) = notes.last() {
                let step = (previous.pitch() - next.pitch()).signum();
                next.set_pitch(next.pitch() + step);
            }
            notes.push(next);
        }
        finish(&self.ids, &mut self.rng, notes)
    }
}

impl MelodySource for FractalMelodies {
    fn name(&self) -> &str {
        "fractal"
    }

    fn provide(&mut self) -> Result<Vec<Melody>, SourceError> {
        let count = batch_size(self.count, &mut self.rng);
        Ok((0..count).map(|_| self.melody()).collect())
    }
}

fn batch_size(count: Option<usize>, rng: &mut StdRng) -> usize {
    count.unwrap_or_else(|| rng.random_range(MIN_RANDOM_POPULATION..=MAX_RANDOM_POPULATION))
}

fn finish(ids: &MelodyIdAllocator, rng: &mut StdRng, notes: Vec<Note>) -> Melody {
    let instrument = rng.random_range(MIN_INSTRUMENT..=MAX_INSTRUMENT);
    let mut melody = Melody::with_notes(ids.next(), instrument, notes);
    melody.sort();
    melody
}

/// Parse a descriptor text into an unnumbered melody (id 0).
pub fn parse_descriptor(text: &str) -> Result<Melody, DescriptorError> {
    let mut tokens = text.split_whitespace();
    let first = tokens.next().ok_or(DescriptorError::MissingInstrument)?;
    let instrument: i64 = first
        .parse()
        .map_err(|_| DescriptorError::BadInstrument(first.to_string()))?;
    if !(i64::from(MIN_INSTRUMENT)..=i64::from(MAX_INSTRUMENT)).contains(&instrument) {
        return Err(DescriptorError::InstrumentOutOfRange(instrument));
    }

    let mut melody = Melody::new(0, instrument as i32);
    let mut time = MIN_OFFSET;
    for token in tokens {
        let (pitch, duration) = parse_note_token(token)?;
        let note = Note::new(pitch, time, duration, DESCRIPTOR_VELOCITY);
        time += note.duration();
        melody.add_note(note);
    }
    Ok(melody)
}

/// `<octave><letter>[#]<duration>` -> (pitch, duration)
fn parse_note_token(token: &str) -> Result<(i32, i32), DescriptorError> {
    let (octave, rest) = if let Some(rest) = token.strip_prefix("-1") {
        (-1, rest)
    } else {
        match token.chars().next().and_then(|c| c.to_digit(10)) {
            Some(d) => (d as i32, &token[1..]),
            None => return Err(DescriptorError::BadOctave(token.to_string())),
        }
    };

    let mut chars = rest.chars();
    let letter = chars
        .next()
        .ok_or_else(|| DescriptorError::BadNoteName(token.to_string()))?;
    let sharp = rest[letter.len_utf8()..].starts_with('#');
    let semitone = match (letter, sharp) {
        ('C', false) => 0,
        ('C', true) => 1,
        ('D', false) => 2,
        ('D', true) => 3,
        ('E', false) => 4,
        ('F', false) => 5,
        ('F', true) => 6,
        ('G', false) => 7,
        ('G', true) => 8,
        ('A', false) => 9,
        ('A', true) => 10,
        ('B', false) => 11,
        _ => return Err(DescriptorError::BadNoteName(token.to_string())),
    };
    let digits = &rest[letter.len_utf8() + usize::from(sharp)..];
    let duration: i32 = digits
        .parse()
        .map_err(|_| DescriptorError::BadDuration(token.to_string()))?;

    Ok(((octave + 1) * 12 + semitone, duration))
}

/// Loads every regular file in a directory as a melody descriptor.
pub struct DescriptorDirectory {
    ids: Arc<MelodyIdAllocator>,
    dir: PathBuf,
}

impl DescriptorDirectory {
    pub fn new(ids: Arc<MelodyIdAllocator>, dir: impl Into<PathBuf>) -> Self {
        DescriptorDirectory {
            ids,
            dir: dir.into(),
        }
    }

    fn load(&self, path: &Path) -> Result<Melody, String> {
        let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let mut melody = parse_descriptor(&text).map_err(|e| e.to_string())?;
        melody.set_id(self.ids.next());
        Ok(melody)
    }
}

impl MelodySource for DescriptorDirectory {
    fn name(&self) -> &str {
        "descriptor files"
    }

    fn provide(&mut self) -> Result<Vec<Melody>, SourceError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let mut melodies = Vec::with_capacity(paths.len());
        for path in paths {
            match self.load(&path) {
                Ok(melody) => {
                    debug!("loaded {} from {}", melody, path.display());
                    melodies.push(melody);
                }
                Err(e) => warn!("skipping descriptor {}: {e}", path.display()),
            }
        }
        Ok(melodies)
    }
}
