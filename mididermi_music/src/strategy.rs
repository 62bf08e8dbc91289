// Differential mutation operators.
//
// The DE engine never touches note attributes directly. It asks a
// `MutationStrategy` for a `Delta` between two melodies and then for a trial
// built by applying that delta to a base melody. Both steps are pure, so
// alternative operators can be swapped in without touching `Population`.
//
// Alignment policy (the parents may have different note counts): index-aligned
// truncation. Note k of the base is paired with note k of the donor for
// k < min(len_base, len_donor); the delta has exactly that many steps.
// `apply` walks the target's notes and the delta in lockstep, so notes past
// the end of the delta are left untouched and extra delta steps are ignored.
// The result depends only on the two parents, never on further randomness.

use serde::{Deserialize, Serialize};

use crate::melody::Melody;

/// Signed per-attribute step for one aligned note pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteDelta {
    pub pitch: i32,
    pub offset: i32,
    pub duration: i32,
    pub velocity: i32,
}

impl NoteDelta {
    pub fn is_zero(&self) -> bool {
        *self == NoteDelta::default()
    }
}

/// Position-aligned difference between two melodies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub steps: Vec<NoteDelta>,
}

impl Delta {
    pub fn is_zero(&self) -> bool {
        self.steps.iter().all(NoteDelta::is_zero)
    }
}

/// A pair of pure operators producing DE trial melodies.
pub trait MutationStrategy: Send + Sync {
    /// The delta that moves `base` toward `donor`.
    fn differential(&self, base: &Melody, donor: &Melody) -> Delta;

    /// A new melody: `melody` with `delta` added to its notes, every attribute
    /// re-clamped. Id and score are copied from `melody`.
    fn apply(&self, melody: &Melody, delta: &Delta) -> Melody;
}

/// Classic DE step: `trial = base + F * (donor - base)`, rounded per
/// attribute (half away from zero).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScaledDifference {
    pub factor: f64,
}

impl Default for ScaledDifference {
    fn default() -> Self {
        ScaledDifference { factor: 0.5 }
    }
}

impl ScaledDifference {
    fn scale(&self, diff: i32) -> i32 {
        (f64::from(diff) * self.factor).round() as i32
    }
}

impl MutationStrategy for ScaledDifference {
    fn differential(&self, base: &Melody, donor: &Melody) -> Delta {
        let steps = base
            .notes()
            .iter()
            .zip(donor.notes())
            .map(|(b, d)| NoteDelta {
                pitch: self.scale(d.pitch() - b.pitch()),
                offset: self.scale(d.offset() - b.offset()),
                duration: self.scale(d.duration() - b.duration()),
                velocity: self.scale(d.velocity() - b.velocity()),
            })
            .collect();
        Delta { steps }
    }

    fn apply(&self, melody: &Melody, delta: &Delta) -> Melody {
        let mut trial = melody.clone();
        for (note, step) in trial.notes_mut().iter_mut().zip(&delta.steps) {
            note.set_pitch(note.pitch() + step.pitch);
            note.set_offset(note.offset() + step.offset);
            note.set_duration(note.duration() + step.duration);
            note.set_velocity(note.velocity() + step.velocity);
        }
        trial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::Note;

    fn melody(notes: &[(i32, i32, i32, i32)]) -> Melody {
        Melody::with_notes(
            0,
            1,
            notes
                .iter()
                .map(|&(p, o, d, v)| Note::new(p, o, d, v))
                .collect(),
        )
    }

    #[test]
    fn self_differential_is_zero() {
        let m = melody(&[(60, 1, 10, 64), (67, 11, 10, 80)]);
        let delta = ScaledDifference::default().differential(&m, &m);
        assert_eq!(delta.steps.len(), 2);
        assert!(delta.is_zero());
        assert_eq!(ScaledDifference::default().apply(&m, &delta), m);
    }

    #[test]
    fn full_factor_moves_base_onto_donor() {
        let base = melody(&[(60, 1, 10, 64)]);
        let donor = melody(&[(72, 40, 20, 100)]);
        let s = ScaledDifference { factor: 1.0 };
        let trial = s.apply(&base, &s.differential(&base, &donor));
        assert_eq!(trial.notes(), donor.notes());
    }

    #[test]
    fn half_factor_rounds_away_from_zero() {
        let base = melody(&[(60, 10, 10, 64)]);
        let donor = melody(&[(63, 7, 10, 64)]);
        let delta = ScaledDifference::default().differential(&base, &donor);
        // +3 * 0.5 = 1.5 -> 2; -3 * 0.5 = -1.5 -> -2
        assert_eq!(delta.steps[0].pitch, 2);
        assert_eq!(delta.steps[0].offset, -2);
    }

    #[test]
    fn mismatched_lengths_truncate_to_shorter_parent() {
        let long = melody(&[(60, 1, 10, 64), (62, 11, 10, 64), (64, 21, 10, 64)]);
        let short = melody(&[(70, 1, 10, 64)]);
        let s = ScaledDifference { factor: 1.0 };

        let delta = s.differential(&long, &short);
        assert_eq!(delta.steps.len(), 1);
        let trial = s.apply(&long, &delta);
        assert_eq!(trial.len(), 3);
        assert_eq!(trial.notes()[0].pitch(), 70);
        // Unaligned tail untouched.
        assert_eq!(&trial.notes()[1..], &long.notes()[1..]);

        let delta = s.differential(&short, &long);
        assert_eq!(delta.steps.len(), 1);
        let trial = s.apply(&short, &delta);
        assert_eq!(trial.len(), 1);
        assert_eq!(trial.notes()[0].pitch(), 60);
    }

    #[test]
    fn apply_reclamps_attributes() {
        let base = melody(&[(120, 9990, 95, 120)]);
        let delta = Delta {
            steps: vec![NoteDelta {
                pitch: 50,
                offset: 50,
                duration: 50,
                velocity: -500,
            }],
        };
        let trial = ScaledDifference::default().apply(&base, &delta);
        assert_eq!(trial.notes()[0], Note::new(127, 10_000, 100, 0));
    }

    #[test]
    fn apply_keeps_id_and_score_of_base() {
        let mut base = melody(&[(60, 1, 10, 64)]);
        base.set_id(17);
        base.set_score(4);
        let donor = melody(&[(65, 1, 10, 64)]);
        let s = ScaledDifference::default();
        let trial = s.apply(&base, &s.differential(&base, &donor));
        assert_eq!(trial.id(), 17);
        assert_eq!(trial.score(), 4);
        assert_ne!(trial, base);
    }

    #[test]
    fn same_parents_give_same_trial() {
        let a = melody(&[(60, 1, 10, 64), (61, 5, 3, 20)]);
        let b = melody(&[(48, 9, 30, 90)]);
        let s = ScaledDifference { factor: 0.7 };
        let t1 = s.apply(&a, &s.differential(&a, &b));
        let t2 = s.apply(&a, &s.differential(&a, &b));
        assert_eq!(t1, t2);
    }
}
