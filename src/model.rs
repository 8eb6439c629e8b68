//! Data model shared by the score loader, the performance array builder
//! and the note matchers.
//!
//! A [`Score`] is the note-level view of an MEI document: every sounding
//! note flattened to a [`ScoreNote`] with its onset and duration on the
//! symbolic timeline. A performance is a flat list of [`PerformanceNote`]s.
//! Matchers link the two with [`AlignmentPair`]s.

use serde::{Deserialize, Serialize};

/// Divisions per quarter note when the MEI does not declare `ppq`.
pub const DEFAULT_DIVS_PQ: i32 = 480;

/// Maximum length (in characters) of a performance note identifier.
pub const MAX_PERFORMANCE_ID_LEN: usize = 256;

/// A score loaded from MEI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    /// Title from `meiHead/fileDesc/titleStmt/title`
    pub title: Option<String>,
    /// Composer from the title statement's `respStmt` or `composer`
    pub composer: Option<String>,
    /// `@meiversion` of the root element
    pub mei_version: Option<String>,
    /// Divisions per quarter note used for `onset_div`/`duration_div`
    pub divs_pq: i32,
    /// Measures in document order
    pub measures: Vec<MeasureSpan>,
    /// Sounding notes, sorted by onset then pitch
    pub notes: Vec<ScoreNote>,
}

/// Position of one measure on the score timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureSpan {
    /// Measure number (`@n`), empty when absent
    pub number: String,
    /// Start in quarter notes
    pub onset_quarter: f64,
    /// Length in quarter notes (the longest layer)
    pub duration_quarter: f64,
}

/// One note of the score, flattened out of its measure/staff/layer nesting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreNote {
    /// `xml:id` of the note element (generated when absent)
    pub id: String,
    /// MIDI pitch number (C4 = 60)
    pub pitch: i32,
    pub onset_quarter: f64,
    pub duration_quarter: f64,
    /// Onset in beats of the meter unit in effect
    pub onset_beat: f64,
    pub duration_beat: f64,
    pub onset_div: i32,
    pub duration_div: i32,
    pub divs_pq: i32,
    /// Staff number (`staff/@n`)
    pub staff: i32,
    /// Layer number (`layer/@n`)
    pub voice: i32,
    /// Number of the measure the note starts in
    pub measure: String,
    /// Grace notes have zero duration
    pub grace: bool,
}

/// Pitch spelled the way MEI spells it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pitch {
    /// Note name, lowercase: a–g
    pub pname: String,
    /// Octave number (middle C = 4)
    pub oct: i32,
    /// Chromatic alteration in semitones
    pub alter: i32,
}

/// A performed note, in the fixed field order clients send it in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceNote {
    pub onset_sec: f32,
    pub duration_sec: f32,
    pub onset_tick: i32,
    pub duration_tick: i32,
    pub pitch: i32,
    pub velocity: i32,
    pub track: i32,
    pub channel: i32,
    pub id: String,
}

/// One entry of an alignment between score and performance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "label", rename_all = "lowercase")]
pub enum AlignmentPair {
    /// The score note was played as this performance note.
    Match {
        score_id: String,
        performance_id: String,
    },
    /// The score note was not played.
    Deletion { score_id: String },
    /// The performance note has no counterpart in the score.
    Insertion { performance_id: String },
}

impl Score {
    /// Create a new empty score.
    pub fn new() -> Self {
        Self {
            title: None,
            composer: None,
            mei_version: None,
            divs_pq: DEFAULT_DIVS_PQ,
            measures: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// The note-level view handed to matchers.
    pub fn note_array(&self) -> &[ScoreNote] {
        &self.notes
    }

    pub fn measure_count(&self) -> usize {
        self.measures.len()
    }

    /// Total length of the score in quarter notes.
    pub fn duration_quarter(&self) -> f64 {
        self.measures
            .last()
            .map_or(0.0, |m| m.onset_quarter + m.duration_quarter)
    }
}

impl Default for Score {
    fn default() -> Self {
        Self::new()
    }
}

impl Pitch {
    /// Convert pitch to MIDI note number.
    /// Middle C (c4) = 60.
    pub fn to_midi(&self) -> i32 {
        let step_semitone = match self.pname.as_str() {
            "c" => 0,
            "d" => 2,
            "e" => 4,
            "f" => 5,
            "g" => 7,
            "a" => 9,
            "b" => 11,
            _ => 0,
        };
        (self.oct + 1) * 12 + step_semitone + self.alter
    }
}

impl AlignmentPair {
    pub fn score_id(&self) -> Option<&str> {
        match self {
            AlignmentPair::Match { score_id, .. } | AlignmentPair::Deletion { score_id } => {
                Some(score_id)
            }
            AlignmentPair::Insertion { .. } => None,
        }
    }

    pub fn performance_id(&self) -> Option<&str> {
        match self {
            AlignmentPair::Match { performance_id, .. }
            | AlignmentPair::Insertion { performance_id } => Some(performance_id),
            AlignmentPair::Deletion { .. } => None,
        }
    }
}

/// MEI accidental value → semitone alteration.
pub fn accid_to_alter(accid: &str) -> Option<i32> {
    match accid {
        "s" | "ns" => Some(1),
        "f" | "nf" => Some(-1),
        "ss" | "x" | "sx" => Some(2),
        "ts" => Some(3),
        "ff" => Some(-2),
        "tf" => Some(-3),
        "n" => Some(0),
        // Quarter-tone accidentals have no MIDI equivalent
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pitch_to_midi() {
        let c4 = Pitch { pname: "c".into(), oct: 4, alter: 0 };
        assert_eq!(c4.to_midi(), 60);
        let fs5 = Pitch { pname: "f".into(), oct: 5, alter: 1 };
        assert_eq!(fs5.to_midi(), 78);
        let bf3 = Pitch { pname: "b".into(), oct: 3, alter: -1 };
        assert_eq!(bf3.to_midi(), 58);
    }

    #[test]
    fn accidentals() {
        assert_eq!(accid_to_alter("s"), Some(1));
        assert_eq!(accid_to_alter("ff"), Some(-2));
        assert_eq!(accid_to_alter("x"), Some(2));
        assert_eq!(accid_to_alter("ts"), Some(3));
        assert_eq!(accid_to_alter("n"), Some(0));
        assert_eq!(accid_to_alter("bogus"), None);
    }

    #[test]
    fn alignment_pair_serializes_with_label() {
        let m = AlignmentPair::Match {
            score_id: "n1".into(),
            performance_id: "p1".into(),
        };
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"label": "match", "score_id": "n1", "performance_id": "p1"})
        );

        let d: AlignmentPair =
            serde_json::from_str(r#"{"label":"deletion","score_id":"n2"}"#).unwrap();
        assert_eq!(d.score_id(), Some("n2"));
        assert_eq!(d.performance_id(), None);
    }
}
