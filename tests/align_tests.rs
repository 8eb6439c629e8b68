//! Integration tests: align fixture scores with synthetic performances.

use pretty_assertions::assert_eq;
use scorealign::{
    parse_file, parse_performance, AlignmentPair, AutomaticNoteMatcher, GreedyMatcher,
    NoteMatcher, PerformanceNote, Score,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;

fn load(name: &str) -> Score {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    parse_file(&path).unwrap_or_else(|e| panic!("Failed to parse {name}: {e}"))
}

/// Build a performance from `(id, pitch, onset_sec)` through the JSON path
/// the service uses.
fn performance(notes: &[(&str, i32, f32)]) -> Vec<PerformanceNote> {
    let tuples: Vec<_> = notes
        .iter()
        .map(|&(id, pitch, onset)| {
            json!([onset, 0.4, (onset * 960.0) as i32, 384, pitch, 80, 0, 0, id])
        })
        .collect();
    parse_performance(&serde_json::Value::Array(tuples).to_string()).unwrap()
}

fn matched(score_id: &str, performance_id: &str) -> AlignmentPair {
    AlignmentPair::Match {
        score_id: score_id.into(),
        performance_id: performance_id.into(),
    }
}

fn deleted(score_id: &str) -> AlignmentPair {
    AlignmentPair::Deletion {
        score_id: score_id.into(),
    }
}

fn inserted(performance_id: &str) -> AlignmentPair {
    AlignmentPair::Insertion {
        performance_id: performance_id.into(),
    }
}

/// Every score note and every performance note appears exactly once.
fn assert_partition(score: &Score, perf: &[PerformanceNote], pairs: &[AlignmentPair]) {
    let mut score_seen: HashMap<&str, usize> = HashMap::new();
    let mut perf_seen: HashMap<&str, usize> = HashMap::new();
    for pair in pairs {
        if let Some(id) = pair.score_id() {
            *score_seen.entry(id).or_default() += 1;
        }
        if let Some(id) = pair.performance_id() {
            *perf_seen.entry(id).or_default() += 1;
        }
    }
    for note in &score.notes {
        assert_eq!(score_seen.get(note.id.as_str()), Some(&1), "score note {}", note.id);
    }
    for note in perf {
        assert_eq!(perf_seen.get(note.id.as_str()), Some(&1), "performance note {}", note.id);
    }
    assert_eq!(score_seen.len(), score.notes.len());
    assert_eq!(perf_seen.len(), perf.len());
}

// ─── Automatic matcher ───────────────────────────────────────────────

#[test]
fn automatic_exact_performance_matches_everything() {
    let score = load("scale.mei");
    let perf = performance(&[
        ("p1", 60, 0.0),
        ("p2", 62, 0.5),
        ("p3", 64, 1.0),
        ("p4", 65, 1.5),
        ("p5", 67, 2.0),
        ("p6", 69, 2.5),
        ("p7", 71, 3.0),
        ("p8", 72, 3.5),
    ]);
    let pairs = AutomaticNoteMatcher::default()
        .align(&score.notes, &perf)
        .unwrap();
    let expected: Vec<AlignmentPair> = (1..=8)
        .map(|i| matched(&format!("n{i}"), &format!("p{i}")))
        .collect();
    assert_eq!(pairs, expected);
}

#[test]
fn automatic_handles_skipped_and_extra_notes() {
    let score = load("scale.mei");
    // E4 is skipped, an F#4 slips in, tempo drifts
    let perf = performance(&[
        ("c", 60, 0.0),
        ("d", 62, 0.5),
        ("f", 65, 1.1),
        ("g", 67, 1.5),
        ("fs", 66, 1.7),
        ("a", 69, 2.0),
        ("b", 71, 2.6),
        ("c2", 72, 3.2),
    ]);
    let pairs = AutomaticNoteMatcher::default()
        .align(&score.notes, &perf)
        .unwrap();
    assert_eq!(
        pairs,
        vec![
            matched("n1", "c"),
            matched("n2", "d"),
            deleted("n3"),
            matched("n4", "f"),
            matched("n5", "g"),
            matched("n6", "a"),
            matched("n7", "b"),
            matched("n8", "c2"),
            inserted("fs"),
        ]
    );
    assert_partition(&score, &perf, &pairs);
}

#[test]
fn automatic_matches_rolled_chords() {
    let score = load("chords.mei");
    let perf = performance(&[
        ("low1", 48, 0.0),
        ("e", 64, 0.01),
        ("g", 67, 0.03),
        ("low2", 53, 1.0),
        ("f", 65, 1.02),
        ("a", 69, 1.04),
    ]);
    let pairs = AutomaticNoteMatcher::default()
        .align(&score.notes, &perf)
        .unwrap();
    assert_eq!(
        pairs,
        vec![
            matched("b1", "low1"),
            matched("c1-e", "e"),
            matched("c1-g", "g"),
            matched("b2", "low2"),
            matched("c2-f", "f"),
            matched("c2-a", "a"),
        ]
    );
}

#[test]
fn automatic_with_tied_notes() {
    let score = load("ties.mei");
    let perf = performance(&[("c", 60, 0.0), ("e", 64, 1.0), ("g", 67, 4.5)]);
    let pairs = AutomaticNoteMatcher::default()
        .align(&score.notes, &perf)
        .unwrap();
    assert_eq!(
        pairs,
        vec![matched("t1", "c"), matched("a1", "e"), matched("after", "g")]
    );
}

#[test]
fn automatic_is_deterministic() {
    let score = load("accidentals.mei");
    let perf = performance(&[
        ("1", 66, 0.0),
        ("2", 65, 0.4),
        ("3", 65, 0.8),
        ("4", 70, 1.2),
        ("5", 66, 1.6),
        ("6", 73, 2.0),
        ("7", 68, 2.4),
        ("8", 74, 2.8),
        ("9", 50, 3.2),
    ]);
    let matcher = AutomaticNoteMatcher::default();
    let first = matcher.align(&score.notes, &perf).unwrap();
    let second = matcher.align(&score.notes, &perf).unwrap();
    assert_eq!(first, second);
    assert_partition(&score, &perf, &first);
    assert_eq!(first.last(), Some(&inserted("9")));
}

// ─── Greedy matcher ──────────────────────────────────────────────────

#[test]
fn greedy_stops_at_first_wrong_note() {
    let score = load("scale.mei");
    let perf = performance(&[
        ("p1", 60, 0.0),
        ("p2", 62, 0.5),
        ("p3", 64, 1.0),
        ("wrong", 66, 1.5),
        ("p5", 67, 2.0),
    ]);
    let pairs = GreedyMatcher.align(&score.notes, &perf).unwrap();
    assert_eq!(
        pairs,
        vec![
            matched("n1", "p1"),
            matched("n2", "p2"),
            matched("n3", "p3"),
            deleted("n4"),
            deleted("n5"),
            deleted("n6"),
            deleted("n7"),
            deleted("n8"),
            inserted("wrong"),
            inserted("p5"),
        ]
    );
    assert_partition(&score, &perf, &pairs);
}

#[test]
fn greedy_matches_chords_in_any_order() {
    let score = load("chords.mei");
    let perf = performance(&[
        ("g", 67, 0.0),
        ("low1", 48, 0.01),
        ("e", 64, 0.02),
        ("a", 69, 1.0),
        ("f", 65, 1.01),
        ("low2", 53, 1.02),
    ]);
    let pairs = GreedyMatcher.align(&score.notes, &perf).unwrap();
    assert_eq!(
        pairs,
        vec![
            matched("b1", "low1"),
            matched("c1-e", "e"),
            matched("c1-g", "g"),
            matched("b2", "low2"),
            matched("c2-f", "f"),
            matched("c2-a", "a"),
        ]
    );
}

// ─── Shared behaviour ────────────────────────────────────────────────

#[test]
fn empty_performance_deletes_every_score_note() {
    let score = load("pickup.mei");
    for matcher in [
        &AutomaticNoteMatcher::default() as &dyn NoteMatcher,
        &GreedyMatcher,
    ] {
        let pairs = matcher.align(&score.notes, &[]).unwrap();
        assert_eq!(pairs, vec![deleted("up"), deleted("m1"), deleted("m3")]);
    }
}

#[test]
fn empty_score_inserts_every_performance_note() {
    let score = load("empty.mei");
    let perf = performance(&[("x", 60, 0.0), ("y", 62, 0.5)]);
    for matcher in [
        &AutomaticNoteMatcher::default() as &dyn NoteMatcher,
        &GreedyMatcher,
    ] {
        let pairs = matcher.align(&score.notes, &perf).unwrap();
        assert_eq!(pairs, vec![inserted("x"), inserted("y")]);
    }
}

#[test]
fn pairs_serialize_with_labels() {
    let pairs = vec![matched("n1", "p1"), deleted("n2"), inserted("p3")];
    assert_eq!(
        serde_json::to_value(&pairs).unwrap(),
        json!([
            { "label": "match", "score_id": "n1", "performance_id": "p1" },
            { "label": "deletion", "score_id": "n2" },
            { "label": "insertion", "performance_id": "p3" }
        ])
    );
}
