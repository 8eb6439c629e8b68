//! Note matchers: link score notes to performed notes.
//!
//! Both matchers are stateless and deterministic. Every score note ends up
//! in exactly one `match` or `deletion`, every performance note in exactly
//! one `match` or `insertion`. Matches and deletions come first in score
//! order, followed by insertions in performance order.

use std::collections::HashSet;
use std::fmt;

use crate::model::{AlignmentPair, PerformanceNote, ScoreNote};

/// Onsets closer than this (in quarter notes) belong to the same score event.
const ONSET_EPSILON: f64 = 1e-6;

/// Errors from a matcher.
#[derive(Debug, Clone, PartialEq)]
pub enum AlignError {
    DuplicateScoreId(String),
    DuplicatePerformanceId(String),
    NonFiniteOnset(String),
}

impl fmt::Display for AlignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlignError::DuplicateScoreId(id) => write!(f, "Duplicate score note id '{}'", id),
            AlignError::DuplicatePerformanceId(id) => {
                write!(f, "Duplicate performance note id '{}'", id)
            }
            AlignError::NonFiniteOnset(id) => write!(f, "Note '{}' has a non-finite onset", id),
        }
    }
}

impl std::error::Error for AlignError {}

/// Something that aligns a score with a performance.
pub trait NoteMatcher: Send + Sync {
    fn align(
        &self,
        score: &[ScoreNote],
        performance: &[PerformanceNote],
    ) -> Result<Vec<AlignmentPair>, AlignError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Automatic matcher
// ═══════════════════════════════════════════════════════════════════════

/// DTW-guided matcher.
///
/// Score notes are grouped into onset events and performed notes into
/// chords. Both sequences are described by pitch-class profiles and warped
/// onto each other with DTW (cosine distance). Each score note is then
/// matched to an unused performed note of the same pitch within the
/// performance chords its event warps to, widened by `search_radius`.
///
/// The warping path is confined to a band around the diagonal, so memory
/// grows with the longer sequence times `band`, not with their product.
#[derive(Debug, Clone)]
pub struct AutomaticNoteMatcher {
    /// Performed notes starting within this many seconds of a chord's
    /// first note join that chord
    pub chord_window_sec: f64,
    /// Extra performance chords searched on either side of the warping path
    pub search_radius: usize,
    /// Half-width of the DTW band around the diagonal, in performance chords
    pub band: usize,
}

impl Default for AutomaticNoteMatcher {
    fn default() -> Self {
        Self {
            chord_window_sec: 0.05,
            search_radius: 1,
            band: 64,
        }
    }
}

impl NoteMatcher for AutomaticNoteMatcher {
    fn align(
        &self,
        score: &[ScoreNote],
        performance: &[PerformanceNote],
    ) -> Result<Vec<AlignmentPair>, AlignError> {
        validate(score, performance)?;

        let score_events = group_score_events(score);
        let perf_events = group_performance_chords(performance, self.chord_window_sec);

        let mut matched_perf: Vec<Option<usize>> = vec![None; score.len()];
        let mut used = vec![false; performance.len()];

        if !score_events.is_empty() && !perf_events.is_empty() {
            let score_profiles: Vec<[f64; 12]> = score_events
                .iter()
                .map(|e| pitch_class_profile(e.iter().map(|&i| score[i].pitch)))
                .collect();
            let perf_profiles: Vec<[f64; 12]> = perf_events
                .iter()
                .map(|e| pitch_class_profile(e.iter().map(|&i| performance[i].pitch)))
                .collect();

            let (_, path) = dtw(score_profiles.len(), perf_profiles.len(), self.band, |i, j| {
                cosine_distance(&score_profiles[i], &perf_profiles[j])
            });

            // Range of performance chords each score event warps to
            let mut ranges: Vec<Option<(usize, usize)>> = vec![None; score_events.len()];
            for &(i, j) in &path {
                ranges[i] = Some(match ranges[i] {
                    Some((lo, hi)) => (lo.min(j), hi.max(j)),
                    None => (j, j),
                });
            }

            for (event_idx, event) in score_events.iter().enumerate() {
                let (lo, hi) = match ranges[event_idx] {
                    Some(r) => r,
                    None => continue,
                };
                let expected = performance[perf_events[lo][0]].onset_sec as f64;
                let lo = lo.saturating_sub(self.search_radius);
                let hi = (hi + self.search_radius).min(perf_events.len() - 1);

                for &note_idx in event {
                    let pitch = score[note_idx].pitch;
                    let best = perf_events[lo..=hi]
                        .iter()
                        .flatten()
                        .copied()
                        .filter(|&p| !used[p] && performance[p].pitch == pitch)
                        .min_by(|&a, &b| {
                            let da = (performance[a].onset_sec as f64 - expected).abs();
                            let db = (performance[b].onset_sec as f64 - expected).abs();
                            da.total_cmp(&db).then(a.cmp(&b))
                        });
                    if let Some(p) = best {
                        used[p] = true;
                        matched_perf[note_idx] = Some(p);
                    }
                }
            }
        }

        Ok(collect_pairs(score, performance, &matched_perf, &used))
    }
}

/// Dynamic time warping of `rows` frames against `cols` frames.
///
/// Only cells within `band` columns of the diagonal are evaluated; the band
/// is widened as needed to keep a path from `(0, 0)` to the last cell.
/// `cost(i, j)` is called once per evaluated cell. Returns the accumulated
/// distance and the warping path. An empty side yields an empty path.
pub fn dtw(
    rows: usize,
    cols: usize,
    band: usize,
    cost: impl Fn(usize, usize) -> f64,
) -> (f64, Vec<(usize, usize)>) {
    if rows == 0 || cols == 0 {
        return (0.0, Vec::new());
    }

    let window = Window::new(rows, cols, band);
    let mut acc: Vec<Vec<f64>> = Vec::with_capacity(rows);
    for i in 0..rows {
        let (lo, hi) = window.span(i);
        let mut row = Vec::with_capacity(hi - lo + 1);
        for j in lo..=hi {
            let best_prev = if i == 0 && j == 0 {
                0.0
            } else {
                let up = if i > 0 { window.get(&acc, i - 1, j) } else { f64::INFINITY };
                let left = if j > lo { row[j - lo - 1] } else { f64::INFINITY };
                let diag = if i > 0 && j > 0 {
                    window.get(&acc, i - 1, j - 1)
                } else {
                    f64::INFINITY
                };
                diag.min(up).min(left)
            };
            row.push(cost(i, j) + best_prev);
        }
        acc.push(row);
    }

    // Backtrack, preferring the diagonal on ties
    let (n, m) = (rows, cols);
    let mut path = vec![(n - 1, m - 1)];
    let (mut i, mut j) = (n - 1, m - 1);
    while i > 0 || j > 0 {
        (i, j) = if i == 0 {
            (0, j - 1)
        } else if j == 0 {
            (i - 1, 0)
        } else {
            let diag = window.get(&acc, i - 1, j - 1);
            let up = window.get(&acc, i - 1, j);
            let left = window.get(&acc, i, j - 1);
            if diag <= up && diag <= left {
                (i - 1, j - 1)
            } else if up <= left {
                (i - 1, j)
            } else {
                (i, j - 1)
            }
        };
        path.push((i, j));
    }
    path.reverse();

    (window.get(&acc, n - 1, m - 1), path)
}

/// Sakoe-Chiba style band that follows the straight line from the first
/// cell to the last.
struct Window {
    rows: usize,
    cols: usize,
    half_width: usize,
}

impl Window {
    fn new(rows: usize, cols: usize, band: usize) -> Self {
        // Consecutive rows must overlap or touch diagonally
        let step = if rows > 1 { (cols - 1).div_ceil(rows - 1) } else { cols };
        Self {
            rows,
            cols,
            half_width: band.max(step).max(1),
        }
    }

    /// Inclusive column range evaluated for row `i`.
    fn span(&self, i: usize) -> (usize, usize) {
        let center = if self.rows > 1 {
            (i * (self.cols - 1) + (self.rows - 1) / 2) / (self.rows - 1)
        } else {
            0
        };
        let lo = center.saturating_sub(self.half_width);
        let hi = (center + self.half_width).min(self.cols - 1);
        (lo, hi)
    }

    fn get(&self, acc: &[Vec<f64>], i: usize, j: usize) -> f64 {
        let (lo, hi) = self.span(i);
        if j < lo || j > hi {
            return f64::INFINITY;
        }
        acc[i][j - lo]
    }
}

/// Normalised 12-bin pitch-class histogram.
fn pitch_class_profile(pitches: impl Iterator<Item = i32>) -> [f64; 12] {
    let mut profile = [0.0; 12];
    for p in pitches {
        profile[p.rem_euclid(12) as usize] += 1.0;
    }
    let norm = profile.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for v in &mut profile {
            *v /= norm;
        }
    }
    profile
}

fn cosine_distance(a: &[f64; 12], b: &[f64; 12]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|v| v * v).sum::<f64>().sqrt();
    let nb = b.iter().map(|v| v * v).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na * nb)
}

// ═══════════════════════════════════════════════════════════════════════
// Greedy matcher
// ═══════════════════════════════════════════════════════════════════════

/// Chord-by-chord matcher that gives up at the first wrong note.
///
/// Walks the score in onset order. A single-note event must be the next
/// performed note; each note of a multi-note event takes the first
/// remaining performed note of its pitch. At the first score note without
/// a counterpart the rest of the score becomes deletions; performed notes
/// left over become insertions.
#[derive(Debug, Clone, Default)]
pub struct GreedyMatcher;

impl NoteMatcher for GreedyMatcher {
    fn align(
        &self,
        score: &[ScoreNote],
        performance: &[PerformanceNote],
    ) -> Result<Vec<AlignmentPair>, AlignError> {
        validate(score, performance)?;

        let mut remaining: Vec<usize> = (0..performance.len()).collect();
        remaining.sort_by(|&a, &b| {
            performance[a]
                .onset_sec
                .total_cmp(&performance[b].onset_sec)
                .then(a.cmp(&b))
        });

        let mut matched_perf: Vec<Option<usize>> = vec![None; score.len()];
        let mut used = vec![false; performance.len()];

        'events: for event in group_score_events(score) {
            if let [only] = event[..] {
                let next = remaining.first().copied();
                match next {
                    Some(p) if performance[p].pitch == score[only].pitch => {
                        matched_perf[only] = Some(p);
                        used[p] = true;
                        remaining.remove(0);
                    }
                    _ => break 'events,
                }
            } else {
                for &note_idx in &event {
                    let pos = remaining
                        .iter()
                        .position(|&p| performance[p].pitch == score[note_idx].pitch);
                    match pos {
                        Some(pos) => {
                            let p = remaining.remove(pos);
                            matched_perf[note_idx] = Some(p);
                            used[p] = true;
                        }
                        None => break 'events,
                    }
                }
            }
        }

        Ok(collect_pairs(score, performance, &matched_perf, &used))
    }
}

// ─── Shared helpers ──────────────────────────────────────────────────

fn validate(score: &[ScoreNote], performance: &[PerformanceNote]) -> Result<(), AlignError> {
    let mut seen = HashSet::new();
    for note in score {
        if !note.onset_quarter.is_finite() {
            return Err(AlignError::NonFiniteOnset(note.id.clone()));
        }
        if !seen.insert(note.id.as_str()) {
            return Err(AlignError::DuplicateScoreId(note.id.clone()));
        }
    }

    let mut seen = HashSet::new();
    for note in performance {
        if !note.onset_sec.is_finite() {
            return Err(AlignError::NonFiniteOnset(note.id.clone()));
        }
        if !seen.insert(note.id.as_str()) {
            return Err(AlignError::DuplicatePerformanceId(note.id.clone()));
        }
    }
    Ok(())
}

/// Score note indices grouped by onset, in onset order. Within an event
/// notes are ordered by pitch.
fn group_score_events(score: &[ScoreNote]) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..score.len()).collect();
    order.sort_by(|&a, &b| {
        score[a]
            .onset_quarter
            .total_cmp(&score[b].onset_quarter)
            .then(score[a].pitch.cmp(&score[b].pitch))
            .then(a.cmp(&b))
    });

    let mut events: Vec<Vec<usize>> = Vec::new();
    let mut event_onset = f64::NEG_INFINITY;
    for idx in order {
        let onset = score[idx].onset_quarter;
        match events.last_mut() {
            Some(event) if (onset - event_onset).abs() < ONSET_EPSILON => event.push(idx),
            _ => {
                events.push(vec![idx]);
                event_onset = onset;
            }
        }
    }
    events
}

/// Performance note indices grouped into chords by onset proximity.
fn group_performance_chords(performance: &[PerformanceNote], window_sec: f64) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..performance.len()).collect();
    order.sort_by(|&a, &b| {
        performance[a]
            .onset_sec
            .total_cmp(&performance[b].onset_sec)
            .then(performance[a].pitch.cmp(&performance[b].pitch))
            .then(a.cmp(&b))
    });

    let mut chords: Vec<Vec<usize>> = Vec::new();
    let mut chord_onset = f64::NEG_INFINITY;
    for idx in order {
        let onset = performance[idx].onset_sec as f64;
        match chords.last_mut() {
            Some(chord) if onset - chord_onset <= window_sec => chord.push(idx),
            _ => {
                chords.push(vec![idx]);
                chord_onset = onset;
            }
        }
    }
    chords
}

/// Turn per-note match decisions into the output pair list.
fn collect_pairs(
    score: &[ScoreNote],
    performance: &[PerformanceNote],
    matched_perf: &[Option<usize>],
    used: &[bool],
) -> Vec<AlignmentPair> {
    let mut pairs: Vec<AlignmentPair> = score
        .iter()
        .zip(matched_perf)
        .map(|(note, matched)| match matched {
            Some(p) => AlignmentPair::Match {
                score_id: note.id.clone(),
                performance_id: performance[*p].id.clone(),
            },
            None => AlignmentPair::Deletion {
                score_id: note.id.clone(),
            },
        })
        .collect();

    pairs.extend(
        performance
            .iter()
            .zip(used)
            .filter(|(_, used)| !**used)
            .map(|(note, _)| AlignmentPair::Insertion {
                performance_id: note.id.clone(),
            }),
    );
    pairs
}
