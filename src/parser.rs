//! MEI parser: converts an MEI document into the note-level Score model.
//!
//! The walk follows `music/body/mdiv/score` in document order. Sections,
//! endings and editorial markup are flattened (the performance reading of
//! an `app` when there is one, first child of a `choice`); repeats are not
//! unfolded. Every
//! `measure/staff/layer` is read on its own cursor and the measure lasts
//! as long as its longest layer, so pickup measures come out short.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use roxmltree::{Document, Node};

use crate::model::*;

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// More dots than this add nothing measurable to a duration.
const MAX_DOTS: i32 = 8;

/// Notes of equal pitch whose onsets differ by less than this (in quarter
/// notes) are the same note.
const DUPLICATE_ONSET_EPSILON: f64 = 1e-9;

/// Errors from loading a score.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreError {
    Io(String),
    Xml(String),
    UnsupportedRoot(String),
    MissingScore,
}

impl fmt::Display for ScoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreError::Io(s) => write!(f, "Score I/O error: {}", s),
            ScoreError::Xml(s) => write!(f, "XML parse error: {}", s),
            ScoreError::UnsupportedRoot(s) => write!(
                f,
                "Unsupported root element: '{}'. Only 'mei' is supported.",
                s
            ),
            ScoreError::MissingScore => write!(f, "No <score> element found under <music>"),
        }
    }
}

impl std::error::Error for ScoreError {}

/// Load an MEI file from disk.
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Score, ScoreError> {
    let path = path.as_ref();
    let xml = std::fs::read_to_string(path)
        .map_err(|e| ScoreError::Io(format!("failed to read '{}': {e}", path.display())))?;
    parse_mei(&xml)
}

/// Parse an MEI XML string into a Score.
pub fn parse_mei(xml: &str) -> Result<Score, ScoreError> {
    // Some MEI exports carry a DOCTYPE
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    let doc = Document::parse_with_options(xml, options)
        .map_err(|e| ScoreError::Xml(e.to_string()))?;
    let root = doc.root_element();

    if root.tag_name().name() != "mei" {
        return Err(ScoreError::UnsupportedRoot(
            root.tag_name().name().to_string(),
        ));
    }

    let mut score = Score::new();
    score.mei_version = root.attribute("meiversion").map(String::from);

    let mut ctx = Context::new();
    let mut found_score = false;

    for child in elements(root) {
        match child.tag_name().name() {
            "meiHead" => parse_head(&child, &mut score),
            "music" => found_score |= parse_music(&child, &mut ctx),
            _ => {}
        }
    }

    if !found_score {
        return Err(ScoreError::MissingScore);
    }

    Ok(ctx.finish(score))
}

// ─── Walk state ──────────────────────────────────────────────────────

/// A note as read from the layer, before ties are merged.
#[derive(Debug, Clone)]
struct RawNote {
    id: String,
    spelling: Spelling,
    /// Filled in once the whole measure has been read
    pitch: i32,
    onset_quarter: f64,
    duration_quarter: f64,
    onset_beat: f64,
    /// Beats per quarter note under the meter in effect at the onset
    beats_per_quarter: f64,
    staff: i32,
    voice: i32,
    measure: String,
    grace: bool,
    tie: Option<String>,
}

/// Pitch name, octave and accidentals as written on a note.
#[derive(Debug, Clone)]
struct Spelling {
    pname: String,
    oct: i32,
    written: Option<i32>,
    gestural: Option<i32>,
}

/// Position inside one layer of one measure.
#[derive(Debug, Clone)]
struct LayerCursor {
    /// Offset from the start of the measure, in quarter notes
    position: f64,
    staff: i32,
    voice: i32,
    /// Product of the enclosing tuplet ratios
    ratio: f64,
    grace: bool,
}

/// Score-wide state carried across measures.
struct Context {
    meter_count: f64,
    meter_unit: f64,
    /// Current `ppq`, used to read `@dur.ppq`
    ppq: Option<i32>,
    /// First declared `ppq`, reported as the score's divisions
    first_ppq: Option<i32>,
    /// Alteration per pitch name implied by the key signature
    key_alters: HashMap<String, i32>,
    measure_onset: f64,
    measure_beat_onset: f64,
    measures: Vec<MeasureSpan>,
    notes: Vec<RawNote>,
    /// `<tie startid endid>` control events
    tie_links: Vec<(String, String)>,
    auto_ids: usize,
}

impl Context {
    fn new() -> Self {
        Self {
            meter_count: 4.0,
            meter_unit: 4.0,
            ppq: None,
            first_ppq: None,
            key_alters: HashMap::new(),
            measure_onset: 0.0,
            measure_beat_onset: 0.0,
            measures: Vec::new(),
            notes: Vec::new(),
            tie_links: Vec::new(),
            auto_ids: 0,
        }
    }

    /// Nominal measure length under the current meter, in quarter notes.
    fn meter_quarters(&self) -> f64 {
        self.meter_count * 4.0 / self.meter_unit
    }

    fn beats_per_quarter(&self) -> f64 {
        self.meter_unit / 4.0
    }

    fn set_ppq(&mut self, ppq: i32) {
        if ppq > 0 {
            self.ppq = Some(ppq);
            if self.first_ppq.is_none() {
                self.first_ppq = Some(ppq);
            }
        }
    }

    fn end_measure(&mut self, number: String, duration: f64) {
        self.measures.push(MeasureSpan {
            number,
            onset_quarter: self.measure_onset,
            duration_quarter: duration,
        });
        self.measure_onset += duration;
        self.measure_beat_onset += duration * self.beats_per_quarter();
    }

    /// Resolve the pitches of the notes read since `first`, in onset order.
    ///
    /// Alteration precedence: gestural accidental, written accidental,
    /// accidental written earlier in the measure on the same staff, pitch
    /// name and octave, key signature. Layers are walked one after the
    /// other, so carried accidentals are only known once the measure is done.
    fn spell_measure(&mut self, first: usize) {
        let mut order: Vec<usize> = (first..self.notes.len()).collect();
        order.sort_by(|&a, &b| self.notes[a].onset_quarter.total_cmp(&self.notes[b].onset_quarter));

        let mut carried: HashMap<(i32, String, i32), i32> = HashMap::new();
        for idx in order {
            let note = &mut self.notes[idx];
            let s = &note.spelling;
            let key = (note.staff, s.pname.clone(), s.oct);
            if let Some(alter) = s.written {
                carried.insert(key.clone(), alter);
            }
            let alter = s
                .gestural
                .or(s.written)
                .or_else(|| carried.get(&key).copied())
                .or_else(|| self.key_alters.get(&s.pname).copied())
                .unwrap_or(0);
            note.pitch = Pitch {
                pname: s.pname.clone(),
                oct: s.oct,
                alter,
            }
            .to_midi();
        }
    }

    fn next_auto_id(&mut self) -> String {
        self.auto_ids += 1;
        format!("n-auto-{}", self.auto_ids)
    }

    /// Merge ties, convert to score notes and fill in the score.
    fn finish(mut self, mut score: Score) -> Score {
        let merged = merge_ties(&mut self.notes, &self.tie_links);
        let divs_pq = self.first_ppq.unwrap_or(DEFAULT_DIVS_PQ);

        let mut notes: Vec<ScoreNote> = self
            .notes
            .into_iter()
            .zip(merged)
            .filter(|(_, merged)| !merged)
            .map(|(n, _)| ScoreNote {
                pitch: n.pitch,
                onset_beat: n.onset_beat,
                duration_beat: n.duration_quarter * n.beats_per_quarter,
                onset_div: (n.onset_quarter * divs_pq as f64).round() as i32,
                duration_div: (n.duration_quarter * divs_pq as f64).round() as i32,
                onset_quarter: n.onset_quarter,
                duration_quarter: n.duration_quarter,
                divs_pq,
                staff: n.staff,
                voice: n.voice,
                measure: n.measure,
                grace: n.grace,
                id: n.id,
            })
            .collect();

        notes.sort_by(|a, b| {
            a.onset_quarter
                .total_cmp(&b.onset_quarter)
                .then(a.pitch.cmp(&b.pitch))
                .then(a.staff.cmp(&b.staff))
        });
        // One note per onset and pitch; unisons across staves or layers
        // are played as a single key press
        notes.dedup_by(|later, kept| {
            later.pitch == kept.pitch
                && (later.onset_quarter - kept.onset_quarter).abs() < DUPLICATE_ONSET_EPSILON
        });

        score.divs_pq = divs_pq;
        score.measures = self.measures;
        score.notes = notes;
        score
    }
}

// ─── Header ──────────────────────────────────────────────────────────

fn parse_head(node: &Node, score: &mut Score) {
    for d in node.descendants().filter(|n| n.is_element()) {
        match d.tag_name().name() {
            "title" => {
                let in_title_stmt = d
                    .parent_element()
                    .is_some_and(|p| p.tag_name().name() == "titleStmt");
                if in_title_stmt && score.title.is_none() {
                    score.title = text_of(&d);
                }
            }
            "composer" => {
                if score.composer.is_none() {
                    score.composer = text_of(&d);
                }
            }
            "persName" | "name" | "corpName" => {
                if d.attribute("role") == Some("composer") && score.composer.is_none() {
                    score.composer = text_of(&d);
                }
            }
            _ => {}
        }
    }
}

// ─── Music / sections ────────────────────────────────────────────────

/// Walk `music`, `body` and `mdiv` down to each `score`. Returns whether a
/// score element was found.
fn parse_music(node: &Node, ctx: &mut Context) -> bool {
    let mut found = false;
    for child in elements(*node) {
        match child.tag_name().name() {
            "body" | "mdiv" | "group" => found |= parse_music(&child, ctx),
            "score" => {
                parse_section(&child, ctx);
                found = true;
            }
            _ => {}
        }
    }
    found
}

fn parse_section(node: &Node, ctx: &mut Context) {
    for child in elements(*node) {
        let name = child.tag_name().name();
        match name {
            "scoreDef" | "staffDef" => apply_definition(&child, ctx),
            "measure" => parse_measure(&child, ctx),
            "section" | "ending" => parse_section(&child, ctx),
            "app" | "choice" => {
                if let Some(picked) = editorial_pick(&child) {
                    parse_section(&picked, ctx);
                }
            }
            _ if is_transparent(name) => parse_section(&child, ctx),
            _ => {}
        }
    }
}

/// Apply a `scoreDef` or `staffDef` (and anything nested in it).
fn apply_definition(node: &Node, ctx: &mut Context) {
    for def in node.descendants().filter(|n| n.is_element()) {
        match def.tag_name().name() {
            "scoreDef" | "staffDef" => {
                if let Some(count) = def.attribute("meter.count").and_then(parse_meter_count) {
                    ctx.meter_count = count;
                }
                if let Some(unit) = def.attribute("meter.unit").and_then(parse_meter_unit) {
                    ctx.meter_unit = unit;
                }
                if let Some(sym) = def.attribute("meter.sym") {
                    apply_meter_sym(sym, def.attribute("meter.count").is_some(), ctx);
                }
                if let Some(sig) = def.attribute("key.sig") {
                    ctx.key_alters = key_signature_alters(sig);
                }
                if let Some(ppq) = def.attribute("ppq").and_then(|p| p.trim().parse().ok()) {
                    ctx.set_ppq(ppq);
                }
            }
            "meterSig" => {
                if let Some(count) = def.attribute("count").and_then(parse_meter_count) {
                    ctx.meter_count = count;
                }
                if let Some(unit) = def.attribute("unit").and_then(parse_meter_unit) {
                    ctx.meter_unit = unit;
                }
                if let Some(sym) = def.attribute("sym") {
                    apply_meter_sym(sym, def.attribute("count").is_some(), ctx);
                }
            }
            "keySig" => {
                if let Some(sig) = def.attribute("sig") {
                    ctx.key_alters = key_signature_alters(sig);
                }
            }
            _ => {}
        }
    }
}

/// `common` and `cut` imply 4/4 and 2/2 unless an explicit count is given.
fn apply_meter_sym(sym: &str, has_count: bool, ctx: &mut Context) {
    if has_count {
        return;
    }
    match sym {
        "common" => {
            ctx.meter_count = 4.0;
            ctx.meter_unit = 4.0;
        }
        "cut" => {
            ctx.meter_count = 2.0;
            ctx.meter_unit = 2.0;
        }
        _ => {}
    }
}

/// Additive meters like "3+2" sum their parts.
fn parse_meter_count(count: &str) -> Option<f64> {
    count
        .split('+')
        .map(|p| p.trim().parse::<f64>().ok())
        .sum::<Option<f64>>()
        .filter(|c| *c > 0.0)
}

fn parse_meter_unit(unit: &str) -> Option<f64> {
    unit.trim().parse::<f64>().ok().filter(|u| *u > 0.0)
}

/// Alterations implied by a key signature such as "2s", "3f" or "0".
pub fn key_signature_alters(sig: &str) -> HashMap<String, i32> {
    const SHARPS: [&str; 7] = ["f", "c", "g", "d", "a", "e", "b"];
    const FLATS: [&str; 7] = ["b", "e", "a", "d", "g", "c", "f"];

    let sig = sig.trim();
    let mut alters = HashMap::new();
    let (order, alter) = if let Some(n) = sig.strip_suffix('s') {
        (n.parse::<usize>().ok().map(|n| &SHARPS[..n.min(7)]), 1)
    } else if let Some(n) = sig.strip_suffix('f') {
        (n.parse::<usize>().ok().map(|n| &FLATS[..n.min(7)]), -1)
    } else {
        (None, 0)
    };
    for pname in order.unwrap_or(&[]) {
        alters.insert(pname.to_string(), alter);
    }
    alters
}

// ─── Measure ─────────────────────────────────────────────────────────

fn parse_measure(node: &Node, ctx: &mut Context) {
    let number = node.attribute("n").unwrap_or("").to_string();
    let mut longest: f64 = 0.0;
    let mut has_layer = false;
    let first_note = ctx.notes.len();

    for child in elements(*node) {
        match child.tag_name().name() {
            "staff" => {
                let staff_n = parse_n(&child).unwrap_or(1);
                for layer in collect_layers(&child) {
                    let mut cursor = LayerCursor {
                        position: 0.0,
                        staff: staff_n,
                        voice: parse_n(&layer).unwrap_or(1),
                        ratio: 1.0,
                        grace: false,
                    };
                    walk_layer(&layer, ctx, &mut cursor, &number);
                    longest = longest.max(cursor.position);
                    has_layer = true;
                }
            }
            "tie" => {
                if let (Some(start), Some(end)) = (child.attribute("startid"), child.attribute("endid")) {
                    ctx.tie_links.push((strip_ref(start), strip_ref(end)));
                }
            }
            _ => {}
        }
    }

    ctx.spell_measure(first_note);

    // Empty measures still take up their nominal length
    let duration = if has_layer && longest > 0.0 {
        longest
    } else {
        ctx.meter_quarters()
    };
    ctx.end_measure(number, duration);
}

/// Layers of a staff, looking through editorial wrappers.
fn collect_layers<'a, 'input>(node: &Node<'a, 'input>) -> Vec<Node<'a, 'input>> {
    let mut layers = Vec::new();
    for child in elements(*node) {
        let name = child.tag_name().name();
        match name {
            "layer" => layers.push(child),
            "app" | "choice" => {
                if let Some(picked) = editorial_pick(&child) {
                    layers.extend(collect_layers(&picked));
                }
            }
            _ if is_transparent(name) => layers.extend(collect_layers(&child)),
            _ => {}
        }
    }
    layers
}

// ─── Layer ───────────────────────────────────────────────────────────

fn walk_layer(node: &Node, ctx: &mut Context, cursor: &mut LayerCursor, measure: &str) {
    for child in elements(*node) {
        let name = child.tag_name().name();
        match name {
            "note" => {
                let grace = cursor.grace || child.attribute("grace").is_some();
                let dur = if grace { 0.0 } else { event_duration(&child, cursor, ctx) };
                push_note(&child, ctx, cursor, dur, grace, measure);
                cursor.position += dur;
            }
            "chord" => {
                let grace = cursor.grace || child.attribute("grace").is_some();
                let dur = if grace { 0.0 } else { event_duration(&child, cursor, ctx) };
                for note in chord_notes(&child) {
                    push_note(&note, ctx, cursor, dur, grace, measure);
                }
                cursor.position += dur;
            }
            "rest" | "space" => {
                cursor.position += event_duration(&child, cursor, ctx);
            }
            "mRest" | "mSpace" => {
                cursor.position += ctx.meter_quarters();
            }
            "multiRest" => {
                let count = child
                    .attribute("num")
                    .and_then(|n| n.trim().parse::<f64>().ok())
                    .unwrap_or(1.0);
                cursor.position += ctx.meter_quarters() * count;
            }
            "tuplet" => {
                let num = child.attribute("num").and_then(|n| n.trim().parse::<f64>().ok());
                let numbase = child.attribute("numbase").and_then(|n| n.trim().parse::<f64>().ok());
                let saved = cursor.ratio;
                if let (Some(num), Some(numbase)) = (num, numbase) {
                    if num > 0.0 {
                        cursor.ratio *= numbase / num;
                    }
                }
                walk_layer(&child, ctx, cursor, measure);
                cursor.ratio = saved;
            }
            "graceGrp" => {
                let saved = cursor.grace;
                cursor.grace = true;
                walk_layer(&child, ctx, cursor, measure);
                cursor.grace = saved;
            }
            "beam" | "bTrem" | "fTrem" | "ligature" => walk_layer(&child, ctx, cursor, measure),
            "app" | "choice" => {
                if let Some(picked) = editorial_pick(&child) {
                    walk_layer(&picked, ctx, cursor, measure);
                }
            }
            _ if is_transparent(name) => walk_layer(&child, ctx, cursor, measure),
            _ => {}
        }
    }
}

/// Notes of a chord, looking through editorial wrappers.
fn chord_notes<'a, 'input>(node: &Node<'a, 'input>) -> Vec<Node<'a, 'input>> {
    let mut notes = Vec::new();
    for child in elements(*node) {
        let name = child.tag_name().name();
        match name {
            "note" => notes.push(child),
            "app" | "choice" => {
                if let Some(picked) = editorial_pick(&child) {
                    notes.extend(chord_notes(&picked));
                }
            }
            _ if is_transparent(name) => notes.extend(chord_notes(&child)),
            _ => {}
        }
    }
    notes
}

/// Duration of a note, chord, rest or space in quarter notes.
///
/// `@dur.ppq` wins when a `ppq` is known; otherwise the gestural or
/// written `@dur` with its dots, scaled by the enclosing tuplets.
fn event_duration(node: &Node, cursor: &LayerCursor, ctx: &Context) -> f64 {
    if let (Some(ppq), Some(ticks)) = (
        ctx.ppq,
        node.attribute("dur.ppq").and_then(|d| d.trim().parse::<f64>().ok()),
    ) {
        return ticks / ppq as f64;
    }

    let dur = node.attribute("dur.ges").or_else(|| node.attribute("dur"));
    let base = match dur.and_then(dur_to_quarters) {
        Some(b) => b,
        None => return 0.0,
    };
    let dots = node
        .attribute("dots.ges")
        .or_else(|| node.attribute("dots"))
        .and_then(|d| d.trim().parse::<i32>().ok())
        .unwrap_or(0);

    dotted(base, dots) * cursor.ratio
}

/// MEI `@dur` value → length in quarter notes.
pub fn dur_to_quarters(dur: &str) -> Option<f64> {
    match dur.trim() {
        "maxima" => Some(32.0),
        "long" => Some(16.0),
        "breve" => Some(8.0),
        other => {
            let n = other.parse::<u32>().ok()?;
            if n == 0 || !n.is_power_of_two() {
                return None;
            }
            Some(4.0 / n as f64)
        }
    }
}

fn dotted(base: f64, dots: i32) -> f64 {
    let mut total = base;
    let mut add = base;
    for _ in 0..dots.clamp(0, MAX_DOTS) {
        add /= 2.0;
        total += add;
    }
    total
}

// ─── Note ────────────────────────────────────────────────────────────

fn push_note(
    node: &Node,
    ctx: &mut Context,
    cursor: &LayerCursor,
    duration: f64,
    grace: bool,
    measure: &str,
) {
    // Unpitched notes still take time but are not part of the note array
    let spelling = match read_spelling(node) {
        Some(s) => s,
        None => return,
    };

    let id = match xml_id(node) {
        Some(id) => id.to_string(),
        None => ctx.next_auto_id(),
    };

    let note = RawNote {
        id,
        spelling,
        pitch: 0,
        onset_quarter: ctx.measure_onset + cursor.position,
        duration_quarter: duration,
        onset_beat: ctx.measure_beat_onset + cursor.position * ctx.beats_per_quarter(),
        beats_per_quarter: ctx.beats_per_quarter(),
        staff: cursor.staff,
        voice: cursor.voice,
        measure: measure.to_string(),
        grace,
        tie: node.attribute("tie").map(|t| t.trim().to_string()),
    };
    ctx.notes.push(note);
}

fn read_spelling(node: &Node) -> Option<Spelling> {
    let pname = node
        .attribute("pname.ges")
        .or_else(|| node.attribute("pname"))?
        .trim()
        .to_lowercase();
    let oct = node
        .attribute("oct.ges")
        .or_else(|| node.attribute("oct"))?
        .trim()
        .parse::<i32>()
        .ok()?;

    let child_accid = elements(*node).find(|c| c.tag_name().name() == "accid");
    let gestural = node
        .attribute("accid.ges")
        .or_else(|| child_accid.and_then(|a| a.attribute("accid.ges")));
    let written = node
        .attribute("accid")
        .or_else(|| child_accid.and_then(|a| a.attribute("accid")));

    Some(Spelling {
        pname,
        oct,
        written: written.and_then(accid_to_alter),
        gestural: gestural.and_then(accid_to_alter),
    })
}

// ─── Ties ────────────────────────────────────────────────────────────

/// Fold tied continuations into the note that starts the tie. Returns a
/// flag per note telling whether it was absorbed.
fn merge_ties(notes: &mut [RawNote], links: &[(String, String)]) -> Vec<bool> {
    let mut merged = vec![false; notes.len()];

    let mut order: Vec<usize> = (0..notes.len()).collect();
    order.sort_by(|&a, &b| notes[a].onset_quarter.total_cmp(&notes[b].onset_quarter));

    // @tie="i|m|t", keyed by staff and pitch
    let mut open: HashMap<(i32, i32), usize> = HashMap::new();
    for &idx in &order {
        let key = (notes[idx].staff, notes[idx].pitch);
        let tie = notes[idx].tie.clone();
        match tie.as_deref() {
            Some("i") => {
                open.insert(key, idx);
            }
            Some("m") => match open.get(&key).copied() {
                Some(root) => {
                    extend(notes, root, idx);
                    merged[idx] = true;
                }
                None => {
                    open.insert(key, idx);
                }
            },
            Some("t") => {
                if let Some(root) = open.remove(&key) {
                    extend(notes, root, idx);
                    merged[idx] = true;
                }
            }
            _ => {}
        }
    }

    // <tie startid endid>, chained through already-merged notes
    let index: HashMap<String, usize> = notes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.clone(), i))
        .collect();
    let mut root_of: Vec<usize> = (0..notes.len()).collect();
    let mut resolved: Vec<(usize, usize)> = links
        .iter()
        .filter_map(|(s, e)| Some((*index.get(s)?, *index.get(e)?)))
        .filter(|(s, e)| s != e)
        .collect();
    resolved.sort_by(|a, b| notes[a.0].onset_quarter.total_cmp(&notes[b.0].onset_quarter));

    for (start, end) in resolved {
        if merged[end] {
            continue;
        }
        let root = root_of[start];
        extend(notes, root, end);
        merged[end] = true;
        root_of[end] = root;
    }

    merged
}

fn extend(notes: &mut [RawNote], root: usize, continuation: usize) {
    let end = notes[continuation].onset_quarter + notes[continuation].duration_quarter;
    let span = end - notes[root].onset_quarter;
    if span > notes[root].duration_quarter {
        notes[root].duration_quarter = span;
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

/// Editorial and structural wrappers whose content is read as if inline.
fn is_transparent(name: &str) -> bool {
    matches!(
        name,
        "lem" | "rdg" | "supplied" | "add" | "corr" | "sic" | "reg" | "orig" | "unclear" | "restore"
    )
}

/// The reading to follow inside an `app` or a `choice`.
///
/// For an `app`: the `rdg` whose `@source` mentions "performance", else the
/// `lem`, else the first `rdg`. For a `choice`: its first alternative.
fn editorial_pick<'a, 'input>(node: &Node<'a, 'input>) -> Option<Node<'a, 'input>> {
    let mut children = elements(*node);
    if node.tag_name().name() == "app" {
        let all: Vec<_> = children.collect();
        let performed = all.iter().find(|c| {
            c.tag_name().name() == "rdg"
                && c.attribute("source").is_some_and(|s| s.contains("performance"))
        });
        return performed
            .or_else(|| all.iter().find(|c| c.tag_name().name() == "lem"))
            .or_else(|| all.iter().find(|c| c.tag_name().name() == "rdg"))
            .copied();
    }
    children.next()
}

fn xml_id<'a>(node: &Node<'a, '_>) -> Option<&'a str> {
    node.attribute((XML_NS, "id")).or_else(|| node.attribute("id"))
}

fn parse_n(node: &Node) -> Option<i32> {
    node.attribute("n")?.trim().parse().ok()
}

fn strip_ref(reference: &str) -> String {
    reference.trim().trim_start_matches('#').to_string()
}

fn text_of(node: &Node) -> Option<String> {
    let text: String = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<Vec<_>>()
        .join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(dur_to_quarters("4"), Some(1.0));
        assert_eq!(dur_to_quarters("1"), Some(4.0));
        assert_eq!(dur_to_quarters("16"), Some(0.25));
        assert_eq!(dur_to_quarters("breve"), Some(8.0));
        assert_eq!(dur_to_quarters("3"), None);
        assert_eq!(dur_to_quarters("x"), None);
        assert_eq!(dotted(1.0, 1), 1.5);
        assert_eq!(dotted(2.0, 2), 3.5);
    }

    #[test]
    fn absurd_dot_counts_are_capped() {
        let many = dotted(1.0, 400_000_000);
        assert_eq!(many, dotted(1.0, MAX_DOTS));
        assert!(many < 2.0);
        assert_eq!(dotted(1.0, -3), 1.0);
    }

    #[test]
    fn key_signatures() {
        let d_major = key_signature_alters("2s");
        assert_eq!(d_major.get("f"), Some(&1));
        assert_eq!(d_major.get("c"), Some(&1));
        assert_eq!(d_major.get("g"), None);

        let e_flat = key_signature_alters("3f");
        assert_eq!(e_flat.get("b"), Some(&-1));
        assert_eq!(e_flat.get("a"), Some(&-1));
        assert_eq!(e_flat.get("d"), None);

        assert!(key_signature_alters("0").is_empty());
    }

    #[test]
    fn additive_meter() {
        assert_eq!(parse_meter_count("3+2"), Some(5.0));
        assert_eq!(parse_meter_count("6"), Some(6.0));
        assert_eq!(parse_meter_count("abc"), None);
    }

    #[test]
    fn rejects_non_mei_root() {
        let err = parse_mei("<score-partwise/>").unwrap_err();
        assert_eq!(err, ScoreError::UnsupportedRoot("score-partwise".into()));
    }

    #[test]
    fn rejects_missing_score() {
        let err = parse_mei("<mei><music><body/></music></mei>").unwrap_err();
        assert_eq!(err, ScoreError::MissingScore);
    }

    #[test]
    fn rejects_broken_xml() {
        assert!(matches!(parse_mei("<mei><music>"), Err(ScoreError::Xml(_))));
    }
}
