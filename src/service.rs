//! The `/align` request handler, independent of the HTTP server.
//!
//! A request carries two form fields, urlencoded or as multipart text
//! parts: `mei` (the score as MEI text) and `midi` (the performance as a
//! JSON array of 9-tuples). The handler
//! stages the MEI in a scratch file, loads it, builds the performance
//! array, runs the matcher and serializes the alignment pairs.
//!
//! Only the missing-field case keeps the historical body
//! `{"error": "Both MEI and MIDI files are required"}`. Every other
//! failure is reported as `{"error": ..., "kind": ...}` with a status that
//! tells the client whether the input or the server was at fault.

use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use multipart::server::Multipart;
use serde_json::json;

use crate::matcher::{AlignError, NoteMatcher};
use crate::model::{AlignmentPair, PerformanceNote, ScoreNote};
use crate::parser::ScoreError;
use crate::performance::{parse_performance, PerformanceError};
use crate::staging::StagedScore;

/// Body text of the 400 response when a field is absent.
pub const MISSING_FIELDS_MESSAGE: &str = "Both MEI and MIDI files are required";

/// Headers attached to every handler response.
pub const RESPONSE_HEADERS: [(&str, &str); 2] = [
    ("Content-Type", "application/json"),
    ("Access-Control-Allow-Origin", "*"),
];

/// Everything that can go wrong while handling one request.
#[derive(Debug)]
pub enum ServiceError {
    /// `mei` or `midi` is absent
    MissingFields,
    /// The body could not be read as a form
    BadRequest(String),
    /// The body exceeds the configured limit (in bytes)
    PayloadTooLarge(usize),
    Score(ScoreError),
    Performance(PerformanceError),
    Alignment(AlignError),
    /// The matcher thread died before producing a result
    MatcherPanicked,
    /// The matcher did not finish within the configured time
    Timeout(Duration),
    /// Every matcher slot is taken (the limit is carried)
    Busy(usize),
    Serialize(String),
    Io(io::Error),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::MissingFields => write!(f, "{}", MISSING_FIELDS_MESSAGE),
            ServiceError::BadRequest(s) => write!(f, "Bad request: {}", s),
            ServiceError::PayloadTooLarge(limit) => {
                write!(f, "Request body exceeds {} bytes", limit)
            }
            ServiceError::Score(e) => write!(f, "{}", e),
            ServiceError::Performance(e) => write!(f, "{}", e),
            ServiceError::Alignment(e) => write!(f, "Alignment failed: {}", e),
            ServiceError::MatcherPanicked => write!(f, "Alignment failed: matcher crashed"),
            ServiceError::Timeout(t) => {
                write!(f, "Alignment did not finish within {:.1}s", t.as_secs_f64())
            }
            ServiceError::Busy(limit) => {
                write!(f, "All {} alignment slots are busy, retry later", limit)
            }
            ServiceError::Serialize(s) => write!(f, "Could not serialize alignment: {}", s),
            ServiceError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Score(e) => Some(e),
            ServiceError::Performance(e) => Some(e),
            ServiceError::Alignment(e) => Some(e),
            ServiceError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ScoreError> for ServiceError {
    fn from(e: ScoreError) -> Self {
        ServiceError::Score(e)
    }
}

impl From<PerformanceError> for ServiceError {
    fn from(e: PerformanceError) -> Self {
        ServiceError::Performance(e)
    }
}

impl From<AlignError> for ServiceError {
    fn from(e: AlignError) -> Self {
        ServiceError::Alignment(e)
    }
}

impl From<io::Error> for ServiceError {
    fn from(e: io::Error) -> Self {
        ServiceError::Io(e)
    }
}

impl ServiceError {
    /// HTTP status for this error.
    pub fn status(&self) -> u16 {
        match self {
            ServiceError::MissingFields | ServiceError::BadRequest(_) => 400,
            ServiceError::PayloadTooLarge(_) => 413,
            ServiceError::Score(_) | ServiceError::Performance(_) => 422,
            ServiceError::Busy(_) => 503,
            ServiceError::Timeout(_) => 504,
            ServiceError::Alignment(_)
            | ServiceError::MatcherPanicked
            | ServiceError::Serialize(_)
            | ServiceError::Io(_) => 500,
        }
    }

    /// Machine-readable error kind, `None` for the missing-field case.
    pub fn kind(&self) -> Option<&'static str> {
        match self {
            ServiceError::MissingFields => None,
            ServiceError::BadRequest(_) => Some("bad_request"),
            ServiceError::PayloadTooLarge(_) => Some("payload_too_large"),
            ServiceError::Score(_) => Some("malformed_score"),
            ServiceError::Performance(_) => Some("malformed_performance"),
            ServiceError::Alignment(_) | ServiceError::MatcherPanicked => Some("alignment_failed"),
            ServiceError::Timeout(_) => Some("alignment_timeout"),
            ServiceError::Busy(_) => Some("busy"),
            ServiceError::Serialize(_) => Some("serialize"),
            ServiceError::Io(_) => Some("io"),
        }
    }

    /// JSON response body.
    pub fn to_body(&self) -> String {
        let body = match self.kind() {
            None => json!({ "error": self.to_string() }),
            Some(kind) => json!({ "error": self.to_string(), "kind": kind }),
        };
        body.to_string()
    }
}

/// Status, JSON body and headers of a handler response.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponse {
    pub status: u16,
    pub body: String,
    pub headers: Vec<(&'static str, &'static str)>,
}

impl ServiceResponse {
    fn json(status: u16, body: String) -> Self {
        Self {
            status,
            body,
            headers: RESPONSE_HEADERS.to_vec(),
        }
    }

    pub fn from_error(err: &ServiceError) -> Self {
        Self::json(err.status(), err.to_body())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }
}

// ─── Form ────────────────────────────────────────────────────────────

/// The two fields of an alignment request, as sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignForm {
    pub mei: Option<String>,
    pub midi: Option<String>,
}

impl AlignForm {
    /// Decode a request body.
    ///
    /// `application/x-www-form-urlencoded` and `multipart/form-data` are
    /// read. In a multipart body only text parts count; a part carrying a
    /// filename is ignored. Any other content type, or none, yields no
    /// fields. The first occurrence of a repeated field wins.
    pub fn parse(content_type: Option<&str>, body: &[u8]) -> Result<Self, ServiceError> {
        let content_type = match content_type {
            Some(ct) => ct,
            None => return Ok(Self::default()),
        };
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        match mime.as_str() {
            "application/x-www-form-urlencoded" => Ok(Self::from_urlencoded(body)),
            "multipart/form-data" => {
                let boundary = multipart_boundary(content_type).ok_or_else(|| {
                    ServiceError::BadRequest("multipart body without a boundary".into())
                })?;
                Self::from_multipart(boundary, body)
            }
            _ => Ok(Self::default()),
        }
    }

    fn from_urlencoded(body: &[u8]) -> Self {
        let mut form = Self::default();
        for (key, value) in form_urlencoded::parse(body) {
            form.offer(&key, || value.into_owned());
        }
        form
    }

    fn from_multipart(boundary: &str, body: &[u8]) -> Result<Self, ServiceError> {
        let bad = |e: io::Error| ServiceError::BadRequest(format!("malformed multipart body: {e}"));

        let mut form = Self::default();
        let mut parts = Multipart::with_body(body, boundary);
        while let Some(mut part) = parts.read_entry().map_err(bad)? {
            if part.headers.filename.is_some() {
                continue;
            }
            let name = part.headers.name.to_string();
            if !matches!(name.as_str(), "mei" | "midi") {
                continue;
            }
            let mut raw = Vec::new();
            part.data.read_to_end(&mut raw).map_err(bad)?;
            let text = String::from_utf8(raw).map_err(|_| {
                ServiceError::BadRequest(format!("field '{name}' is not valid UTF-8"))
            })?;
            form.offer(&name, || text);
        }
        Ok(form)
    }

    /// Keep `value` for a known field unless it was already set.
    fn offer(&mut self, key: &str, value: impl FnOnce() -> String) {
        match key {
            "mei" if self.mei.is_none() => self.mei = Some(value()),
            "midi" if self.midi.is_none() => self.midi = Some(value()),
            _ => {}
        }
    }

    /// Both fields, or the missing-field error.
    pub fn require(self) -> Result<(String, String), ServiceError> {
        match (self.mei, self.midi) {
            (Some(mei), Some(midi)) => Ok((mei, midi)),
            _ => Err(ServiceError::MissingFields),
        }
    }
}

/// The `boundary` parameter of a multipart content type, unquoted.
fn multipart_boundary(content_type: &str) -> Option<&str> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|b| !b.is_empty())
}

// ─── Service ─────────────────────────────────────────────────────────

/// Default number of matcher threads allowed to run at once.
pub const DEFAULT_MAX_MATCHERS: usize = 8;

/// `/align` handler. Cheap to share between worker threads.
pub struct AlignService {
    matcher: Arc<dyn NoteMatcher>,
    scratch_dir: PathBuf,
    align_timeout: Option<Duration>,
    /// Matcher threads still running, timed-out ones included
    in_flight: Arc<AtomicUsize>,
    max_matchers: usize,
}

impl AlignService {
    pub fn new(matcher: Arc<dyn NoteMatcher>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            matcher,
            scratch_dir: scratch_dir.into(),
            align_timeout: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_matchers: DEFAULT_MAX_MATCHERS,
        }
    }

    /// Bound the time a request waits for the matcher. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.align_timeout = timeout;
        self
    }

    /// Bound the matcher threads alive at once. Past the bound, requests
    /// are answered with 503 instead of spawning another thread.
    pub fn with_max_matchers(mut self, max: usize) -> Self {
        self.max_matchers = max.max(1);
        self
    }

    /// Handle one request body and build the response.
    pub fn handle(&self, content_type: Option<&str>, body: &[u8]) -> ServiceResponse {
        match self.align(content_type, body).and_then(|pairs| {
            serde_json::to_string(&pairs).map_err(|e| ServiceError::Serialize(e.to_string()))
        }) {
            Ok(json) => ServiceResponse::json(200, json),
            Err(err) => {
                if err.status() >= 500 {
                    error!("alignment request failed: {err}");
                } else {
                    warn!("rejected alignment request: {err}");
                }
                ServiceResponse::from_error(&err)
            }
        }
    }

    /// Run the full pipeline and return the alignment pairs.
    pub fn align(
        &self,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<Vec<AlignmentPair>, ServiceError> {
        let (mei, midi) = AlignForm::parse(content_type, body)?.require()?;

        let staged = StagedScore::stage(&self.scratch_dir, &mei)?;
        let loaded = staged.load();
        if let Err(e) = staged.release() {
            warn!("failed to remove staged score: {e}");
        }
        let score = loaded?;

        let performance = parse_performance(&midi)?;
        debug!(
            "aligning {} score notes with {} performance notes",
            score.notes.len(),
            performance.len()
        );

        let pairs = self.run_matcher(score.notes, performance)?;
        info!("aligned request into {} pairs", pairs.len());
        Ok(pairs)
    }

    /// Call the matcher, on a helper thread when a timeout is configured.
    /// A timed-out matcher keeps running until it finishes on its own and
    /// holds its slot until then.
    fn run_matcher(
        &self,
        score: Vec<ScoreNote>,
        performance: Vec<PerformanceNote>,
    ) -> Result<Vec<AlignmentPair>, ServiceError> {
        let timeout = match self.align_timeout {
            Some(t) => t,
            None => return Ok(self.matcher.align(&score, &performance)?),
        };

        let slot = MatcherSlot::acquire(&self.in_flight, self.max_matchers)
            .ok_or(ServiceError::Busy(self.max_matchers))?;

        let matcher = Arc::clone(&self.matcher);
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("matcher".into())
            .spawn(move || {
                let _slot = slot;
                let _ = tx.send(matcher.align(&score, &performance));
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => Ok(result?),
            Err(RecvTimeoutError::Timeout) => Err(ServiceError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(ServiceError::MatcherPanicked),
        }
    }
}

/// One taken matcher slot, given back on drop (panics included).
struct MatcherSlot(Arc<AtomicUsize>);

impl MatcherSlot {
    fn acquire(in_flight: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()?;
        Some(Self(Arc::clone(in_flight)))
    }
}

impl Drop for MatcherSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
