//! scorealign: aligns an MEI score with a MIDI performance over HTTP.
//!
//! A client posts a form with the score (`mei`, MEI XML text) and the
//! performance (`midi`, a JSON array of 9-tuples). The service loads the
//! score into a note array, builds the performance array, runs a note
//! matcher and answers with a list of `match` / `deletion` / `insertion`
//! pairs.
//!
//! # Example
//! ```no_run
//! use scorealign::{parse_performance, AlignmentPair, AutomaticNoteMatcher, NoteMatcher};
//!
//! let score = scorealign::parse_file("path/to/score.mei").unwrap();
//! let performance =
//!     parse_performance(r#"[[0.5, 0.25, 480, 240, 60, 90, 0, 0, "n1"]]"#).unwrap();
//! let matcher = AutomaticNoteMatcher::default();
//! let pairs = matcher.align(&score.notes, &performance).unwrap();
//! for pair in &pairs {
//!     if let AlignmentPair::Match { score_id, performance_id } = pair {
//!         println!("{score_id} <-> {performance_id}");
//!     }
//! }
//! ```
//!
//! To run the HTTP service in-process:
//! ```no_run
//! use std::sync::Arc;
//! use scorealign::{start_server, GreedyMatcher, ServerConfig};
//!
//! let config = ServerConfig { port: 0, ..ServerConfig::default() };
//! let (handle, addr) = start_server(config, Arc::new(GreedyMatcher)).unwrap();
//! println!("listening on {addr}");
//! handle.stop();
//! ```

pub mod config;
pub mod matcher;
pub mod model;
pub mod parser;
pub mod performance;
pub mod server;
pub mod service;
pub mod staging;

pub use config::{Args, MatcherKind};
pub use matcher::{AlignError, AutomaticNoteMatcher, GreedyMatcher, NoteMatcher};
pub use model::*;
pub use parser::{parse_file, parse_mei, ScoreError};
pub use performance::{parse_performance, PerformanceError};
pub use server::{start_server, ServerConfig, ServerHandle};
pub use service::{AlignForm, AlignService, ServiceError, ServiceResponse};
pub use staging::StagedScore;
