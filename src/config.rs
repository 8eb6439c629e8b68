//! Command-line configuration for the `scorealign` binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::matcher::{AutomaticNoteMatcher, GreedyMatcher, NoteMatcher};
use crate::server::ServerConfig;

/// Which note matcher answers `/align` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MatcherKind {
    /// Chord-wise DTW over pitch-class profiles, then per-pitch matching
    Automatic,
    /// Walk the score event by event and take the first unused performance note
    Greedy,
}

#[derive(Parser, Debug)]
#[command(
    name = "scorealign",
    about = "Align MEI scores with MIDI performances over HTTP"
)]
pub struct Args {
    /// Interface to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on. 0 picks a free port.
    #[arg(short, long, default_value_t = 5000)]
    pub port: u16,

    /// Number of worker threads handling requests.
    #[arg(short, long, default_value_t = 4)]
    pub workers: usize,

    /// Directory for transient score files. Defaults to the system temp dir.
    #[arg(long = "scratch-dir")]
    pub scratch_dir: Option<PathBuf>,

    /// Seconds to wait for the matcher before answering 504. 0 disables the limit.
    #[arg(long = "timeout-secs", default_value_t = 60)]
    pub timeout_secs: u64,

    /// Largest accepted request body in bytes.
    #[arg(long = "max-body-bytes", default_value_t = 32 * 1024 * 1024)]
    pub max_body_bytes: usize,

    /// Matcher threads allowed at once; further requests get 503.
    #[arg(long = "max-matchers", default_value_t = 8)]
    pub max_matchers: usize,

    /// Note matcher to use.
    #[arg(short, long, value_enum, default_value_t = MatcherKind::Automatic)]
    pub matcher: MatcherKind,
}

impl Args {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            workers: self.workers,
            scratch_dir: self
                .scratch_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            align_timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
            max_body_bytes: self.max_body_bytes,
            max_matchers: self.max_matchers,
        }
    }

    pub fn matcher(&self) -> Arc<dyn NoteMatcher> {
        match self.matcher {
            MatcherKind::Automatic => Arc::new(AutomaticNoteMatcher::default()),
            MatcherKind::Greedy => Arc::new(GreedyMatcher),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_server_defaults() {
        let args = Args::parse_from(["scorealign"]);
        let config = args.server_config();
        let defaults = ServerConfig::default();
        assert_eq!(config.host, defaults.host);
        assert_eq!(config.port, defaults.port);
        assert_eq!(config.workers, defaults.workers);
        assert_eq!(config.align_timeout, defaults.align_timeout);
        assert_eq!(config.max_body_bytes, defaults.max_body_bytes);
        assert_eq!(config.max_matchers, defaults.max_matchers);
        assert_eq!(args.matcher, MatcherKind::Automatic);
    }

    #[test]
    fn zero_timeout_disables_limit() {
        let args = Args::parse_from(["scorealign", "--timeout-secs", "0"]);
        assert_eq!(args.server_config().align_timeout, None);
    }

    #[test]
    fn parses_all_flags() {
        let args = Args::parse_from([
            "scorealign",
            "--host",
            "0.0.0.0",
            "--port",
            "8080",
            "--workers",
            "2",
            "--scratch-dir",
            "/tmp/align",
            "--max-body-bytes",
            "1024",
            "--max-matchers",
            "3",
            "--matcher",
            "greedy",
        ]);
        let config = args.server_config();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.workers, 2);
        assert_eq!(config.scratch_dir, PathBuf::from("/tmp/align"));
        assert_eq!(config.max_body_bytes, 1024);
        assert_eq!(config.max_matchers, 3);
        assert_eq!(args.matcher, MatcherKind::Greedy);
    }

    #[test]
    fn rejects_unknown_matcher() {
        assert!(Args::try_parse_from(["scorealign", "--matcher", "fuzzy"]).is_err());
    }
}
