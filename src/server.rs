// HTTP front end for the alignment service.
//
// Architecture: one `tiny_http::Server` shared by a fixed pool of worker
// threads. Each worker polls `recv_timeout` in a loop and handles the
// request it receives to completion before taking the next one, so a slow
// alignment only ties up its own worker. The handler itself lives in
// `service.rs` and knows nothing about HTTP.
//
// Shutdown: `ServerHandle::stop` clears the shared `keep_running` flag;
// each worker notices within one poll interval and exits, then the handle
// joins them.

use std::io::{self, Read};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

use crate::matcher::NoteMatcher;
use crate::service::{
    AlignService, ServiceError, ServiceResponse, DEFAULT_MAX_MATCHERS, RESPONSE_HEADERS,
};

/// How often idle workers check whether the server is stopping.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for starting the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// Listen port; 0 lets the OS pick one
    pub port: u16,
    /// Number of worker threads
    pub workers: usize,
    /// Directory for transient score files
    pub scratch_dir: PathBuf,
    /// Upper bound on a single matcher call; `None` waits forever
    pub align_timeout: Option<Duration>,
    /// Largest accepted request body in bytes
    pub max_body_bytes: usize,
    /// Matcher threads allowed to run at once, timed-out ones included
    pub max_matchers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            workers: 4,
            scratch_dir: std::env::temp_dir(),
            align_timeout: Some(Duration::from_secs(60)),
            max_body_bytes: 32 * 1024 * 1024,
            max_matchers: DEFAULT_MAX_MATCHERS,
        }
    }
}

/// Handle returned by `start_server` to control the running server.
pub struct ServerHandle {
    keep_running: Arc<AtomicBool>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ServerHandle {
    /// Signal the workers to stop and wait for them to finish.
    pub fn stop(self) {
        self.keep_running.store(false, Ordering::SeqCst);
        for worker in self.workers {
            let _ = worker.join();
        }
        info!("server stopped");
    }
}

/// Start the server on background threads. Returns a handle for stopping
/// it and the bound address (useful when port 0 is used).
pub fn start_server(
    config: ServerConfig,
    matcher: Arc<dyn NoteMatcher>,
) -> io::Result<(ServerHandle, SocketAddr)> {
    std::fs::create_dir_all(&config.scratch_dir)?;

    let server = Server::http((config.host.as_str(), config.port))
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let addr = server.server_addr().to_ip().ok_or_else(|| {
        io::Error::new(io::ErrorKind::Other, "server is not bound to an IP address")
    })?;

    let server = Arc::new(server);
    let service = Arc::new(
        AlignService::new(matcher, config.scratch_dir.clone())
            .with_timeout(config.align_timeout)
            .with_max_matchers(config.max_matchers),
    );
    let keep_running = Arc::new(AtomicBool::new(true));

    let mut workers = Vec::with_capacity(config.workers.max(1));
    for i in 0..config.workers.max(1) {
        let server = Arc::clone(&server);
        let service = Arc::clone(&service);
        let keep_running = Arc::clone(&keep_running);
        let max_body = config.max_body_bytes;
        let worker = thread::Builder::new()
            .name(format!("http-worker-{i}"))
            .spawn(move || run_worker(&server, &service, max_body, &keep_running))?;
        workers.push(worker);
    }

    info!(
        "listening on {addr} with {} workers, scratch dir {}",
        workers.len(),
        config.scratch_dir.display()
    );

    Ok((
        ServerHandle {
            keep_running,
            workers,
        },
        addr,
    ))
}

/// Worker loop. Runs until `keep_running` is set to false.
fn run_worker(server: &Server, service: &AlignService, max_body: usize, keep_running: &AtomicBool) {
    while keep_running.load(Ordering::SeqCst) {
        match server.recv_timeout(POLL_INTERVAL) {
            Ok(Some(request)) => handle_request(service, max_body, request),
            Ok(None) => {}
            Err(e) => {
                error!("failed to receive request: {e}");
                break;
            }
        }
    }
}

/// Route one request and send the response.
fn handle_request(service: &AlignService, max_body: usize, mut request: Request) {
    let method = request.method().clone();
    let path = request.url().split('?').next().unwrap_or("").to_string();
    debug!("{method} {path}");

    let response = match (&method, path.as_str()) {
        (Method::Post, "/align") => {
            let content_type = header_value(&request, "Content-Type");
            match read_body(&mut request, max_body) {
                Ok(body) => service.handle(content_type.as_deref(), &body),
                Err(err) => {
                    warn!("rejected alignment request: {err}");
                    ServiceResponse::from_error(&err)
                }
            }
        }
        (Method::Options, "/align") => preflight(),
        (_, "/align") => route_error(405, format!("Method {method} not allowed on /align")),
        _ => route_error(404, format!("No route for {path}")),
    };

    let status = response.status;
    if let Err(e) = request.respond(to_http(response)) {
        warn!("failed to send {status} response for {method} {path}: {e}");
    }
}

fn header_value(request: &Request, name: &'static str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str().to_string())
}

/// Read the body, refusing anything larger than `max_body` bytes.
fn read_body(request: &mut Request, max_body: usize) -> Result<Vec<u8>, ServiceError> {
    if request.body_length().is_some_and(|len| len > max_body) {
        return Err(ServiceError::PayloadTooLarge(max_body));
    }
    let mut body = Vec::new();
    request
        .as_reader()
        .take(max_body as u64 + 1)
        .read_to_end(&mut body)
        .map_err(|e| ServiceError::BadRequest(format!("failed to read body: {e}")))?;
    if body.len() > max_body {
        return Err(ServiceError::PayloadTooLarge(max_body));
    }
    Ok(body)
}

/// CORS preflight for browser clients.
fn preflight() -> ServiceResponse {
    ServiceResponse {
        status: 204,
        body: String::new(),
        headers: vec![
            ("Access-Control-Allow-Origin", "*"),
            ("Access-Control-Allow-Methods", "POST, OPTIONS"),
            ("Access-Control-Allow-Headers", "Content-Type"),
        ],
    }
}

fn route_error(status: u16, message: String) -> ServiceResponse {
    let kind = if status == 405 {
        "method_not_allowed"
    } else {
        "not_found"
    };
    ServiceResponse {
        status,
        body: serde_json::json!({ "error": message, "kind": kind }).to_string(),
        headers: RESPONSE_HEADERS.to_vec(),
    }
}

fn to_http(response: ServiceResponse) -> Response<io::Cursor<Vec<u8>>> {
    let mut http = Response::from_data(response.body.into_bytes())
        .with_status_code(StatusCode(response.status));
    for (name, value) in response.headers {
        if let Ok(header) = Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            http = http.with_header(header);
        }
    }
    http
}
