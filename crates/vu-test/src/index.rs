//! Ephemeral local package index servers.
//!
//! A [`PypiServer`] owns a `pypi-server`-compatible child process bound to `127.0.0.1` on a
//! pre-reserved port. [`PypiServer::start`] only returns once the server answers `200 OK` on `/`,
//! and the process is terminated and reaped when the handle is stopped or dropped.
//!
//! Servers never touch the process environment: package-installation commands are pointed at a
//! server through its [`IndexConfig`].

use std::env;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use reqwest::blocking::Client;
use tracing::{debug, trace, warn};

use vu_static::EnvVars;

/// The upstream index used when a server is started with fallback enabled.
pub const DEFAULT_FALLBACK_URL: &str = "https://pypi.python.org/simple";

/// The executable launched when neither the options nor `VU_TEST_INDEX_SERVER` name one.
pub const DEFAULT_PROGRAM: &str = "pypi-server";

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An index URL that no installer can use, for tests that must not reach any index.
pub const UNREACHABLE_INDEX_URL: &str = "(total garbage)";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Package directory does not exist: `{}`", _0.display())]
    MissingPackageDirectory(PathBuf),
    #[error("Failed to spawn index server `{}`", program.to_string_lossy())]
    Spawn {
        program: OsString,
        #[source]
        err: io::Error,
    },
    #[error("Index server process died before becoming ready ({})", describe_exit(.code.as_ref().copied()))]
    Startup { code: Option<i32> },
    #[error("Index server at {url} never became reachable within {timeout:?} (last probe: {last})")]
    ReadinessTimeout {
        url: String,
        timeout: Duration,
        last: ProbeOutcome,
    },
    #[error("Unexpected error while probing index server at {url}")]
    ProbeFatal {
        url: String,
        #[source]
        err: ProbeError,
    },
    #[error("Invalid value for `{name}`: `{value}`")]
    InvalidEnvironmentVariable { name: &'static str, value: String },
    #[error("Failed to build the readiness probe client")]
    Client(#[source] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by a signal".to_string(),
    }
}

/// A probe failure that is not one of the expected "not ready yet" signals.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("Unexpected HTTP status {0}")]
    Status(StatusCode),
}

/// The outcome of a single readiness probe that did not fail fatally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The server answered `200 OK`.
    Ready,
    /// Nothing is listening on the port yet.
    Refused,
    /// The server is listening, but `/` is not routed yet.
    NotFound,
    /// The server answered with a non-error status other than `200 OK`.
    Pending(StatusCode),
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("ready"),
            Self::Refused => f.write_str("connection refused"),
            Self::NotFound => f.write_str("404 Not Found"),
            Self::Pending(status) => write!(f, "{status}"),
        }
    }
}

/// Build the client used for readiness probes.
///
/// Proxies are ignored, since a probe always targets the loopback interface.
fn probe_client(timeout: Duration) -> Result<Client, Error> {
    Client::builder()
        .no_proxy()
        .timeout(timeout)
        .build()
        .map_err(Error::Client)
}

/// Send a single `GET` to `url` and classify the result.
///
/// Refused connections and `404 Not Found` are expected while a server is starting; every other
/// failure is returned as a [`ProbeError`].
fn probe(client: &Client, url: &str) -> Result<ProbeOutcome, ProbeError> {
    let response = match client.get(url).send() {
        Ok(response) => response,
        Err(err) if is_connection_refused(&err) => return Ok(ProbeOutcome::Refused),
        Err(err) => return Err(ProbeError::Request(err)),
    };

    let status = response.status();
    trace!("Probe of {url} returned {status}");
    match status {
        StatusCode::OK => Ok(ProbeOutcome::Ready),
        StatusCode::NOT_FOUND => Ok(ProbeOutcome::NotFound),
        status if status.is_client_error() || status.is_server_error() => {
            Err(ProbeError::Status(status))
        }
        status => Ok(ProbeOutcome::Pending(status)),
    }
}

/// Returns `true` if the error was caused by a refused TCP connection.
fn is_connection_refused(err: &reqwest::Error) -> bool {
    if !err.is_connect() {
        return false;
    }
    let mut source: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(err);
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = err.source();
    }
    false
}

/// Check once whether the server at `base_url` is ready.
///
/// Returns `Ok(false)` while the server is not listening yet or answers `404 Not Found`.
///
/// Uses a blocking client: call it from a plain thread, not from within an async runtime.
pub fn poll_ready(base_url: &str) -> Result<bool, Error> {
    let client = probe_client(DEFAULT_READY_TIMEOUT)?;
    match probe(&client, base_url) {
        Ok(outcome) => Ok(outcome == ProbeOutcome::Ready),
        Err(err) => Err(Error::ProbeFatal {
            url: base_url.to_string(),
            err,
        }),
    }
}

/// Where package-installation commands should look for packages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    index_url: String,
}

impl IndexConfig {
    pub fn new(index_url: impl Into<String>) -> Self {
        Self {
            index_url: index_url.into(),
        }
    }

    /// A configuration that makes every index lookup fail.
    pub fn unreachable() -> Self {
        Self::new(UNREACHABLE_INDEX_URL)
    }

    pub fn index_url(&self) -> &str {
        &self.index_url
    }

    /// Point `pip` in the given command at this index.
    pub fn apply(&self, command: &mut Command) {
        command.env(EnvVars::PIP_INDEX_URL, &self.index_url);
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self::unreachable()
    }
}

/// How to launch and wait for an index server.
#[derive(Debug, Clone)]
pub struct IndexServerOptions {
    program: OsString,
    top: PathBuf,
    fallback_url: String,
    ready_timeout: Duration,
    poll_interval: Duration,
}

impl Default for IndexServerOptions {
    fn default() -> Self {
        Self {
            program: OsString::from(DEFAULT_PROGRAM),
            top: PathBuf::from("."),
            fallback_url: DEFAULT_FALLBACK_URL.to_string(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl IndexServerOptions {
    /// Read the options from the `VU_TEST_*` environment variables, falling back to the defaults.
    pub fn from_env() -> Result<Self, Error> {
        let mut options = Self::default();
        if let Some(program) = env::var_os(EnvVars::VU_TEST_INDEX_SERVER) {
            options.program = program;
        }
        if let Some(top) = env::var_os(EnvVars::VU_TEST_TOP) {
            options.top = PathBuf::from(top);
        }
        if let Some(timeout) = seconds_from_env(EnvVars::VU_TEST_INDEX_READY_TIMEOUT)? {
            options.ready_timeout = timeout;
        }
        if let Some(interval) = seconds_from_env(EnvVars::VU_TEST_INDEX_POLL_INTERVAL)? {
            options.poll_interval = interval;
        }
        Ok(options)
    }

    /// Set the index server executable.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    /// Set the directory the server runs in.
    #[must_use]
    pub fn with_top(mut self, top: impl Into<PathBuf>) -> Self {
        self.top = top.into();
        self
    }

    /// Set the upstream index used when fallback is enabled.
    #[must_use]
    pub fn with_fallback_url(mut self, fallback_url: impl Into<String>) -> Self {
        self.fallback_url = fallback_url.into();
        self
    }

    /// Set how long to wait for the server to become ready.
    #[must_use]
    pub fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }

    /// Set the delay between two readiness probes.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn program(&self) -> &OsString {
        &self.program
    }

    pub fn ready_timeout(&self) -> Duration {
        self.ready_timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// The command that launches a server for `packages` on `port`.
    pub fn command(&self, packages: &Path, port: u16, allow_remote_fallback: bool) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("-v")
            .arg("-i")
            .arg("127.0.0.1")
            .arg("-p")
            .arg(port.to_string())
            .arg("--fallback-url")
            .arg(&self.fallback_url);
        if !allow_remote_fallback {
            command.arg("--disable-fallback");
        }
        command
            .arg(packages)
            .current_dir(&self.top)
            .stdin(Stdio::null());
        command
    }

    /// Launch a server for `packages` on the pre-reserved `port` and wait until it is ready.
    pub fn start(
        &self,
        packages: &Path,
        port: u16,
        allow_remote_fallback: bool,
    ) -> Result<PypiServer, Error> {
        if !packages.is_dir() {
            return Err(Error::MissingPackageDirectory(packages.to_path_buf()));
        }

        let mut command = self.command(packages, port, allow_remote_fallback);
        debug!("Starting index server: {command:?}");
        let child = command.spawn().map_err(|err| Error::Spawn {
            program: self.program.clone(),
            err,
        })?;

        // From here on, dropping the handle terminates the process, including on the error paths
        // below.
        let mut server = PypiServer {
            child,
            port,
            base_url: format!("http://localhost:{port}"),
            allow_remote_fallback,
            state: ServerState::Starting,
        };
        server.wait_until_ready(self.ready_timeout, self.poll_interval)?;
        Ok(server)
    }
}

fn seconds_from_env(name: &'static str) -> Result<Option<Duration>, Error> {
    let Some(value) = env::var_os(name) else {
        return Ok(None);
    };
    let value = value.to_string_lossy();
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
        .map(Some)
        .ok_or_else(|| Error::InvalidEnvironmentVariable {
            name,
            value: value.to_string(),
        })
}

/// The lifecycle of a [`PypiServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// The process is running but has not answered a probe yet.
    Starting,
    /// The server answered `200 OK` on `/`.
    Ready,
    /// The process has exited and was reaped.
    Terminated,
}

/// A running local index server.
///
/// The process is terminated and reaped by [`PypiServer::stop`], or when the handle is dropped.
#[derive(Debug)]
pub struct PypiServer {
    child: Child,
    port: u16,
    base_url: String,
    allow_remote_fallback: bool,
    state: ServerState,
}

impl PypiServer {
    /// Launch a server with the options from the environment; see [`IndexServerOptions::start`].
    pub fn start(packages: &Path, port: u16, allow_remote_fallback: bool) -> Result<Self, Error> {
        IndexServerOptions::from_env()?.start(packages, port, allow_remote_fallback)
    }

    /// The base URL, e.g., `http://localhost:8080`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The simple API root, e.g., `http://localhost:8080/simple`.
    pub fn index_url(&self) -> String {
        format!("{}/simple", self.base_url)
    }

    /// The configuration that routes package installations through this server.
    pub fn index_config(&self) -> IndexConfig {
        IndexConfig::new(self.index_url())
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn allows_remote_fallback(&self) -> bool {
        self.allow_remote_fallback
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    fn wait_until_ready(&mut self, timeout: Duration, poll_interval: Duration) -> Result<(), Error> {
        let client = probe_client(timeout)?;
        let deadline = Instant::now() + timeout;
        let mut last = ProbeOutcome::Refused;

        loop {
            if let Some(status) = self.child.try_wait()? {
                self.state = ServerState::Terminated;
                return Err(Error::Startup {
                    code: status.code(),
                });
            }

            match probe(&client, &self.base_url) {
                Ok(ProbeOutcome::Ready) => {
                    debug!("Index server ready at {}", self.base_url);
                    self.state = ServerState::Ready;
                    return Ok(());
                }
                Ok(outcome) => {
                    trace!("Index server not up yet: {outcome}");
                    last = outcome;
                }
                Err(err) => {
                    return Err(Error::ProbeFatal {
                        url: self.base_url.clone(),
                        err,
                    });
                }
            }

            if Instant::now() >= deadline {
                return Err(Error::ReadinessTimeout {
                    url: self.base_url.clone(),
                    timeout,
                    last,
                });
            }
            thread::sleep(poll_interval);
        }
    }

    /// Terminate the server and wait for it to exit.
    ///
    /// Sends `SIGTERM` on Unix and kills the process elsewhere. Calling this on a server that has
    /// already been stopped, or whose process already exited, does nothing.
    pub fn stop(&mut self) -> Result<(), Error> {
        if self.state == ServerState::Terminated {
            return Ok(());
        }

        if let Some(status) = self.child.try_wait()? {
            debug!("Index server already exited ({status})");
            self.state = ServerState::Terminated;
            return Ok(());
        }

        terminate(&mut self.child)?;
        let status = self.child.wait()?;
        debug!("Index server on port {} stopped ({status})", self.port);
        self.state = ServerState::Terminated;
        Ok(())
    }
}

impl Drop for PypiServer {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!("Failed to stop index server on port {}: {err}", self.port);
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let pid = i32::try_from(child.id()).map_err(io::Error::other)?;
    match signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
        // The process exited between `try_wait` and now; `wait` will reap it.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> io::Result<()> {
    match child.kill() {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::InvalidInput => Ok(()),
        Err(err) => Err(err),
    }
}
