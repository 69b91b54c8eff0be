//! Test support for venv-update: isolated environments, local package indexes and readable
//! assertion failures.

use std::collections::BTreeMap;
use std::env;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_fs::fixture::{ChildPath, PathChild, PathCreateDir};
use tracing::warn;

use vu_static::EnvVars;

pub use index::{
    Error, IndexConfig, IndexServerOptions, ProbeError, ProbeOutcome, PypiServer, ServerState,
    poll_ready,
};
pub use packages::PackageBuilder;
pub use port::reserve_port;

pub mod diagnostics;
pub mod index;
pub mod packages;
mod port;

/// Variables that survive the environment sanitization of [`TestContext`].
pub const ENV_WHITELIST: &[&str] = &[
    // Allows coverage of subprocesses.
    EnvVars::COVERAGE_PROCESS_START,
    // Used in the configuration of coverage.
    EnvVars::TOP,
    EnvVars::TMPDIR,
    EnvVars::HOME,
    EnvVars::TERM,
];

/// Silences the interpreter warning emitted by old `pip` releases on Python 3.
pub const PYTHONWARNINGS: &str =
    "ignore:Support for Python 3.0-3.2 has been dropped.:UserWarning";

/// Wide enough that `argparse` never wraps `--help` output.
pub const COLUMNS: &str = "1000";

/// Directories searched after the interpreter's own, the POSIX `os.defpath`.
#[cfg(unix)]
const SYSTEM_PATH: &[&str] = &["/bin", "/usr/bin"];
/// Outside Unix, commands only find programs next to the interpreter.
#[cfg(not(unix))]
const SYSTEM_PATH: &[&str] = &[];

/// Return the path to the `vu-pypi-server` binary.
///
/// This macro captures the binary path at compile time using
/// `env!("CARGO_BIN_EXE_vu-pypi-server")`, which is only available in the tests of the
/// `vu-index-server` crate.
#[macro_export]
macro_rules! index_server_bin {
    () => {
        std::path::PathBuf::from(env!("CARGO_BIN_EXE_vu-pypi-server"))
    };
}

/// The root of the workspace this crate lives in.
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .expect("CARGO_MANIFEST_DIR should be nested under workspace root")
}

/// The project under test: `VU_TEST_TOP` if set, otherwise the workspace root.
pub fn project_root() -> PathBuf {
    env::var_os(EnvVars::VU_TEST_TOP).map_or_else(workspace_root, PathBuf::from)
}

/// The Python interpreter for tests: `VU_TEST_PYTHON` if set, otherwise `python3` or `python` on
/// the `PATH`.
pub fn find_python() -> Option<PathBuf> {
    if let Some(python) = env::var_os(EnvVars::VU_TEST_PYTHON) {
        return Some(PathBuf::from(python));
    }
    which::which("python3")
        .or_else(|_| which::which("python"))
        .ok()
}

/// The interpreter's directory followed by [`SYSTEM_PATH`], joined with the platform separator.
fn search_path(python: Option<&Path>) -> OsString {
    let interpreter_dir = python
        .and_then(Path::parent)
        .filter(|dir| !dir.as_os_str().is_empty());
    let dirs = interpreter_dir
        .into_iter()
        .chain(SYSTEM_PATH.iter().map(Path::new));
    env::join_paths(dirs).unwrap_or_else(|err| {
        warn!("Leaving the interpreter directory out of `PATH`: {err}");
        env::join_paths(SYSTEM_PATH).unwrap_or_default()
    })
}

/// Compute the environment of a test command from the inherited one.
///
/// Only [`ENV_WHITELIST`] variables are kept. `HOME` and `TMPDIR` are redirected to scratch
/// directories, `PATH` is reduced to the interpreter's directory plus the system default, and
/// `pip` is pointed at `index`.
pub fn sanitized_environment(
    inherited: impl IntoIterator<Item = (OsString, OsString)>,
    home: &Path,
    tmp: &Path,
    python: Option<&Path>,
    index: &IndexConfig,
) -> BTreeMap<OsString, OsString> {
    let mut environment: BTreeMap<OsString, OsString> = inherited
        .into_iter()
        .filter(|(key, _)| {
            key.to_str()
                .is_some_and(|key| ENV_WHITELIST.contains(&key))
        })
        .collect();

    let path = search_path(python);

    for (key, value) in [
        (EnvVars::HOME, home.as_os_str()),
        (EnvVars::TMPDIR, tmp.as_os_str()),
        (EnvVars::PIP_INDEX_URL, OsStr::new(index.index_url())),
        (EnvVars::PYTHONWARNINGS, OsStr::new(PYTHONWARNINGS)),
        (EnvVars::COLUMNS, OsStr::new(COLUMNS)),
        (EnvVars::PATH, path.as_os_str()),
    ] {
        environment.insert(OsString::from(key), value.to_os_string());
    }

    environment
}

/// Create a context for tests which simplifies shared behavior across tests.
///
/// * Run commands from a fresh temporary directory (`root`).
/// * Give each test its own `HOME` and `TMPDIR` inside that directory.
/// * Drop every inherited environment variable that is not whitelisted.
/// * Make package index lookups fail, unless a local index is configured with
///   [`TestContext::with_index`].
pub struct TestContext {
    pub root: ChildPath,
    pub home_dir: ChildPath,
    pub tmp_dir: ChildPath,
    /// The project under test.
    pub top: PathBuf,

    python: Option<PathBuf>,
    index: IndexConfig,

    /// Extra environment variables to apply to all commands.
    extra_env: Vec<(OsString, OsString)>,

    #[allow(dead_code)]
    _root: tempfile::TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        let root = tempfile::TempDir::new().expect("Failed to create test root directory");
        let root_path = ChildPath::new(root.path());

        let home_dir = root_path.child("home");
        home_dir.create_dir_all().expect("Failed to create test home directory");
        let tmp_dir = root_path.child("tmp");
        tmp_dir.create_dir_all().expect("Failed to create test tmp directory");

        Self {
            root: root_path,
            home_dir,
            tmp_dir,
            top: project_root(),
            python: find_python(),
            index: IndexConfig::unreachable(),
            extra_env: Vec::new(),
            _root: root,
        }
    }

    /// Route package installations through the given index.
    #[must_use]
    pub fn with_index(mut self, index: &IndexConfig) -> Self {
        self.index = index.clone();
        self
    }

    /// Use the given Python interpreter instead of the discovered one.
    #[must_use]
    pub fn with_python(mut self, python: impl Into<PathBuf>) -> Self {
        self.python = Some(python.into());
        self
    }

    /// Set an extra environment variable for all commands in this context.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.extra_env.push((key.into(), value.into()));
        self
    }

    pub fn python(&self) -> Option<&Path> {
        self.python.as_deref()
    }

    pub fn index(&self) -> &IndexConfig {
        &self.index
    }

    /// The full environment of commands created by this context.
    pub fn environment(&self) -> BTreeMap<OsString, OsString> {
        let mut environment = sanitized_environment(
            env::vars_os(),
            self.home_dir.path(),
            self.tmp_dir.path(),
            self.python.as_deref(),
            &self.index,
        );
        for (key, value) in &self.extra_env {
            environment.insert(key.clone(), value.clone());
        }
        environment
    }

    /// Create a command for `program` with the sanitized environment, run from [`Self::root`].
    pub fn command(&self, program: impl AsRef<OsStr>) -> Command {
        let mut command = Command::new(program);
        command
            .env_clear()
            .envs(self.environment())
            .current_dir(self.root.path());
        command
    }

    /// Create a command running the test interpreter.
    pub fn python_command(&self) -> Command {
        match &self.python {
            Some(python) => self.command(python),
            None => self.command("python3"),
        }
    }

    /// Create a `pip install` command routed through the configured index.
    pub fn pip_install(&self) -> Command {
        let mut command = self.python_command();
        command.arg("-m").arg("pip").arg("install");
        command
    }

    /// Create a package builder for the project under test.
    pub fn package_builder(&self) -> Option<PackageBuilder> {
        let python = self.python.as_ref()?;
        Some(PackageBuilder::new(python, &self.top))
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
