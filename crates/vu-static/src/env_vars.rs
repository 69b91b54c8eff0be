/// Declares all environment variables read or written by the venv-update test harness.
pub struct EnvVars;

impl EnvVars {
    /// The index URL consumed by `pip`. The harness points it at a local index server, or at an
    /// unusable value when no server is active so that tests never reach the real index.
    pub const PIP_INDEX_URL: &'static str = "PIP_INDEX_URL";

    /// Warning filters for Python subprocesses.
    pub const PYTHONWARNINGS: &'static str = "PYTHONWARNINGS";

    /// Terminal width assumed by `argparse` when rendering `--help`.
    pub const COLUMNS: &'static str = "COLUMNS";

    /// The standard `PATH` env var.
    pub const PATH: &'static str = "PATH";

    /// The standard `HOME` env var.
    pub const HOME: &'static str = "HOME";

    /// The standard `TMPDIR` env var.
    pub const TMPDIR: &'static str = "TMPDIR";

    /// The standard `TERM` env var.
    pub const TERM: &'static str = "TERM";

    /// Enables coverage measurement of Python subprocesses.
    pub const COVERAGE_PROCESS_START: &'static str = "COVERAGE_PROCESS_START";

    /// The project root, as used by the coverage configuration of the Python test suite.
    pub const TOP: &'static str = "TOP";

    /// Logging directives, e.g., `RUST_LOG=vu_test=debug`.
    pub const RUST_LOG: &'static str = "RUST_LOG";

    /// Overrides the index server executable launched by the test harness.
    ///
    /// Defaults to `pypi-server` on the `PATH`.
    pub const VU_TEST_INDEX_SERVER: &'static str = "VU_TEST_INDEX_SERVER";

    /// How long, in seconds, to wait for a freshly spawned index server to answer on `/`.
    pub const VU_TEST_INDEX_READY_TIMEOUT: &'static str = "VU_TEST_INDEX_READY_TIMEOUT";

    /// Delay, in seconds, between two readiness probes of a starting index server.
    pub const VU_TEST_INDEX_POLL_INTERVAL: &'static str = "VU_TEST_INDEX_POLL_INTERVAL";

    /// The root of the project under test. Index servers and the package builder run from here.
    pub const VU_TEST_TOP: &'static str = "VU_TEST_TOP";

    /// The Python interpreter used by the test context and the package builder.
    pub const VU_TEST_PYTHON: &'static str = "VU_TEST_PYTHON";
}
