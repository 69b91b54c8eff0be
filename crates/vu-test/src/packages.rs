//! Building the source distributions served by test index servers.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, bail};
use tracing::debug;

/// The script, relative to the project root, that turns source trees into sdists.
pub const BUILDER_SCRIPT: &str = "tests/testing/make_sdists.py";

/// The source trees packaged for the test index: the fixture packages and the project itself,
/// which must be installable from the index too.
pub const DEFAULT_SOURCES: &[&str] = &["tests/testing/packages", "."];

/// Where the test index archives are written, relative to the project root.
pub const DEFAULT_OUTPUT: &str = "build/test-packages";

/// Runs the sdist builder script.
///
/// The script is opaque: it receives the source directories followed by the output directory and
/// is expected to leave installable archives in the latter.
#[derive(Debug, Clone)]
pub struct PackageBuilder {
    python: PathBuf,
    top: PathBuf,
    script: PathBuf,
}

impl PackageBuilder {
    pub fn new(python: impl Into<PathBuf>, top: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            top: top.into(),
            script: PathBuf::from(BUILDER_SCRIPT),
        }
    }

    /// Use a different builder script, relative to the project root.
    #[must_use]
    pub fn with_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.script = script.into();
        self
    }

    /// The command that builds `sources` into `output`.
    pub fn command(&self, sources: &[impl AsRef<OsStr>], output: &Path) -> Command {
        let mut command = Command::new(&self.python);
        command
            .arg(&self.script)
            .args(sources)
            .arg(output)
            .current_dir(&self.top);
        command
    }

    /// Build `sources` into `output`, returning the output directory.
    pub fn build(&self, sources: &[impl AsRef<OsStr>], output: &Path) -> anyhow::Result<PathBuf> {
        let mut command = self.command(sources, output);
        debug!("Building test packages: {command:?}");
        let status = command
            .status()
            .with_context(|| format!("Failed to run `{}`", self.python.display()))?;
        if !status.success() {
            bail!(
                "`{}` failed to build packages into `{}` ({status})",
                self.script.display(),
                output.display()
            );
        }
        Ok(output.to_path_buf())
    }

    /// Build the conventional test packages into `build/test-packages` under the project root.
    pub fn build_default(&self) -> anyhow::Result<PathBuf> {
        self.build(DEFAULT_SOURCES, &self.top.join(DEFAULT_OUTPUT))
    }
}
