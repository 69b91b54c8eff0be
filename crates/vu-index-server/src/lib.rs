//! A minimal, read-only Python package index.
//!
//! Serves a directory of archives under the HTML simple repository API, optionally redirecting
//! lookups for unknown projects to an upstream index. The `vu-pypi-server` binary wraps it in a
//! `pypi-server`-compatible command line so the test harness can launch it as a subprocess.

use std::io;
use std::path::PathBuf;

pub use index::{Distribution, PackageIndex};
pub use server::{Fallback, IndexServer};

mod index;
pub mod name;
mod server;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Failed to walk package directory")]
    WalkDir(#[from] walkdir::Error),
    #[error("Package directory does not exist: `{}`", _0.display())]
    MissingPackageDirectory(PathBuf),
}
