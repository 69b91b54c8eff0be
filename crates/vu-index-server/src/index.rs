use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::Error;
use crate::name::{is_archive, project_for_filename};

/// A single archive on disk.
#[derive(Debug, Clone)]
pub struct Distribution {
    pub filename: String,
    pub path: PathBuf,
    pub sha256: String,
}

/// The archives found in the package directories, grouped by normalized project name.
#[derive(Debug, Default)]
pub struct PackageIndex {
    /// Normalized project name → filenames, sorted.
    projects: BTreeMap<String, Vec<String>>,
    /// Filename → archive.
    files: BTreeMap<String, Distribution>,
}

impl PackageIndex {
    /// Scan the given directories (recursively) for archives.
    ///
    /// Files whose project name cannot be derived from the filename are skipped. When the same
    /// filename is found twice, the first directory wins.
    pub fn from_directories(roots: &[PathBuf]) -> Result<Self, Error> {
        let mut index = Self::default();
        for root in roots {
            if !root.is_dir() {
                return Err(Error::MissingPackageDirectory(root.clone()));
            }
            index.add_directory(root)?;
        }
        for filenames in index.projects.values_mut() {
            filenames.sort();
        }
        debug!(
            "Indexed {} archives across {} projects",
            index.files.len(),
            index.projects.len()
        );
        Ok(index)
    }

    fn add_directory(&mut self, root: &Path) -> Result<(), Error> {
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(filename) = entry.file_name().to_str() else {
                warn!(
                    "Skipping archive with non-UTF-8 filename: {}",
                    entry.path().display()
                );
                continue;
            };
            if !is_archive(filename) {
                continue;
            }
            let Some(project) = project_for_filename(filename) else {
                warn!("Could not determine the project of `{filename}`, skipping");
                continue;
            };

            match self.files.entry(filename.to_string()) {
                Entry::Occupied(existing) => {
                    warn!(
                        "Ignoring {}, already serving {}",
                        entry.path().display(),
                        existing.get().path.display()
                    );
                }
                Entry::Vacant(vacant) => {
                    let bytes = fs_err::read(entry.path())?;
                    vacant.insert(Distribution {
                        filename: filename.to_string(),
                        path: entry.path().to_path_buf(),
                        sha256: format!("{:x}", Sha256::digest(&bytes)),
                    });
                    self.projects
                        .entry(project)
                        .or_default()
                        .push(filename.to_string());
                }
            }
        }
        Ok(())
    }

    /// The normalized names of all projects with at least one archive.
    pub fn projects(&self) -> impl Iterator<Item = &str> {
        self.projects.keys().map(String::as_str)
    }

    /// The archives of a project, by normalized name.
    pub fn distributions(&self, project: &str) -> Option<impl Iterator<Item = &Distribution>> {
        let filenames = self.projects.get(project)?;
        Some(
            filenames
                .iter()
                .filter_map(|filename| self.files.get(filename)),
        )
    }

    /// Look up an archive by its exact filename.
    pub fn file(&self, filename: &str) -> Option<&Distribution> {
        self.files.get(filename)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
