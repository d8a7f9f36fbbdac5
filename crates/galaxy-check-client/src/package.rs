//! Synthesis of a throwaway collection archive for self-test uploads.
//!
//! Layout inside `<name>-1.0.0.tar.gz`:
//!
//! ```text
//! <name>/README.md
//! <name>/galaxy.yml
//! <name>/roles/test_role/meta/main.yml
//! <name>/tests/test.yml
//! ```

use crate::ClientError;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

pub const TEST_VERSION: &str = "1.0.0";
pub const TEST_NAME_PREFIX: &str = "validate_test_";

const README: &str = "# Test Collection\n\nThis is a test collection for Galaxy validation.\n";

const ROLE_META: &str = r#"---
galaxy_info:
  role_name: test_role
  author: Test Author
  description: Test role
  license: MIT
  min_ansible_version: "2.9"
"#;

const TEST_PLAYBOOK: &str = r#"---
- name: Test playbook
  hosts: localhost
  gather_facts: no
  tasks:
    - name: Debug message
      debug:
        msg: "Test task from Galaxy validation"
"#;

/// A collection archive ready for upload.
///
/// Packager-built artifacts own their temporary directory; dropping or
/// calling [`cleanup`](Self::cleanup) removes it. Caller-supplied archives are
/// never touched.
#[derive(Debug)]
pub struct ArtifactDescriptor {
    pub name: String,
    pub path: PathBuf,
    workdir: Option<TempDir>,
}

impl ArtifactDescriptor {
    /// Describe an existing archive the caller owns.
    pub fn from_path(path: &Path) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = file_name
            .strip_suffix(".tar.gz")
            .unwrap_or(&file_name)
            .to_owned();
        Self {
            name,
            path: path.to_path_buf(),
            workdir: None,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.workdir.is_some()
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.tar.gz", self.name))
    }

    /// Remove the packager's temporary directory. No-op for caller-supplied
    /// archives.
    pub fn cleanup(self) {
        if let Some(dir) = self.workdir {
            let shown = dir.path().display().to_string();
            match dir.close() {
                Ok(()) => debug!("removed temporary artifact dir {shown}"),
                Err(e) => warn!("failed to remove temporary artifact dir {shown}: {e}"),
            }
        }
    }
}

pub fn test_collection_name(epoch_seconds: i64) -> String {
    format!("{TEST_NAME_PREFIX}{epoch_seconds}")
}

fn galaxy_yml(name: &str) -> String {
    format!(
        "namespace: {name}
name: {name}
version: {TEST_VERSION}
readme: README.md
authors:
  - Test Author <test@example.com>
description: Test collection for Galaxy service validation
"
    )
}

/// Build a fresh test collection named after the current Unix time.
pub fn create_test_artifact() -> Result<ArtifactDescriptor, ClientError> {
    create_named_artifact(&test_collection_name(crate::epoch_seconds()))
}

pub fn create_named_artifact(name: &str) -> Result<ArtifactDescriptor, ClientError> {
    let workdir = tempfile::Builder::new()
        .prefix("galaxy-check-")
        .tempdir()?;
    let root = workdir.path().join(name);

    fs::create_dir_all(root.join("tests"))?;
    fs::create_dir_all(root.join("roles/test_role/meta"))?;
    fs::write(root.join("README.md"), README)?;
    fs::write(root.join("galaxy.yml"), galaxy_yml(name))?;
    fs::write(root.join("roles/test_role/meta/main.yml"), ROLE_META)?;
    fs::write(root.join("tests/test.yml"), TEST_PLAYBOOK)?;

    let tar_path = workdir.path().join(format!("{name}-{TEST_VERSION}.tar.gz"));
    let file = fs::File::create(&tar_path)?;
    let mut ar = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    ar.append_dir_all(name, &root)?;
    ar.into_inner()?.finish()?;

    debug!("packaged test collection {}", tar_path.display());
    Ok(ArtifactDescriptor {
        name: name.to_owned(),
        path: tar_path,
        workdir: Some(workdir),
    })
}
