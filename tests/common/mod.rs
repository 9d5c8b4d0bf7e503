#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use csv_harmonizer::{MemoryStore, Schema};
use tempfile::{TempDir, tempdir};

/// Absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

pub fn codebook() -> Schema {
    Schema::load(&fixture_path("codebook.yml")).expect("load codebook fixture")
}

/// Scratch directory holding the store file and any outputs of one test.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    pub fn store_path(&self) -> PathBuf {
        self.file("records.store")
    }

    pub fn load_store(&self) -> MemoryStore {
        MemoryStore::load(&self.store_path()).expect("load store")
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.file(name);
        fs::write(&path, contents).expect("write temp file");
        path
    }
}
