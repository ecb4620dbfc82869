#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use csvw_tabular::fetch::{Fetched, MapFetcher};
use tempfile::{TempDir, tempdir};

/// Routes crate logs through the test harness when RUST_LOG is set.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .is_test(true)
        .try_init();
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// Builder for the in-memory fetcher the scenario tests run against.
pub struct SiteBuilder {
    fetcher: MapFetcher,
}

impl SiteBuilder {
    pub fn new() -> Self {
        SiteBuilder {
            fetcher: MapFetcher::new(),
        }
    }

    pub fn resource(mut self, url: &str, body: &str) -> Self {
        self.fetcher.insert(url, body);
        self
    }

    pub fn resource_with(mut self, fetched: Fetched) -> Self {
        self.fetcher.insert_full(fetched);
        self
    }

    pub fn build(self) -> Box<MapFetcher> {
        Box::new(self.fetcher)
    }
}
