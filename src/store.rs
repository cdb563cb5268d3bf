//! Flat-file persistence: queries.json (overwritten per generation),
//! results.json (append via read-modify-write), report.txt (overwritten).
//!
//! The results append has no locking. Stages must be invoked sequentially;
//! the shell enforces that, not this module.

use crate::error::{ResearchError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// One successfully fetched page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResult {
    pub url: String,
    pub title: String,
    pub text: String,
}

pub struct Store {
    queries_path: PathBuf,
    results_path: PathBuf,
    report_path: PathBuf,
}

impl Store {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            queries_path: dir.join("queries.json"),
            results_path: dir.join("results.json"),
            report_path: dir.join("report.txt"),
        }
    }

    /// Create the store files if they are missing. The results store is
    /// seeded with an empty array, the others start empty.
    pub fn init(&self) -> Result<()> {
        if let Some(parent) = self.results_path.parent() {
            fs::create_dir_all(parent)?;
        }
        for path in [&self.queries_path, &self.report_path] {
            if !path.exists() {
                fs::write(path, "")?;
            }
        }
        if !self.results_path.exists() {
            fs::write(&self.results_path, "[]")?;
        }
        Ok(())
    }

    pub fn load_queries(&self) -> Result<Vec<String>> {
        read_json_or_default(&self.queries_path, "queries store")
    }

    pub fn save_queries(&self, queries: &[String]) -> Result<()> {
        let json = serde_json::to_string_pretty(queries)
            .map_err(|e| ResearchError::MalformedResponse(format!("queries store: {e}")))?;
        fs::write(&self.queries_path, json)?;
        Ok(())
    }

    pub fn load_results(&self) -> Result<Vec<PageResult>> {
        read_json_or_default(&self.results_path, "results store")
    }

    /// Read-modify-write append. The only mutation path for results.
    pub fn append_results(&self, batch: Vec<PageResult>) -> Result<()> {
        let mut existing = self.load_results()?;
        existing.extend(batch);
        let json = serde_json::to_string_pretty(&existing)
            .map_err(|e| ResearchError::MalformedResponse(format!("results store: {e}")))?;
        fs::write(&self.results_path, json)?;
        Ok(())
    }

    pub fn clear_results(&self) -> Result<()> {
        fs::write(&self.results_path, "[]")?;
        Ok(())
    }

    pub fn write_report(&self, report: &str) -> Result<()> {
        fs::write(&self.report_path, report)?;
        Ok(())
    }

    pub fn load_report(&self) -> Result<String> {
        match fs::read_to_string(&self.report_path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

fn read_json_or_default<T>(path: &Path, what: &str) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&contents)
        .map_err(|e| ResearchError::MalformedResponse(format!("{what}: {e}")))
}
