//! The `.bootstrapped` marker file
//!
//! Its presence in the work directory is the only signal that a bootstrap
//! has completed. The file holds one line: `bootstrapped_at: <RFC3339>`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use keel_common::{Error, Result};

/// File name of the marker, relative to the work directory
pub const MARKER_FILE: &str = ".bootstrapped";

const FIELD: &str = "bootstrapped_at:";

/// Record of a completed bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapMarker {
    bootstrapped_at: DateTime<Utc>,
}

impl BootstrapMarker {
    /// A marker stamped with the current time
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    /// A marker stamped with `bootstrapped_at`, truncated to whole seconds
    pub fn at(bootstrapped_at: DateTime<Utc>) -> Self {
        let secs = bootstrapped_at.timestamp();
        Self {
            bootstrapped_at: DateTime::from_timestamp(secs, 0).unwrap_or(bootstrapped_at),
        }
    }

    /// When the bootstrap completed
    pub fn bootstrapped_at(&self) -> DateTime<Utc> {
        self.bootstrapped_at
    }

    /// File contents
    pub fn render(&self) -> String {
        format!(
            "{} {}\n",
            FIELD,
            self.bootstrapped_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }

    /// Parse file contents
    pub fn parse(contents: &str) -> Result<Self> {
        let value = contents
            .lines()
            .find_map(|line| line.trim().strip_prefix(FIELD))
            .ok_or_else(|| {
                Error::repository("read_marker", format!("marker has no {} line", FIELD))
            })?;
        let at = DateTime::parse_from_rfc3339(value.trim()).map_err(|e| {
            Error::repository("read_marker", format!("invalid timestamp in marker: {}", e))
        })?;
        Ok(Self::at(at.with_timezone(&Utc)))
    }

    /// Path of the marker inside `work_dir`
    pub fn path_in(work_dir: &Path) -> PathBuf {
        work_dir.join(MARKER_FILE)
    }

    /// Whether a marker exists in `work_dir`; absence is `Ok(false)`
    pub fn exists(work_dir: &Path) -> Result<bool> {
        let path = Self::path_in(work_dir);
        path.try_exists().map_err(|e| Error::io(&path, e))
    }

    /// Read the marker from `work_dir`, `None` if absent
    pub fn read(work_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path_in(work_dir);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::parse(&contents).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(&path, e)),
        }
    }

    /// Write the marker into `work_dir`, returning its path
    pub fn write(&self, work_dir: &Path) -> Result<PathBuf> {
        let path = Self::path_in(work_dir);
        std::fs::write(&path, self.render()).map_err(|e| Error::io(&path, e))?;
        Ok(path)
    }
}
