//! Report artifacts owned by an analysis.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Which report slot of an analysis an artifact occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Map,
    Table,
}

impl ReportKind {
    pub const ALL: [ReportKind; 2] = [ReportKind::Map, ReportKind::Table];

    pub fn as_str(self) -> &'static str {
        match self {
            ReportKind::Map => "map",
            ReportKind::Table => "table",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable reference to a stored report file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: ReportKind,
    pub path: PathBuf,
}

impl ArtifactRef {
    pub fn new(kind: ReportKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.path.display())
    }
}
