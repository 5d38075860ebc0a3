use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A requested output location, before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PathSpec {
    /// An explicit file path. An extension is appended if it has none.
    File { path: PathBuf },
    /// A directory plus a base file name; the extension is always appended.
    InDirectory { dir: PathBuf, hint: String },
}

impl PathSpec {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File { path: path.into() }
    }

    pub fn in_dir(dir: impl Into<PathBuf>, hint: impl Into<String>) -> Self {
        Self::InDirectory {
            dir: dir.into(),
            hint: hint.into(),
        }
    }

    /// Unresolved target path (`dir/hint` for directory specs).
    pub fn target(&self) -> PathBuf {
        match self {
            PathSpec::File { path } => path.clone(),
            PathSpec::InDirectory { dir, hint } => dir.join(hint),
        }
    }
}

/// Result of a successful resolution.
///
/// `resolved_absolute_path` is always inside the allowed root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathPlan {
    pub resolved_absolute_path: PathBuf,
    /// 0 if the requested name was free.
    pub collision_suffix_applied: u32,
}

impl PathPlan {
    pub fn path(&self) -> &Path {
        &self.resolved_absolute_path
    }
}
