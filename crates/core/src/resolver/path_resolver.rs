use std::path::{Component, Path, PathBuf};

use super::error::PathError;
use super::types::{PathPlan, PathSpec};

/// Resolves output locations inside a fixed, canonical allowed root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Binds a resolver to `allowed_root`, which must exist.
    pub fn new(allowed_root: impl AsRef<Path>) -> Result<Self, PathError> {
        let path = allowed_root.as_ref();
        let root = std::fs::canonicalize(path).map_err(|source| PathError::InvalidRoot {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { root })
    }

    /// The canonical allowed root.
    pub fn allowed_root(&self) -> &Path {
        &self.root
    }

    /// Resolves an explicit file path.
    ///
    /// Relative paths are taken relative to the allowed root. When the path
    /// has no extension and `preferred_ext` is given, it is appended before
    /// the collision check.
    pub fn resolve(
        &self,
        requested: &Path,
        preferred_ext: Option<&str>,
    ) -> Result<PathPlan, PathError> {
        let mut target = self.contain(requested)?;
        if target.extension().is_none() {
            if let Some(ext) = preferred_ext {
                target.set_extension(ext);
            }
        }
        self.assign_free_name(target)
    }

    /// Resolves `dir/hint[.ext]` for directory-style targets.
    pub fn resolve_in_dir(
        &self,
        dir: &Path,
        hint: &str,
        preferred_ext: Option<&str>,
    ) -> Result<PathPlan, PathError> {
        let dir = self.contain(dir)?;
        let file_name = match preferred_ext {
            Some(ext) => format!("{}.{}", check_hint(hint)?, ext),
            None => check_hint(hint)?.to_string(),
        };
        self.assign_free_name(dir.join(file_name))
    }

    /// Resolves either kind of [`PathSpec`].
    pub fn resolve_spec(
        &self,
        spec: &PathSpec,
        preferred_ext: Option<&str>,
    ) -> Result<PathPlan, PathError> {
        match spec {
            PathSpec::File { path } => self.resolve(path, preferred_ext),
            PathSpec::InDirectory { dir, hint } => self.resolve_in_dir(dir, hint, preferred_ext),
        }
    }

    /// Containment check only, without extension or collision handling.
    ///
    /// Returns the normalised target path.
    pub fn check(&self, spec: &PathSpec) -> Result<PathBuf, PathError> {
        match spec {
            PathSpec::File { path } => self.contain(path),
            PathSpec::InDirectory { dir, hint } => {
                let dir = self.contain(dir)?;
                Ok(dir.join(check_hint(hint)?))
            }
        }
    }

    /// Normalises `requested` and verifies it stays inside the root.
    fn contain(&self, requested: &Path) -> Result<PathBuf, PathError> {
        let absolute = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            self.root.join(requested)
        };
        let resolved = normalize(&absolute)?;
        if !resolved.starts_with(&self.root) {
            tracing::warn!(
                "Blocked path escape: {} resolves to {}",
                requested.display(),
                resolved.display()
            );
            return Err(PathError::Escape {
                resolved,
                root: self.root.clone(),
            });
        }
        Ok(resolved)
    }

    fn assign_free_name(&self, target: PathBuf) -> Result<PathPlan, PathError> {
        if target == self.root || target.is_dir() {
            return Err(PathError::IsDirectory(target));
        }
        if !name_taken(&target) {
            return Ok(PathPlan {
                resolved_absolute_path: target,
                collision_suffix_applied: 0,
            });
        }

        let stem = target
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = target
            .extension()
            .map(|e| e.to_string_lossy().into_owned());
        let parent = target.parent().unwrap_or(&self.root).to_path_buf();

        for suffix in 1u32.. {
            let name = match &ext {
                Some(ext) => format!("{}_{}.{}", stem, suffix, ext),
                None => format!("{}_{}", stem, suffix),
            };
            let candidate = parent.join(name);
            if !name_taken(&candidate) {
                tracing::debug!(
                    "{} exists, using {}",
                    target.display(),
                    candidate.display()
                );
                return Ok(PathPlan {
                    resolved_absolute_path: candidate,
                    collision_suffix_applied: suffix,
                });
            }
        }

        Err(PathError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("no free name for {}", target.display()),
        )))
    }
}

/// Accepts only a single plain file name component.
fn check_hint(hint: &str) -> Result<&str, PathError> {
    let mut components = Path::new(hint).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(hint),
        _ => Err(PathError::InvalidFileName(hint.to_string())),
    }
}

/// Dangling symlinks count as taken.
fn name_taken(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

/// Symlink hops allowed while resolving one path.
const MAX_LINK_HOPS: usize = 40;

/// Resolves an absolute path component by component, following every
/// symlink as it is reached so a later `..` applies to the link target.
/// Components that do not exist yet are taken literally.
fn normalize(absolute: &Path) -> Result<PathBuf, PathError> {
    let mut hops = 0;
    resolve_components(absolute, &mut hops)
}

fn resolve_components(path: &Path, hops: &mut usize) -> Result<PathBuf, PathError> {
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                resolved.push(name);
                resolved = follow_link(resolved, hops)?;
            }
        }
    }
    Ok(resolved)
}

/// Replaces `path` with its link target when it is a symlink. The parent is
/// already resolved, so relative targets are joined onto it.
fn follow_link(path: PathBuf, hops: &mut usize) -> Result<PathBuf, PathError> {
    let is_link = std::fs::symlink_metadata(&path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false);
    if !is_link {
        return Ok(path);
    }

    *hops += 1;
    if *hops > MAX_LINK_HOPS {
        return Err(PathError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("too many levels of symbolic links at {}", path.display()),
        )));
    }
    let target = std::fs::read_link(&path)?;
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
    resolve_components(&base.join(target), hops)
}
