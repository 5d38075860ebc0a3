//! Output path resolution.
//!
//! Every artifact path is checked against an allowed root after full
//! normalisation: the longest existing ancestor is canonicalised (resolving
//! symlinks), the remaining components are applied lexically, and the result
//! must stay inside the canonical root. Existing file names get a numeric
//! suffix (`name_1.ext`, `name_2.ext`, ...).
//!
//! A free name is only a hint: two writers racing on the same name can both
//! observe it as free. The placer refuses to overwrite at commit time and the
//! loser resolves again.

mod error;
mod path_resolver;
mod types;

pub use error::PathError;
pub use path_resolver::PathResolver;
pub use types::{PathPlan, PathSpec};
