//! Placer module for writing artifacts to their final destinations.
//!
//! Downloads are streamed into a hidden staging file in the destination
//! directory and renamed into place once complete, so a final-named file
//! only ever appears with full content.
//!
//! # Features
//!
//! - Atomic rename from a same-directory staging file
//! - Staging files removed on drop (failure or cancellation)
//! - SHA-256 digest and size computed while writing
//! - No-clobber commits
//! - Automatic parent directory creation
//!
//! # Example
//!
//! ```ignore
//! use genvoy_core::placer::{FsPlacer, Placer};
//!
//! let placer = FsPlacer::with_defaults();
//! let mut staged = placer.stage(Path::new("/out")).await?;
//! staged.write(&bytes).await?;
//! let placed = placer.commit(&mut staged, Path::new("/out/fox.png")).await?;
//! println!("Wrote {} bytes ({})", placed.size_bytes, placed.sha256);
//! ```

mod config;
mod error;
mod fs_placer;
mod staged;
mod traits;
mod types;

pub use config::PlacerConfig;
pub use error::PlacerError;
pub use fs_placer::FsPlacer;
pub use staged::StagedFile;
pub use traits::Placer;
pub use types::PlacedFile;
