//! 📸 Capture-side collaborators

pub mod checkpoint;
pub mod directory;

pub use checkpoint::{SeenCheckpoint, SeenLedger};
pub use directory::DirectoryCaptureSource;
