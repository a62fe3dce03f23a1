//! 🖼️ Raster stages: decode → isolate chart region → binarize
//!
//! Everything here is synchronous and CPU-bound; callers run it off the
//! async runtime.

pub mod codec;
pub mod components;
pub mod filters;
pub mod preprocess;
pub mod region;

pub use codec::{decode, DecodedRaster};
pub use preprocess::{preprocess, AnalysisSurface};
pub use region::{isolate, ChartRegion};
