//! Metadata-driven dispatch and data containers for multi-extension
//! astronomical FITS files.
//!
//! A source file is resolved to the most specific registered class that
//! claims it, which determines its tag rules (classification labels),
//! descriptors (named metadata accessors) and keyword mappings. The
//! resulting [`AstroData`] handle exposes the dataset as a list of
//! science subunits sharing one global header, with cheap slicing views
//! that alias the shared metadata.
//!
//! ```no_run
//! use std::path::Path;
//! use astrodata_core::AstroDataFactory;
//!
//! # fn main() -> astrodata_core::Result<()> {
//! let factory = AstroDataFactory::new();
//! let ad = factory.open(Path::new("N20260830S0001.fits"))?;
//! println!("{} -> {:?}", ad.class().name(), ad.tags()?);
//! for view in ad.iter() {
//!     println!("unit {} has shape {:?}", view.id()?, view.data()?.shape());
//! }
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;
pub mod factory;
pub mod fits;
pub mod header;
pub mod nddata;
pub mod registry;
pub mod table;
pub mod tags;

pub use crate::core::{AstroData, Payload, RESERVED_NAMES};
pub use crate::error::{Error, Result};
pub use crate::factory::{AstroDataFactory, DEFAULT_EXTENSION};
pub use crate::fits::{DataFile, ExtPayload, Extension};
pub use crate::header::{Card, Header, Value};
pub use crate::nddata::{DqBits, Extra, NdData, PixelArray, Wcs};
pub use crate::registry::{CandidateClass, Descriptor, MatcherFn, Registry, ResolvedClass};
pub use crate::table::{Column, Table};
pub use crate::tags::{RuleFn, TagRule, TagSet};

/// Open a file with a default, base-class-only factory.
///
/// Useful for quick inspection; real pipelines build an
/// [`AstroDataFactory`] and register their class hierarchy first.
pub fn open(path: &std::path::Path) -> Result<AstroData> {
    AstroDataFactory::new().open(path)
}
