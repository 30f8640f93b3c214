#![doc = include_str!("../README.md")]
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`iiif`]: Manifest/service resolution and [`ServiceInfo`] descriptors
//! - [`fetch`]: Tiled and scaled downloading via [`Downloader`]
//! - [`raster`]: In-memory [`Raster`] buffer with optional georeferencing
//! - [`patch`]: Grid decomposition into [`PatchSet`] collections
//! - [`geo`]: Affine pixel/geo conversions and CRS reprojection
//! - [`geotiff`]: GeoTIFF loading with CRS and transform extraction
//! - [`cache`]: Global keyed LRU cache for downloaded rasters
//! - [`error`]: The crate-wide [`Error`] taxonomy

// ============================================================================
// Public modules
// ============================================================================

pub mod cache;
pub mod error;
pub mod fetch;
pub mod geo;
pub mod geotiff;
pub mod iiif;
pub mod patch;
pub mod raster;

// ============================================================================
// Errors
// ============================================================================

pub use error::{Error, Result};

// ============================================================================
// Service Resolution
// ============================================================================

pub use iiif::{resolve_manifest, resolve_service, ServiceInfo};

// ============================================================================
// Downloading
// ============================================================================
// Primary API: Downloader::from_manifest(url).await?.download(max_size).await

pub use fetch::{suggest_filename, tile_grid, Downloader, TileRegion};

// ============================================================================
// Rasters & Patches
// ============================================================================

pub use raster::{Raster, CHANNELS};

pub use patch::{BlankRule, Patch, PatchConfig, PatchSet};

// ============================================================================
// Geo Transforms
// ============================================================================

pub use geo::{
    geo_to_pixel,
    patch_geo_bounds,
    pixel_to_geo,
    project_point,
    reproject_bounds,
    AffineTransform,
    Bounds,
};
