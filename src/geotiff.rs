//! GeoTIFF loading with georeferencing extraction.
//!
//! Decodes the pixel data with the `tiff` crate and reads the geo tags
//! directly: `ModelPixelScale` + `ModelTiepoint` give the affine transform,
//! and the `GeoKeyDirectory` carries the EPSG code. A plain TIFF without
//! geo tags loads fine, it just stays ungeoreferenced.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tracing::{debug, warn};

use crate::error::Error;
use crate::geo::AffineTransform;
use crate::raster::{Raster, CHANNELS};

// GeoKey IDs carrying the CRS code
const GEO_KEY_GEOGRAPHIC_TYPE: u64 = 2048;
const GEO_KEY_PROJECTED_CRS: u64 = 3072;

/// Load a (Geo)TIFF file into a raster.
///
/// # Errors
/// Returns [`Error::Unsupported`] for TIFFs the decoder cannot handle
/// (unknown sample types, unexpected channel counts).
pub fn load(path: &Path) -> Result<Raster, Error> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| Error::Unsupported(format!("{}: {e}", path.display())))?;

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| Error::Unsupported(format!("{}: {e}", path.display())))?;

    // Geo tags are optional; absence just means no georeferencing.
    let pixel_scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok();
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok();
    let epsg = decoder
        .get_tag_u64_vec(Tag::GeoKeyDirectoryTag)
        .ok()
        .and_then(|dir| epsg_from_key_directory(&dir));

    let samples = match decoder
        .read_image()
        .map_err(|e| Error::Unsupported(format!("{}: {e}", path.display())))?
    {
        DecodingResult::U8(buf) => buf,
        // 16-bit samples are common for scanned archival material; take the
        // high byte
        DecodingResult::U16(buf) => buf.into_iter().map(|v| (v >> 8) as u8).collect(),
        _ => {
            return Err(Error::Unsupported(format!(
                "{}: only 8- and 16-bit integer samples are supported",
                path.display()
            )));
        }
    };

    let rgb = normalize_channels(samples, width, height)?;
    let mut raster = Raster::new(rgb, width, height)?;

    match (pixel_scale, tiepoint, epsg) {
        (Some(scale), Some(tie), Some(code)) if scale.len() >= 2 && tie.len() >= 6 => {
            // Tiepoint (i, j, k, x, y, z) maps pixel (i, j) to world (x, y);
            // shift to the raster's top-left corner for a north-up transform.
            let origin_x = tie[3] - tie[0] * scale[0];
            let origin_y = tie[4] + tie[1] * scale[1];
            raster.georeference(code, AffineTransform::north_up(scale[0], scale[1], origin_x, origin_y));
            debug!(epsg = code, width, height, "loaded georeferenced TIFF");
        }
        (scale, tie, code) => {
            if scale.is_some() || tie.is_some() || code.is_some() {
                warn!(path = %path.display(), "incomplete geo tags, loading without georeferencing");
            }
        }
    }

    Ok(raster)
}

/// Force a decoded sample buffer to 3 interleaved channels.
///
/// Grayscale is replicated, RGBA drops alpha, RGB passes through.
fn normalize_channels(samples: Vec<u8>, width: u32, height: u32) -> Result<Vec<u8>, Error> {
    let pixels = width as usize * height as usize;
    if pixels == 0 {
        return Err(Error::Unsupported("empty TIFF image".to_string()));
    }
    if samples.len() % pixels != 0 {
        return Err(Error::Unsupported(format!(
            "sample count {} is not a multiple of {pixels} pixels",
            samples.len()
        )));
    }

    match samples.len() / pixels {
        1 => {
            let mut rgb = Vec::with_capacity(pixels * CHANNELS);
            for v in samples {
                rgb.extend_from_slice(&[v, v, v]);
            }
            Ok(rgb)
        }
        3 => Ok(samples),
        4 => {
            let mut rgb = Vec::with_capacity(pixels * CHANNELS);
            for px in samples.chunks_exact(4) {
                rgb.extend_from_slice(&px[..3]);
            }
            Ok(rgb)
        }
        n => Err(Error::Unsupported(format!("unsupported channel count: {n}"))),
    }
}

/// Extract the EPSG code from a GeoKeyDirectory tag.
///
/// The directory is a flat array of (key, location, count, value) quads
/// after a 4-entry header; a `location` of 0 means `value` holds the code
/// inline. A projected CRS key wins over a geographic one.
fn epsg_from_key_directory(directory: &[u64]) -> Option<i32> {
    let mut geographic = None;
    let mut projected = None;

    for entry in directory.get(4..)?.chunks_exact(4) {
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 {
            continue;
        }
        match key {
            GEO_KEY_GEOGRAPHIC_TYPE => geographic = Some(value),
            GEO_KEY_PROJECTED_CRS => projected = Some(value),
            _ => {}
        }
    }

    projected
        .or(geographic)
        .and_then(|code| i32::try_from(code).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epsg_from_key_directory_projected_wins() {
        // header + GeographicType=4326 + ProjectedCRS=32633
        let dir = [
            1, 1, 0, 2, //
            GEO_KEY_GEOGRAPHIC_TYPE, 0, 1, 4326, //
            GEO_KEY_PROJECTED_CRS, 0, 1, 32633,
        ];
        assert_eq!(epsg_from_key_directory(&dir), Some(32633));
    }

    #[test]
    fn test_epsg_from_key_directory_geographic_only() {
        let dir = [1, 1, 0, 1, GEO_KEY_GEOGRAPHIC_TYPE, 0, 1, 4326];
        assert_eq!(epsg_from_key_directory(&dir), Some(4326));
    }

    #[test]
    fn test_epsg_from_key_directory_ignores_external_location() {
        // location != 0 points into another tag, not an inline code
        let dir = [1, 1, 0, 1, GEO_KEY_PROJECTED_CRS, 34736, 1, 0];
        assert_eq!(epsg_from_key_directory(&dir), None);
    }

    #[test]
    fn test_epsg_from_key_directory_header_only() {
        assert_eq!(epsg_from_key_directory(&[1, 1, 0, 0]), None);
        assert_eq!(epsg_from_key_directory(&[]), None);
    }

    #[test]
    fn test_normalize_channels_gray() {
        let rgb = normalize_channels(vec![7, 9], 2, 1).unwrap();
        assert_eq!(rgb, vec![7, 7, 7, 9, 9, 9]);
    }

    #[test]
    fn test_normalize_channels_rgb_passthrough() {
        let rgb = normalize_channels(vec![1, 2, 3, 4, 5, 6], 2, 1).unwrap();
        assert_eq!(rgb, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_normalize_channels_rgba_drops_alpha() {
        let rgb = normalize_channels(vec![1, 2, 3, 255, 4, 5, 6, 255], 2, 1).unwrap();
        assert_eq!(rgb, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_normalize_channels_bad_count() {
        assert!(normalize_channels(vec![1, 2, 3, 4, 5], 2, 1).is_err());
        assert!(normalize_channels(vec![0; 10], 2, 1).is_err());
    }
}
