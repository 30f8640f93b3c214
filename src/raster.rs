//! In-memory raster with optional georeferencing.
//!
//! A [`Raster`] is an interleaved 8-bit RGB buffer. Every decode path forces
//! three channels, so stitching never has to reconcile differing channel
//! depths. Georeferencing (EPSG code + affine transform) is attached as a
//! unit: both present or both absent.

use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::debug;

use crate::error::Error;
use crate::geo::{patch_geo_bounds, AffineTransform, Bounds};
use crate::geotiff;

/// Number of interleaved channels in every raster buffer.
pub const CHANNELS: usize = 3;

/// An addressable RGB raster, row-major, top-left origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    data: Vec<u8>,
    width: u32,
    height: u32,
    crs: Option<i32>,
    transform: Option<AffineTransform>,
    path: Option<PathBuf>,
}

impl Raster {
    /// Wrap an interleaved RGB buffer.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the buffer length does not equal
    /// `width * height * 3`.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, Error> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(Error::Config(format!(
                "raster buffer is {} bytes, expected {expected} for {width}x{height}x{CHANNELS}",
                data.len()
            )));
        }
        Ok(Self { data, width, height, crs: None, transform: None, path: None })
    }

    /// A zero-filled raster. Used as the stitching canvas so that any
    /// omitted tile leaves a deterministic black gap rather than garbage.
    #[must_use]
    pub fn zeroed(width: u32, height: u32) -> Self {
        Self {
            data: vec![0; width as usize * height as usize * CHANNELS],
            width,
            height,
            crs: None,
            transform: None,
            path: None,
        }
    }

    pub(crate) fn from_rgb_image(img: RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
            crs: None,
            transform: None,
            path: None,
        }
    }

    /// Load a raster from a local file.
    ///
    /// GeoTIFF files (`.tif`/`.tiff`) have CRS and affine transform
    /// extracted when present; PNG/JPEG load pixel data only.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the file does not exist and
    /// [`Error::Unsupported`] for unknown extensions or undecodable content.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("image not found: {}", path.display()),
            )));
        }

        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        let mut raster = match ext.as_str() {
            "tif" | "tiff" => geotiff::load(path)?,
            "png" | "jpg" | "jpeg" => {
                let img = image::open(path)
                    .map_err(|e| Error::Unsupported(format!("{}: {e}", path.display())))?;
                Self::from_rgb_image(img.to_rgb8())
            }
            other => {
                return Err(Error::Unsupported(format!("unknown extension: .{other}")));
            }
        };
        raster.path = Some(path.to_path_buf());
        Ok(raster)
    }

    /// Save the raster to an image file; the format follows the extension.
    ///
    /// Persistence is a caller convenience: nothing in the fetch or
    /// patchify pipeline depends on it.
    ///
    /// # Errors
    /// Returns [`Error::Unsupported`] if encoding fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        let img = RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| Error::Unsupported("raster buffer shape mismatch".to_string()))?;
        img.save(path)
            .map_err(|e| Error::Unsupported(format!("failed to save {}: {e}", path.display())))?;
        debug!(path = %path.display(), "saved raster");
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The interleaved RGB buffer, `height * width * 3` bytes.
    #[inline]
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// File the raster was loaded from, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Attach georeferencing. CRS and transform travel together; there is
    /// no way to set one without the other.
    pub fn georeference(&mut self, crs: i32, transform: AffineTransform) {
        self.crs = Some(crs);
        self.transform = Some(transform);
    }

    #[must_use]
    pub fn crs(&self) -> Option<i32> {
        self.crs
    }

    #[must_use]
    pub fn transform(&self) -> Option<&AffineTransform> {
        self.transform.as_ref()
    }

    #[must_use]
    pub fn is_georeferenced(&self) -> bool {
        self.crs.is_some() && self.transform.is_some()
    }

    /// Geographic bounds of the full image, or `None` if not georeferenced.
    #[must_use]
    pub fn bounds(&self) -> Option<Bounds> {
        let transform = self.transform.as_ref()?;
        Some(patch_geo_bounds(0, 0, self.width, self.height, transform))
    }

    /// One pixel's channels.
    ///
    /// # Panics
    /// Panics if `(x, y)` is out of bounds.
    #[inline]
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        &self.data[idx..idx + CHANNELS]
    }

    /// Copy `src` into this raster with its top-left corner at `(x, y)`.
    ///
    /// Only the overlap between `src` and this raster's extent is written,
    /// so a tile that comes back slightly larger or smaller than requested
    /// never writes out of bounds.
    pub fn copy_into(&mut self, x: u32, y: u32, src: &Raster) {
        if x >= self.width || y >= self.height {
            return;
        }
        let copy_w = src.width.min(self.width - x) as usize;
        let copy_h = src.height.min(self.height - y) as usize;

        for row in 0..copy_h {
            let src_start = row * src.width as usize * CHANNELS;
            let dst_start =
                ((y as usize + row) * self.width as usize + x as usize) * CHANNELS;
            let len = copy_w * CHANNELS;
            self.data[dst_start..dst_start + len]
                .copy_from_slice(&src.data[src_start..src_start + len]);
        }
    }
}
