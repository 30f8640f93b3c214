//! Raster patchifying: deterministic grid decomposition with blank filtering.
//!
//! A patch is a rectangular sub-region produced purely by local slicing,
//! distinct from a tile (a network-fetch unit). Patches are emitted in
//! raster-scan order; `row`/`col` reflect grid position, not emission
//! order, so skipped cells leave gaps in the numbering that are expected
//! and preserved.

use serde::Serialize;

use crate::error::Error;
use crate::geo::{patch_geo_bounds, Bounds};
use crate::raster::{Raster, CHANNELS};

/// How a pixel is classified as background for blank-patch filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlankRule {
    /// A pixel is blank when every channel is at least the given value.
    /// Suits white-background scanned imagery.
    White(u8),
    /// A pixel is blank when every channel is exactly zero. Suits
    /// nodata-filled rasters.
    Zero,
}

impl Default for BlankRule {
    fn default() -> Self {
        BlankRule::White(250)
    }
}

impl BlankRule {
    #[inline]
    fn is_blank(self, pixel: &[u8]) -> bool {
        match self {
            BlankRule::White(threshold) => pixel.iter().all(|&c| c >= threshold),
            BlankRule::Zero => pixel.iter().all(|&c| c == 0),
        }
    }
}

/// Patchify configuration.
#[derive(Debug, Clone)]
pub struct PatchConfig {
    /// Size of each square patch in pixels.
    pub patch_size: u32,
    /// Overlap between adjacent patches in pixels; must be less than
    /// `patch_size`.
    pub overlap: u32,
    /// Exclude patches whose blank ratio exceeds `blank_threshold`.
    pub skip_blank: bool,
    /// Fraction of blank pixels above which a patch is skipped.
    pub blank_threshold: f64,
    /// Background classification rule.
    pub blank_rule: BlankRule,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            patch_size: 256,
            overlap: 0,
            skip_blank: true,
            blank_threshold: 0.95,
            blank_rule: BlankRule::default(),
        }
    }
}

impl PatchConfig {
    #[must_use]
    pub fn with_patch_size(mut self, patch_size: u32) -> Self {
        self.patch_size = patch_size;
        self
    }

    #[must_use]
    pub fn with_overlap(mut self, overlap: u32) -> Self {
        self.overlap = overlap;
        self
    }

    #[must_use]
    pub fn with_skip_blank(mut self, skip_blank: bool) -> Self {
        self.skip_blank = skip_blank;
        self
    }

    #[must_use]
    pub fn with_blank_threshold(mut self, threshold: f64) -> Self {
        self.blank_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_blank_rule(mut self, rule: BlankRule) -> Self {
        self.blank_rule = rule;
        self
    }
}

/// A single patch: grid position plus the pixel rectangle it covers within
/// its parent raster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Patch {
    /// Grid row, incremented once per vertical step regardless of skips.
    pub row: u32,
    /// Grid column, incremented once per horizontal step including skipped
    /// cells.
    pub col: u32,
    pub pixel_x: u32,
    pub pixel_y: u32,
    pub pixel_w: u32,
    pub pixel_h: u32,
    /// Geographic bounds when the parent raster is georeferenced.
    pub geo_bounds: Option<Bounds>,
}

/// Ordered collection of patches referencing their parent raster.
///
/// Sequence order is emission order (row-major). Pixel data stays in the
/// parent; [`PatchSet::pixels`] copies a patch's region out on demand.
#[derive(Debug)]
pub struct PatchSet<'a> {
    patches: Vec<Patch>,
    parent: &'a Raster,
}

impl<'a> PatchSet<'a> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Patch> {
        self.patches.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Patch> {
        self.patches.iter()
    }

    /// All patch descriptors in emission order.
    #[must_use]
    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    /// The raster the patches were cut from.
    #[must_use]
    pub fn parent(&self) -> &Raster {
        self.parent
    }

    /// Copy a patch's pixel region out of the parent as an interleaved RGB
    /// buffer of `pixel_w * pixel_h * 3` bytes.
    #[must_use]
    pub fn pixels(&self, index: usize) -> Option<Vec<u8>> {
        let patch = self.patches.get(index)?;
        let parent_w = self.parent.width() as usize;
        let data = self.parent.data();

        let mut out = Vec::with_capacity(patch.pixel_w as usize * patch.pixel_h as usize * CHANNELS);
        for row in 0..patch.pixel_h as usize {
            let start =
                ((patch.pixel_y as usize + row) * parent_w + patch.pixel_x as usize) * CHANNELS;
            out.extend_from_slice(&data[start..start + patch.pixel_w as usize * CHANNELS]);
        }
        Some(out)
    }
}

impl Raster {
    /// Split the raster into a grid of patches.
    ///
    /// The grid walks top-to-bottom, left-to-right with stride
    /// `patch_size - overlap`. Candidate rectangles are clamped to the
    /// raster bounds, so edge patches are smaller than `patch_size` rather
    /// than padded. Skipped cells (blank content) consume their grid index
    /// silently; they are expected control-flow outcomes, never errors.
    ///
    /// When the raster is georeferenced, every emitted patch carries
    /// geographic bounds derived from the affine transform.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if `overlap >= patch_size` or
    /// `patch_size == 0`.
    pub fn patchify(&self, config: &PatchConfig) -> Result<PatchSet<'_>, Error> {
        if config.patch_size == 0 {
            return Err(Error::Config("patch_size must be positive".to_string()));
        }
        let stride = config
            .patch_size
            .checked_sub(config.overlap)
            .filter(|&s| s > 0)
            .ok_or_else(|| Error::Config("overlap must be less than patch_size".to_string()))?;

        let mut patches = Vec::new();
        let mut row_idx = 0;

        let mut y = 0;
        while y < self.height() {
            let mut col_idx = 0;
            let mut x = 0;
            while x < self.width() {
                let pw = config.patch_size.min(self.width() - x);
                let ph = config.patch_size.min(self.height() - y);
                if pw == 0 || ph == 0 {
                    col_idx += 1;
                    x += stride;
                    continue;
                }

                if config.skip_blank
                    && self.blank_ratio(x, y, pw, ph, config.blank_rule) > config.blank_threshold
                {
                    col_idx += 1;
                    x += stride;
                    continue;
                }

                let geo_bounds = if self.is_georeferenced() {
                    self.transform().map(|t| patch_geo_bounds(x, y, pw, ph, t))
                } else {
                    None
                };

                patches.push(Patch {
                    row: row_idx,
                    col: col_idx,
                    pixel_x: x,
                    pixel_y: y,
                    pixel_w: pw,
                    pixel_h: ph,
                    geo_bounds,
                });
                col_idx += 1;
                x += stride;
            }
            row_idx += 1;
            y += stride;
        }

        Ok(PatchSet { patches, parent: self })
    }

    /// Fraction of pixels in the rectangle classified as blank.
    fn blank_ratio(&self, x: u32, y: u32, w: u32, h: u32, rule: BlankRule) -> f64 {
        let parent_w = self.width() as usize;
        let data = self.data();
        let mut blank = 0usize;

        for row in y as usize..(y + h) as usize {
            let line = &data[(row * parent_w + x as usize) * CHANNELS..];
            for px in line[..w as usize * CHANNELS].chunks_exact(CHANNELS) {
                if rule.is_blank(px) {
                    blank += 1;
                }
            }
        }
        blank as f64 / (w as usize * h as usize) as f64
    }
}
