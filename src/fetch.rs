//! Tiled and scaled image downloading from IIIF image services.
//!
//! Two strategies cover the whole image: a single server-side scaled
//! request when a maximum size is given, or a grid of full-resolution
//! tiles stitched into one canvas. Tiles are mutually independent, so they
//! are fetched with bounded parallelism; each decoded tile is blitted into
//! a disjoint rectangle of the pre-zeroed canvas as it arrives. Any tile
//! failure aborts the whole download, so callers never see a raster with
//! holes.

use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::Client;
use tracing::{debug, info};

use crate::error::Error;
use crate::iiif::url::{image_url, Region, Size};
use crate::iiif::{self, ServiceInfo};
use crate::raster::Raster;

/// Default number of tile requests in flight during a stitched download.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// One cell of the tile grid covering a full-resolution image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRegion {
    pub row: u32,
    pub col: u32,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl TileRegion {
    fn region(&self) -> Region {
        Region::Rect { x: self.x, y: self.y, w: self.w, h: self.h }
    }
}

/// Compute the tile grid for an image.
///
/// `cols = ceil(width / tile_size)`, `rows = ceil(height / tile_size)`;
/// tiles in the last row/column are clamped to the image edge, never
/// padded, never skipped.
///
/// # Errors
/// Returns [`Error::Config`] if `tile_size` is zero.
pub fn tile_grid(width: u32, height: u32, tile_size: u32) -> Result<Vec<TileRegion>, Error> {
    if tile_size == 0 {
        return Err(Error::Config("tile size must be positive".to_string()));
    }
    let cols = width.div_ceil(tile_size);
    let rows = height.div_ceil(tile_size);

    let mut regions = Vec::with_capacity(cols as usize * rows as usize);
    for row in 0..rows {
        for col in 0..cols {
            let x = col * tile_size;
            let y = row * tile_size;
            regions.push(TileRegion {
                row,
                col,
                x,
                y,
                w: tile_size.min(width - x),
                h: tile_size.min(height - y),
            });
        }
    }
    Ok(regions)
}

/// Downloads map images from a resolved IIIF image service.
///
/// # Example
///
/// ```rust,no_run
/// use mapstitch::Downloader;
///
/// # async fn run() -> Result<(), mapstitch::Error> {
/// let dl = Downloader::from_manifest("https://example.org/iiif/manifest").await?;
/// let full = dl.download(None).await?;          // tiled, full resolution
/// let small = dl.download(Some(2000)).await?;   // one scaled request
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    service: ServiceInfo,
    concurrency: usize,
}

impl Downloader {
    /// Build a downloader for an already resolved service.
    #[must_use]
    pub fn new(service: ServiceInfo) -> Self {
        Self {
            client: Client::new(),
            service,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Resolve a IIIF manifest and build a downloader in one step.
    ///
    /// # Errors
    /// Returns [`Error::Resolution`] if the manifest or capability document
    /// cannot be resolved.
    pub async fn from_manifest(manifest_url: &str) -> Result<Self, Error> {
        let client = Client::new();
        let service = iiif::resolve_manifest(&client, manifest_url).await?;
        Ok(Self { client, service, concurrency: DEFAULT_CONCURRENCY })
    }

    /// Resolve an image service URL directly and build a downloader.
    ///
    /// # Errors
    /// Returns [`Error::Resolution`] if the capability document cannot be
    /// resolved.
    pub async fn from_service_url(service_url: &str) -> Result<Self, Error> {
        let client = Client::new();
        let service = iiif::resolve_service(&client, service_url).await?;
        Ok(Self { client, service, concurrency: DEFAULT_CONCURRENCY })
    }

    /// Use a preconfigured HTTP client (timeouts, proxies, headers).
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Bound the number of tile requests in flight.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// The resolved service this downloader fetches from.
    #[must_use]
    pub fn service(&self) -> &ServiceInfo {
        &self.service
    }

    /// Download the image.
    ///
    /// With `max_size` set and the image larger than it on either edge, one
    /// request asks the server to scale the longer edge down to `max_size`
    /// pixels; this path never touches the tiling grid. Otherwise the full
    /// resolution is fetched as a tile grid and stitched.
    ///
    /// # Errors
    /// Returns [`Error::Fetch`] naming the failed region if any request
    /// fails or returns an undecodable payload; no partial raster is
    /// returned.
    pub async fn download(&self, max_size: Option<u32>) -> Result<Raster, Error> {
        match max_size {
            Some(max) if self.service.width.max(self.service.height) > max => {
                self.download_scaled(max).await
            }
            _ => self.download_tiled().await,
        }
    }

    /// Download with an overall deadline.
    ///
    /// On expiry all in-flight tile requests are dropped and the call fails
    /// with [`Error::Cancelled`] rather than returning a partial raster.
    ///
    /// # Errors
    /// As [`Downloader::download`], plus [`Error::Cancelled`] on timeout.
    pub async fn download_with_timeout(
        &self,
        max_size: Option<u32>,
        timeout: Duration,
    ) -> Result<Raster, Error> {
        tokio::time::timeout(timeout, self.download(max_size))
            .await
            .map_err(|_| Error::Cancelled)?
    }

    /// Download a specific region of the image in a single request.
    ///
    /// With `scale < 1` the server is asked for an explicit output size of
    /// `round(w * scale) x round(h * scale)` (each at least 1 px); with
    /// `scale == 1` the region comes back at source resolution. Independent
    /// of the tiling grid.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if `scale` is outside `(0, 1]` and
    /// [`Error::Fetch`] if the request fails.
    pub async fn get_region(
        &self,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
        scale: f64,
    ) -> Result<Raster, Error> {
        if !(scale > 0.0 && scale <= 1.0) {
            return Err(Error::Config(format!("scale must be in (0, 1], got {scale}")));
        }

        let region = Region::Rect { x, y, w, h };
        let size = if scale < 1.0 {
            let sw = ((f64::from(w) * scale).round() as u32).max(1);
            let sh = ((f64::from(h) * scale).round() as u32).max(1);
            Size::Exact(sw, sh)
        } else {
            Size::Full
        };

        let url = image_url(&self.service.base_url, region, size);
        self.fetch_image(&url, &region.to_string()).await
    }

    async fn download_scaled(&self, max_size: u32) -> Result<Raster, Error> {
        let url = image_url(
            &self.service.base_url,
            Region::Full,
            Size::Fit(max_size, max_size),
        );
        info!(max_size, "downloading scaled image");
        self.fetch_image(&url, "full").await
    }

    async fn download_tiled(&self) -> Result<Raster, Error> {
        let ServiceInfo { width, height, tile_size, .. } = self.service;
        let regions = tile_grid(width, height, tile_size)?;
        info!(width, height, tiles = regions.len(), "downloading tiled image");

        let mut canvas = Raster::zeroed(width, height);

        let mut fetches = stream::iter(regions.into_iter().map(|tile| {
            let url = image_url(&self.service.base_url, tile.region(), Size::Full);
            async move {
                let raster = self.fetch_image(&url, &tile.region().to_string()).await?;
                Ok::<_, Error>((tile, raster))
            }
        }))
        .buffer_unordered(self.concurrency);

        // Tiles cover disjoint canvas rectangles, so stitch order is
        // immaterial; the copy is clamped to whatever size the server
        // actually returned.
        while let Some((tile, raster)) = fetches.try_next().await? {
            canvas.copy_into(tile.x, tile.y, &raster);
            debug!(row = tile.row, col = tile.col, "stitched tile");
        }

        Ok(canvas)
    }

    async fn fetch_image(&self, url: &str, region: &str) -> Result<Raster, Error> {
        let fetch_err = |message: String| Error::Fetch {
            region: region.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?
            .error_for_status()
            .map_err(|e| fetch_err(e.to_string()))?;

        let bytes = response.bytes().await.map_err(|e| fetch_err(e.to_string()))?;
        let img = image::load_from_memory(&bytes)
            .map_err(|e| fetch_err(format!("undecodable payload: {e}")))?;

        // Forced RGB: stitching assumes three channels everywhere
        Ok(Raster::from_rgb_image(img.to_rgb8()))
    }
}

/// Derive a filesystem-safe filename from a label or, failing that, the
/// last segments of the service URL.
#[must_use]
pub fn suggest_filename(service_url: &str, label: &str, suffix: &str) -> String {
    let name = if label.is_empty() {
        let trimmed = service_url.trim_end_matches('/');
        let parts: Vec<&str> = trimmed.rsplit('/').take(2).collect();
        let joined = parts.into_iter().rev().collect::<Vec<_>>().join("_");
        sanitize(&joined, false)
    } else {
        sanitize(label, true)
    };
    format!("{name}{suffix}.jpg")
}

fn sanitize(input: &str, collapse_spaces: bool) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_space = false;
    for ch in input.chars() {
        if ch.is_alphanumeric() || ch == '-' || ch == '_' {
            out.push(ch);
            last_was_space = false;
        } else if collapse_spaces && ch.is_whitespace() {
            if !last_was_space && !out.is_empty() {
                out.push('_');
            }
            last_was_space = true;
        } else if !collapse_spaces {
            out.push('_');
        }
    }
    let trimmed = out.trim_end_matches('_');
    trimmed.chars().take(80).collect()
}
