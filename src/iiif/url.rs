//! IIIF Image API request URL construction.
//!
//! Requests follow the `{base}/{region}/{size}/{rotation}/{quality}.{format}`
//! convention with rotation fixed at `0`, quality `default`, and format
//! `jpg`.

use std::fmt;

/// Region selector of an image request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// The complete image.
    Full,
    /// A pixel rectangle with top-left `(x, y)` and extent `w x h`.
    Rect { x: u32, y: u32, w: u32, h: u32 },
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Full => f.write_str("full"),
            Region::Rect { x, y, w, h } => write!(f, "{x},{y},{w},{h}"),
        }
    }
}

/// Size selector of an image request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Size {
    /// The region at its source resolution.
    Full,
    /// Scaled to fit within `w x h`, preserving aspect ratio (`!w,h`).
    Fit(u32, u32),
    /// Scaled to exactly `w x h`.
    Exact(u32, u32),
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Size::Full => f.write_str("full"),
            Size::Fit(w, h) => write!(f, "!{w},{h}"),
            Size::Exact(w, h) => write!(f, "{w},{h}"),
        }
    }
}

/// Build an image request URL for a service base URL.
#[must_use]
pub fn image_url(base_url: &str, region: Region, size: Size) -> String {
    format!("{}/{region}/{size}/0/default.jpg", base_url.trim_end_matches('/'))
}
