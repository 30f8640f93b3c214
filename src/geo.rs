//! Coordinate transforms between pixel space and geographic space.
//!
//! A raster's georeferencing is a 6-parameter affine transform mapping pixel
//! indices to world coordinates, plus an EPSG code identifying the CRS.
//! This module provides the pure conversion functions: pixel to geo, geo to
//! pixel (via the inverse transform), per-rectangle geographic bounds, and
//! CRS-to-CRS reprojection of bounds using proj4rs (pure Rust).

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::Serialize;

use crate::error::Error;

/// Geographic bounding box (left, bottom, right, top).
///
/// The four values bound the same region as the pixel rectangle they were
/// derived from. `left <= right` and `bottom <= top` are NOT guaranteed when
/// the affine transform has a negative scale on an axis (common for north-up
/// rasters, where `top` numerically exceeds `bottom`); rely on the field
/// names, not on ordering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Bounds {
    #[must_use]
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self { left, bottom, right, top }
    }
}

/// A 6-parameter affine transform from pixel space to world space:
///
/// ```text
/// x_geo = a * col + b * row + c
/// y_geo = d * col + e * row + f
/// ```
///
/// Parameter order matches the rasterio/GDAL `Affine` convention, with `c`
/// and `f` holding the world coordinates of the raster's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl AffineTransform {
    #[must_use]
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// Axis-aligned north-up transform from pixel sizes and a top-left
    /// world origin. The vertical scale is negated so that row indices
    /// increase southward.
    #[must_use]
    pub fn north_up(pixel_width: f64, pixel_height: f64, origin_x: f64, origin_y: f64) -> Self {
        Self::new(pixel_width, 0.0, origin_x, 0.0, -pixel_height, origin_y)
    }

    /// Apply the transform to a pixel coordinate.
    #[inline]
    #[must_use]
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (self.a * x + self.b * y + self.c, self.d * x + self.e * y + self.f)
    }

    /// Determinant of the linear part.
    #[inline]
    #[must_use]
    pub fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    /// Invert the transform.
    ///
    /// # Errors
    /// Returns [`Error::SingularTransform`] if the determinant is zero.
    pub fn invert(&self) -> Result<Self, Error> {
        let det = self.determinant();
        if det.abs() < f64::EPSILON {
            return Err(Error::SingularTransform);
        }
        Ok(Self {
            a: self.e / det,
            b: -self.b / det,
            c: (self.b * self.f - self.e * self.c) / det,
            d: -self.d / det,
            e: self.a / det,
            f: (self.d * self.c - self.a * self.f) / det,
        })
    }
}

/// Convert a pixel coordinate to a geographic coordinate.
#[inline]
#[must_use]
pub fn pixel_to_geo(x: f64, y: f64, transform: &AffineTransform) -> (f64, f64) {
    transform.apply(x, y)
}

/// Convert a geographic coordinate to a (fractional) pixel coordinate.
///
/// # Errors
/// Returns [`Error::SingularTransform`] if the transform is not invertible.
pub fn geo_to_pixel(geo_x: f64, geo_y: f64, transform: &AffineTransform) -> Result<(f64, f64), Error> {
    Ok(transform.invert()?.apply(geo_x, geo_y))
}

/// Geographic bounds of a pixel rectangle.
///
/// `left`/`top` come from the rectangle's top-left corner, `right`/`bottom`
/// from its bottom-right corner. No axis-order normalization is performed.
#[must_use]
pub fn patch_geo_bounds(
    pixel_x: u32,
    pixel_y: u32,
    patch_w: u32,
    patch_h: u32,
    transform: &AffineTransform,
) -> Bounds {
    let (left, top) = pixel_to_geo(f64::from(pixel_x), f64::from(pixel_y), transform);
    let (right, bottom) = pixel_to_geo(
        f64::from(pixel_x + patch_w),
        f64::from(pixel_y + patch_h),
        transform,
    );
    Bounds { left, bottom, right, top }
}

/// Reproject bounds from one CRS to another.
///
/// The (left, bottom) and (right, top) pairs are transformed independently;
/// pixels are not resampled, only the four scalar bound values are remapped.
///
/// # Errors
/// Returns [`Error::Projection`] if either EPSG code is unsupported or the
/// transformation fails.
pub fn reproject_bounds(bounds: &Bounds, src_epsg: i32, dst_epsg: i32) -> Result<Bounds, Error> {
    let (left, bottom) = project_point(src_epsg, dst_epsg, bounds.left, bounds.bottom)?;
    let (right, top) = project_point(src_epsg, dst_epsg, bounds.right, bounds.top)?;
    Ok(Bounds { left, bottom, right, top })
}

/// Project a point from one CRS to another using proj4rs + crs-definitions.
///
/// # Errors
/// Returns [`Error::Projection`] if an EPSG code is not in the
/// crs-definitions database or the transformation fails.
pub fn project_point(src_epsg: i32, dst_epsg: i32, x: f64, y: f64) -> Result<(f64, f64), Error> {
    if src_epsg == dst_epsg {
        return Ok((x, y));
    }

    let src_str = proj_string(src_epsg)
        .ok_or_else(|| Error::Projection(format!("EPSG:{src_epsg} is not in the crs-definitions database")))?;
    let dst_str = proj_string(dst_epsg)
        .ok_or_else(|| Error::Projection(format!("EPSG:{dst_epsg} is not in the crs-definitions database")))?;

    let src_proj = Proj::from_proj_string(src_str)
        .map_err(|e| Error::Projection(format!("invalid source projection EPSG:{src_epsg}: {e:?}")))?;
    let dst_proj = Proj::from_proj_string(dst_str)
        .map_err(|e| Error::Projection(format!("invalid target projection EPSG:{dst_epsg}: {e:?}")))?;

    // proj4rs works in radians for geographic coordinates
    let (x_in, y_in) = if is_geographic_crs(src_epsg) {
        (x.to_radians(), y.to_radians())
    } else {
        (x, y)
    };

    let mut point = (x_in, y_in, 0.0);
    transform(&src_proj, &dst_proj, &mut point)
        .map_err(|e| Error::Projection(format!("transform EPSG:{src_epsg} -> EPSG:{dst_epsg} failed: {e:?}")))?;

    if is_geographic_crs(dst_epsg) {
        Ok((point.0.to_degrees(), point.1.to_degrees()))
    } else {
        Ok((point.0, point.1))
    }
}

/// Get the PROJ4 string for an EPSG code from the crs-definitions database.
#[inline]
pub fn proj_string(epsg: i32) -> Option<&'static str> {
    u16::try_from(epsg)
        .ok()
        .and_then(crs_definitions::from_code)
        .map(|def| def.proj4)
}

/// Check whether an EPSG code denotes a geographic (lon/lat) CRS.
#[inline]
#[must_use]
pub fn is_geographic_crs(epsg: i32) -> bool {
    if let Some(proj_str) = proj_string(epsg) {
        proj_str.contains("+proj=longlat")
    } else {
        epsg == 4326 || (4000..5000).contains(&epsg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < EPS
    }

    #[test]
    fn test_apply_identity() {
        let t = AffineTransform::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0);
        assert_eq!(t.apply(12.0, 34.0), (12.0, 34.0));
    }

    #[test]
    fn test_north_up_transform() {
        // 0.5 units per pixel, origin at (100, 200), y decreasing with rows
        let t = AffineTransform::north_up(0.5, 0.5, 100.0, 200.0);
        let (gx, gy) = pixel_to_geo(10.0, 20.0, &t);
        assert!(approx_eq(gx, 105.0));
        assert!(approx_eq(gy, 190.0));
    }

    #[test]
    fn test_geo_pixel_roundtrip() {
        let t = AffineTransform::new(0.25, 0.0, -50.0, 0.0, -0.25, 72.0);
        for (x, y) in [(0.0, 0.0), (17.0, 3.0), (1023.0, 511.0)] {
            let (gx, gy) = pixel_to_geo(x, y, &t);
            let (x2, y2) = geo_to_pixel(gx, gy, &t).unwrap();
            assert!(approx_eq(x, x2), "x: {x} != {x2}");
            assert!(approx_eq(y, y2), "y: {y} != {y2}");
        }
    }

    #[test]
    fn test_roundtrip_with_rotation_terms() {
        let t = AffineTransform::new(2.0, 0.5, 10.0, -0.5, 3.0, -4.0);
        let (gx, gy) = pixel_to_geo(7.0, 11.0, &t);
        let (x, y) = geo_to_pixel(gx, gy, &t).unwrap();
        assert!(approx_eq(x, 7.0));
        assert!(approx_eq(y, 11.0));
    }

    #[test]
    fn test_singular_transform_rejected() {
        // Rank-deficient linear part
        let t = AffineTransform::new(1.0, 2.0, 0.0, 2.0, 4.0, 0.0);
        assert!(matches!(t.invert(), Err(Error::SingularTransform)));
        assert!(matches!(geo_to_pixel(1.0, 1.0, &t), Err(Error::SingularTransform)));
    }

    #[test]
    fn test_patch_bounds_north_up_top_exceeds_bottom() {
        let t = AffineTransform::north_up(1.0, 1.0, 0.0, 100.0);
        let b = patch_geo_bounds(10, 20, 30, 40, &t);
        assert!(approx_eq(b.left, 10.0));
        assert!(approx_eq(b.top, 80.0));
        assert!(approx_eq(b.right, 40.0));
        assert!(approx_eq(b.bottom, 40.0));
        // North-up: top numerically exceeds bottom
        assert!(b.top > b.bottom);
    }

    #[test]
    fn test_project_point_same_crs() {
        let (x, y) = project_point(4326, 4326, 10.0, 51.5).unwrap();
        assert!(approx_eq(x, 10.0));
        assert!(approx_eq(y, 51.5));
    }

    #[test]
    fn test_project_point_origin_4326_to_3857() {
        let (x, y) = project_point(4326, 3857, 0.0, 0.0).unwrap();
        assert!(x.abs() < 1e-6);
        assert!(y.abs() < 1e-6);
    }

    #[test]
    fn test_reproject_bounds_roundtrip() {
        let bounds = Bounds::new(10.0, 51.0, 11.0, 52.0);
        let merc = reproject_bounds(&bounds, 4326, 3857).unwrap();
        assert!(merc.left > 1_000_000.0, "expected meters, got {}", merc.left);
        let back = reproject_bounds(&merc, 3857, 4326).unwrap();
        assert!((back.left - 10.0).abs() < 1e-6);
        assert!((back.top - 52.0).abs() < 1e-6);
    }

    #[test]
    fn test_unsupported_epsg_code() {
        let err = project_point(4326, 99999, 0.0, 0.0).unwrap_err();
        assert!(matches!(err, Error::Projection(_)));
    }

    #[test]
    fn test_is_geographic_crs() {
        assert!(is_geographic_crs(4326));
        assert!(!is_geographic_crs(3857));
    }
}
