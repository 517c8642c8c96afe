//! Region mapping: relative bounding boxes → pixel rectangles → crops.
//!
//! A crop region is captured once, as fractions of the page, and replayed
//! against whatever raster the caller holds: the ~1100 px preview the user
//! drew on, or the 400 DPI image sent to the model. [`BoundingBoxRelative::to_pixels`]
//! is the only place coordinate math happens, so both images see the same
//! geometry up to rounding.

use crate::error::ExtractError;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Crop rectangle as fractions of page width/height.
///
/// Invariant (checked by [`BoundingBoxRelative::new`] and
/// [`BoundingBoxRelative::validate`]): `0 ≤ x0 < x1 ≤ 1`, `0 ≤ y0 < y1 ≤ 1`.
/// Deserialised values (presets) are not trusted until validated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBoxRelative {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BoundingBoxRelative {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Result<Self, ExtractError> {
        let bbox = Self { x0, y0, x1, y1 };
        bbox.validate()?;
        Ok(bbox)
    }

    /// The whole page.
    pub fn full_page() -> Self {
        Self {
            x0: 0.0,
            y0: 0.0,
            x1: 1.0,
            y1: 1.0,
        }
    }

    pub fn validate(&self) -> Result<(), ExtractError> {
        let coords = [self.x0, self.y0, self.x1, self.y1];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(ExtractError::InvalidBoundingBox(format!(
                "coordinates must be finite, got {self}"
            )));
        }
        if coords.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err(ExtractError::InvalidBoundingBox(format!(
                "coordinates must lie in [0, 1], got {self}"
            )));
        }
        if self.x0 >= self.x1 {
            return Err(ExtractError::InvalidBoundingBox(format!(
                "x0 must be < x1, got {self}"
            )));
        }
        if self.y0 >= self.y1 {
            return Err(ExtractError::InvalidBoundingBox(format!(
                "y0 must be < y1, got {self}"
            )));
        }
        Ok(())
    }

    /// Map onto an image of `width × height` pixels.
    ///
    /// Each coordinate is `round(rel * size)`, then clamped to the image.
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelRegion {
        let w = f64::from(width);
        let h = f64::from(height);
        let px = |rel: f64, size: f64| (rel * size).round().clamp(0.0, size) as u32;
        PixelRegion {
            x0: px(self.x0, w),
            y0: px(self.y0, h),
            x1: px(self.x1, w),
            y1: px(self.y1, h),
        }
    }
}

impl fmt::Display for BoundingBoxRelative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x0, self.y0, self.x1, self.y1)
    }
}

/// Parses `"x0,y0,x1,y1"` and validates the result.
impl FromStr for BoundingBoxRelative {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| {
                p.trim().parse::<f64>().map_err(|_| {
                    ExtractError::InvalidBoundingBox(format!("'{}' is not a number", p.trim()))
                })
            })
            .collect::<Result<_, _>>()?;

        match parts.as_slice() {
            [x0, y0, x1, y1] => Self::new(*x0, *y0, *x1, *y1),
            _ => Err(ExtractError::InvalidBoundingBox(format!(
                "expected 4 comma-separated values x0,y0,x1,y1, got {}",
                parts.len()
            ))),
        }
    }
}

/// Integer pixel rectangle, `x1`/`y1` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelRegion {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelRegion {
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    /// True when either side is shorter than `min_side`.
    pub fn is_degenerate(&self, min_side: u32) -> bool {
        self.width() < min_side.max(1) || self.height() < min_side.max(1)
    }
}

/// Cut `bbox` out of `image`.
///
/// Rejects boxes that map to fewer than `min_side` pixels on either axis, so
/// no model call is wasted on an empty crop.
pub fn crop(
    image: &DynamicImage,
    bbox: &BoundingBoxRelative,
    min_side: u32,
) -> Result<(DynamicImage, PixelRegion), ExtractError> {
    bbox.validate()?;
    let region = bbox.to_pixels(image.width(), image.height());
    if region.is_degenerate(min_side) {
        return Err(ExtractError::CropTooSmall {
            width: region.width(),
            height: region.height(),
            min_side,
        });
    }
    let cropped = image.crop_imm(region.x0, region.y0, region.width(), region.height());
    Ok((cropped, region))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn bbox(x0: f64, y0: f64, x1: f64, y1: f64) -> BoundingBoxRelative {
        BoundingBoxRelative::new(x0, y0, x1, y1).expect("valid bbox")
    }

    #[test]
    fn maps_with_rounding() {
        let r = bbox(0.1, 0.25, 0.5, 0.755).to_pixels(600, 800);
        assert_eq!(r, PixelRegion { x0: 60, y0: 200, x1: 300, y1: 604 });
    }

    #[test]
    fn full_page_covers_image() {
        let r = BoundingBoxRelative::full_page().to_pixels(123, 77);
        assert_eq!(r, PixelRegion { x0: 0, y0: 0, x1: 123, y1: 77 });
    }

    #[test]
    fn regions_stay_within_bounds() {
        let boxes = [
            bbox(0.0, 0.0, 1.0, 1.0),
            bbox(0.333, 0.001, 0.999, 0.5),
            bbox(0.9999, 0.9999, 1.0, 1.0),
        ];
        for b in boxes {
            for (w, h) in [(1, 1), (7, 13), (600, 800), (2401, 3199)] {
                let r = b.to_pixels(w, h);
                assert!(r.x0 <= r.x1 && r.x1 <= w, "{b} on {w}x{h}: {r:?}");
                assert!(r.y0 <= r.y1 && r.y1 <= h, "{b} on {w}x{h}: {r:?}");
            }
        }
    }

    #[test]
    fn proportions_match_across_resolutions() {
        let b = bbox(0.137, 0.42, 0.861, 0.903);
        let (w, h) = (600u32, 800u32);
        let small = b.to_pixels(w, h);
        let large = b.to_pixels(w * 4, h * 4);

        let rel = |px: u32, size: u32| f64::from(px) / f64::from(size);
        // one pixel of rounding on the smaller image
        let tol = 1.0 / f64::from(w.min(h));
        assert!((rel(small.x0, w) - rel(large.x0, w * 4)).abs() <= tol);
        assert!((rel(small.y0, h) - rel(large.y0, h * 4)).abs() <= tol);
        assert!((rel(small.x1, w) - rel(large.x1, w * 4)).abs() <= tol);
        assert!((rel(small.y1, h) - rel(large.y1, h * 4)).abs() <= tol);
    }

    #[test]
    fn rejects_inverted_and_out_of_range_boxes() {
        assert!(BoundingBoxRelative::new(0.5, 0.1, 0.5, 0.9).is_err());
        assert!(BoundingBoxRelative::new(0.1, 0.9, 0.5, 0.2).is_err());
        assert!(BoundingBoxRelative::new(-0.1, 0.0, 0.5, 0.5).is_err());
        assert!(BoundingBoxRelative::new(0.0, 0.0, 1.2, 0.5).is_err());
        assert!(BoundingBoxRelative::new(f64::NAN, 0.0, 0.5, 0.5).is_err());
    }

    #[test]
    fn parses_comma_separated() {
        let b: BoundingBoxRelative = " 0.1, 0.2 ,0.8,0.9".parse().unwrap();
        assert_eq!(b, bbox(0.1, 0.2, 0.8, 0.9));
        assert!("0.1,0.2,0.8".parse::<BoundingBoxRelative>().is_err());
        assert!("a,b,c,d".parse::<BoundingBoxRelative>().is_err());
    }

    #[test]
    fn crop_returns_expected_size() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 100, Rgb([255, 255, 255])));
        let (cropped, region) = crop(&img, &bbox(0.25, 0.5, 0.75, 1.0), 8).unwrap();
        assert_eq!((cropped.width(), cropped.height()), (100, 50));
        assert_eq!(region.area(), 5000);
    }

    #[test]
    fn crop_rejects_near_zero_area() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 100, Rgb([0, 0, 0])));
        let err = crop(&img, &bbox(0.50, 0.1, 0.52, 0.9), 8).unwrap_err();
        assert!(matches!(err, ExtractError::CropTooSmall { width: 2, .. }), "got {err:?}");
    }
}
