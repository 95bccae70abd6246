//! Frame types and pixel geometry helpers

use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::error::{Error, Result};

/// Bytes per BGRA pixel
pub const BYTES_PER_PIXEL: usize = 4;

/// A raw BGRA frame stamped against the shared clock.
///
/// Ownership moves from the capture role to the encode role through the
/// frame channel.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub timestamp_ns: u64,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl CapturedFrame {
    pub fn new(timestamp_ns: u64, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            timestamp_ns,
            width,
            height,
            pixels,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Rectangle of the display to grab, in physical pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn frame_len(&self) -> usize {
        frame_len(self.width, self.height)
    }
}

pub fn frame_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * BYTES_PER_PIXEL
}

/// Ensure a value is even (required by yuv420p encoders)
pub fn make_even(v: u32) -> u32 {
    if v % 2 == 0 {
        v
    } else {
        v.saturating_sub(1).max(2)
    }
}

/// Centred region of the display with the target's aspect ratio.
///
/// This is the part of the display that, once scaled, fills the target
/// resolution without letterboxing.
pub fn capture_region(display: (u32, u32), target: (u32, u32)) -> Region {
    let (dw, dh) = (display.0.max(2), display.1.max(2));
    let (tw, th) = (target.0.max(1) as u64, target.1.max(1) as u64);

    // Integer cross-multiplication keeps the rounding exact
    let (width, height) = if dw as u64 * th > tw * dh as u64 {
        // Display is wider: use full height, crop the sides
        let w = (dh as u64 * tw + th / 2) / th;
        (make_even((w as u32).min(dw)), make_even(dh))
    } else {
        let h = (dw as u64 * th + tw / 2) / tw;
        (make_even(dw), make_even((h as u32).min(dh)))
    };

    Region {
        x: (dw - width) / 2,
        y: (dh - height) / 2,
        width,
        height,
    }
}

/// Scale a frame to cover the target with nearest-neighbour sampling and
/// centre-crop the overflow. Frames already at the target size are returned
/// unchanged.
pub fn fit_frame(pixels: Vec<u8>, source: (u32, u32), target: (u32, u32)) -> Result<Vec<u8>> {
    if source == target {
        return Ok(pixels);
    }

    let (sw, sh) = source;
    let (tw, th) = target;
    if sw == 0 || sh == 0 || tw == 0 || th == 0 {
        return Err(Error::Encoder(format!(
            "cannot fit {}x{} frame to {}x{}",
            sw, sh, tw, th
        )));
    }

    // Channel order is irrelevant to nearest sampling, BGRA goes through as-is
    let image = RgbaImage::from_raw(sw, sh, pixels).ok_or_else(|| {
        Error::Encoder(format!("frame buffer too small for {}x{}", sw, sh))
    })?;

    let scale = f64::max(tw as f64 / sw as f64, th as f64 / sh as f64);
    let scaled_w = ((sw as f64 * scale).ceil() as u32).max(tw);
    let scaled_h = ((sh as f64 * scale).ceil() as u32).max(th);

    let scaled = imageops::resize(&image, scaled_w, scaled_h, FilterType::Nearest);
    let x = (scaled_w - tw) / 2;
    let y = (scaled_h - th) / 2;
    let cropped = imageops::crop_imm(&scaled, x, y, tw, th).to_image();

    Ok(cropped.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, bgra: [u8; 4]) -> Vec<u8> {
        bgra.iter()
            .copied()
            .cycle()
            .take(frame_len(width, height))
            .collect()
    }

    #[test]
    fn test_make_even() {
        assert_eq!(make_even(1920), 1920);
        assert_eq!(make_even(1081), 1080);
        assert_eq!(make_even(1), 2);
    }

    #[test]
    fn test_region_matches_display_with_same_aspect() {
        let region = capture_region((1920, 1080), (1280, 720));
        assert_eq!(
            region,
            Region {
                x: 0,
                y: 0,
                width: 1920,
                height: 1080
            }
        );
    }

    #[test]
    fn test_region_crops_wide_display() {
        // 16:10 target on a 32:9 display keeps full height
        let region = capture_region((3840, 1080), (1280, 800));
        assert_eq!(region.height, 1080);
        assert_eq!(region.width, 1728);
        assert_eq!(region.x, (3840 - 1728) / 2);
        assert_eq!(region.y, 0);
    }

    #[test]
    fn test_region_crops_tall_display() {
        let region = capture_region((1080, 1920), (1280, 720));
        assert_eq!(region.width, 1080);
        assert_eq!(region.height, 608);
        assert_eq!(region.x, 0);
        assert_eq!(region.y, (1920 - 608) / 2);
    }

    #[test]
    fn test_fit_passthrough_at_target_size() {
        let pixels = solid(4, 2, [1, 2, 3, 4]);
        let fitted = fit_frame(pixels.clone(), (4, 2), (4, 2)).unwrap();
        assert_eq!(fitted, pixels);
    }

    #[test]
    fn test_fit_scales_to_target_length() {
        let pixels = solid(8, 8, [10, 20, 30, 255]);
        let fitted = fit_frame(pixels, (8, 8), (4, 2)).unwrap();
        assert_eq!(fitted.len(), frame_len(4, 2));
        assert!(fitted.chunks(4).all(|px| px == [10, 20, 30, 255]));
    }

    #[test]
    fn test_fit_center_crops_overflow() {
        // 4x1 source: left half blue, right half red. Fitting to 2x2 keeps
        // the centre columns, one of each.
        let mut pixels = Vec::new();
        pixels.extend_from_slice(&[255, 0, 0, 255]);
        pixels.extend_from_slice(&[255, 0, 0, 255]);
        pixels.extend_from_slice(&[0, 0, 255, 255]);
        pixels.extend_from_slice(&[0, 0, 255, 255]);

        let fitted = fit_frame(pixels, (4, 1), (2, 2)).unwrap();
        assert_eq!(fitted.len(), frame_len(2, 2));
        assert_eq!(&fitted[0..4], &[255, 0, 0, 255]);
        assert_eq!(&fitted[4..8], &[0, 0, 255, 255]);
    }

    #[test]
    fn test_fit_rejects_short_buffer() {
        assert!(fit_frame(vec![0; 8], (4, 4), (2, 2)).is_err());
    }
}
