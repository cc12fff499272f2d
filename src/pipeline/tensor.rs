use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::Frame;

/// How 8-bit channel values are fed to a model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelRange {
    /// `value / 255`, used by the MediaPipe hand models.
    UnitInterval,
    /// Raw `0..=255` floats, used by MoveNet.
    Byte,
}

impl PixelRange {
    fn apply(self, value: u8) -> f32 {
        match self {
            PixelRange::UnitInterval => value as f32 / 255.0,
            PixelRange::Byte => value as f32,
        }
    }
}

/// Maps between a square letterboxed model input and the original frame.
#[derive(Clone, Debug, PartialEq)]
pub struct LetterboxInfo {
    pub input_size: u32,
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl LetterboxInfo {
    /// Converts a point in model input pixels back to frame pixels.
    pub fn unproject(&self, x: f32, y: f32) -> (f32, f32) {
        let px = (x - self.pad_x) / self.scale;
        let py = (y - self.pad_y) / self.scale;
        (
            px.clamp(0.0, self.orig_w.saturating_sub(1) as f32),
            py.clamp(0.0, self.orig_h.saturating_sub(1) as f32),
        )
    }
}

fn check_frame(frame: &Frame) -> Result<()> {
    if frame.is_well_formed() {
        return Ok(());
    }
    Err(anyhow!(
        "frame buffer size mismatch: got {} bytes for {}x{}",
        frame.rgba.len(),
        frame.width,
        frame.height
    ))
}

/// Resizes the frame into a `target_size` square, keeping aspect ratio and
/// padding with black, and returns an NHWC RGB tensor.
pub fn letterbox(
    frame: &Frame,
    target_size: u32,
    range: PixelRange,
) -> Result<(Array4<f32>, LetterboxInfo)> {
    check_frame(frame)?;

    let scale = target_size as f32 / (frame.width.max(frame.height) as f32);
    let new_w = ((frame.width as f32 * scale).round().max(1.0) as u32).min(target_size);
    let new_h = ((frame.height as f32 * scale).round().max(1.0) as u32).min(target_size);

    let src_image = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let pad_x = ((target_size - new_w) / 2) as usize;
    let pad_y = ((target_size - new_h) / 2) as usize;
    let mut canvas = vec![0u8; (target_size as usize) * (target_size as usize) * 4];
    for px in canvas.chunks_mut(4) {
        px[3] = 255;
    }
    let dst_stride = target_size as usize * 4;
    let src_stride = new_w as usize * 4;
    for row in 0..(new_h as usize) {
        let dst_offset = (pad_y + row) * dst_stride + pad_x * 4;
        let src_offset = row * src_stride;
        canvas[dst_offset..dst_offset + src_stride]
            .copy_from_slice(&resized[src_offset..src_offset + src_stride]);
    }

    let values: Vec<f32> = canvas
        .par_chunks_exact(4)
        .flat_map_iter(|px| [range.apply(px[0]), range.apply(px[1]), range.apply(px[2])])
        .collect();
    let input = Array4::<f32>::from_shape_vec(
        (1, target_size as usize, target_size as usize, 3),
        values,
    )
    .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    let info = LetterboxInfo {
        input_size: target_size,
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        orig_w: frame.width,
        orig_h: frame.height,
    };

    Ok((input, info))
}

/// Square, rotated region of interest in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CropRegion {
    pub center: (f32, f32),
    pub side: f32,
    /// Rotation in radians applied to the crop's axes.
    pub angle: f32,
}

impl CropRegion {
    /// Axis-aligned bounds `[x1, y1, x2, y2]` of the unrotated square.
    pub fn bounds(&self) -> [f32; 4] {
        let half = self.side * 0.5;
        [
            self.center.0 - half,
            self.center.1 - half,
            self.center.0 + half,
            self.center.1 + half,
        ]
    }
}

#[derive(Clone, Debug)]
pub struct CropTransform {
    pub region: CropRegion,
    pub output_size: u32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl CropTransform {
    /// Converts a point in crop pixels back to frame pixels.
    pub fn project(&self, x: f32, y: f32) -> (f32, f32) {
        let half = self.output_size as f32 / 2.0;
        let scale = self.region.side / self.output_size as f32;
        let dx = (x - half) * scale;
        let dy = (y - half) * scale;
        let (sin, cos) = self.region.angle.sin_cos();
        let ox = self.region.center.0 + dx * cos - dy * sin;
        let oy = self.region.center.1 + dx * sin + dy * cos;
        (
            ox.clamp(0.0, self.orig_w.saturating_sub(1) as f32),
            oy.clamp(0.0, self.orig_h.saturating_sub(1) as f32),
        )
    }
}

/// Samples a rotated square crop with bilinear filtering into an NHWC tensor.
pub fn rotated_crop(
    frame: &Frame,
    region: CropRegion,
    output_size: u32,
    range: PixelRange,
) -> Result<(Array4<f32>, CropTransform)> {
    check_frame(frame)?;

    let size = output_size as usize;
    let half = output_size as f32 / 2.0;
    let scale = region.side / output_size as f32;
    let (sin, cos) = region.angle.sin_cos();

    let mut data = vec![0.0f32; size * size * 3];
    data.par_chunks_mut(size * 3)
        .enumerate()
        .for_each(|(y, row)| {
            let dy = (y as f32 + 0.5 - half) * scale;
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                let dx = (x as f32 + 0.5 - half) * scale;
                let src_x = region.center.0 + dx * cos - dy * sin;
                let src_y = region.center.1 + dx * sin + dy * cos;
                let rgb = sample_rgb(frame, src_x, src_y);
                px[0] = range_from_unit(range, rgb[0]);
                px[1] = range_from_unit(range, rgb[1]);
                px[2] = range_from_unit(range, rgb[2]);
            }
        });

    let array = Array4::<f32>::from_shape_vec((1, size, size, 3), data)
        .map_err(|err| anyhow!("failed to build rotated crop tensor: {err}"))?;

    let transform = CropTransform {
        region,
        output_size,
        orig_w: frame.width,
        orig_h: frame.height,
    };

    Ok((array, transform))
}

fn range_from_unit(range: PixelRange, value: f32) -> f32 {
    match range {
        PixelRange::UnitInterval => value,
        PixelRange::Byte => value * 255.0,
    }
}

fn sample_rgb(frame: &Frame, x: f32, y: f32) -> [f32; 3] {
    if x.is_nan() || y.is_nan() {
        return [0.0, 0.0, 0.0];
    }
    // Pixel centers sit at +0.5.
    let x = x - 0.5;
    let y = y - 0.5;
    let x0 = x.floor();
    let y0 = y.floor();

    let (w, h) = (frame.width as i32, frame.height as i32);
    let fetch = |cx: f32, cy: f32| -> [f32; 3] {
        let ix = cx as i32;
        let iy = cy as i32;
        if cx < 0.0 || cy < 0.0 || ix >= w || iy >= h {
            return [0.0, 0.0, 0.0];
        }
        let idx = ((iy as u32 * frame.width + ix as u32) as usize) * 4;
        [
            frame.rgba[idx] as f32 / 255.0,
            frame.rgba[idx + 1] as f32 / 255.0,
            frame.rgba[idx + 2] as f32 / 255.0,
        ]
    };

    let fx = x - x0;
    let fy = y - y0;
    let c00 = fetch(x0, y0);
    let c10 = fetch(x0 + 1.0, y0);
    let c01 = fetch(x0, y0 + 1.0);
    let c11 = fetch(x0 + 1.0, y0 + 1.0);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    std::array::from_fn(|c| lerp(lerp(c00[c], c10[c], fx), lerp(c01[c], c11[c], fx), fy))
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let mut rgba = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            rgba.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
        Frame {
            rgba,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn landscape_frames_are_padded_vertically() {
        let frame = solid_frame(64, 32, [255, 255, 255]);
        let (input, info) = letterbox(&frame, 32, PixelRange::UnitInterval).unwrap();

        assert_eq!(input.shape(), &[1, 32, 32, 3]);
        assert_eq!(info.scale, 0.5);
        assert_eq!(info.pad_x, 0.0);
        assert_eq!(info.pad_y, 8.0);
        // Padding rows are black, content rows keep the frame colour.
        assert_eq!(input[[0, 0, 16, 0]], 0.0);
        assert!((input[[0, 16, 16, 0]] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn byte_range_keeps_raw_values() {
        let frame = solid_frame(8, 8, [200, 100, 50]);
        let (input, _) = letterbox(&frame, 8, PixelRange::Byte).unwrap();
        assert!((input[[0, 4, 4, 0]] - 200.0).abs() < 1.0);
        assert!((input[[0, 4, 4, 2]] - 50.0).abs() < 1.0);
    }

    #[test]
    fn unproject_inverts_the_letterbox() {
        let info = LetterboxInfo {
            input_size: 256,
            scale: 0.4,
            pad_x: 0.0,
            pad_y: 32.0,
            orig_w: 640,
            orig_h: 480,
        };
        let (x, y) = info.unproject(128.0, 128.0);
        assert!((x - 320.0).abs() < 1e-3);
        assert!((y - 240.0).abs() < 1e-3);
    }

    #[test]
    fn malformed_frames_are_rejected() {
        let mut frame = solid_frame(4, 4, [0, 0, 0]);
        frame.rgba.truncate(7);
        assert!(letterbox(&frame, 16, PixelRange::UnitInterval).is_err());
        let region = CropRegion {
            center: (2.0, 2.0),
            side: 4.0,
            angle: 0.0,
        };
        assert!(rotated_crop(&frame, region, 8, PixelRange::UnitInterval).is_err());
    }

    #[test]
    fn crop_center_projects_to_region_center() {
        let frame = solid_frame(100, 100, [10, 20, 30]);
        let region = CropRegion {
            center: (40.0, 60.0),
            side: 20.0,
            angle: std::f32::consts::FRAC_PI_2,
        };
        let (tensor, transform) = rotated_crop(&frame, region, 16, PixelRange::Byte).unwrap();
        assert_eq!(tensor.shape(), &[1, 16, 16, 3]);
        assert!((tensor[[0, 8, 8, 1]] - 20.0).abs() < 0.5);

        let (x, y) = transform.project(8.0, 8.0);
        assert!((x - 40.0).abs() < 1e-3 && (y - 60.0).abs() < 1e-3);
        // Quarter turn: the crop's +x axis points down the frame.
        let (x, y) = transform.project(16.0, 8.0);
        assert!((x - 40.0).abs() < 1e-3 && (y - 70.0).abs() < 1e-3);
    }
}
