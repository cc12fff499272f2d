use std::time::Instant;

use anyhow::{Result, anyhow, ensure};
use nokhwa::{Buffer, utils::FrameFormat};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::types::Frame;

/// Byte layout of uncompressed camera buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PackedLayout {
    Rgb,
    Bgr,
    Gray,
}

impl PackedLayout {
    fn bytes_per_pixel(self) -> usize {
        match self {
            PackedLayout::Rgb | PackedLayout::Bgr => 3,
            PackedLayout::Gray => 1,
        }
    }
}

/// Decodes a camera buffer of any supported format into an RGBA [`Frame`].
pub fn decode_frame(buffer: &Buffer) -> Result<Frame> {
    let resolution = buffer.resolution();
    let width = resolution.width_x;
    let height = resolution.height_y;
    let data = buffer.buffer();

    let rgba = match buffer.source_frame_format() {
        FrameFormat::NV12 => nv12_to_rgba(data, width, height)?,
        FrameFormat::YUYV => yuyv_to_rgba(data, width, height)?,
        FrameFormat::MJPEG => mjpeg_to_rgba(data, width, height)?,
        FrameFormat::RAWRGB => packed_to_rgba(data, width, height, PackedLayout::Rgb)?,
        FrameFormat::RAWBGR => packed_to_rgba(data, width, height, PackedLayout::Bgr)?,
        FrameFormat::GRAY => packed_to_rgba(data, width, height, PackedLayout::Gray)?,
    };

    Ok(Frame {
        rgba,
        width,
        height,
        timestamp: Instant::now(),
    })
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

fn nv12_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_plane_len = pixel_count(width, height);
    let uv_plane_len = y_plane_len / 2;
    ensure!(
        data.len() >= y_plane_len + uv_plane_len,
        "NV12 buffer too small: got {}, expected {}",
        data.len(),
        y_plane_len + uv_plane_len
    );

    let image = YuvBiPlanarImage {
        y_plane: &data[..y_plane_len],
        y_stride: width,
        uv_plane: &data[y_plane_len..y_plane_len + uv_plane_len],
        uv_stride: width,
        width,
        height,
    };

    let mut rgba = vec![0u8; y_plane_len * 4];
    yuv_nv12_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12→RGBA failed: {err:?}"))?;

    Ok(rgba)
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected_len = pixel_count(width, height) * 2;
    ensure!(
        data.len() >= expected_len,
        "YUYV buffer too small: got {}, expected {expected_len}",
        data.len()
    );

    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    let mut rgba = vec![0u8; pixel_count(width, height) * 4];
    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422→RGBA failed: {err:?}"))?;

    Ok(rgba)
}

fn mjpeg_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;

    // The frame keeps the resolution nokhwa negotiated, so the JPEG must agree.
    if let Some(info) = decoder.info() {
        let decoded_w = u32::try_from(info.width)?;
        let decoded_h = u32::try_from(info.height)?;
        ensure!(
            (decoded_w, decoded_h) == (width, height),
            "MJPEG frame is {decoded_w}x{decoded_h}, stream reports {width}x{height}"
        );
    }
    ensure!(
        rgba.len() >= pixel_count(width, height) * 4,
        "MJPEG decode produced too few bytes: got {}, expected {}",
        rgba.len(),
        pixel_count(width, height) * 4
    );

    Ok(rgba)
}

fn packed_to_rgba(data: &[u8], width: u32, height: u32, layout: PackedLayout) -> Result<Vec<u8>> {
    let pixels = pixel_count(width, height);
    let bpp = layout.bytes_per_pixel();
    ensure!(
        data.len() >= pixels * bpp,
        "{layout:?} buffer too small: got {}, expected {}",
        data.len(),
        pixels * bpp
    );

    let mut rgba = vec![0u8; pixels * 4];
    rgba.par_chunks_mut(4)
        .zip(data[..pixels * bpp].par_chunks_exact(bpp))
        .for_each(|(dst, src)| {
            let [r, g, b] = match layout {
                PackedLayout::Rgb => [src[0], src[1], src[2]],
                PackedLayout::Bgr => [src[2], src[1], src[0]],
                PackedLayout::Gray => [src[0]; 3],
            };
            dst.copy_from_slice(&[r, g, b, 255]);
        });

    Ok(rgba)
}
