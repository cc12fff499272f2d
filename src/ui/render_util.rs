use super::{Arc, Frame, ImageBuffer, ImageFrame, RenderImage, Rgba, RgbaCanvas};
use crate::pipeline::compositor::Canvas;

pub(super) fn frame_to_image(frame: &Frame) -> Option<Arc<RenderImage>> {
    rgba_to_image(&frame.rgba, frame.width, frame.height)
}

pub(super) fn overlay_to_image(overlay: &RgbaCanvas) -> Option<Arc<RenderImage>> {
    rgba_to_image(overlay.pixels(), overlay.width(), overlay.height())
}

fn rgba_to_image(rgba: &[u8], width: u32, height: u32) -> Option<Arc<RenderImage>> {
    // GPUI sprites are BGRA; converting here avoids the async asset pipeline.
    let bgra = rgba_to_bgra(rgba);
    let buffer = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(width, height, bgra)?;
    Some(Arc::new(RenderImage::new(vec![ImageFrame::new(buffer)])))
}

fn rgba_to_bgra(rgba: &[u8]) -> Vec<u8> {
    let mut out = rgba.to_vec();
    for px in out.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swaps_red_and_blue_only() {
        let bgra = rgba_to_bgra(&[1, 2, 3, 4, 10, 20, 30, 40]);
        assert_eq!(bgra, vec![3, 2, 1, 4, 30, 20, 10, 40]);
    }

    #[test]
    fn mismatched_buffers_produce_no_image() {
        assert!(rgba_to_image(&[0; 12], 2, 2).is_none());
    }
}
