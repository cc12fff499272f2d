use std::{cmp::Ordering, path::Path, sync::OnceLock};

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use crate::pipeline::tensor::{CropRegion, LetterboxInfo, PixelRange, letterbox};
use crate::types::Frame;

pub const PALM_INPUT_SIZE: u32 = 192;
const PALM_LANDMARKS: usize = 7;
const PALM_WRIST: usize = 0;
const PALM_MIDDLE_MCP: usize = 2;

/// `(boxes per cell, grid size)` of each SSD output layer of the 192x192 model:
/// one stride-8 layer and three stride-16 layers merged into one grid.
const ANCHOR_LAYERS: [(usize, usize); 2] = [(2, 24), (6, 12)];

#[derive(Clone, Debug)]
pub struct PalmDetectorConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
}

impl Default for PalmDetectorConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.5,
            nms_threshold: 0.3,
            top_k: 32,
        }
    }
}

/// A detected palm in frame pixels.
#[derive(Clone, Debug)]
pub struct PalmRegion {
    pub bbox: [f32; 4],
    pub landmarks: Vec<(f32, f32)>,
    pub score: f32,
}

pub struct PalmDetector {
    session: Session,
    cfg: PalmDetectorConfig,
}

impl PalmDetector {
    pub fn new(model_path: &Path, cfg: PalmDetectorConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load palm detector from {}", model_path.display())
            })?;

        Ok(Self { session, cfg })
    }

    /// Palms sorted by descending score.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<PalmRegion>> {
        let (input, info) = letterbox(frame, PALM_INPUT_SIZE, PixelRange::UnitInterval)?;
        let tensor = Tensor::from_array(input)?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run palm detector session")?;

        if outputs.len() < 2 {
            return Err(anyhow!(
                "palm detector returned {} outputs, expected at least 2",
                outputs.len()
            ));
        }

        let boxes = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;
        let box_shape = boxes.shape().to_vec();
        let score_shape = scores.shape().to_vec();

        decode_palm_outputs(
            boxes
                .as_slice()
                .ok_or_else(|| anyhow!("palm boxes not contiguous"))?,
            &box_shape,
            scores
                .as_slice()
                .ok_or_else(|| anyhow!("palm scores not contiguous"))?,
            &score_shape,
            &info,
            &self.cfg,
        )
    }
}

/// Normalized anchor centers in output order.
fn anchors() -> &'static [(f32, f32)] {
    static ANCHORS: OnceLock<Vec<(f32, f32)>> = OnceLock::new();
    ANCHORS.get_or_init(|| {
        let mut anchors = Vec::new();
        for (boxes_per_cell, grid) in ANCHOR_LAYERS {
            for y in 0..grid {
                for x in 0..grid {
                    let center = (
                        (x as f32 + 0.5) / grid as f32,
                        (y as f32 + 0.5) / grid as f32,
                    );
                    anchors.extend(std::iter::repeat_n(center, boxes_per_cell));
                }
            }
        }
        anchors
    })
}

fn decode_palm_outputs(
    boxes: &[f32],
    box_shape: &[usize],
    scores: &[f32],
    score_shape: &[usize],
    info: &LetterboxInfo,
    cfg: &PalmDetectorConfig,
) -> Result<Vec<PalmRegion>> {
    let (Some(&anchor_dim), Some(&feature_dim)) = (
        box_shape.get(box_shape.len().wrapping_sub(2)),
        box_shape.last(),
    ) else {
        return Err(anyhow!("unexpected palm box shape {box_shape:?}"));
    };
    let (Some(&score_anchor_dim), Some(&score_feature_dim)) = (
        score_shape.get(score_shape.len().wrapping_sub(2)),
        score_shape.last(),
    ) else {
        return Err(anyhow!("unexpected palm score shape {score_shape:?}"));
    };

    if feature_dim < 4 + PALM_LANDMARKS * 2 {
        return Err(anyhow!("palm box feature dimension too small: {feature_dim}"));
    }
    if anchor_dim != score_anchor_dim {
        return Err(anyhow!(
            "anchor dimension mismatch between boxes ({anchor_dim}) and scores ({score_anchor_dim})"
        ));
    }
    if boxes.len() < anchor_dim * feature_dim || scores.len() < anchor_dim * score_feature_dim {
        return Err(anyhow!("palm outputs shorter than their shapes"));
    }

    let anchors = anchors();
    let input = info.input_size as f32;
    // Normalized input coordinates -> frame pixels.
    let to_frame = |nx: f32, ny: f32| info.unproject(nx * input, ny * input);

    let mut candidates = Vec::new();
    for (idx, anchor) in anchors.iter().enumerate().take(anchor_dim) {
        let score = sigmoid(scores[idx * score_feature_dim]);
        if score < cfg.score_threshold {
            continue;
        }

        let raw = &boxes[idx * feature_dim..(idx + 1) * feature_dim];
        let cx = raw[0] / input + anchor.0;
        let cy = raw[1] / input + anchor.1;
        let hw = raw[2] / input / 2.0;
        let hh = raw[3] / input / 2.0;
        if hw <= 0.0 || hh <= 0.0 {
            continue;
        }

        let (x1, y1) = to_frame(cx - hw, cy - hh);
        let (x2, y2) = to_frame(cx + hw, cy + hh);
        let landmarks = (0..PALM_LANDMARKS)
            .map(|l| {
                to_frame(
                    raw[4 + l * 2] / input + anchor.0,
                    raw[4 + l * 2 + 1] / input + anchor.1,
                )
            })
            .collect();

        candidates.push(PalmRegion {
            bbox: [x1, y1, x2, y2],
            landmarks,
            score,
        });
    }

    let kept = nms(&candidates, cfg.nms_threshold, cfg.top_k);
    Ok(kept.into_iter().map(|idx| candidates[idx].clone()).collect())
}

/// Square hand crop around a palm, rotated so the fingers point up.
pub fn crop_from_palm(region: &PalmRegion) -> CropRegion {
    let center = if region.landmarks.is_empty() {
        (
            (region.bbox[0] + region.bbox[2]) * 0.5,
            (region.bbox[1] + region.bbox[3]) * 0.5,
        )
    } else {
        let (sum_x, sum_y) = region
            .landmarks
            .iter()
            .fold((0.0_f32, 0.0_f32), |acc, p| (acc.0 + p.0, acc.1 + p.1));
        let n = region.landmarks.len() as f32;
        (sum_x / n, sum_y / n)
    };

    let base_w = (region.bbox[2] - region.bbox[0]).abs();
    let base_h = (region.bbox[3] - region.bbox[1]).abs();
    // Expand generously to avoid cropping fingers away.
    let side = base_w.max(base_h).max(80.0) * 2.4;

    let angle = match (
        region.landmarks.get(PALM_WRIST),
        region.landmarks.get(PALM_MIDDLE_MCP),
    ) {
        (Some(wrist), Some(mcp)) => upright_angle(*wrist, *mcp),
        _ => 0.0,
    };

    CropRegion {
        center,
        side,
        angle,
    }
}

/// Rotation that maps the crop's "up" onto the wrist -> finger direction.
pub fn upright_angle(wrist: (f32, f32), toward_fingers: (f32, f32)) -> f32 {
    let vx = toward_fingers.0 - wrist.0;
    let vy = toward_fingers.1 - wrist.1;
    if vx == 0.0 && vy == 0.0 {
        return 0.0;
    }
    vx.atan2(-vy)
}

fn nms(candidates: &[PalmRegion], threshold: f32, top_k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|a, b| {
        candidates[*b]
            .score
            .partial_cmp(&candidates[*a].score)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<usize> = Vec::new();
    'outer: for &idx in &order {
        for &k in &keep {
            if iou(&candidates[idx].bbox, &candidates[k].bbox) >= threshold {
                continue 'outer;
            }
        }
        keep.push(idx);
        if keep.len() >= top_k {
            break;
        }
    }
    keep
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use super::*;

    fn identity_letterbox() -> LetterboxInfo {
        LetterboxInfo {
            input_size: PALM_INPUT_SIZE,
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            orig_w: PALM_INPUT_SIZE,
            orig_h: PALM_INPUT_SIZE,
        }
    }

    #[test]
    fn anchor_grid_matches_the_model_outputs() {
        let anchors = anchors();
        assert_eq!(anchors.len(), 2016);
        assert_eq!(anchors[0], (0.5 / 24.0, 0.5 / 24.0));
        assert_eq!(anchors[1], anchors[0]);
        assert_eq!(anchors[1152], (0.5 / 12.0, 0.5 / 12.0));
    }

    #[test]
    fn decodes_a_single_confident_anchor() {
        let features = 18;
        let anchor_count = 2016;
        let mut boxes = vec![0.0f32; anchor_count * features];
        let mut scores = vec![-10.0f32; anchor_count];
        // Anchor 0 sits at (4, 4) in input pixels; give it a 20x20 box.
        boxes[2] = 20.0;
        boxes[3] = 20.0;
        scores[0] = 5.0;

        let palms = decode_palm_outputs(
            &boxes,
            &[1, anchor_count, features],
            &scores,
            &[1, anchor_count, 1],
            &identity_letterbox(),
            &PalmDetectorConfig::default(),
        )
        .unwrap();

        assert_eq!(palms.len(), 1);
        let palm = &palms[0];
        assert!(palm.score > 0.99);
        assert_eq!(palm.landmarks.len(), PALM_LANDMARKS);
        assert!((palm.bbox[2] - 14.0).abs() < 1e-3);
        assert!((palm.bbox[3] - 14.0).abs() < 1e-3);
    }

    #[test]
    fn rejects_inconsistent_shapes() {
        let err = decode_palm_outputs(
            &[0.0; 18],
            &[1, 1, 18],
            &[0.0; 2],
            &[1, 2, 1],
            &identity_letterbox(),
            &PalmDetectorConfig::default(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn nms_drops_overlapping_boxes() {
        let region = |bbox: [f32; 4], score: f32| PalmRegion {
            bbox,
            landmarks: Vec::new(),
            score,
        };
        let candidates = vec![
            region([0.0, 0.0, 10.0, 10.0], 0.6),
            region([1.0, 1.0, 11.0, 11.0], 0.9),
            region([50.0, 50.0, 60.0, 60.0], 0.7),
        ];
        assert_eq!(nms(&candidates, 0.3, 32), vec![1, 2]);
        assert_eq!(nms(&candidates, 0.3, 1), vec![1]);
    }

    #[test]
    fn upright_hand_needs_no_rotation() {
        assert_eq!(upright_angle((50.0, 100.0), (50.0, 40.0)), 0.0);
        let sideways = upright_angle((50.0, 50.0), (100.0, 50.0));
        assert!((sideways - FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn palm_crop_is_centered_on_landmarks() {
        let palm = PalmRegion {
            bbox: [0.0, 0.0, 100.0, 100.0],
            landmarks: vec![(40.0, 80.0), (50.0, 50.0), (40.0, 20.0)],
            score: 0.9,
        };
        let crop = crop_from_palm(&palm);
        assert!((crop.center.0 - 130.0 / 3.0).abs() < 1e-3);
        assert!((crop.center.1 - 50.0).abs() < 1e-3);
        assert!((crop.side - 240.0).abs() < 1e-3);
        assert!(crop.angle.abs() < 1e-6);
    }
}
