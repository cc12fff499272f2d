use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    HandLandmarker,
    palm::{PalmDetector, PalmDetectorConfig, PalmRegion, crop_from_palm, iou, upright_angle},
};
use crate::{
    config::HandConfig,
    pipeline::tensor::{CropRegion, PixelRange, rotated_crop},
    types::{Frame, HAND_LANDMARKS, Hand, Handedness, Landmark},
};

const LANDMARK_INPUT_SIZE: u32 = 224;
const WRIST: usize = 0;
const MIDDLE_MCP: usize = 9;
/// Crop side relative to the landmark bounding box when tracking.
const TRACKING_CROP_SCALE: f32 = 2.0;
/// A new palm overlapping a tracked hand this much is the same hand.
const DUPLICATE_IOU: f32 = 0.5;

/// MediaPipe palm detector + hand landmark model on ONNX Runtime.
///
/// Hands found on one frame are tracked into the next one by deriving their
/// crop from the previous landmarks; palm detection only runs while fewer than
/// `max_hands` hands are tracked.
pub struct OrtHandLandmarker {
    landmarks: Session,
    palm_detector: PalmDetector,
    max_hands: usize,
    min_tracking_confidence: f32,
    tracked: Vec<CropRegion>,
}

impl OrtHandLandmarker {
    pub fn new(config: &HandConfig) -> Result<Self> {
        if config.model_complexity == 0 {
            log::warn!("lite hand landmark model is not bundled, using the full model");
        }

        let landmarks = load_session(&config.landmark_model_path)?;
        let palm_detector = PalmDetector::new(
            &config.palm_model_path,
            PalmDetectorConfig {
                score_threshold: config.min_detection_confidence,
                ..PalmDetectorConfig::default()
            },
        )?;

        log::info!(
            "hand landmarker ready using {} and palm detector {}",
            config.landmark_model_path.display(),
            config.palm_model_path.display()
        );

        Ok(Self {
            landmarks,
            palm_detector,
            max_hands: config.max_hands,
            min_tracking_confidence: config.min_tracking_confidence,
            tracked: Vec::new(),
        })
    }

    fn regions_for(&mut self, frame: &Frame) -> Vec<CropRegion> {
        let mut regions = std::mem::take(&mut self.tracked);
        if regions.len() >= self.max_hands {
            return regions;
        }

        let palms = self.palm_detector.detect(frame).unwrap_or_else(|err| {
            log::warn!("palm detection failed: {err:?}");
            Vec::new()
        });
        merge_palms(&mut regions, &palms, self.max_hands);
        regions
    }

    fn run_landmarks(&mut self, frame: &Frame, region: CropRegion) -> Result<Option<LocatedHand>> {
        let (input, transform) =
            rotated_crop(frame, region, LANDMARK_INPUT_SIZE, PixelRange::UnitInterval)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .landmarks
            .run(ort::inputs![tensor])
            .context("failed to run hand landmark session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("hand landmark model returned no outputs"));
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flat: Vec<f32> = coords.iter().copied().collect();
        let scalar = |idx: usize| {
            (outputs.len() > idx)
                .then(|| {
                    outputs[idx]
                        .try_extract_array::<f32>()
                        .ok()
                        .and_then(|arr| arr.iter().next().copied())
                })
                .flatten()
        };
        let presence = scalar(1).unwrap_or(0.0);
        let handedness = scalar(2).unwrap_or(f32::NAN);

        if presence < self.min_tracking_confidence {
            return Ok(None);
        }

        let pixels: Vec<(f32, f32)> = decode_landmarks(&flat)?
            .into_iter()
            .map(|(x, y)| transform.project(x, y))
            .collect();
        Ok(Some(LocatedHand {
            pixels,
            presence,
            handedness,
        }))
    }
}

struct LocatedHand {
    pixels: Vec<(f32, f32)>,
    presence: f32,
    handedness: f32,
}

fn load_session(model_path: &Path) -> Result<Session> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(2)?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load ORT session from {}", model_path.display()))
}

impl HandLandmarker for OrtHandLandmarker {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Hand>> {
        let regions = self.regions_for(frame);
        let (hands, tracked) = collect_hands(regions, (frame.width, frame.height), |region| {
            self.run_landmarks(frame, region)
        });
        self.tracked = tracked;
        Ok(hands)
    }
}

/// Locates a hand in every region. A region whose inference fails is logged
/// and dropped without losing the hands found in the others.
fn collect_hands(
    regions: Vec<CropRegion>,
    (width, height): (u32, u32),
    mut locate: impl FnMut(CropRegion) -> Result<Option<LocatedHand>>,
) -> (Vec<Hand>, Vec<CropRegion>) {
    let mut hands = Vec::with_capacity(regions.len());
    let mut tracked = Vec::with_capacity(regions.len());

    for region in regions {
        let hand = locate(region).and_then(|located| {
            located
                .map(|located| {
                    let normalized: Vec<Landmark> = located
                        .pixels
                        .iter()
                        .map(|&(x, y)| Landmark::new(x / width as f32, y / height as f32))
                        .collect();
                    let hand = Hand::from_points(
                        &normalized,
                        Handedness::from_score(located.handedness),
                        located.presence,
                    )?;
                    Ok((hand, region_from_landmarks(&located.pixels)))
                })
                .transpose()
        });

        match hand {
            Ok(Some((hand, next_region))) => {
                hands.push(hand);
                tracked.push(next_region);
            }
            Ok(None) => {}
            Err(err) => log::warn!("hand landmarks failed for one region: {err:?}"),
        }
    }

    (hands, tracked)
}

/// Adds crops for new palms that do not duplicate an already tracked hand.
fn merge_palms(regions: &mut Vec<CropRegion>, palms: &[PalmRegion], max_hands: usize) {
    for palm in palms {
        if regions.len() >= max_hands {
            break;
        }
        let duplicate = regions
            .iter()
            .any(|tracked| iou(&tracked.bounds(), &palm.bbox) >= DUPLICATE_IOU);
        if !duplicate {
            regions.push(crop_from_palm(palm));
        }
    }
}

fn decode_landmarks(flat: &[f32]) -> Result<Vec<(f32, f32)>> {
    if flat.len() < HAND_LANDMARKS * 3 {
        return Err(anyhow!(
            "unexpected landmarks length: got {}, need {}",
            flat.len(),
            HAND_LANDMARKS * 3
        ));
    }

    Ok(flat
        .chunks_exact(3)
        .take(HAND_LANDMARKS)
        .map(|chunk| (chunk[0], chunk[1]))
        .collect())
}

/// Crop for the next frame, derived from this frame's landmarks.
fn region_from_landmarks(points: &[(f32, f32)]) -> CropRegion {
    let (min_x, max_x, min_y, max_y) = points.iter().fold(
        (f32::MAX, f32::MIN, f32::MAX, f32::MIN),
        |acc, &(x, y)| (acc.0.min(x), acc.1.max(x), acc.2.min(y), acc.3.max(y)),
    );
    let angle = match (points.get(WRIST), points.get(MIDDLE_MCP)) {
        (Some(&wrist), Some(&mcp)) => upright_angle(wrist, mcp),
        _ => 0.0,
    };

    CropRegion {
        center: ((min_x + max_x) * 0.5, (min_y + max_y) * 0.5),
        side: (max_x - min_x).max(max_y - min_y) * TRACKING_CROP_SCALE,
        angle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landmark_decoding_keeps_xy_of_21_points() {
        let flat: Vec<f32> = (0..HAND_LANDMARKS * 3).map(|v| v as f32).collect();
        let points = decode_landmarks(&flat).unwrap();
        assert_eq!(points.len(), HAND_LANDMARKS);
        assert_eq!(points[1], (3.0, 4.0));
        assert!(decode_landmarks(&flat[..60]).is_err());
    }

    #[test]
    fn tracking_crop_covers_the_previous_hand() {
        let mut points = vec![(100.0, 100.0); HAND_LANDMARKS];
        points[WRIST] = (100.0, 200.0);
        points[MIDDLE_MCP] = (100.0, 120.0);
        points[12] = (140.0, 60.0);

        let region = region_from_landmarks(&points);
        assert_eq!(region.center, (120.0, 130.0));
        assert_eq!(region.side, 280.0);
        assert!(region.angle.abs() < 1e-6);
    }

    #[test]
    fn failed_region_keeps_the_other_hands() {
        let region = |x: f32| CropRegion {
            center: (x, 100.0),
            side: 80.0,
            angle: 0.0,
        };
        let located = |x: f32| LocatedHand {
            pixels: vec![(x, 100.0); HAND_LANDMARKS],
            presence: 0.9,
            handedness: 0.8,
        };

        let regions = vec![region(50.0), region(150.0), region(250.0), region(350.0)];
        let (hands, tracked) = collect_hands(regions, (400, 200), |region| match region.center.0 {
            x if x < 100.0 => Ok(Some(located(x))),
            x if x < 200.0 => Err(anyhow!("landmark inference failed")),
            x if x < 300.0 => Ok(None),
            x => Ok(Some(located(x))),
        });

        assert_eq!(hands.len(), 2);
        assert_eq!(tracked.len(), 2);
        assert_eq!(hands[0].landmarks[0], Landmark::new(0.125, 0.5));
        assert_eq!(hands[1].landmarks[0], Landmark::new(0.875, 0.5));
        assert_eq!(hands[1].handedness, Handedness::Right);
        assert_eq!(tracked[1].center, (350.0, 100.0));
    }

    #[test]
    fn palms_overlapping_tracked_hands_are_skipped() {
        let tracked = CropRegion {
            center: (50.0, 50.0),
            side: 100.0,
            angle: 0.0,
        };
        let same_hand = PalmRegion {
            bbox: [10.0, 10.0, 90.0, 90.0],
            landmarks: Vec::new(),
            score: 0.9,
        };
        let other_hand = PalmRegion {
            bbox: [300.0, 300.0, 360.0, 360.0],
            landmarks: Vec::new(),
            score: 0.8,
        };

        let mut regions = vec![tracked];
        merge_palms(&mut regions, &[same_hand.clone(), other_hand.clone()], 2);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[1].center, (330.0, 330.0));

        let mut full = vec![tracked];
        merge_palms(&mut full, &[other_hand], 1);
        assert_eq!(full.len(), 1);
    }
}
