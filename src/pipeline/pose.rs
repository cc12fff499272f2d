use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::tensor::{LetterboxInfo, PixelRange, letterbox};
use crate::{
    config::{PoseConfig, PoseModelVariant},
    types::{Frame, Keypoint, POSE_KEYPOINTS, Pose},
};

/// Opaque whole-body pose capability.
///
/// Returns at most one pose in single-pose mode and an empty list when no body
/// is visible. Callers never overlap calls.
pub trait PoseEstimator: Send + 'static {
    fn estimate(&mut self, frame: &Frame) -> Result<Vec<Pose>>;
}

/// Single-pose MoveNet on ONNX Runtime.
///
/// Input `[1, S, S, 3]` float RGB in `0..=255`, output `[1, 1, 17, 3]` rows of
/// `(y, x, score)` normalized to the input square.
pub struct MoveNetEstimator {
    session: Session,
    variant: PoseModelVariant,
    min_pose_score: f32,
}

impl MoveNetEstimator {
    pub fn new(config: &PoseConfig) -> Result<Self> {
        let session = load_session(&config.model_path)?;
        log::info!(
            "pose estimator ready using {} ({:?}, {}px)",
            config.model_path.display(),
            config.variant,
            config.variant.input_size()
        );

        Ok(Self {
            session,
            variant: config.variant,
            min_pose_score: config.min_pose_score,
        })
    }
}

fn load_session(model_path: &Path) -> Result<Session> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(2)?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load pose model from {}", model_path.display()))
}

impl PoseEstimator for MoveNetEstimator {
    fn estimate(&mut self, frame: &Frame) -> Result<Vec<Pose>> {
        let (input, info) = letterbox(frame, self.variant.input_size(), PixelRange::Byte)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run pose session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("pose model returned no outputs"));
        }

        let raw = outputs[0].try_extract_array::<f32>()?;
        let flat: Vec<f32> = raw.iter().copied().collect();
        let pose = decode_pose(&flat, &info)?;
        Ok(gate_pose(pose, self.min_pose_score))
    }
}

/// Single-pose result: the pose, or nothing when no body was found.
fn gate_pose(pose: Pose, min_pose_score: f32) -> Vec<Pose> {
    if pose.score < min_pose_score {
        log::trace!("pose score {:.2} below {min_pose_score:.2}, no body", pose.score);
        return Vec::new();
    }
    vec![pose]
}

/// Converts MoveNet rows into a pose in frame pixels.
fn decode_pose(flat: &[f32], info: &LetterboxInfo) -> Result<Pose> {
    if flat.len() < POSE_KEYPOINTS * 3 {
        return Err(anyhow!(
            "unexpected pose output length: got {}, need {}",
            flat.len(),
            POSE_KEYPOINTS * 3
        ));
    }

    let size = info.input_size as f32;
    let keypoints: Vec<Keypoint> = flat
        .chunks_exact(3)
        .take(POSE_KEYPOINTS)
        .map(|row| {
            let (x, y) = info.unproject(row[1] * size, row[0] * size);
            Keypoint::new(x, y, row[2])
        })
        .collect();

    Pose::from_slice(&keypoints)
}
