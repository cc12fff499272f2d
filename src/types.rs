use std::time::Instant;

use anyhow::{Result, anyhow};

pub const HAND_LANDMARKS: usize = 21;
pub const POSE_KEYPOINTS: usize = 17;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn is_well_formed(&self) -> bool {
        let expected = (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(4);
        self.width > 0 && self.height > 0 && self.rgba.len() == expected
    }
}

/// Decoded size of the live video, announced once the first frame is available.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
}

/// A hand point with both coordinates normalized to `[0, 1]` of the frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x: x.clamp(0.0, 1.0),
            y: y.clamp(0.0, 1.0),
        }
    }

    pub fn to_pixel(&self, width: u32, height: u32) -> (f32, f32) {
        (self.x * width as f32, self.y * height as f32)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
    Unknown,
}

impl Handedness {
    pub fn from_score(score: f32) -> Self {
        if !score.is_finite() {
            Handedness::Unknown
        } else if score >= 0.5 {
            Handedness::Right
        } else {
            Handedness::Left
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Hand {
    pub landmarks: [Landmark; HAND_LANDMARKS],
    pub handedness: Handedness,
    pub score: f32,
}

impl Hand {
    pub fn from_points(points: &[Landmark], handedness: Handedness, score: f32) -> Result<Self> {
        let landmarks: [Landmark; HAND_LANDMARKS] = points.try_into().map_err(|_| {
            anyhow!(
                "hand needs exactly {HAND_LANDMARKS} landmarks, got {}",
                points.len()
            )
        })?;
        Ok(Self {
            landmarks,
            handedness,
            score,
        })
    }
}

/// MoveNet / COCO keypoint order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

/// Connected keypoint pairs of the drawn body skeleton.
pub const SKELETON_EDGES: [(KeypointIndex, KeypointIndex); 14] = [
    // head
    (KeypointIndex::Nose, KeypointIndex::LeftEye),
    (KeypointIndex::Nose, KeypointIndex::RightEye),
    // shoulders
    (KeypointIndex::LeftShoulder, KeypointIndex::RightShoulder),
    // left arm
    (KeypointIndex::LeftShoulder, KeypointIndex::LeftElbow),
    (KeypointIndex::LeftElbow, KeypointIndex::LeftWrist),
    // right arm
    (KeypointIndex::RightShoulder, KeypointIndex::RightElbow),
    (KeypointIndex::RightElbow, KeypointIndex::RightWrist),
    // torso
    (KeypointIndex::LeftShoulder, KeypointIndex::LeftHip),
    (KeypointIndex::RightShoulder, KeypointIndex::RightHip),
    (KeypointIndex::LeftHip, KeypointIndex::RightHip),
    // left leg
    (KeypointIndex::LeftHip, KeypointIndex::LeftKnee),
    (KeypointIndex::LeftKnee, KeypointIndex::LeftAnkle),
    // right leg
    (KeypointIndex::RightHip, KeypointIndex::RightKnee),
    (KeypointIndex::RightKnee, KeypointIndex::RightAnkle),
];

/// Body point in frame pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pose {
    pub keypoints: [Keypoint; POSE_KEYPOINTS],
    pub score: f32,
}

/// Keypoints at or below this confidence do not count toward the pose score.
pub const POSE_SCORE_KEYPOINT_FLOOR: f32 = 0.2;

impl Pose {
    /// Scores the pose as the mean confidence of its confidently placed
    /// keypoints, so a partly visible body still scores high.
    pub fn new(keypoints: [Keypoint; POSE_KEYPOINTS]) -> Self {
        let (sum, count) = keypoints
            .iter()
            .filter(|k| k.confidence > POSE_SCORE_KEYPOINT_FLOOR)
            .fold((0.0f32, 0usize), |(sum, count), k| (sum + k.confidence, count + 1));
        let score = if count == 0 { 0.0 } else { sum / count as f32 };
        Self { keypoints, score }
    }

    pub fn from_slice(keypoints: &[Keypoint]) -> Result<Self> {
        let keypoints: [Keypoint; POSE_KEYPOINTS] = keypoints.try_into().map_err(|_| {
            anyhow!(
                "pose needs exactly {POSE_KEYPOINTS} keypoints, got {}",
                keypoints.len()
            )
        })?;
        Ok(Self::new(keypoints))
    }

    pub fn get(&self, index: KeypointIndex) -> &Keypoint {
        &self.keypoints[index as usize]
    }
}
