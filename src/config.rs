use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::model_download::{
    default_hand_landmark_model_path, default_palm_detector_model_path,
    default_pose_estimator_model_path,
};

pub const CONFIG_ENV_VAR: &str = "MOTION_OVERLAY_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "motion-overlay.toml";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub hands: HandConfig,
    pub pose: PoseConfig,
    #[serde(rename = "loop")]
    pub scheduler: LoopConfig,
    pub render: RenderConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    User,
    Environment,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_capture_width")]
    pub width: u32,
    #[serde(default = "default_capture_height")]
    pub height: u32,
    #[serde(default = "default_capture_frame_rate")]
    pub frame_rate: u32,
    #[serde(default = "default_facing")]
    pub facing: Facing,
    /// Explicit camera index; overrides the facing heuristic.
    #[serde(default)]
    pub device_index: Option<u32>,
}

fn default_capture_width() -> u32 { 640 }
fn default_capture_height() -> u32 { 480 }
fn default_capture_frame_rate() -> u32 { 60 }
fn default_facing() -> Facing { Facing::User }

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: default_capture_width(),
            height: default_capture_height(),
            frame_rate: default_capture_frame_rate(),
            facing: default_facing(),
            device_index: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct HandConfig {
    #[serde(default = "default_max_hands")]
    pub max_hands: usize,
    #[serde(default = "default_model_complexity")]
    pub model_complexity: u8,
    #[serde(default = "default_min_confidence")]
    pub min_detection_confidence: f32,
    #[serde(default = "default_min_confidence")]
    pub min_tracking_confidence: f32,
    #[serde(default = "default_palm_detector_model_path")]
    pub palm_model_path: PathBuf,
    #[serde(default = "default_hand_landmark_model_path")]
    pub landmark_model_path: PathBuf,
}

fn default_max_hands() -> usize { 2 }
fn default_model_complexity() -> u8 { 1 }
fn default_min_confidence() -> f32 { 0.5 }

impl Default for HandConfig {
    fn default() -> Self {
        Self {
            max_hands: default_max_hands(),
            model_complexity: default_model_complexity(),
            min_detection_confidence: default_min_confidence(),
            min_tracking_confidence: default_min_confidence(),
            palm_model_path: default_palm_detector_model_path(),
            landmark_model_path: default_hand_landmark_model_path(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoseModelVariant {
    /// Fast variant, 192x192 input.
    Lightning,
    /// High accuracy variant, 256x256 input.
    Thunder,
}

impl PoseModelVariant {
    pub fn input_size(&self) -> u32 {
        match self {
            PoseModelVariant::Lightning => 192,
            PoseModelVariant::Thunder => 256,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PoseConfig {
    #[serde(default = "default_pose_variant")]
    pub variant: PoseModelVariant,
    /// Mean keypoint score below which a pose counts as "no body".
    #[serde(default = "default_min_pose_score")]
    pub min_pose_score: f32,
    #[serde(default = "default_pose_estimator_model_path")]
    pub model_path: PathBuf,
    /// Where to fetch the model from when `model_path` does not exist.
    #[serde(default)]
    pub model_url: Option<String>,
}

fn default_pose_variant() -> PoseModelVariant { PoseModelVariant::Thunder }
fn default_min_pose_score() -> f32 { 0.25 }

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            variant: default_pose_variant(),
            min_pose_score: default_min_pose_score(),
            model_path: default_pose_estimator_model_path(),
            model_url: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "default_target_fps")]
    pub target_fps: f64,
}

fn default_target_fps() -> f64 { 60.0 }

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_point_radius")]
    pub point_radius: f32,
    #[serde(default = "default_line_width")]
    pub line_width: f32,
    /// Keypoints and edges are drawn only above this confidence (strict).
    #[serde(default = "default_keypoint_threshold")]
    pub keypoint_threshold: f32,
    #[serde(default = "default_keypoint_color")]
    pub keypoint_color: [u8; 4],
    #[serde(default = "default_edge_color")]
    pub edge_color: [u8; 4],
    #[serde(default = "default_hand_color")]
    pub hand_color: [u8; 4],
}

fn default_point_radius() -> f32 { 5.0 }
fn default_line_width() -> f32 { 2.0 }
fn default_keypoint_threshold() -> f32 { 0.5 }
fn default_keypoint_color() -> [u8; 4] { [0, 255, 255, 255] } // aqua
fn default_edge_color() -> [u8; 4] { [255, 0, 0, 255] } // red
fn default_hand_color() -> [u8; 4] { [0, 0, 255, 255] } // blue

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            point_radius: default_point_radius(),
            line_width: default_line_width(),
            keypoint_threshold: default_keypoint_threshold(),
            keypoint_color: default_keypoint_color(),
            edge_color: default_edge_color(),
            hand_color: default_hand_color(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `$MOTION_OVERLAY_CONFIG`, else `./motion-overlay.toml`, else defaults.
    pub fn discover() -> Result<Self> {
        if let Some(path) = env::var_os(CONFIG_ENV_VAR) {
            return Self::load(PathBuf::from(path));
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::load(local);
        }

        log::info!("no {DEFAULT_CONFIG_FILE} found, using built-in defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.width == 0 || self.capture.height == 0 || self.capture.frame_rate == 0 {
            bail!("capture width, height and frame_rate must be non-zero");
        }
        if self.hands.max_hands == 0 {
            bail!("hands.max_hands must be at least 1");
        }
        if self.hands.model_complexity > 1 {
            bail!(
                "hands.model_complexity must be 0 or 1, got {}",
                self.hands.model_complexity
            );
        }
        for (name, value) in [
            ("hands.min_detection_confidence", self.hands.min_detection_confidence),
            ("hands.min_tracking_confidence", self.hands.min_tracking_confidence),
            ("pose.min_pose_score", self.pose.min_pose_score),
            ("render.keypoint_threshold", self.render.keypoint_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{name} must be within [0, 1], got {value}");
            }
        }
        if !(self.scheduler.target_fps.is_finite() && self.scheduler.target_fps > 0.0) {
            bail!("loop.target_fps must be positive, got {}", self.scheduler.target_fps);
        }
        if self.render.point_radius < 0.0 || self.render.line_width <= 0.0 {
            bail!("render.point_radius must be >= 0 and render.line_width > 0");
        }
        Ok(())
    }
}
