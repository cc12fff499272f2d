use std::{
    fmt, fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    PalmDetector,
    HandLandmark,
    PoseEstimator,
}

impl ModelKind {
    pub fn label(&self) -> &'static str {
        match self {
            ModelKind::PalmDetector => "palm detector",
            ModelKind::HandLandmark => "hand landmark",
            ModelKind::PoseEstimator => "pose estimator",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

const HAND_LANDMARK_MODEL_FILENAME: &str = "handpose_estimation_mediapipe_2023feb.onnx";
const HAND_LANDMARK_MODEL_URL: &str = "https://raw.githubusercontent.com/214zzl995/gesture-universe/refs/heads/main/models/handpose_estimation_mediapipe_2023feb.onnx";
const PALM_DETECTOR_MODEL_FILENAME: &str = "palm_detection_mediapipe_2023feb.onnx";
const PALM_DETECTOR_MODEL_URL: &str = "https://raw.githubusercontent.com/214zzl995/gesture-universe/refs/heads/main/models/palm_detection_mediapipe_2023feb.onnx";
const POSE_ESTIMATOR_MODEL_FILENAME: &str = "movenet_singlepose_thunder.onnx";

pub fn default_hand_landmark_model_path() -> PathBuf {
    PathBuf::from("models").join(HAND_LANDMARK_MODEL_FILENAME)
}

pub fn default_palm_detector_model_path() -> PathBuf {
    PathBuf::from("models").join(PALM_DETECTOR_MODEL_FILENAME)
}

pub fn default_pose_estimator_model_path() -> PathBuf {
    PathBuf::from("models").join(POSE_ESTIMATOR_MODEL_FILENAME)
}

/// Built-in download location; the pose model has none and must be configured.
pub fn default_model_url(model: ModelKind) -> Option<&'static str> {
    match model {
        ModelKind::PalmDetector => Some(PALM_DETECTOR_MODEL_URL),
        ModelKind::HandLandmark => Some(HAND_LANDMARK_MODEL_URL),
        ModelKind::PoseEstimator => None,
    }
}

#[derive(Clone, Debug)]
pub enum ModelDownloadEvent {
    AlreadyPresent {
        model: ModelKind,
    },
    Started {
        model: ModelKind,
        total: Option<u64>,
    },
    Progress {
        model: ModelKind,
        downloaded: u64,
        total: Option<u64>,
    },
    Finished {
        model: ModelKind,
    },
}

/// Makes sure `model_path` exists, downloading it from `url` if needed.
pub fn ensure_model_ready<F>(
    model: ModelKind,
    model_path: &Path,
    url: Option<&str>,
    mut on_event: F,
) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    if model_path.exists() {
        on_event(ModelDownloadEvent::AlreadyPresent { model });
        on_event(ModelDownloadEvent::Finished { model });
        return Ok(());
    }

    let url = url.ok_or_else(|| {
        anyhow!(
            "{model} model missing at {} and no download url configured",
            model_path.display()
        )
    })?;

    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create model directory {}", parent.display()))?;
    }

    let mut progress: Option<ProgressBar> = None;
    download_to_path(model, url, model_path, &mut |event| {
        match &event {
            ModelDownloadEvent::Started { total, .. } => {
                progress = Some(create_progress_bar(*total));
            }
            ModelDownloadEvent::Progress { downloaded, .. } => {
                if let Some(pb) = progress.as_ref() {
                    pb.set_position(*downloaded);
                }
            }
            ModelDownloadEvent::Finished { model } => {
                if let Some(pb) = progress.take() {
                    pb.finish_with_message(format!("{model} model ready"));
                }
            }
            ModelDownloadEvent::AlreadyPresent { .. } => {}
        }
        on_event(event);
    })
    .with_context(|| format!("failed to download {model} model to {}", model_path.display()))
}

fn download_to_path<F>(
    model: ModelKind,
    url: &str,
    dest: &Path,
    on_event: &mut F,
) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    log::info!("downloading {model} model from {url} to {}", dest.display());

    let client = Client::new();
    let mut response = client
        .get(url)
        .send()
        .context("failed to start model download")?
        .error_for_status()
        .context("model download returned error status")?;

    let total_size = response.content_length();
    on_event(ModelDownloadEvent::Started {
        model,
        total: total_size,
    });

    let tmp_path = dest.with_extension("download");
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; 16 * 1024];
    loop {
        let bytes_read = response
            .read(&mut buffer)
            .context("failed while reading model bytes")?;
        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read])
            .context("failed while writing model to disk")?;
        downloaded += bytes_read as u64;
        on_event(ModelDownloadEvent::Progress {
            model,
            downloaded,
            total: total_size,
        });
    }

    file.sync_all()
        .context("failed to flush downloaded model to disk")?;
    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to move temp model {} into place at {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    on_event(ModelDownloadEvent::Finished { model });
    Ok(())
}

fn create_progress_bar(total_size: Option<u64>) -> ProgressBar {
    match total_size {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            ) {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        }
        _ => {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.green} downloading model") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_model_reports_without_downloading() {
        let dir = std::env::temp_dir().join(format!("motion-overlay-models-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("present.onnx");
        fs::write(&path, b"onnx").unwrap();

        let mut events = Vec::new();
        ensure_model_ready(ModelKind::PalmDetector, &path, None, |evt| events.push(evt)).unwrap();

        assert!(matches!(
            events.as_slice(),
            [
                ModelDownloadEvent::AlreadyPresent { model: ModelKind::PalmDetector },
                ModelDownloadEvent::Finished { model: ModelKind::PalmDetector },
            ]
        ));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_model_without_url_fails() {
        let path = std::env::temp_dir().join("motion-overlay-definitely-missing.onnx");
        let err = ensure_model_ready(ModelKind::PoseEstimator, &path, None, |_| {}).unwrap_err();
        assert!(err.to_string().contains("no download url"));
    }

    #[test]
    fn only_hand_models_ship_with_urls() {
        assert!(default_model_url(ModelKind::PalmDetector).is_some());
        assert!(default_model_url(ModelKind::HandLandmark).is_some());
        assert!(default_model_url(ModelKind::PoseEstimator).is_none());
    }
}
