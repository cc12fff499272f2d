use thiserror::Error;

use crate::model_download::ModelKind;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera access was denied")]
    PermissionDenied,
    #[error("no usable camera: {reason}")]
    DeviceUnavailable { reason: String },
}

impl CaptureError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        CaptureError::DeviceUnavailable {
            reason: reason.into(),
        }
    }

    /// Maps a backend failure message onto the capture taxonomy.
    pub fn classify(message: &str) -> Self {
        let lowered = message.to_ascii_lowercase();
        let denied = ["permission", "denied", "not authorized", "unauthorized"]
            .iter()
            .any(|needle| lowered.contains(needle));
        if denied {
            CaptureError::PermissionDenied
        } else {
            CaptureError::unavailable(message)
        }
    }
}

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to load {model} model")]
    AssetLoadFailure {
        model: ModelKind,
        #[source]
        source: anyhow::Error,
    },
}

impl AssetError {
    pub fn load_failure(model: ModelKind, source: anyhow::Error) -> Self {
        AssetError::AssetLoadFailure { model, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_messages_map_to_permission_denied() {
        assert!(matches!(
            CaptureError::classify("AVFoundation: Permission Denied by user"),
            CaptureError::PermissionDenied
        ));
        assert!(matches!(
            CaptureError::classify("camera access not authorized"),
            CaptureError::PermissionDenied
        ));
    }

    #[test]
    fn other_messages_map_to_device_unavailable() {
        match CaptureError::classify("Could not open device /dev/video0") {
            CaptureError::DeviceUnavailable { reason } => {
                assert!(reason.contains("/dev/video0"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn asset_failure_keeps_the_model_and_cause() {
        let err = AssetError::load_failure(ModelKind::PoseEstimator, anyhow::anyhow!("404"));
        assert_eq!(err.to_string(), "failed to load pose estimator model");
        assert_eq!(std::error::Error::source(&err).unwrap().to_string(), "404");
    }
}
