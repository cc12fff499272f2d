use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, bounded};
use nokhwa::{
    Camera, NokhwaError,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, CameraInfo, FrameFormat, RequestedFormat,
        RequestedFormatType, Resolution,
    },
};

use super::{mailbox::Mailbox, rgba_converter};
use crate::{
    config::{CaptureConfig, Facing},
    error::CaptureError,
    types::{Frame, VideoInfo},
};

// Prefer pixel formats that are widely supported on macOS (the built-in cameras
// often reject YUYV even though Nokhwa reports it).
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

const USER_FACING_HINTS: &[&str] = &["front", "facetime", "user", "integrated", "webcam"];
const ENVIRONMENT_FACING_HINTS: &[&str] = &["back", "rear", "environment"];

/// Capture gives up after this many failed reads or decodes in a row.
const MAX_CONSECUTIVE_FRAME_ERRORS: u32 = 50;
const FRAME_RETRY_STEP: Duration = Duration::from_millis(10);
const FRAME_RETRY_MAX: Duration = Duration::from_millis(250);

/// The configured size and rate, as MJPEG.
fn ideal_format(config: &CaptureConfig) -> CameraFormat {
    CameraFormat::new(
        Resolution::new(config.width, config.height),
        FrameFormat::MJPEG,
        config.frame_rate,
    )
}

/// Formats to try in order: the configured size/rate first, then whatever the
/// device offers.
fn requested_formats(config: &CaptureConfig) -> Vec<RequestedFormat<'static>> {
    let mut formats: Vec<RequestedFormat<'static>> = [FrameFormat::MJPEG, FrameFormat::YUYV, FrameFormat::NV12]
        .into_iter()
        .map(|fourcc| {
            let mut ideal = ideal_format(config);
            ideal.set_format(fourcc);
            RequestedFormat::with_formats(RequestedFormatType::Closest(ideal), PREFERRED_PIXEL_FORMATS)
        })
        .collect();

    formats.extend([
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        // Fall back to any format Nokhwa can decode.
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]);
    formats
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

/// Latches the first video size announced by the capture thread.
#[derive(Debug)]
struct ReadyLatch {
    rx: Receiver<VideoInfo>,
    video: Option<VideoInfo>,
}

impl ReadyLatch {
    fn new(rx: Receiver<VideoInfo>) -> Self {
        Self { rx, video: None }
    }

    fn poll(&mut self) -> Option<VideoInfo> {
        if self.video.is_none() {
            self.video = self.rx.try_recv().ok();
        }
        self.video
    }
}

/// Counts failed reads in a row and spaces out the retries.
#[derive(Debug, Default)]
struct FrameErrors {
    consecutive: u32,
}

impl FrameErrors {
    /// Delay before the next read, or `None` once capture should stop.
    fn record_failure(&mut self) -> Option<Duration> {
        self.consecutive += 1;
        if self.consecutive >= MAX_CONSECUTIVE_FRAME_ERRORS {
            return None;
        }
        Some((FRAME_RETRY_STEP * self.consecutive).min(FRAME_RETRY_MAX))
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }
}

/// Running capture thread. Dropping it stops capture.
#[derive(Debug)]
pub struct CameraStream {
    device: CameraDevice,
    stop: Arc<AtomicBool>,
    ready: ReadyLatch,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraStream {
    pub fn device(&self) -> &CameraDevice {
        &self.device
    }

    /// Returns the video size once the first frame has decoded. The readiness
    /// event fires exactly once; later calls keep returning the cached value.
    pub fn poll_ready(&mut self) -> Option<VideoInfo> {
        self.ready.poll()
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            log::info!("camera capture stopped ({})", self.device.label);
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn available_cameras() -> Result<Vec<CameraDevice>, CaptureError> {
    if !nokhwa::nokhwa_check() {
        return Err(CaptureError::PermissionDenied);
    }
    let cameras = query(ApiBackend::Auto).map_err(|err| classify_nokhwa_error(&err))?;
    Ok(cameras
        .into_iter()
        .map(|info| CameraDevice {
            index: info.index().clone(),
            label: format_camera_label(&info),
        })
        .collect())
}

fn format_camera_label(info: &CameraInfo) -> String {
    info.human_name()
}

fn classify_nokhwa_error(err: &NokhwaError) -> CaptureError {
    CaptureError::classify(&err.to_string())
}

/// Picks the configured index, else a device whose name matches the requested
/// facing, else the first device.
pub fn select_device(devices: &[CameraDevice], config: &CaptureConfig) -> Option<CameraDevice> {
    if let Some(index) = config.device_index {
        return devices
            .iter()
            .find(|d| d.index == CameraIndex::Index(index))
            .cloned();
    }

    let hints = match config.facing {
        Facing::User => USER_FACING_HINTS,
        Facing::Environment => ENVIRONMENT_FACING_HINTS,
    };
    devices
        .iter()
        .find(|d| {
            let label = d.label.to_ascii_lowercase();
            hints.iter().any(|hint| label.contains(hint))
        })
        .or_else(|| devices.first())
        .cloned()
}

fn build_camera(index: &CameraIndex, config: &CaptureConfig) -> Result<Camera, CaptureError> {
    let mut last_err = None;

    for requested in requested_formats(config) {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err),
            },
            Err(err) => last_err = Some(err),
        }
    }

    Err(last_err
        .map(|err| classify_nokhwa_error(&err))
        .unwrap_or_else(|| CaptureError::unavailable("failed to open camera with any supported format")))
}

/// Opens the camera and starts the capture thread.
///
/// Every decoded frame replaces the contents of `frames` and is offered to the
/// hand adapter through `hand_tx`; when that adapter is still busy the frame is
/// not queued for it.
pub fn start_camera_stream(
    config: &CaptureConfig,
    frames: Mailbox<Frame>,
    hand_tx: Sender<Arc<Frame>>,
) -> Result<CameraStream, CaptureError> {
    let devices = available_cameras()?;
    let device = select_device(&devices, config)
        .ok_or_else(|| CaptureError::unavailable("no camera detected"))?;

    // Fail fast before spawning the capture thread.
    let camera = build_camera(&device.index, config)?;
    let format = camera.camera_format();
    log::info!(
        "opened camera {} at {}x{} {}fps ({:?})",
        device.label,
        format.width(),
        format.height(),
        format.frame_rate(),
        format.format()
    );
    drop(camera);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let (ready_tx, ready_rx) = bounded(1);
    let index = device.index.clone();
    let capture_config = config.clone();

    let handle = thread::spawn(move || {
        let mut camera = match build_camera(&index, &capture_config) {
            Ok(cam) => cam,
            Err(err) => {
                log::error!("failed to open camera: {err}");
                return;
            }
        };

        let mut announced = false;
        let mut errors = FrameErrors::default();
        while !stop_flag.load(Ordering::Relaxed) {
            let frame_start = Instant::now();
            let decoded = camera
                .frame()
                .map_err(anyhow::Error::from)
                .and_then(|buffer| rgba_converter::decode_frame(&buffer));
            let frame = match decoded {
                Ok(frame) => {
                    errors.reset();
                    Arc::new(frame)
                }
                Err(err) => {
                    log::warn!(
                        "camera frame failed (after {:?}): {err:?}",
                        frame_start.elapsed()
                    );
                    match errors.record_failure() {
                        Some(delay) => {
                            thread::sleep(delay);
                            continue;
                        }
                        None => {
                            log::error!(
                                "camera stopped delivering frames after {MAX_CONSECUTIVE_FRAME_ERRORS} failures"
                            );
                            break;
                        }
                    }
                }
            };

            if !announced {
                announced = true;
                let _ = ready_tx.try_send(VideoInfo {
                    width: frame.width,
                    height: frame.height,
                });
            }

            frames.publish_shared(frame.clone());
            // Drop if the hand adapter is busy.
            let _ = hand_tx.try_send(frame);
        }

        let _ = camera.stop_stream();
    });

    Ok(CameraStream {
        device,
        stop,
        ready: ReadyLatch::new(ready_rx),
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(index: u32, label: &str) -> CameraDevice {
        CameraDevice {
            index: CameraIndex::Index(index),
            label: label.to_string(),
        }
    }

    #[test]
    fn explicit_index_wins() {
        let devices = [device(0, "FaceTime HD Camera"), device(1, "USB Capture")];
        let config = CaptureConfig {
            device_index: Some(1),
            ..CaptureConfig::default()
        };
        assert_eq!(select_device(&devices, &config).unwrap().label, "USB Capture");

        let missing = CaptureConfig {
            device_index: Some(7),
            ..CaptureConfig::default()
        };
        assert!(select_device(&devices, &missing).is_none());
    }

    #[test]
    fn facing_hint_picks_matching_device() {
        let devices = [device(0, "Rear Camera"), device(1, "Front Camera")];
        let user = CaptureConfig::default();
        assert_eq!(select_device(&devices, &user).unwrap().label, "Front Camera");

        let environment = CaptureConfig {
            facing: Facing::Environment,
            ..CaptureConfig::default()
        };
        assert_eq!(select_device(&devices, &environment).unwrap().label, "Rear Camera");
    }

    #[test]
    fn falls_back_to_first_device() {
        let devices = [device(3, "Capture A"), device(4, "Capture B")];
        assert_eq!(
            select_device(&devices, &CaptureConfig::default()).unwrap().label,
            "Capture A"
        );
        assert!(select_device(&[], &CaptureConfig::default()).is_none());
    }

    #[test]
    fn ideal_format_is_requested_first() {
        let formats = requested_formats(&CaptureConfig::default());
        assert_eq!(formats.len(), 6);

        let ideal = CameraFormat::new(Resolution::new(640, 480), FrameFormat::MJPEG, 60);
        assert_eq!(ideal_format(&CaptureConfig::default()), ideal);
        assert_eq!(
            formats[0].requested_format_type(),
            RequestedFormatType::Closest(ideal)
        );
        assert_eq!(
            formats[5].requested_format_type(),
            RequestedFormatType::None
        );
    }

    #[test]
    fn readiness_is_reported_once_and_then_cached() {
        let (ready_tx, ready_rx) = bounded(2);
        let mut latch = ReadyLatch::new(ready_rx);
        assert_eq!(latch.poll(), None);

        let first = VideoInfo {
            width: 640,
            height: 480,
        };
        ready_tx.send(first).unwrap();
        assert_eq!(latch.poll(), Some(first));

        ready_tx
            .send(VideoInfo {
                width: 1280,
                height: 720,
            })
            .unwrap();
        assert_eq!(latch.poll(), Some(first));
        assert_eq!(latch.poll(), Some(first));
    }

    #[test]
    fn repeated_frame_failures_back_off_then_give_up() {
        let mut errors = FrameErrors::default();
        assert_eq!(errors.record_failure(), Some(FRAME_RETRY_STEP));
        assert_eq!(errors.record_failure(), Some(FRAME_RETRY_STEP * 2));

        errors.reset();
        assert_eq!(errors.record_failure(), Some(FRAME_RETRY_STEP));

        let delays: Vec<_> = (1..MAX_CONSECUTIVE_FRAME_ERRORS)
            .map(|_| errors.record_failure())
            .collect();
        assert!(delays[..delays.len() - 1]
            .iter()
            .all(|d| d.is_some_and(|d| d <= FRAME_RETRY_MAX)));
        assert_eq!(delays.last(), Some(&None));
    }
}
