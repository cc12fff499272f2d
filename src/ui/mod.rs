use std::{mem, sync::Arc, thread};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use gpui::{
    AnyElement, App, AppContext, Context, IntoElement, ObjectFit, ParentElement, Render,
    RenderImage, Styled, StyledImage, TitlebarOptions, Window, WindowOptions, div, img, px,
};
use gpui_component::{ActiveTheme, Root, StyledExt, h_flex, tag::Tag, v_flex};
use image::{Frame as ImageFrame, ImageBuffer, Rgba};

use crate::{
    config::Config,
    model_download::{ModelDownloadEvent, ModelKind},
    pipeline::{
        CameraStream, Compositor, FrameGate, HandAdapter, LoopDriver, LoopDriverHandle,
        Mailboxes, MoveNetEstimator, OrtHandLandmarker, RgbaCanvas, spawn_loop_driver,
        start_camera_stream, start_hand_adapter,
    },
    types::{Frame, VideoInfo},
};

mod download;
mod main_view;
mod render_util;

const WINDOW_TITLE: &str = "Motion Overlay";

pub fn launch_ui(app: &mut App, config: Config) -> gpui::Result<()> {
    let window_options = WindowOptions {
        titlebar: Some(TitlebarOptions {
            title: Some(WINDOW_TITLE.into()),
            appears_transparent: false,
            traffic_light_position: None,
        }),
        ..Default::default()
    };

    app.open_window(window_options, move |window, app| {
        let view = app.new(|_| AppView::new(config));
        app.new(|cx| Root::new(view, window, cx))
    })?;

    Ok(())
}

/// Inference engines, built off the UI thread before capture starts.
struct Engines {
    hands: OrtHandLandmarker,
    pose: MoveNetEstimator,
}

enum LoaderMessage {
    Event(ModelDownloadEvent),
    Ready(Box<Engines>),
    Failed(String),
}

enum Screen {
    Loading(LoadingState),
    Failed(String),
    Main,
}

struct LoadingState {
    current: Option<ModelKind>,
    downloaded: u64,
    total: Option<u64>,
    message: String,
    ready: Vec<ModelKind>,
}

impl LoadingState {
    fn new() -> Self {
        Self {
            current: None,
            downloaded: 0,
            total: None,
            message: "Preparing models...".to_string(),
            ready: Vec::new(),
        }
    }
}

/// Everything that runs while the camera is live. Fields drop in order:
/// the driver stops first, then capture, then the hand worker.
struct LiveSession {
    driver: Option<LoopDriverHandle>,
    camera: CameraStream,
    _hands: HandAdapter,
    pending_pose: Option<MoveNetEstimator>,
    mailboxes: Mailboxes,
    video: Option<VideoInfo>,
}

struct AppView {
    config: Config,
    screen: Screen,
    loader_rx: Receiver<LoaderMessage>,
    _loader_handle: thread::JoinHandle<()>,
    session: Option<LiveSession>,
    shown_frame: Option<Arc<Frame>>,
    shown_overlay: Option<Arc<RgbaCanvas>>,
    video_image: Option<Arc<RenderImage>>,
    overlay_image: Option<Arc<RenderImage>>,
}

impl AppView {
    fn new(config: Config) -> Self {
        let (loader_tx, loader_rx) = unbounded();
        let loader_handle = download::spawn_asset_loader(config.clone(), loader_tx);

        Self {
            config,
            screen: Screen::Loading(LoadingState::new()),
            loader_rx,
            _loader_handle: loader_handle,
            session: None,
            shown_frame: None,
            shown_overlay: None,
            video_image: None,
            overlay_image: None,
        }
    }

    /// Opens the camera and the hand worker. The loop driver waits for the
    /// first decoded frame so the overlay can be sized to the video.
    fn start_session(&mut self, engines: Engines) -> Result<(), String> {
        let mailboxes = Mailboxes::default();
        let (hand_tx, hand_rx): (Sender<Arc<Frame>>, Receiver<Arc<Frame>>) = bounded(1);

        let camera = start_camera_stream(&self.config.capture, mailboxes.frames.clone(), hand_tx)
            .map_err(|err| {
                log::error!("camera setup failed: {err}");
                err.to_string()
            })?;

        let hands = start_hand_adapter(
            engines.hands,
            self.config.hands.max_hands,
            hand_rx,
            mailboxes.hands.clone(),
        );

        self.session = Some(LiveSession {
            driver: None,
            camera,
            _hands: hands,
            pending_pose: Some(engines.pose),
            mailboxes,
            video: None,
        });
        Ok(())
    }

    fn start_driver_when_ready(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.driver.is_some() {
            return;
        }
        let Some(video) = session.camera.poll_ready() else {
            return;
        };
        let Some(estimator) = session.pending_pose.take() else {
            return;
        };

        log::info!("video ready at {}x{}, starting loop driver", video.width, video.height);
        let driver = LoopDriver::new(
            FrameGate::new(self.config.scheduler.target_fps),
            estimator,
            Compositor::new(self.config.render.clone()),
            video,
            session.mailboxes.clone(),
        );
        session.driver = Some(spawn_loop_driver(driver));
        session.video = Some(video);
    }
}

impl Render for AppView {
    fn render(
        &mut self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> impl gpui::IntoElement {
        // Re-arm every frame; this is the display refresh tick.
        cx.defer_in(window, |_, _, cx| {
            cx.notify();
        });

        let mut screen = mem::replace(&mut self.screen, Screen::Main);
        let view = match screen {
            Screen::Loading(mut state) => {
                let engines = self.poll_loader_events(&mut state);
                match engines {
                    Ok(Some(engines)) => match self.start_session(*engines) {
                        Ok(()) => screen = Screen::Main,
                        Err(message) => screen = Screen::Failed(message),
                    },
                    Ok(None) => screen = Screen::Loading(state),
                    Err(message) => screen = Screen::Failed(message),
                }
                match &screen {
                    Screen::Loading(state) => self.render_loading_view(state, cx),
                    Screen::Failed(message) => self.render_failure_view(message, cx),
                    Screen::Main => self.render_main(window, cx),
                }
            }
            Screen::Failed(message) => {
                let view = self.render_failure_view(&message, cx);
                screen = Screen::Failed(message);
                view
            }
            Screen::Main => {
                screen = Screen::Main;
                self.render_main(window, cx)
            }
        };
        self.screen = screen;
        view
    }
}
