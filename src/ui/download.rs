use super::{
    ActiveTheme, AnyElement, AppView, Context, Engines, IntoElement, LoaderMessage, LoadingState,
    ModelDownloadEvent, ModelKind, MoveNetEstimator, OrtHandLandmarker, ParentElement, Sender,
    Styled, StyledExt, Tag, div, h_flex, thread, v_flex,
};
use crate::{
    config::Config,
    error::AssetError,
    model_download::{default_model_url, ensure_model_ready},
};

impl AppView {
    /// Applies queued loader messages; returns the engines once everything loaded.
    pub(super) fn poll_loader_events(
        &mut self,
        state: &mut LoadingState,
    ) -> Result<Option<Box<Engines>>, String> {
        while let Ok(msg) = self.loader_rx.try_recv() {
            match msg {
                LoaderMessage::Event(ModelDownloadEvent::AlreadyPresent { model }) => {
                    state.current = Some(model);
                    state.message = format!("{model} model found on disk");
                }
                LoaderMessage::Event(ModelDownloadEvent::Started { model, total }) => {
                    state.current = Some(model);
                    state.downloaded = 0;
                    state.total = total;
                    state.message = format!("Downloading {model} model...");
                }
                LoaderMessage::Event(ModelDownloadEvent::Progress {
                    model,
                    downloaded,
                    total,
                }) => {
                    state.current = Some(model);
                    state.downloaded = downloaded;
                    state.total = total;
                }
                LoaderMessage::Event(ModelDownloadEvent::Finished { model }) => {
                    if !state.ready.contains(&model) {
                        state.ready.push(model);
                    }
                    state.message = format!("{model} model ready");
                }
                LoaderMessage::Ready(engines) => return Ok(Some(engines)),
                LoaderMessage::Failed(err) => return Err(err),
            }
        }
        Ok(None)
    }

    pub(super) fn render_loading_view(
        &self,
        state: &LoadingState,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let theme = cx.theme();
        let bar = progress_bar_string(state.downloaded, state.total);
        let current = state
            .current
            .map(|model| format!("Current: {model}"))
            .unwrap_or_else(|| "Checking model files".to_string());
        let ready = format!("{}/{} models ready", state.ready.len(), MODEL_ORDER.len());

        let container = v_flex()
            .gap_3()
            .p_6()
            .rounded_lg()
            .border_1()
            .border_color(theme.border)
            .bg(theme.group_box)
            .child(
                h_flex()
                    .gap_2()
                    .items_center()
                    .child(
                        div()
                            .text_color(theme.foreground)
                            .font_semibold()
                            .child("⟳ Loading models"),
                    )
                    .child(
                        div()
                            .text_sm()
                            .text_color(theme.muted_foreground)
                            .child(ready),
                    ),
            )
            .child(
                div()
                    .px_3()
                    .py_2()
                    .rounded_md()
                    .border_1()
                    .border_color(theme.border)
                    .bg(theme.muted)
                    .font_family(theme.mono_font_family.clone())
                    .text_color(theme.foreground)
                    .child(bar),
            )
            .child(
                div()
                    .text_sm()
                    .text_color(theme.muted_foreground)
                    .child(current),
            )
            .child(
                div()
                    .text_color(theme.foreground)
                    .child(state.message.clone()),
            );

        v_flex()
            .size_full()
            .items_center()
            .justify_center()
            .bg(theme.background)
            .child(container)
            .into_any_element()
    }

    pub(super) fn render_failure_view(
        &self,
        message: &str,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let theme = cx.theme();

        let container = v_flex()
            .gap_3()
            .p_6()
            .rounded_lg()
            .border_1()
            .border_color(theme.border)
            .bg(theme.group_box)
            .child(
                div()
                    .text_color(theme.accent)
                    .font_semibold()
                    .child("✗ Setup failed"),
            )
            .child(Tag::danger().rounded_full().child(message.to_string()))
            .child(
                div()
                    .text_sm()
                    .text_color(theme.muted_foreground)
                    .child("Fix the problem above and restart the application."),
            );

        v_flex()
            .size_full()
            .items_center()
            .justify_center()
            .bg(theme.background)
            .child(container)
            .into_any_element()
    }
}

const MODEL_ORDER: [ModelKind; 3] = [
    ModelKind::PalmDetector,
    ModelKind::HandLandmark,
    ModelKind::PoseEstimator,
];

/// Resolves every model file, then builds both engines on this thread so the
/// UI never blocks on session creation.
pub(super) fn spawn_asset_loader(
    config: Config,
    tx: Sender<LoaderMessage>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let message = match load_engines(&config, &tx) {
            Ok(engines) => {
                log::info!("all models loaded");
                LoaderMessage::Ready(Box::new(engines))
            }
            Err(err) => {
                let err = anyhow::Error::from(err);
                log::error!("asset loading failed: {err:?}");
                LoaderMessage::Failed(format!("{err:#}"))
            }
        };
        let _ = tx.send(message);
    })
}

fn load_engines(config: &Config, tx: &Sender<LoaderMessage>) -> Result<Engines, AssetError> {
    for model in MODEL_ORDER {
        let (path, url) = model_location(config, model);
        ensure_model_ready(model, path, url, |event| {
            let _ = tx.send(LoaderMessage::Event(event));
        })
        .map_err(|err| AssetError::load_failure(model, err))?;
    }

    let hands = OrtHandLandmarker::new(&config.hands)
        .map_err(|err| AssetError::load_failure(ModelKind::HandLandmark, err))?;
    let pose = MoveNetEstimator::new(&config.pose)
        .map_err(|err| AssetError::load_failure(ModelKind::PoseEstimator, err))?;

    Ok(Engines { hands, pose })
}

fn model_location(config: &Config, model: ModelKind) -> (&std::path::Path, Option<&str>) {
    match model {
        ModelKind::PalmDetector => (
            config.hands.palm_model_path.as_path(),
            default_model_url(model),
        ),
        ModelKind::HandLandmark => (
            config.hands.landmark_model_path.as_path(),
            default_model_url(model),
        ),
        ModelKind::PoseEstimator => (
            config.pose.model_path.as_path(),
            config.pose.model_url.as_deref().or(default_model_url(model)),
        ),
    }
}

fn progress_bar_string(downloaded: u64, total: Option<u64>) -> String {
    const BAR_LEN: usize = 30;
    match total {
        Some(total) if total > 0 => {
            let pct = (downloaded as f64 / total as f64).clamp(0.0, 1.0);
            let filled = ((pct * BAR_LEN as f64).round() as usize).min(BAR_LEN);
            format!(
                "[{}{}] {:>5.1}%",
                "=".repeat(filled),
                " ".repeat(BAR_LEN - filled),
                pct * 100.0
            )
        }
        _ => format!("[{:<width$}] {} KB", ">", downloaded / 1024, width = BAR_LEN),
    }
}
