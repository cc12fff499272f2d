use std::time::Instant;

use super::render_util::{frame_to_image, overlay_to_image};
use super::{
    ActiveTheme, AnyElement, AppView, Arc, Context, IntoElement, ObjectFit, ParentElement,
    RenderImage, Styled, StyledImage, Window, div, h_flex, img, px, v_flex,
};

const PANEL_WIDTH: f32 = 480.0;
const DEFAULT_VIDEO_RATIO: f32 = 4.0 / 3.0;

impl AppView {
    pub(super) fn render_main(
        &mut self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        self.start_driver_when_ready();

        let Some(session) = self.session.as_ref() else {
            return self.render_failure_view("camera session is not running", cx);
        };

        if let Some(driver) = session.driver.as_ref() {
            driver.tick(Instant::now());
        }

        let frame = session.mailboxes.frames.latest();
        let overlay = session.mailboxes.overlay.latest();
        let hands = session
            .mailboxes
            .hands
            .latest()
            .map(|hands| {
                hands
                    .iter()
                    .map(|hand| format!("{:?} {:.0}%", hand.handedness, hand.score * 100.0))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .filter(|summary| !summary.is_empty())
            .unwrap_or_else(|| "none".to_string());
        let pose_count = session.mailboxes.poses.latest().map_or(0, |p| p.len());
        let device_label = session.camera.device().label.clone();
        let video = session.video;
        let driver_running = session.driver.is_some();

        if let Some(frame) = frame {
            let is_new = self
                .shown_frame
                .as_ref()
                .is_none_or(|shown| !Arc::ptr_eq(shown, &frame));
            if is_new {
                if let Some(image) = frame_to_image(&frame) {
                    Self::replace_image(&mut self.video_image, image, window, cx);
                }
                self.shown_frame = Some(frame);
            }
        }

        if let Some(overlay) = overlay {
            let is_new = self
                .shown_overlay
                .as_ref()
                .is_none_or(|shown| !Arc::ptr_eq(shown, &overlay));
            if is_new {
                if let Some(image) = overlay_to_image(&overlay) {
                    Self::replace_image(&mut self.overlay_image, image, window, cx);
                }
                self.shown_overlay = Some(overlay);
            }
        }

        let ratio = video
            .filter(|v| v.height > 0)
            .map(|v| v.width as f32 / v.height as f32)
            .unwrap_or(DEFAULT_VIDEO_RATIO);
        let panel_height = PANEL_WIDTH / ratio;

        let theme = cx.theme();
        let status = match video {
            Some(v) => format!(
                "{device_label} {}x{}  ·  hands: {hands}  ·  poses: {pose_count}",
                v.width, v.height
            ),
            None => format!("{device_label}, waiting for video..."),
        };
        let (loop_icon, loop_text, loop_color) = if driver_running {
            ("●", "overlay running", theme.success)
        } else {
            ("○", "starting", theme.muted_foreground)
        };

        let video_panel = panel(self.video_image.clone(), "Waiting for camera...", panel_height);
        let overlay_panel = panel(self.overlay_image.clone(), "No overlay yet", panel_height);

        v_flex()
            .size_full()
            .gap_3()
            .p_4()
            .bg(theme.background)
            .child(
                h_flex()
                    .gap_2()
                    .items_center()
                    .child(
                        div()
                            .text_sm()
                            .text_color(loop_color)
                            .child(format!("{loop_icon} {loop_text}")),
                    )
                    .child(
                        div()
                            .text_xs()
                            .text_color(theme.muted_foreground)
                            .overflow_hidden()
                            .text_ellipsis()
                            .whitespace_nowrap()
                            .child(status),
                    ),
            )
            .child(
                h_flex()
                    .gap_3()
                    .items_start()
                    .child(video_panel)
                    .child(overlay_panel),
            )
            .into_any_element()
    }

    fn replace_image(
        slot: &mut Option<Arc<RenderImage>>,
        new_image: Arc<RenderImage>,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) {
        if let Some(old_image) = slot.replace(new_image) {
            // The sprite atlas keeps every texture until it is dropped explicitly.
            cx.drop_image(old_image, Some(window));
        }
    }
}

fn panel(image: Option<Arc<RenderImage>>, placeholder: &'static str, height: f32) -> AnyElement {
    let content: AnyElement = match image {
        Some(image) => img(image)
            .size_full()
            .object_fit(ObjectFit::Contain)
            .into_any_element(),
        None => div()
            .size_full()
            .flex()
            .items_center()
            .justify_center()
            .text_sm()
            .text_color(gpui::rgb(0x8b95a5))
            .child(placeholder)
            .into_any_element(),
    };

    div()
        .w(px(PANEL_WIDTH))
        .h(px(height))
        .overflow_hidden()
        .rounded_lg()
        .bg(gpui::rgb(0x000000))
        .child(content)
        .into_any_element()
}
