#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod config;
mod error;
mod model_download;
mod pipeline;
mod types;
mod ui;

use anyhow::Result;
use gpui::Application;

use crate::config::Config;

fn main() -> Result<()> {
    env_logger::init();

    let config = Config::discover()?;
    log::info!(
        "starting with capture {}x{}@{}, {} hand(s), pose {:?}, {} fps loop",
        config.capture.width,
        config.capture.height,
        config.capture.frame_rate,
        config.hands.max_hands,
        config.pose.variant,
        config.scheduler.target_fps
    );

    Application::new()
        .with_assets(gpui_component_assets::Assets)
        .run(move |app| {
            gpui_component::init(app);

            if let Err(err) = ui::launch_ui(app, config) {
                log::error!("failed to launch ui: {err:?}");
            }
        });

    Ok(())
}
