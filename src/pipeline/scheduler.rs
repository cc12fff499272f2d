use std::{
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use super::{
    compositor::{Compositor, RgbaCanvas},
    mailbox::Mailbox,
    pose::PoseEstimator,
};
use crate::types::{Frame, Hand, Pose, VideoInfo};

/// Caps processing cycles to `target_fps`, driven by refresh timestamps.
#[derive(Clone, Debug)]
pub struct FrameGate {
    interval: Duration,
    previous_timestamp: Option<Instant>,
}

impl FrameGate {
    pub fn new(target_fps: f64) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / target_fps),
            previous_timestamp: None,
        }
    }

    pub fn is_open(&self, now: Instant) -> bool {
        match self.previous_timestamp {
            None => true,
            Some(previous) => now.saturating_duration_since(previous) >= self.interval,
        }
    }

    /// Opens a cycle at `now` if a full interval elapsed since the last one.
    pub fn try_begin(&mut self, now: Instant) -> bool {
        if !self.is_open(now) {
            return false;
        }
        self.previous_timestamp = Some(now);
        true
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped,
    NoFrame,
    Painted,
}

/// Shared result slots between the adapters, the driver and the UI.
#[derive(Clone, Default)]
pub struct Mailboxes {
    pub frames: Mailbox<Frame>,
    pub hands: Mailbox<Vec<Hand>>,
    pub poses: Mailbox<Vec<Pose>>,
    pub overlay: Mailbox<RgbaCanvas>,
}

pub struct LoopDriver<E: PoseEstimator> {
    gate: FrameGate,
    estimator: E,
    compositor: Compositor,
    canvas: RgbaCanvas,
    mailboxes: Mailboxes,
}

impl<E: PoseEstimator> LoopDriver<E> {
    pub fn new(
        gate: FrameGate,
        estimator: E,
        compositor: Compositor,
        video: VideoInfo,
        mailboxes: Mailboxes,
    ) -> Self {
        Self {
            gate,
            estimator,
            compositor,
            canvas: RgbaCanvas::new(video.width, video.height),
            mailboxes,
        }
    }

    /// One display refresh. Pose inference runs inline so the next cycle
    /// cannot start before this one has painted.
    pub fn on_refresh(&mut self, now: Instant) -> TickOutcome {
        if !self.gate.is_open(now) {
            return TickOutcome::Skipped;
        }
        let Some(frame) = self.mailboxes.frames.latest() else {
            return TickOutcome::NoFrame;
        };
        self.gate.try_begin(now);

        let started = Instant::now();
        let poses = match self.estimator.estimate(&frame) {
            Ok(poses) => poses,
            Err(err) => {
                log::warn!("pose inference failed: {err:?}");
                Vec::new()
            }
        };
        self.mailboxes.poses.publish(poses);

        let poses = self.mailboxes.poses.latest().unwrap_or_default();
        let hands = self.mailboxes.hands.latest().unwrap_or_default();
        self.compositor.paint(&mut self.canvas, &poses, &hands);
        self.mailboxes.overlay.publish(self.canvas.clone());

        log::trace!(
            "cycle painted {} pose(s) and {} hand(s) in {:?}, frame age {:?}",
            poses.len(),
            hands.len(),
            started.elapsed(),
            frame.timestamp.elapsed()
        );
        TickOutcome::Painted
    }
}

/// Running loop driver thread; ticks are fed from the UI's refresh callback.
#[derive(Debug)]
pub struct LoopDriverHandle {
    tick_tx: Option<Sender<Instant>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl LoopDriverHandle {
    /// Forwards a refresh tick. Dropped when the driver is still busy.
    pub fn tick(&self, now: Instant) {
        let Some(tick_tx) = self.tick_tx.as_ref() else {
            return;
        };
        match tick_tx.try_send(now) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("loop driver is gone, tick ignored");
            }
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.tick_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LoopDriverHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn spawn_loop_driver<E: PoseEstimator>(driver: LoopDriver<E>) -> LoopDriverHandle {
    let (tick_tx, tick_rx) = bounded::<Instant>(1);
    let handle = thread::spawn(move || {
        log::info!("loop driver running");
        run_driver(driver, tick_rx);
        log::info!("loop driver stopped");
    });

    LoopDriverHandle {
        tick_tx: Some(tick_tx),
        handle: Some(handle),
    }
}

fn run_driver<E: PoseEstimator>(mut driver: LoopDriver<E>, tick_rx: Receiver<Instant>) {
    for tick in tick_rx.iter() {
        driver.on_refresh(latest_tick(tick, &tick_rx));
    }
}

/// Skips ticks that queued up while a cycle was running.
fn latest_tick(tick: Instant, tick_rx: &Receiver<Instant>) -> Instant {
    tick_rx.try_iter().last().unwrap_or(tick)
}
