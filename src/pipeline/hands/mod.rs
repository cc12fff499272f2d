mod ort;
mod palm;

use std::{sync::Arc, thread};

use crossbeam_channel::{Receiver, Sender, bounded, select};

use super::mailbox::Mailbox;
use crate::types::{Frame, Hand};

pub use self::ort::OrtHandLandmarker;

/// Opaque hand-landmark capability: zero or more hands for one frame.
///
/// Implementations may keep state between calls (tracking); they are only ever
/// fed one frame at a time.
pub trait HandLandmarker: Send + 'static {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<Hand>>;
}

/// Background worker that turns camera frames into hand results.
#[derive(Debug)]
pub struct HandAdapter {
    stop_tx: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl HandAdapter {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Disconnecting the stop channel wakes the worker.
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HandAdapter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawns the hand worker. Each processed frame replaces the contents of
/// `results`, with an empty list when nothing was found or inference failed.
pub fn start_hand_adapter<E: HandLandmarker>(
    engine: E,
    max_hands: usize,
    frame_rx: Receiver<Arc<Frame>>,
    results: Mailbox<Vec<Hand>>,
) -> HandAdapter {
    let (stop_tx, stop_rx) = bounded::<()>(0);
    let handle = thread::spawn(move || {
        log::info!("hand adapter running (max {max_hands} hands)");
        run_worker_loop(engine, max_hands, frame_rx, stop_rx, results);
        log::info!("hand adapter stopped");
    });

    HandAdapter {
        stop_tx: Some(stop_tx),
        handle: Some(handle),
    }
}

fn run_worker_loop<E: HandLandmarker>(
    mut engine: E,
    max_hands: usize,
    frame_rx: Receiver<Arc<Frame>>,
    stop_rx: Receiver<()>,
    results: Mailbox<Vec<Hand>>,
) {
    loop {
        let frame = select! {
            recv(stop_rx) -> _ => break,
            recv(frame_rx) -> msg => match msg {
                Ok(frame) => latest_frame(frame, &frame_rx),
                Err(_) => break,
            },
        };

        results.publish(detect_hands(&mut engine, &frame, max_hands));
    }
}

fn latest_frame(mut frame: Arc<Frame>, frame_rx: &Receiver<Arc<Frame>>) -> Arc<Frame> {
    while let Ok(newer) = frame_rx.try_recv() {
        frame = newer;
    }
    frame
}

fn detect_hands<E: HandLandmarker>(engine: &mut E, frame: &Frame, max_hands: usize) -> Vec<Hand> {
    if !frame.is_well_formed() {
        log::debug!("skipping malformed {}x{} frame", frame.width, frame.height);
        return Vec::new();
    }

    match engine.detect(frame) {
        Ok(mut hands) => {
            hands.truncate(max_hands);
            hands
        }
        Err(err) => {
            log::warn!("hand inference failed: {err:?}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use anyhow::anyhow;
    use crossbeam_channel::unbounded;

    use super::*;
    use crate::types::{HAND_LANDMARKS, Handedness, Landmark};

    struct ScriptedLandmarker {
        hands_per_call: usize,
        fail: bool,
    }

    impl HandLandmarker for ScriptedLandmarker {
        fn detect(&mut self, _frame: &Frame) -> anyhow::Result<Vec<Hand>> {
            if self.fail {
                return Err(anyhow!("model exploded"));
            }
            let hand = Hand::from_points(
                &[Landmark::new(0.5, 0.5); HAND_LANDMARKS],
                Handedness::Right,
                0.9,
            )?;
            Ok(vec![hand; self.hands_per_call])
        }
    }

    fn frame(width: u32, height: u32, bytes: usize) -> Arc<Frame> {
        Arc::new(Frame {
            rgba: vec![0; bytes],
            width,
            height,
            timestamp: Instant::now(),
        })
    }

    fn run_once(engine: ScriptedLandmarker, max_hands: usize, input: Arc<Frame>) -> Mailbox<Vec<Hand>> {
        let results = Mailbox::new();
        let (frame_tx, frame_rx) = unbounded();
        frame_tx.send(input).unwrap();
        drop(frame_tx);

        // Keep the stop sender alive so the loop ends on frame disconnection.
        let (_stop_tx, stop_rx) = bounded(0);
        run_worker_loop(engine, max_hands, frame_rx, stop_rx, results.clone());
        results
    }

    #[test]
    fn publishes_detected_hands_truncated_to_max() {
        let engine = ScriptedLandmarker {
            hands_per_call: 3,
            fail: false,
        };
        let results = run_once(engine, 2, frame(2, 2, 16));
        assert_eq!(results.latest().unwrap().len(), 2);
    }

    #[test]
    fn engine_errors_become_empty_results() {
        let engine = ScriptedLandmarker {
            hands_per_call: 1,
            fail: true,
        };
        let results = run_once(engine, 2, frame(2, 2, 16));
        assert!(results.latest().unwrap().is_empty());
    }

    #[test]
    fn malformed_frames_yield_no_hands() {
        let engine = ScriptedLandmarker {
            hands_per_call: 1,
            fail: false,
        };
        let results = run_once(engine, 2, frame(2, 2, 3));
        assert!(results.latest().unwrap().is_empty());
    }

    #[test]
    fn worker_keeps_only_the_newest_queued_frame() {
        let (tx, rx) = unbounded();
        let first = frame(1, 1, 4);
        let second = frame(2, 2, 16);
        tx.send(second.clone()).unwrap();
        let latest = latest_frame(first, &rx);
        assert!(Arc::ptr_eq(&latest, &second));
    }

    #[test]
    fn stopping_an_idle_adapter_returns() {
        let (_frame_tx, frame_rx) = unbounded::<Arc<Frame>>();
        let engine = ScriptedLandmarker {
            hands_per_call: 0,
            fail: false,
        };
        let adapter = start_hand_adapter(engine, 2, frame_rx, Mailbox::new());
        adapter.stop();
    }
}
