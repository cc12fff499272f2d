pub mod camera;
pub mod compositor;
pub mod hands;
pub mod mailbox;
pub mod pose;
pub mod rgba_converter;
pub mod scheduler;
pub mod tensor;

// Re-exports for convenience
pub use camera::{CameraStream, start_camera_stream};
pub use compositor::{Compositor, RgbaCanvas};
pub use hands::{HandAdapter, OrtHandLandmarker, start_hand_adapter};
pub use pose::MoveNetEstimator;
pub use scheduler::{FrameGate, LoopDriver, LoopDriverHandle, Mailboxes, spawn_loop_driver};
