use crate::{
    config::RenderConfig,
    types::{Hand, Pose, SKELETON_EDGES},
};

/// 2D drawing surface the compositor paints on.
pub trait Canvas {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn clear(&mut self);
    fn fill_circle(&mut self, center: (f32, f32), radius: f32, color: [u8; 4]);
    fn stroke_line(&mut self, from: (f32, f32), to: (f32, f32), width: f32, color: [u8; 4]);
}

/// RGBA8 pixel canvas; clearing makes it fully transparent.
#[derive(Clone, Debug, PartialEq)]
pub struct RgbaCanvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RgbaCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) as usize) * 4;
        self.pixels[idx..idx + 4].try_into().ok()
    }

    fn put_pixel_safe(&mut self, x: i32, y: i32, color: [u8; 4]) {
        if x < 0 || y < 0 {
            return;
        }
        let (ux, uy) = (x as u32, y as u32);
        if ux >= self.width || uy >= self.height {
            return;
        }
        let idx = ((uy * self.width + ux) as usize) * 4;
        self.pixels[idx..idx + 4].copy_from_slice(&color);
    }

    fn fill_disc(&mut self, (cx, cy): (i32, i32), radius: i32, color: [u8; 4]) {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    self.put_pixel_safe(cx + dx, cy + dy, color);
                }
            }
        }
    }
}

impl Canvas for RgbaCanvas {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn clear(&mut self) {
        self.pixels.fill(0);
    }

    fn fill_circle(&mut self, center: (f32, f32), radius: f32, color: [u8; 4]) {
        let center = (center.0.round() as i32, center.1.round() as i32);
        self.fill_disc(center, radius.round().max(0.0) as i32, color);
    }

    fn stroke_line(&mut self, from: (f32, f32), to: (f32, f32), width: f32, color: [u8; 4]) {
        let (mut x0, mut y0) = (from.0.round() as i32, from.1.round() as i32);
        let (x1, y1) = (to.0.round() as i32, to.1.round() as i32);
        let dx = (x1 - x0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let dy = -(y1 - y0).abs();
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        // Stamp a `size`-wide square per step; even widths lean up and left.
        let size = width.round().max(1.0) as i32;
        let lo = -(size / 2);
        let hi = lo + size - 1;

        loop {
            for oy in lo..=hi {
                for ox in lo..=hi {
                    self.put_pixel_safe(x0 + ox, y0 + oy, color);
                }
            }
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }
}

/// Paints the newest pose skeleton and hand landmarks.
#[derive(Clone, Debug)]
pub struct Compositor {
    style: RenderConfig,
}

impl Compositor {
    pub fn new(style: RenderConfig) -> Self {
        Self { style }
    }

    /// Clears the canvas, then draws poses and finally hands on top.
    pub fn paint<C: Canvas>(&self, canvas: &mut C, poses: &[Pose], hands: &[Hand]) {
        canvas.clear();
        for pose in poses {
            self.paint_pose(canvas, pose);
        }
        self.paint_hands(canvas, hands);
    }

    fn paint_pose<C: Canvas>(&self, canvas: &mut C, pose: &Pose) {
        let style = &self.style;
        let visible = |confidence: f32| confidence > style.keypoint_threshold;

        for keypoint in pose.keypoints.iter().filter(|k| visible(k.confidence)) {
            canvas.fill_circle(
                (keypoint.x, keypoint.y),
                style.point_radius,
                style.keypoint_color,
            );
        }

        for (a, b) in SKELETON_EDGES {
            let (from, to) = (pose.get(a), pose.get(b));
            if visible(from.confidence) && visible(to.confidence) {
                canvas.stroke_line(
                    (from.x, from.y),
                    (to.x, to.y),
                    style.line_width,
                    style.edge_color,
                );
            }
        }
    }

    // Hand landmarks carry no per-point confidence and are always drawn.
    fn paint_hands<C: Canvas>(&self, canvas: &mut C, hands: &[Hand]) {
        let (width, height) = (canvas.width(), canvas.height());
        for hand in hands {
            for landmark in &hand.landmarks {
                canvas.fill_circle(
                    landmark.to_pixel(width, height),
                    self.style.point_radius,
                    self.style.hand_color,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HAND_LANDMARKS, Handedness, Keypoint, KeypointIndex, Landmark, POSE_KEYPOINTS};

    #[derive(Debug, PartialEq)]
    enum Op {
        Clear,
        Circle((f32, f32), [u8; 4]),
        Line((f32, f32), (f32, f32)),
    }

    struct RecordingCanvas {
        ops: Vec<Op>,
    }

    impl RecordingCanvas {
        fn new() -> Self {
            Self { ops: Vec::new() }
        }

        fn circles(&self) -> usize {
            self.ops.iter().filter(|op| matches!(op, Op::Circle(..))).count()
        }

        fn lines(&self) -> usize {
            self.ops.iter().filter(|op| matches!(op, Op::Line(..))).count()
        }
    }

    impl Canvas for RecordingCanvas {
        fn width(&self) -> u32 {
            640
        }

        fn height(&self) -> u32 {
            480
        }

        fn clear(&mut self) {
            self.ops.push(Op::Clear);
        }

        fn fill_circle(&mut self, center: (f32, f32), _radius: f32, color: [u8; 4]) {
            self.ops.push(Op::Circle(center, color));
        }

        fn stroke_line(&mut self, from: (f32, f32), to: (f32, f32), _width: f32, _color: [u8; 4]) {
            self.ops.push(Op::Line(from, to));
        }
    }

    fn pose_with(confidences: &[(KeypointIndex, f32)]) -> Pose {
        let mut keypoints = [Keypoint::default(); POSE_KEYPOINTS];
        for (i, kp) in keypoints.iter_mut().enumerate() {
            *kp = Keypoint::new(10.0 * i as f32, 20.0, 0.0);
        }
        for &(index, confidence) in confidences {
            keypoints[index as usize].confidence = confidence;
        }
        Pose::new(keypoints)
    }

    fn hand(score: f32) -> Hand {
        Hand::from_points(&[Landmark::new(0.5, 0.25); HAND_LANDMARKS], Handedness::Left, score)
            .unwrap()
    }

    fn compositor() -> Compositor {
        Compositor::new(RenderConfig::default())
    }

    #[test]
    fn shoulders_only_draws_two_circles_and_one_line() {
        let pose = pose_with(&[
            (KeypointIndex::LeftShoulder, 0.9),
            (KeypointIndex::RightShoulder, 0.9),
        ]);
        let mut canvas = RecordingCanvas::new();
        compositor().paint(&mut canvas, &[pose], &[]);

        assert_eq!(canvas.ops[0], Op::Clear);
        assert_eq!(canvas.circles(), 2);
        assert_eq!(canvas.lines(), 1);
        assert!(canvas.ops.contains(&Op::Line((50.0, 20.0), (60.0, 20.0))));
    }

    #[test]
    fn confidence_threshold_is_strict() {
        let pose = pose_with(&[(KeypointIndex::Nose, 0.5), (KeypointIndex::LeftEye, 0.51)]);
        let mut canvas = RecordingCanvas::new();
        compositor().paint(&mut canvas, &[pose], &[]);

        assert_eq!(canvas.circles(), 1);
        assert!(canvas.ops.contains(&Op::Circle((10.0, 20.0), [0, 255, 255, 255])));
        // nose-eye edge needs both ends above 0.5
        assert_eq!(canvas.lines(), 0);
    }

    #[test]
    fn edges_need_both_endpoints_visible() {
        let pose = pose_with(&[
            (KeypointIndex::LeftHip, 0.9),
            (KeypointIndex::LeftKnee, 0.9),
            (KeypointIndex::LeftAnkle, 0.2),
        ]);
        let mut canvas = RecordingCanvas::new();
        compositor().paint(&mut canvas, &[pose], &[]);

        assert_eq!(canvas.circles(), 2);
        assert_eq!(canvas.lines(), 1);
    }

    #[test]
    fn hand_landmarks_are_always_drawn_after_the_pose() {
        let pose = pose_with(&[(KeypointIndex::Nose, 0.9)]);
        let mut canvas = RecordingCanvas::new();
        compositor().paint(&mut canvas, &[pose], &[hand(0.0), hand(0.01)]);

        assert_eq!(canvas.circles(), 1 + 2 * HAND_LANDMARKS);
        let blue = [0, 0, 255, 255];
        let first_hand = canvas
            .ops
            .iter()
            .position(|op| matches!(op, Op::Circle(_, c) if *c == blue))
            .unwrap();
        assert_eq!(first_hand, 2);
        assert_eq!(canvas.ops[first_hand], Op::Circle((320.0, 120.0), blue));
    }

    #[test]
    fn empty_results_only_clear() {
        let mut canvas = RecordingCanvas::new();
        compositor().paint(&mut canvas, &[], &[]);
        assert_eq!(canvas.ops, vec![Op::Clear]);
    }

    #[test]
    fn rgba_canvas_paints_and_clears() {
        let mut canvas = RgbaCanvas::new(20, 20);
        canvas.fill_circle((10.0, 10.0), 5.0, [1, 2, 3, 255]);
        assert_eq!(canvas.pixel(10, 10), Some([1, 2, 3, 255]));
        assert_eq!(canvas.pixel(15, 10), Some([1, 2, 3, 255]));
        assert_eq!(canvas.pixel(15, 15), Some([0, 0, 0, 0]));

        canvas.stroke_line((0.0, 0.0), (19.0, 0.0), 2.0, [9, 9, 9, 255]);
        assert_eq!(canvas.pixel(19, 0), Some([9, 9, 9, 255]));

        canvas.clear();
        assert!(canvas.pixels().iter().all(|&b| b == 0));
    }

    fn painted_rows_at(canvas: &RgbaCanvas, x: u32) -> usize {
        (0..canvas.height())
            .filter(|&y| canvas.pixel(x, y) != Some([0, 0, 0, 0]))
            .count()
    }

    #[test]
    fn line_thickness_follows_the_configured_width() {
        let red = [255, 0, 0, 255];
        for (width, rows) in [(1.0, 1), (2.0, 2), (3.0, 3), (4.0, 4)] {
            let mut canvas = RgbaCanvas::new(20, 20);
            canvas.stroke_line((2.0, 10.0), (17.0, 10.0), width, red);
            assert_eq!(painted_rows_at(&canvas, 10), rows, "width {width}");
        }

        let mut canvas = RgbaCanvas::new(20, 20);
        canvas.stroke_line((10.0, 2.0), (10.0, 17.0), 2.0, red);
        let columns = (0..20)
            .filter(|&x| canvas.pixel(x, 10) == Some(red))
            .count();
        assert_eq!(columns, 2);
    }

    #[test]
    fn default_edges_are_two_pixels_thick() {
        let pose = {
            let mut keypoints = [Keypoint::default(); POSE_KEYPOINTS];
            keypoints[KeypointIndex::LeftShoulder as usize] = Keypoint::new(4.0, 10.0, 0.9);
            keypoints[KeypointIndex::RightShoulder as usize] = Keypoint::new(36.0, 10.0, 0.9);
            Pose::new(keypoints)
        };
        let mut canvas = RgbaCanvas::new(40, 20);
        compositor().paint(&mut canvas, &[pose], &[]);
        assert_eq!(painted_rows_at(&canvas, 20), 2);
    }

    #[test]
    fn rgba_canvas_ignores_out_of_bounds_drawing() {
        let mut canvas = RgbaCanvas::new(4, 4);
        canvas.fill_circle((-20.0, 50.0), 5.0, [255; 4]);
        canvas.stroke_line((-10.0, -10.0), (-1.0, -5.0), 3.0, [255; 4]);
        assert!(canvas.pixels().iter().all(|&b| b == 0));
        assert_eq!(canvas.pixel(4, 0), None);
    }
}
