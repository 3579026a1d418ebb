//! Burns game state, frame position and detections into frames.

use std::path::{Path, PathBuf};

use ab_glyph::{FontArc, PxScale};
use anyhow::Context;
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut,
    text_size,
};
use imageproc::rect::Rect;

use crate::detection::{BoundingBox, Category, Detection, KeyPointBox};
use crate::frame::{AnnotatedFrame, Frame};
use crate::state::GameState;

/// Colour of the `FRAME #i/n` label.
pub const ACCENT_COLOR: Rgb<u8> = Rgb([255, 165, 0]);

/// Distance of text labels from the frame edges, in pixels.
const LABEL_MARGIN: i32 = 10;
const LABEL_SCALE: f32 = 32.0;
const TAG_SCALE: f32 = 18.0;
const KEYPOINT_RADIUS: i32 = 4;

/// Where a text label is pinned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    TopLeft,
    TopRight,
}

/// Drawing primitives used by [`AnnotationComposer`].
pub trait Painter {
    fn text(&self, image: &mut RgbImage, text: &str, anchor: Anchor, color: Rgb<u8>);

    fn detection(&self, image: &mut RgbImage, detection: &Detection);
}

pub fn category_color(category: Category) -> Rgb<u8> {
    match category {
        Category::Ball => Rgb([255, 255, 0]),
        Category::Block => Rgb([0, 128, 255]),
        Category::Set => Rgb([255, 0, 255]),
        Category::Spike => Rgb([255, 64, 64]),
        Category::Receive => Rgb([64, 255, 128]),
        Category::Serve => Rgb([255, 255, 255]),
    }
}

/// Font files tried by [`find_system_font`], most preferred first.
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/Library/Fonts/Arial Bold.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];

/// Returns the first usable font from a list of common install locations.
pub fn find_system_font() -> Option<PathBuf> {
    FONT_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

/// [`Painter`] backed by `imageproc`.
pub struct ImagePainter {
    font: Option<FontArc>,
}

impl ImagePainter {
    /// Without a font only shapes are drawn; text labels are skipped.
    pub fn new(font: Option<FontArc>) -> Self {
        if font.is_none() {
            log::warn!("No font loaded, text labels will not be drawn");
        }
        Self { font }
    }

    pub fn from_font_file(path: &Path) -> anyhow::Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read font {path:?}"))?;
        let font = FontArc::try_from_vec(bytes)
            .with_context(|| format!("Failed to parse font {path:?}"))?;
        log::debug!("Loaded label font from {path:?}");
        Ok(Self::new(Some(font)))
    }

    fn draw_bbox(&self, image: &mut RgbImage, bbox: &BoundingBox) {
        let (w, h) = image.dimensions();
        if bbox.xmax < 0.0 || bbox.ymax < 0.0 || bbox.xmin >= w as f32 || bbox.ymin >= h as f32 {
            log::trace!("{} box outside the frame, not drawn", bbox.category);
            return;
        }
        let color = category_color(bbox.category);
        let xmin = clamp_coord(bbox.xmin, w);
        let ymin = clamp_coord(bbox.ymin, h);
        let width = (clamp_coord(bbox.xmax, w) - xmin).max(1) as u32;
        let height = (clamp_coord(bbox.ymax, h) - ymin).max(1) as u32;
        let rect = Rect::at(xmin, ymin).of_size(width, height);
        draw_hollow_rect_mut(image, rect, color);
        // second outline one pixel inside for visibility on busy backgrounds
        if width > 2 && height > 2 {
            let inner = Rect::at(rect.left() + 1, rect.top() + 1).of_size(width - 2, height - 2);
            draw_hollow_rect_mut(image, inner, color);
        }

        if let Some(font) = &self.font {
            let tag = format!("{} {:.2}", bbox.category, bbox.confidence);
            let y = (ymin - TAG_SCALE as i32).max(0);
            draw_text_mut(
                image,
                color,
                xmin.max(0),
                y,
                PxScale::from(TAG_SCALE),
                font,
                &tag,
            );
        }
    }

    fn draw_keypoints(&self, image: &mut RgbImage, kp: &KeyPointBox) {
        let color = category_color(kp.category);
        let (w, h) = image.dimensions();
        let points: Vec<(f32, f32)> = kp
            .points
            .iter()
            .map(|&(x, y)| (clamp_coord(x, w) as f32, clamp_coord(y, h) as f32))
            .collect();
        for pair in points.windows(2) {
            draw_line_segment_mut(image, pair[0], pair[1], color);
        }
        for (x, y) in &kp.points {
            let radius = KEYPOINT_RADIUS as f32;
            if *x < -radius || *y < -radius || *x > w as f32 + radius || *y > h as f32 + radius {
                continue;
            }
            draw_filled_circle_mut(
                image,
                (x.round() as i32, y.round() as i32),
                KEYPOINT_RADIUS,
                color,
            );
        }
    }
}

/// Rounds `v` into `[-extent, 2 * extent]`, so shapes reaching far outside
/// the frame are clipped without overflowing imageproc's `i32` maths.
fn clamp_coord(v: f32, extent: u32) -> i32 {
    let extent = extent.min(i32::MAX as u32 / 4) as f32;
    v.round().clamp(-extent, 2.0 * extent) as i32
}

impl Painter for ImagePainter {
    fn text(&self, image: &mut RgbImage, text: &str, anchor: Anchor, color: Rgb<u8>) {
        let Some(font) = &self.font else {
            return;
        };
        let scale = PxScale::from(LABEL_SCALE);
        let x = match anchor {
            Anchor::TopLeft => LABEL_MARGIN,
            Anchor::TopRight => {
                let (w, _h) = text_size(scale, font, text);
                (image.width() as i32 - w as i32 - LABEL_MARGIN).max(0)
            }
        };
        draw_text_mut(image, color, x, LABEL_MARGIN, scale, font, text);
    }

    fn detection(&self, image: &mut RgbImage, detection: &Detection) {
        match detection {
            Detection::BoundingBox(bbox) => self.draw_bbox(image, bbox),
            Detection::KeyPointBox(kp) => self.draw_keypoints(image, kp),
        }
    }
}

/// Text of the top-right position label.
pub fn frame_label(index: u64, total_frames: u64) -> String {
    format!("Frame #{index}/{total_frames}").to_uppercase()
}

/// Text of the top-left state label.
pub fn state_label(state: GameState) -> String {
    state.as_str().to_uppercase()
}

/// Overlays labels and detections onto frames using a [`Painter`].
pub struct AnnotationComposer<P> {
    painter: P,
}

impl<P: Painter> AnnotationComposer<P> {
    pub fn new(painter: P) -> Self {
        Self { painter }
    }

    pub fn painter(&self) -> &P {
        &self.painter
    }

    /// Consumes `frame` and returns it with overlays drawn.
    ///
    /// `detections` are drawn in slice order, and only when `state` is not
    /// [`GameState::NoPlay`].
    pub fn annotate(
        &self,
        frame: Frame,
        state: GameState,
        total_frames: u64,
        detections: &[Detection],
    ) -> AnnotatedFrame {
        let Frame { index, mut image } = frame;

        self.painter
            .text(&mut image, &state_label(state), Anchor::TopLeft, state.color());
        self.painter.text(
            &mut image,
            &frame_label(index, total_frames),
            Anchor::TopRight,
            ACCENT_COLOR,
        );

        if state.shows_detections() {
            for detection in detections {
                self.painter.detection(&mut image, detection);
            }
        }

        AnnotatedFrame { index, image }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Text(String, Anchor, Rgb<u8>),
        Shape(Category),
    }

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<Call>>,
    }

    impl Painter for Recorder {
        fn text(&self, _image: &mut RgbImage, text: &str, anchor: Anchor, color: Rgb<u8>) {
            self.calls
                .borrow_mut()
                .push(Call::Text(text.to_string(), anchor, color));
        }

        fn detection(&self, _image: &mut RgbImage, detection: &Detection) {
            self.calls
                .borrow_mut()
                .push(Call::Shape(detection.category()));
        }
    }

    fn bbox(category: Category) -> Detection {
        Detection::BoundingBox(BoundingBox {
            xmin: 10.0,
            ymin: 10.0,
            xmax: 40.0,
            ymax: 30.0,
            category,
            confidence: 0.8,
        })
    }

    fn frame(index: u64) -> Frame {
        Frame::new(index, RgbImage::new(64, 48))
    }

    #[test]
    fn test_labels_always_drawn() {
        let composer = AnnotationComposer::new(Recorder::default());
        let out = composer.annotate(frame(7), GameState::Service, 90, &[]);
        assert_eq!(out.index, 7);

        let calls = composer.painter().calls.borrow();
        assert_eq!(
            *calls,
            vec![
                Call::Text("SERVICE".into(), Anchor::TopLeft, Rgb([0, 255, 0])),
                Call::Text("FRAME #7/90".into(), Anchor::TopRight, ACCENT_COLOR),
            ]
        );
    }

    #[test]
    fn test_no_play_hides_detections() {
        let composer = AnnotationComposer::new(Recorder::default());
        let dets = vec![bbox(Category::Ball), bbox(Category::Spike)];
        composer.annotate(frame(0), GameState::NoPlay, 10, &dets);

        let calls = composer.painter().calls.borrow();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| matches!(c, Call::Text(..))));
        assert_eq!(
            calls[0],
            Call::Text("NO_PLAY".into(), Anchor::TopLeft, Rgb([255, 0, 0]))
        );
    }

    #[test]
    fn test_detections_drawn_in_given_order() {
        let composer = AnnotationComposer::new(Recorder::default());
        let dets = vec![bbox(Category::Ball), bbox(Category::Set), bbox(Category::Serve)];
        composer.annotate(frame(0), GameState::Unknown, 10, &dets);

        let calls = composer.painter().calls.borrow();
        assert_eq!(
            calls[0],
            Call::Text("UNKNOWN".into(), Anchor::TopLeft, Rgb([255, 255, 255]))
        );
        assert_eq!(
            calls[2..],
            [
                Call::Shape(Category::Ball),
                Call::Shape(Category::Set),
                Call::Shape(Category::Serve),
            ]
        );
    }

    #[test]
    fn test_image_painter_draws_box_outline() {
        let composer = AnnotationComposer::new(ImagePainter::new(None));
        let out = composer.annotate(frame(0), GameState::Play, 1, &[bbox(Category::Ball)]);

        let ball = category_color(Category::Ball);
        assert_eq!(*out.image.get_pixel(10, 10), ball);
        assert_eq!(*out.image.get_pixel(39, 29), ball);
        // interior stays untouched
        assert_eq!(*out.image.get_pixel(25, 20), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_image_painter_no_play_leaves_pixels() {
        let composer = AnnotationComposer::new(ImagePainter::new(None));
        let out = composer.annotate(frame(0), GameState::NoPlay, 1, &[bbox(Category::Ball)]);
        assert!(out.image.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_keypoints_drawn() {
        let composer = AnnotationComposer::new(ImagePainter::new(None));
        let kp = Detection::KeyPointBox(KeyPointBox {
            points: vec![(5.0, 5.0), (30.0, 5.0)],
            category: Category::Receive,
            confidence: 0.7,
        });
        let out = composer.annotate(frame(0), GameState::Play, 1, &[kp]);

        let color = category_color(Category::Receive);
        assert_eq!(*out.image.get_pixel(5, 5), color);
        assert_eq!(*out.image.get_pixel(18, 5), color);
        assert_eq!(*out.image.get_pixel(30, 5), color);
    }

    #[test]
    fn test_far_off_frame_geometry_is_clipped() {
        let composer = AnnotationComposer::new(ImagePainter::new(None));
        let dets = vec![
            Detection::BoundingBox(BoundingBox {
                xmin: 3.0e9,
                ymin: 5.0,
                xmax: 3.0e9,
                ymax: 10.0,
                category: Category::Ball,
                confidence: 0.9,
            }),
            Detection::BoundingBox(BoundingBox {
                xmin: -1.0e9,
                ymin: -1.0e9,
                xmax: 20.0,
                ymax: 20.0,
                category: Category::Block,
                confidence: 0.9,
            }),
            Detection::KeyPointBox(KeyPointBox {
                points: vec![(5.0, 5.0), (3.0e9, 5.0), (-3.0e9, -3.0e9)],
                category: Category::Receive,
                confidence: 0.7,
            }),
        ];
        let out = composer.annotate(frame(0), GameState::Play, 1, &dets);

        // visible edges of the partly off-frame box
        let block = category_color(Category::Block);
        assert_eq!(*out.image.get_pixel(19, 10), block);
        assert_eq!(*out.image.get_pixel(10, 19), block);
        // key point inside the frame plus the segment leaving it
        let receive = category_color(Category::Receive);
        assert_eq!(*out.image.get_pixel(5, 5), receive);
        assert_eq!(*out.image.get_pixel(40, 5), receive);
        // the far-right box is culled
        assert_ne!(*out.image.get_pixel(63, 7), category_color(Category::Ball));
    }

    #[test]
    fn test_clamp_coord() {
        assert_eq!(clamp_coord(3.0e9, 64), 128);
        assert_eq!(clamp_coord(-3.0e9, 64), -64);
        assert_eq!(clamp_coord(12.4, 64), 12);
        assert!(clamp_coord(f32::MAX, u32::MAX) > 0);
        assert!(clamp_coord(f32::MIN, u32::MAX) < 0);
    }

    #[test]
    fn test_annotate_is_deterministic() {
        let composer = AnnotationComposer::new(ImagePainter::new(None));
        let dets = vec![bbox(Category::Block), bbox(Category::Spike)];
        let a = composer.annotate(frame(3), GameState::Play, 9, &dets);
        let b = composer.annotate(frame(3), GameState::Play, 9, &dets);
        assert_eq!(a, b);
    }

    #[test]
    fn test_label_text() {
        assert_eq!(frame_label(12, 300), "FRAME #12/300");
        assert_eq!(state_label(GameState::NoPlay), "NO_PLAY");
    }
}
