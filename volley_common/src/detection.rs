//! Typed detections and the boundary where raw detector output is checked.
//!
//! Detectors hand back [`DetectorOutput`], whose shape is not trusted: it may
//! be missing, a single bare object, or a list with holes and foreign
//! elements. [`normalize`] turns it into a plain `Vec<Detection>` once, so
//! nothing downstream has to look at shapes again.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::frame::{Frame, FrameIndex};

/// What a detection refers to. Balls come from a dedicated detector, the
/// rest from the action detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Ball,
    Block,
    Set,
    Spike,
    Receive,
    Serve,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Ball,
        Category::Block,
        Category::Set,
        Category::Spike,
        Category::Receive,
        Category::Serve,
    ];

    pub const ACTIONS: [Category; 5] = [
        Category::Block,
        Category::Set,
        Category::Spike,
        Category::Receive,
        Category::Serve,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ball => "ball",
            Self::Block => "block",
            Self::Set => "set",
            Self::Spike => "spike",
            Self::Receive => "receive",
            Self::Serve => "serve",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "ball" => Some(Self::Ball),
            "block" => Some(Self::Block),
            "set" => Some(Self::Set),
            "spike" | "attack" => Some(Self::Spike),
            "receive" | "reception" | "dig" => Some(Self::Receive),
            "serve" | "service" => Some(Self::Serve),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis-aligned box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
    pub category: Category,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    fn is_well_formed(&self) -> bool {
        [self.xmin, self.ymin, self.xmax, self.ymax, self.confidence]
            .iter()
            .all(|v| v.is_finite())
            && self.xmax >= self.xmin
            && self.ymax >= self.ymin
    }
}

/// Ordered set of 2D points, e.g. a pose skeleton or a ball trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPointBox {
    pub points: Vec<(f32, f32)>,
    pub category: Category,
    pub confidence: f32,
}

impl KeyPointBox {
    fn is_well_formed(&self) -> bool {
        !self.points.is_empty()
            && self.confidence.is_finite()
            && self
                .points
                .iter()
                .all(|(x, y)| x.is_finite() && y.is_finite())
    }
}

/// A drawable detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Detection {
    BoundingBox(BoundingBox),
    KeyPointBox(KeyPointBox),
}

impl Detection {
    pub fn category(&self) -> Category {
        match self {
            Self::BoundingBox(b) => b.category,
            Self::KeyPointBox(k) => k.category,
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            Self::BoundingBox(b) => b.confidence,
            Self::KeyPointBox(k) => k.confidence,
        }
    }
}

/// One element of a detector's answer, before validation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawDetection {
    BoundingBox(BoundingBox),
    KeyPointBox(KeyPointBox),
    /// Anything the drawing code cannot handle. The string describes it for logs.
    Unsupported(String),
}

impl From<BoundingBox> for RawDetection {
    fn from(b: BoundingBox) -> Self {
        Self::BoundingBox(b)
    }
}

impl From<KeyPointBox> for RawDetection {
    fn from(k: KeyPointBox) -> Self {
        Self::KeyPointBox(k)
    }
}

/// A detector's answer for one category, in whatever shape it came back.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DetectorOutput {
    /// No result at all.
    #[default]
    Missing,
    /// A bare object that was not wrapped in a list.
    Single(RawDetection),
    /// A list, possibly with null elements.
    Many(Vec<Option<RawDetection>>),
}

impl DetectorOutput {
    pub fn empty() -> Self {
        Self::Many(Vec::new())
    }
}

impl<T: Into<RawDetection>> From<Vec<T>> for DetectorOutput {
    fn from(items: Vec<T>) -> Self {
        Self::Many(items.into_iter().map(|i| Some(i.into())).collect())
    }
}

/// Why an element of detector output was dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeViolationKind {
    NullElement,
    UnsupportedShape(String),
    MalformedGeometry,
}

/// A detector output element that was filtered out instead of drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorShapeViolation {
    pub frame_index: FrameIndex,
    pub category: Category,
    pub position: usize,
    pub kind: ShapeViolationKind,
}

impl fmt::Display for DetectorShapeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match &self.kind {
            ShapeViolationKind::NullElement => "null element".to_string(),
            ShapeViolationKind::UnsupportedShape(desc) => format!("unsupported shape {desc}"),
            ShapeViolationKind::MalformedGeometry => "malformed geometry".to_string(),
        };
        write!(
            f,
            "frame {}: dropped {} #{} ({what})",
            self.frame_index, self.category, self.position
        )
    }
}

/// Validates raw detector output for `category` on `frame_index`.
///
/// Returns the drawable detections plus every element that was dropped. A
/// missing result is an empty list and a bare object becomes a one-element
/// list.
pub fn normalize(
    output: DetectorOutput,
    category: Category,
    frame_index: FrameIndex,
) -> (Vec<Detection>, Vec<DetectorShapeViolation>) {
    let items = match output {
        DetectorOutput::Missing => return (Vec::new(), Vec::new()),
        DetectorOutput::Single(raw) => vec![Some(raw)],
        DetectorOutput::Many(items) => items,
    };

    let mut detections = Vec::with_capacity(items.len());
    let mut violations = Vec::new();
    for (position, item) in items.into_iter().enumerate() {
        let checked = match item {
            None => Err(ShapeViolationKind::NullElement),
            Some(RawDetection::Unsupported(desc)) => {
                Err(ShapeViolationKind::UnsupportedShape(desc))
            }
            Some(RawDetection::BoundingBox(b)) if b.is_well_formed() => {
                Ok(Detection::BoundingBox(b))
            }
            Some(RawDetection::KeyPointBox(k)) if k.is_well_formed() => {
                Ok(Detection::KeyPointBox(k))
            }
            Some(_) => Err(ShapeViolationKind::MalformedGeometry),
        };
        match checked {
            Ok(det) => detections.push(det),
            Err(kind) => violations.push(DetectorShapeViolation {
                frame_index,
                category,
                position,
                kind,
            }),
        }
    }
    (detections, violations)
}

/// Finds balls and player actions in single frames.
pub trait ObjectDetector {
    fn detect_balls(&mut self, frame: &Frame) -> anyhow::Result<DetectorOutput>;

    /// Categories in `exclude` need not be computed. Categories missing from
    /// the returned map count as "nothing found".
    fn detect_actions(
        &mut self,
        frame: &Frame,
        exclude: &[Category],
    ) -> anyhow::Result<HashMap<Category, DetectorOutput>>;
}

impl<T: ObjectDetector + ?Sized> ObjectDetector for Box<T> {
    fn detect_balls(&mut self, frame: &Frame) -> anyhow::Result<DetectorOutput> {
        (**self).detect_balls(frame)
    }

    fn detect_actions(
        &mut self,
        frame: &Frame,
        exclude: &[Category],
    ) -> anyhow::Result<HashMap<Category, DetectorOutput>> {
        (**self).detect_actions(frame, exclude)
    }
}

/// Validated detections of one frame, grouped by category.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameDetections {
    by_category: HashMap<Category, Vec<Detection>>,
    violations: usize,
}

/// Order in which categories are drawn. Later shapes end up on top.
pub const DRAW_ORDER: [Category; 6] = [
    Category::Ball,
    Category::Block,
    Category::Set,
    Category::Receive,
    Category::Spike,
    Category::Serve,
];

impl FrameDetections {
    /// Runs both detector entry points on `frame` and validates the results.
    /// Dropped elements are logged and counted.
    pub fn collect<D: ObjectDetector + ?Sized>(
        detector: &mut D,
        frame: &Frame,
    ) -> anyhow::Result<Self> {
        let mut out = Self::default();

        let balls = detector.detect_balls(frame)?;
        out.ingest(Category::Ball, balls, frame.index);

        let mut actions = detector.detect_actions(frame, &[Category::Ball])?;
        for category in Category::ACTIONS {
            let raw = actions.remove(&category).unwrap_or_default();
            out.ingest(category, raw, frame.index);
        }
        if !actions.is_empty() {
            log::debug!(
                "frame {}: ignoring {} unexpected action categories",
                frame.index,
                actions.len()
            );
        }
        Ok(out)
    }

    fn ingest(&mut self, category: Category, raw: DetectorOutput, frame_index: FrameIndex) {
        let (detections, violations) = normalize(raw, category, frame_index);
        for violation in &violations {
            log::warn!("Detector shape violation, {violation}");
        }
        self.violations += violations.len();
        if !detections.is_empty() {
            self.by_category
                .entry(category)
                .or_default()
                .extend(detections);
        }
    }

    pub fn get(&self, category: Category) -> &[Detection] {
        self.by_category
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of detector output elements that were dropped.
    pub fn violations(&self) -> usize {
        self.violations
    }

    pub fn len(&self) -> usize {
        self.by_category.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All detections concatenated in [`DRAW_ORDER`].
    pub fn in_draw_order(&self) -> Vec<Detection> {
        DRAW_ORDER
            .iter()
            .flat_map(|c| self.get(*c).iter().cloned())
            .collect()
    }
}
