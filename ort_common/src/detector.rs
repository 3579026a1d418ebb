use std::collections::HashMap;
use std::path::{Path, PathBuf};

use fast_image_resize::Resizer;
use ndarray::{Array4, CowArray};
use ort::session::Session;
use ort::value::TensorRef;
use volley_common::detection::{BoundingBox, Category, DetectorOutput, ObjectDetector};
use volley_common::Frame;

use crate::preprocess::{self, UNIT_MEAN, UNIT_STD};
use crate::yolo::{self, Candidate};

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub ball_model: PathBuf,
    pub action_model: PathBuf,
    /// Side of the square model input, shared by both models.
    pub input_size: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    /// Class names of the ball model, in output order.
    pub ball_labels: Vec<String>,
    /// Class names of the action model, in output order.
    pub action_labels: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            ball_model: PathBuf::from("_models/volley_ball.onnx"),
            action_model: PathBuf::from("_models/volley_actions.onnx"),
            input_size: 640,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            ball_labels: vec!["ball".to_string()],
            action_labels: ["block", "set", "spike", "receive", "serve"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// One YOLO session plus the mapping of its classes onto [`Category`].
struct YoloModel {
    session: Session,
    categories: Vec<Option<Category>>,
}

impl YoloModel {
    fn load(path: &Path, labels: &[String]) -> anyhow::Result<Self> {
        let session = crate::load_session(path)?;
        let categories = labels
            .iter()
            .map(|label| {
                let category = Category::from_label(label);
                if category.is_none() {
                    log::warn!("Ignoring detections of unknown class {label:?} from {path:?}");
                }
                category
            })
            .collect();
        Ok(Self {
            session,
            categories,
        })
    }

    fn run(&mut self, input: &Array4<f32>, conf_threshold: f32) -> anyhow::Result<Vec<Candidate>> {
        let input_dyn = CowArray::from(input.view()).into_dyn();
        let input = ort::inputs![TensorRef::from_array_view(&input_dyn)?];
        let outputs = self.session.run(input)?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        yolo::decode(data, shape, conf_threshold)
    }
}

/// Ball and action detection with two YOLOv8 exports.
pub struct OnnxObjectDetector {
    ball: YoloModel,
    actions: YoloModel,
    config: DetectorConfig,
    resizer: Resizer,
}

impl OnnxObjectDetector {
    pub fn new(config: DetectorConfig) -> anyhow::Result<Self> {
        let ball = YoloModel::load(&config.ball_model, &config.ball_labels)?;
        let actions = YoloModel::load(&config.action_model, &config.action_labels)?;
        Ok(Self {
            ball,
            actions,
            config,
            resizer: Resizer::new(),
        })
    }

    fn input_tensor(&mut self, frame: &Frame) -> anyhow::Result<Array4<f32>> {
        let side = self.config.input_size;
        let resized = preprocess::resize(&mut self.resizer, &frame.image, side, side)?;
        let mut input = Array4::<f32>::zeros((1, 3, side as usize, side as usize));
        preprocess::fill_chw(
            input.index_axis_mut(ndarray::Axis(0), 0),
            &resized,
            UNIT_MEAN,
            UNIT_STD,
        );
        Ok(input)
    }

    fn scale(&self, frame: &Frame) -> FrameScale {
        let side = self.config.input_size as f32;
        FrameScale {
            sx: frame.width() as f32 / side,
            sy: frame.height() as f32 / side,
            width: frame.width() as f32,
            height: frame.height() as f32,
        }
    }
}

impl ObjectDetector for OnnxObjectDetector {
    fn detect_balls(&mut self, frame: &Frame) -> anyhow::Result<DetectorOutput> {
        let input = self.input_tensor(frame)?;
        let candidates = self.ball.run(&input, self.config.conf_threshold)?;
        let boxes = to_boxes(
            yolo::nms(candidates, self.config.iou_threshold),
            &self.ball.categories,
            self.scale(frame),
            &[],
        );
        log::trace!("frame {}: {} balls", frame.index, boxes.len());
        Ok(boxes.into())
    }

    fn detect_actions(
        &mut self,
        frame: &Frame,
        exclude: &[Category],
    ) -> anyhow::Result<HashMap<Category, DetectorOutput>> {
        let wanted: Vec<Category> = Category::ACTIONS
            .into_iter()
            .filter(|c| !exclude.contains(c))
            .collect();
        if wanted.is_empty() {
            return Ok(HashMap::new());
        }

        let input = self.input_tensor(frame)?;
        let candidates = self.actions.run(&input, self.config.conf_threshold)?;
        let boxes = to_boxes(
            yolo::nms(candidates, self.config.iou_threshold),
            &self.actions.categories,
            self.scale(frame),
            exclude,
        );

        let mut grouped: HashMap<Category, Vec<BoundingBox>> =
            wanted.iter().map(|c| (*c, Vec::new())).collect();
        for bbox in boxes {
            if let Some(list) = grouped.get_mut(&bbox.category) {
                list.push(bbox);
            }
        }
        Ok(grouped
            .into_iter()
            .map(|(category, list)| (category, list.into()))
            .collect())
    }
}

/// Maps model input coordinates back onto the frame.
#[derive(Debug, Clone, Copy)]
struct FrameScale {
    sx: f32,
    sy: f32,
    width: f32,
    height: f32,
}

fn to_boxes(
    candidates: Vec<Candidate>,
    categories: &[Option<Category>],
    scale: FrameScale,
    exclude: &[Category],
) -> Vec<BoundingBox> {
    candidates
        .into_iter()
        .filter_map(|c| {
            let category = categories.get(c.class).copied().flatten()?;
            if exclude.contains(&category) {
                return None;
            }
            let [x1, y1, x2, y2] = c.rect;
            Some(BoundingBox {
                xmin: (x1 * scale.sx).clamp(0.0, scale.width),
                ymin: (y1 * scale.sy).clamp(0.0, scale.height),
                xmax: (x2 * scale.sx).clamp(0.0, scale.width),
                ymax: (y2 * scale.sy).clamp(0.0, scale.height),
                category,
                confidence: c.score,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(rect: [f32; 4], class: usize) -> Candidate {
        Candidate {
            rect,
            class,
            score: 0.8,
        }
    }

    #[test]
    fn test_to_boxes_rescales_and_clamps() {
        let scale = FrameScale {
            sx: 2.0,
            sy: 0.5,
            width: 1280.0,
            height: 320.0,
        };
        let boxes = to_boxes(
            vec![candidate([-5.0, 100.0, 700.0, 200.0], 0)],
            &[Some(Category::Spike)],
            scale,
            &[],
        );
        assert_eq!(boxes.len(), 1);
        let b = boxes[0];
        assert_eq!((b.xmin, b.ymin, b.xmax, b.ymax), (0.0, 50.0, 1280.0, 100.0));
        assert_eq!(b.category, Category::Spike);
    }

    #[test]
    fn test_to_boxes_skips_unknown_and_excluded() {
        let scale = FrameScale {
            sx: 1.0,
            sy: 1.0,
            width: 100.0,
            height: 100.0,
        };
        let categories = [Some(Category::Block), None, Some(Category::Serve)];
        let boxes = to_boxes(
            vec![
                candidate([0.0, 0.0, 10.0, 10.0], 0),
                candidate([0.0, 0.0, 10.0, 10.0], 1),
                candidate([0.0, 0.0, 10.0, 10.0], 2),
                candidate([0.0, 0.0, 10.0, 10.0], 7),
            ],
            &categories,
            scale,
            &[Category::Serve],
        );
        let cats: Vec<_> = boxes.iter().map(|b| b.category).collect();
        assert_eq!(cats, vec![Category::Block]);
    }

    #[test]
    fn test_default_labels_resolve() {
        let config = DetectorConfig::default();
        assert!(config
            .action_labels
            .iter()
            .all(|l| Category::from_label(l).is_some()));
        assert_eq!(Category::from_label(&config.ball_labels[0]), Some(Category::Ball));
    }
}
