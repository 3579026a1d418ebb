//! Decoding of YOLOv8 style detection heads.
//!
//! The exported models produce a `[1, 4 + classes, anchors]` tensor where the
//! first four rows are `cx, cy, w, h` in model input pixels and the remaining
//! rows are per-class scores (already sigmoid-activated).

use anyhow::bail;
use ndarray::ArrayView2;

/// A scored box in model input coordinates, `[xmin, ymin, xmax, ymax]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub rect: [f32; 4],
    pub class: usize,
    pub score: f32,
}

/// Picks the best class of every anchor and keeps those scoring at least
/// `conf_threshold`.
pub fn decode(data: &[f32], shape: &[i64], conf_threshold: f32) -> anyhow::Result<Vec<Candidate>> {
    let (attrs, anchors) = match shape {
        [1, attrs, anchors] if *attrs > 4 && *anchors >= 0 => (*attrs as usize, *anchors as usize),
        _ => bail!("Unexpected detection output shape {shape:?}"),
    };
    let output = ArrayView2::from_shape((attrs, anchors), data)?;

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let column = output.column(anchor);
        let (class, score) = column
            .iter()
            .skip(4)
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (idx, &score)| {
                if score > best.1 {
                    (idx, score)
                } else {
                    best
                }
            });
        if score < conf_threshold {
            continue;
        }
        let (cx, cy, w, h) = (column[0], column[1], column[2], column[3]);
        candidates.push(Candidate {
            rect: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
            class,
            score,
        });
    }
    Ok(candidates)
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    let union = (a[2] - a[0]) * (a[3] - a[1]) + (b[2] - b[0]) * (b[3] - b[1]) - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Greedy per-class non-maximum suppression. Output is sorted by score,
/// highest first.
pub fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.class == candidate.class && iou(&k.rect, &candidate.rect) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a `[1, 4 + classes, anchors]` buffer from per-anchor rows.
    fn head(rows: &[[f32; 6]]) -> (Vec<f32>, Vec<i64>) {
        let anchors = rows.len();
        let mut data = vec![0.0; 6 * anchors];
        for (a, row) in rows.iter().enumerate() {
            for (attr, v) in row.iter().enumerate() {
                data[attr * anchors + a] = *v;
            }
        }
        (data, vec![1, 6, anchors as i64])
    }

    #[test]
    fn test_decode_thresholds_and_converts() {
        let (data, shape) = head(&[
            [50.0, 50.0, 20.0, 10.0, 0.9, 0.1],
            [10.0, 10.0, 4.0, 4.0, 0.1, 0.2],
            [80.0, 40.0, 10.0, 10.0, 0.3, 0.6],
        ]);
        let out = decode(&data, &shape, 0.5).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].rect, [40.0, 45.0, 60.0, 55.0]);
        assert_eq!(out[0].class, 0);
        assert_eq!(out[1].class, 1);
        assert!((out[1].score - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_decode_rejects_bad_shape() {
        assert!(decode(&[0.0; 8], &[1, 4, 2], 0.5).is_err());
        assert!(decode(&[0.0; 12], &[2, 6, 1], 0.5).is_err());
        assert!(decode(&[0.0; 5], &[1, 6, 1], 0.5).is_err());
    }

    #[test]
    fn test_iou() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert_eq!(iou(&a, &a), 1.0);
        assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
        let half = iou(&a, &[5.0, 0.0, 15.0, 10.0]);
        assert!((half - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_is_per_class() {
        let c = |rect, class, score| Candidate { rect, class, score };
        let kept = nms(
            vec![
                c([0.0, 0.0, 10.0, 10.0], 0, 0.7),
                c([1.0, 1.0, 11.0, 11.0], 0, 0.9),
                c([1.0, 1.0, 11.0, 11.0], 1, 0.5),
                c([50.0, 50.0, 60.0, 60.0], 0, 0.4),
            ],
            0.45,
        );
        let scores: Vec<_> = kept.iter().map(|k| k.score).collect();
        assert_eq!(scores, vec![0.9, 0.5, 0.4]);
    }
}
