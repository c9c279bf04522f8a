use ndarray::ArrayD;

use crate::catalog::AnchorSet;

use super::letterbox::Geometry;
use super::DetectError;

/// Per-class cap applied by [`YoloDecoder`] after suppression.
pub const MAX_BOXES_PER_CLASS: usize = 20;

/// Everything the decoder needs besides the raw heads.
pub struct DecodeRequest<'a> {
    pub anchors: &'a AnchorSet,
    pub num_classes: usize,
    pub geometry: Geometry,
    /// (height, width) of the source image.
    pub image_shape: (u32, u32),
    pub score_threshold: f32,
    pub iou_threshold: f32,
}

/// Parallel sequences; boxes are `[top, left, bottom, right]` in source pixels,
/// within `[0, height] x [0, width]` of the source image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidates {
    pub boxes: Vec<[f32; 4]>,
    pub scores: Vec<f32>,
    pub classes: Vec<usize>,
}

/// Turns raw head outputs into thresholded, suppressed detections.
pub trait Decode: Send {
    fn decode(
        &self,
        heads: &[ArrayD<f32>],
        request: &DecodeRequest<'_>,
    ) -> Result<Candidates, DetectError>;
}

/// YOLOv3 head decoding with per-class NMS.
#[derive(Debug, Clone)]
pub struct YoloDecoder {
    max_boxes_per_class: usize,
}

impl Default for YoloDecoder {
    fn default() -> Self {
        Self {
            max_boxes_per_class: MAX_BOXES_PER_CLASS,
        }
    }
}

/// Largest anchors go to the coarsest head.
fn anchor_masks(num_heads: usize) -> Option<&'static [&'static [usize]]> {
    const FULL: &[&[usize]] = &[&[6, 7, 8], &[3, 4, 5], &[0, 1, 2]];
    const TINY: &[&[usize]] = &[&[3, 4, 5], &[1, 2, 3]];
    match num_heads {
        3 => Some(FULL),
        2 => Some(TINY),
        _ => None,
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl Decode for YoloDecoder {
    fn decode(
        &self,
        heads: &[ArrayD<f32>],
        request: &DecodeRequest<'_>,
    ) -> Result<Candidates, DetectError> {
        let masks = anchor_masks(heads.len()).ok_or(DetectError::UnsupportedHeads(heads.len()))?;
        let attrs = request.num_classes + 5;
        let geometry = request.geometry;
        let input_w = geometry.input_width as f32;
        let input_h = geometry.input_height as f32;
        let (image_h, image_w) = (
            request.image_shape.0 as f32,
            request.image_shape.1 as f32,
        );

        let mut per_class: Vec<Vec<([f32; 4], f32)>> = vec![Vec::new(); request.num_classes];

        for (index, (head, mask)) in heads.iter().zip(masks.iter()).enumerate() {
            let shape = head.shape();
            let expected = mask.len() * attrs;
            if shape.len() != 4 || shape[0] != 1 || shape[1] != expected {
                return Err(DetectError::HeadShape {
                    head: index,
                    shape: shape.to_vec(),
                    expected,
                });
            }
            let (grid_h, grid_w) = (shape[2], shape[3]);

            for (slot, &anchor_index) in mask.iter().enumerate() {
                let (anchor_w, anchor_h) = request
                    .anchors
                    .get(anchor_index)
                    .ok_or(DetectError::MissingAnchor(anchor_index))?;
                let base = slot * attrs;

                for row in 0..grid_h {
                    for col in 0..grid_w {
                        let value = |c: usize| head[[0, base + c, row, col]];

                        let objectness = sigmoid(value(4));
                        if objectness < request.score_threshold {
                            continue;
                        }

                        let cx = (sigmoid(value(0)) + col as f32) / grid_w as f32 * input_w;
                        let cy = (sigmoid(value(1)) + row as f32) / grid_h as f32 * input_h;
                        let w = value(2).exp() * anchor_w;
                        let h = value(3).exp() * anchor_h;

                        let (left, top) = geometry.to_source(cx - w / 2.0, cy - h / 2.0);
                        let (right, bottom) = geometry.to_source(cx + w / 2.0, cy + h / 2.0);
                        let bbox = [
                            top.clamp(0.0, image_h),
                            left.clamp(0.0, image_w),
                            bottom.clamp(0.0, image_h),
                            right.clamp(0.0, image_w),
                        ];

                        for (class, boxes) in per_class.iter_mut().enumerate() {
                            let score = objectness * sigmoid(value(5 + class));
                            if score >= request.score_threshold {
                                boxes.push((bbox, score));
                            }
                        }
                    }
                }
            }
        }

        let mut candidates = Candidates::default();
        for (class, boxes) in per_class.into_iter().enumerate() {
            for (bbox, score) in nms(boxes, request.iou_threshold, self.max_boxes_per_class) {
                candidates.boxes.push(bbox);
                candidates.scores.push(score);
                candidates.classes.push(class);
            }
        }

        Ok(candidates)
    }
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let inter_h = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_w = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_h * inter_w;
    let union = area(a) + area(b) - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy suppression: highest score first, dropping boxes whose IoU with a kept
/// box exceeds `iou_threshold`, keeping at most `max_boxes`.
pub fn nms(
    mut boxes: Vec<([f32; 4], f32)>,
    iou_threshold: f32,
    max_boxes: usize,
) -> Vec<([f32; 4], f32)> {
    boxes.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut kept: Vec<([f32; 4], f32)> = Vec::new();
    for candidate in boxes {
        if kept.len() >= max_boxes {
            break;
        }
        if kept
            .iter()
            .all(|(bbox, _)| iou(bbox, &candidate.0) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}
