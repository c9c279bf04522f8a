use crate::catalog::AnchorSet;
use crate::config::DetectorConfig;
use crate::model::{LearningPhase, ResolvedModel};

use super::decode::{Decode, DecodeRequest};
use super::letterbox::LetterboxedImage;
use super::{DetectError, Detection};

/// The live inference context: resolved network, decoder and the fixed decode
/// parameters. Released when dropped; single caller only.
pub struct DetectorRuntime {
    model: ResolvedModel,
    decoder: Box<dyn Decode>,
    anchors: AnchorSet,
    num_classes: usize,
    score_threshold: f32,
    iou_threshold: f32,
}

impl DetectorRuntime {
    pub fn new(
        model: ResolvedModel,
        decoder: Box<dyn Decode>,
        anchors: AnchorSet,
        num_classes: usize,
        config: &DetectorConfig,
    ) -> Self {
        Self {
            model,
            decoder,
            anchors,
            num_classes,
            score_threshold: config.score,
            iou_threshold: config.iou,
        }
    }

    pub fn model(&self) -> &ResolvedModel {
        &self.model
    }

    /// Runs the network on `input` and decodes its heads for an image of
    /// `image_shape` (height, width). No detections is a valid result.
    pub fn infer(
        &mut self,
        input: &LetterboxedImage,
        image_shape: (u32, u32),
    ) -> Result<Vec<Detection>, DetectError> {
        let tensor = input.to_tensor()?;
        let heads = self
            .model
            .network_mut()
            .infer(tensor.view(), LearningPhase::Inference)?;

        let request = DecodeRequest {
            anchors: &self.anchors,
            num_classes: self.num_classes,
            geometry: input.geometry(),
            image_shape,
            score_threshold: self.score_threshold,
            iou_threshold: self.iou_threshold,
        };
        let candidates = self.decoder.decode(&heads, &request)?;

        let (boxes, scores, classes) = (
            candidates.boxes.len(),
            candidates.scores.len(),
            candidates.classes.len(),
        );
        if boxes != scores || boxes != classes {
            return Err(DetectError::OutputMismatch {
                boxes,
                scores,
                classes,
            });
        }

        candidates
            .boxes
            .into_iter()
            .zip(candidates.scores)
            .zip(candidates.classes)
            .map(|(([top, left, bottom, right], score), class_index)| {
                if class_index >= self.num_classes {
                    return Err(DetectError::UnknownClass(class_index));
                }
                Ok(Detection {
                    class_index,
                    score,
                    top,
                    left,
                    bottom,
                    right,
                })
            })
            .collect()
    }
}

impl Drop for DetectorRuntime {
    fn drop(&mut self) {
        tracing::info!("inference context released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ClassCatalog;
    use crate::config::InputSize;
    use crate::detect::Candidates;
    use crate::testing::{FakeBackend, FakeDecoder};
    use opencv::core::{Mat, Scalar, CV_8UC3};
    use opencv::prelude::*;
    use std::sync::atomic::Ordering;

    fn runtime(decoder: FakeDecoder) -> (DetectorRuntime, FakeBackend) {
        let backend = FakeBackend::loading(vec![18, 18]);
        let anchors = AnchorSet::parse("10,14,23,27,37,58,81,82,135,169,344,319").unwrap();
        let catalog = ClassCatalog::from_names(["cat"]);
        let config = DetectorConfig::default();
        let model = ResolvedModel::resolve(&backend, &config, &anchors, &catalog).unwrap();
        let runtime = DetectorRuntime::new(model, Box::new(decoder), anchors, 1, &config);
        (runtime, backend)
    }

    fn input() -> LetterboxedImage {
        let image = Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::all(0.0)).unwrap();
        LetterboxedImage::new(
            &image,
            InputSize::Fixed {
                width: 32,
                height: 32,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_passes_thresholds_and_shape_through() {
        let decoder = FakeDecoder::returning(Candidates {
            boxes: vec![[1.0, 2.0, 3.0, 4.0]],
            scores: vec![0.9],
            classes: vec![0],
        });
        let seen = decoder.seen.clone();
        let (mut runtime, _backend) = runtime(decoder);

        let detections = runtime.infer(&input(), (48, 64)).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].left, 2.0);
        assert_eq!(detections[0].score, 0.9);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[(0.3, 0.45, (48, 64))]);
    }

    #[test]
    fn test_empty_output_is_valid() {
        let (mut runtime, _backend) = runtime(FakeDecoder::returning(Candidates::default()));
        assert!(runtime.infer(&input(), (48, 64)).unwrap().is_empty());
    }

    #[test]
    fn test_mismatched_lengths_fail() {
        let (mut runtime, _backend) = runtime(FakeDecoder::returning(Candidates {
            boxes: vec![[0.0; 4], [0.0; 4]],
            scores: vec![0.5],
            classes: vec![0, 0],
        }));
        assert!(matches!(
            runtime.infer(&input(), (48, 64)),
            Err(DetectError::OutputMismatch {
                boxes: 2,
                scores: 1,
                classes: 2
            })
        ));
    }

    #[test]
    fn test_unknown_class_fails() {
        let (mut runtime, _backend) = runtime(FakeDecoder::returning(Candidates {
            boxes: vec![[0.0; 4]],
            scores: vec![0.5],
            classes: vec![3],
        }));
        assert!(matches!(
            runtime.infer(&input(), (48, 64)),
            Err(DetectError::UnknownClass(3))
        ));
    }

    #[test]
    fn test_drop_releases_network_once() {
        let (runtime, backend) = runtime(FakeDecoder::returning(Candidates::default()));
        assert_eq!(backend.drops.load(Ordering::SeqCst), 0);
        drop(runtime);
        assert_eq!(backend.drops.load(Ordering::SeqCst), 1);
    }
}
