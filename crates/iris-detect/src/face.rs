//! Face detection variant.

use crate::model::{decode_detections, VisionModel};
use crate::{BoundingBox, DetectError, Detector, Result};
use iris_preprocess::VisionImage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FaceDetectorOptions {
    /// Smallest face to report, as a fraction of the image width.
    pub min_face_size: f32,
    /// Report smile / eye-open probabilities when the model emits them.
    pub enable_classification: bool,
    pub confidence_threshold: f32,
}

impl Default for FaceDetectorOptions {
    fn default() -> Self {
        Self {
            min_face_size: 0.1,
            enable_classification: false,
            confidence_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Face {
    pub bounding_box: BoundingBox,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smiling_probability: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_eye_open_probability: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_eye_open_probability: Option<f32>,
}

pub struct FaceDetector {
    model: VisionModel,
    options: FaceDetectorOptions,
}

impl FaceDetector {
    pub fn new(model: VisionModel, options: FaceDetectorOptions) -> Self {
        Self { model, options }
    }
}

impl Detector for FaceDetector {
    fn process_image(&self, image: &VisionImage) -> Result<serde_json::Value> {
        let outputs = self.model.run(image)?;
        let output = outputs.first().ok_or(DetectError::MissingOutput(0))?;
        let detections = decode_detections(output, self.options.confidence_threshold)?;

        let width = image.width as f32;
        let height = image.height as f32;
        let faces: Vec<Face> = detections
            .into_iter()
            .filter(|detection| {
                detection.bbox[2] - detection.bbox[0] >= self.options.min_face_size
            })
            .map(|detection| {
                let [x1, y1, x2, y2] = detection.bbox;
                let classify = |index: usize| {
                    self.options
                        .enable_classification
                        .then(|| detection.extras.get(index).copied())
                        .flatten()
                };
                Face {
                    bounding_box: BoundingBox {
                        left: x1 * width,
                        top: y1 * height,
                        width: (x2 - x1) * width,
                        height: (y2 - y1) * height,
                    },
                    confidence: detection.score,
                    smiling_probability: classify(0),
                    left_eye_open_probability: classify(1),
                    right_eye_open_probability: classify(2),
                }
            })
            .collect();

        Ok(serde_json::to_value(faces)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_parse_with_defaults() {
        let options: FaceDetectorOptions = serde_json::from_value(serde_json::json!({
            "enableClassification": true,
        }))
        .unwrap();
        assert!(options.enable_classification);
        assert!((options.min_face_size - 0.1).abs() < f32::EPSILON);
        assert!((options.confidence_threshold - 0.5).abs() < f32::EPSILON);
    }
}
