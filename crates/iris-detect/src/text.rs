//! Text recognition variant: word-box detection followed by CTC
//! recognition over a character set.

use crate::model::{decode_detections, VisionModel};
use crate::{BoundingBox, DetectError, Detector, Result};
use iris_preprocess::VisionImage;
use serde::{Deserialize, Serialize};
use tract_onnx::prelude::tract_ndarray::{ArrayD, ArrayView2, Axis};

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextRecognizerOptions {
    pub confidence_threshold: f32,
}

impl Default for TextRecognizerOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBlock {
    pub text: String,
    pub bounding_box: BoundingBox,
    pub confidence: f32,
}

pub struct TextRecognizer {
    detection: VisionModel,
    recognition: VisionModel,
    charset: Vec<char>,
    options: TextRecognizerOptions,
}

impl TextRecognizer {
    pub fn new(
        detection: VisionModel,
        recognition: VisionModel,
        charset: Vec<char>,
        options: TextRecognizerOptions,
    ) -> Self {
        Self {
            detection,
            recognition,
            charset,
            options,
        }
    }
}

impl Detector for TextRecognizer {
    fn process_image(&self, image: &VisionImage) -> Result<serde_json::Value> {
        let outputs = self.detection.run(image)?;
        let output = outputs.first().ok_or(DetectError::MissingOutput(0))?;
        let boxes = decode_detections(output, self.options.confidence_threshold)?;

        let width = image.width as f32;
        let height = image.height as f32;
        let mut blocks = Vec::with_capacity(boxes.len());
        for detection in boxes {
            let [x1, y1, x2, y2] = detection.bbox;
            let bounding_box = BoundingBox {
                left: x1 * width,
                top: y1 * height,
                width: (x2 - x1) * width,
                height: (y2 - y1) * height,
            };

            let crop = image.crop(
                bounding_box.left as u32,
                bounding_box.top as u32,
                bounding_box.width.max(1.0) as u32,
                bounding_box.height.max(1.0) as u32,
            );
            let recognized = self.recognition.run(&crop)?;
            let logits = recognized.first().ok_or(DetectError::MissingOutput(0))?;
            let (text, confidence) = ctc_greedy(logits, &self.charset)?;
            if text.is_empty() {
                continue;
            }
            blocks.push(TextBlock {
                text,
                bounding_box,
                confidence: confidence.min(detection.score),
            });
        }

        let text = blocks
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(serde_json::json!({ "text": text, "blocks": blocks }))
    }
}

/// Greedy CTC decode of `[T, C]` (or `[1, T, C]`) scores: argmax per
/// step, collapse repeats, skip the blank symbol at class 0.  Charset
/// index `i` maps to class `i + 1`.
fn ctc_greedy(logits: &ArrayD<f32>, charset: &[char]) -> Result<(String, f32)> {
    let steps: ArrayView2<f32> = match logits.ndim() {
        2 => logits.view().into_dimensionality().map_err(|_| {
            DetectError::OutputShape(logits.shape().to_vec())
        })?,
        3 if logits.shape()[0] == 1 => logits
            .index_axis(Axis(0), 0)
            .into_dimensionality()
            .map_err(|_| DetectError::OutputShape(logits.shape().to_vec()))?,
        _ => return Err(DetectError::OutputShape(logits.shape().to_vec())),
    };

    let mut text = String::new();
    let mut previous = 0usize;
    let mut score_sum = 0.0f32;
    let mut emitted = 0usize;
    for step in steps.axis_iter(Axis(0)) {
        let (best, best_score) = step
            .iter()
            .enumerate()
            .fold((0usize, f32::MIN), |acc, (index, score)| {
                if *score > acc.1 {
                    (index, *score)
                } else {
                    acc
                }
            });
        if best != 0 && best != previous {
            if let Some(symbol) = charset.get(best - 1) {
                text.push(*symbol);
                score_sum += best_score;
                emitted += 1;
            }
        }
        previous = best;
    }

    let confidence = if emitted == 0 {
        0.0
    } else {
        (score_sum / emitted as f32).clamp(0.0, 1.0)
    };
    Ok((text, confidence))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logits_of(rows: Vec<Vec<f32>>) -> ArrayD<f32> {
        let cols = rows[0].len();
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        ArrayD::from_shape_vec(vec![rows.len(), cols], flat).unwrap()
    }

    #[test]
    fn ctc_collapses_repeats_and_blanks() {
        // classes: 0 = blank, 1 = 'h', 2 = 'i'
        let charset = vec!['h', 'i'];
        let logits = logits_of(vec![
            vec![0.1, 0.8, 0.1], // h
            vec![0.1, 0.8, 0.1], // h (repeat, collapsed)
            vec![0.9, 0.0, 0.1], // blank
            vec![0.1, 0.0, 0.9], // i
        ]);
        let (text, confidence) = ctc_greedy(&logits, &charset).unwrap();
        assert_eq!(text, "hi");
        assert!(confidence > 0.5);
    }

    #[test]
    fn ctc_blank_separator_allows_double_letters() {
        let charset = vec!['o'];
        let logits = logits_of(vec![
            vec![0.0, 1.0], // o
            vec![1.0, 0.0], // blank
            vec![0.0, 1.0], // o
        ]);
        let (text, _) = ctc_greedy(&logits, &charset).unwrap();
        assert_eq!(text, "oo");
    }

    #[test]
    fn ctc_accepts_batched_logits() {
        let charset = vec!['a'];
        let logits =
            ArrayD::from_shape_vec(vec![1, 2, 2], vec![0.0, 1.0, 1.0, 0.0]).unwrap();
        let (text, _) = ctc_greedy(&logits, &charset).unwrap();
        assert_eq!(text, "a");
    }

    #[test]
    fn ctc_rejects_flat_output() {
        let charset = vec!['a'];
        let logits = ArrayD::from_shape_vec(vec![4], vec![0.0; 4]).unwrap();
        assert!(matches!(
            ctc_greedy(&logits, &charset),
            Err(DetectError::OutputShape(_))
        ));
    }

    #[test]
    fn empty_text_has_zero_confidence() {
        let charset = vec!['a'];
        let logits = logits_of(vec![vec![1.0, 0.0]]);
        let (text, confidence) = ctc_greedy(&logits, &charset).unwrap();
        assert!(text.is_empty());
        assert_eq!(confidence, 0.0);
    }
}
