//! Thin wrapper around the on-device inference SDK.

use crate::{DetectError, Result};
use iris_preprocess::VisionImage;
use tract_onnx::prelude::*;

type RunnableOnnx = RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// One loaded SDK model, pinned to a fixed input geometry.
pub struct VisionModel {
    model: RunnableOnnx,
    input_width: u32,
    input_height: u32,
}

impl VisionModel {
    /// Load and optimize an ONNX model, preparing it for inference.
    pub fn load(path: &std::path::Path, input_width: u32, input_height: u32) -> Result<Self> {
        let model = tract_onnx::onnx()
            .model_for_path(path)?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec![1, 3, input_height as usize, input_width as usize],
                ),
            )?
            .into_optimized()?
            .into_runnable()?;

        Ok(Self {
            model,
            input_width,
            input_height,
        })
    }

    pub fn input_size(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }

    /// Run the SDK on one image, returning every model output.
    pub fn run(&self, image: &VisionImage) -> Result<Vec<tract_ndarray::ArrayD<f32>>> {
        let input = image.to_tensor(self.input_width, self.input_height)?;

        // (H, W, C) f32 → [1, 3, H, W] tensor
        let h = self.input_height as usize;
        let w = self.input_width as usize;
        let mut arr4 = tract_ndarray::Array4::<f32>::zeros((1, 3, h, w));
        for y in 0..h {
            for x in 0..w {
                for ch in 0..3 {
                    arr4[(0, ch, y, x)] = input[(y, x, ch)];
                }
            }
        }

        let tensor: Tensor = arr4.into_tensor();
        let outputs = self.model.run(tvec![tensor.into()])?;

        let mut arrays = Vec::with_capacity(outputs.len());
        for output in outputs.iter() {
            arrays.push(output.to_array_view::<f32>()?.to_owned());
        }
        Ok(arrays)
    }
}

/// One post-NMS row emitted by an SDK detection model.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawDetection {
    /// `[x1, y1, x2, y2]`, normalized 0–1 relative to the model input.
    pub bbox: [f32; 4],
    pub score: f32,
    pub class: usize,
    /// Trailing per-row values, e.g. classification probabilities.
    pub extras: Vec<f32>,
}

/// Decode a `[1, N, 6+]` detection output, dropping rows below
/// `confidence`.
pub(crate) fn decode_detections(
    output: &tract_ndarray::ArrayD<f32>,
    confidence: f32,
) -> Result<Vec<RawDetection>> {
    let shape = output.shape();
    if output.ndim() != 3 || shape[0] != 1 || shape[2] < 6 {
        return Err(DetectError::OutputShape(shape.to_vec()));
    }

    let rows: tract_ndarray::ArrayView2<f32> = output
        .index_axis(tract_ndarray::Axis(0), 0)
        .into_dimensionality()
        .map_err(|_| DetectError::OutputShape(shape.to_vec()))?;
    let mut detections = Vec::new();
    for row in rows.axis_iter(tract_ndarray::Axis(0)) {
        let score = row[4];
        if score < confidence {
            continue;
        }
        detections.push(RawDetection {
            bbox: [
                row[0].clamp(0.0, 1.0),
                row[1].clamp(0.0, 1.0),
                row[2].clamp(0.0, 1.0),
                row[3].clamp(0.0, 1.0),
            ],
            score,
            class: row[5].max(0.0) as usize,
            extras: row.iter().skip(6).copied().collect(),
        });
    }
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_of(rows: Vec<Vec<f32>>) -> tract_ndarray::ArrayD<f32> {
        let cols = rows[0].len();
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        tract_ndarray::ArrayD::from_shape_vec(vec![1, rows.len(), cols], flat).unwrap()
    }

    #[test]
    fn low_scores_are_dropped() {
        let output = output_of(vec![
            vec![0.1, 0.1, 0.5, 0.5, 0.9, 0.0],
            vec![0.2, 0.2, 0.4, 0.4, 0.05, 1.0],
        ]);
        let detections = decode_detections(&output, 0.5).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class, 0);
        assert!(detections[0].extras.is_empty());
    }

    #[test]
    fn coordinates_clamp_to_unit_range() {
        let output = output_of(vec![vec![-0.2, 0.0, 1.3, 0.8, 0.9, 2.0, 0.7]]);
        let detections = decode_detections(&output, 0.1).unwrap();
        assert_eq!(detections[0].bbox, [0.0, 0.0, 1.0, 0.8]);
        assert_eq!(detections[0].class, 2);
        assert_eq!(detections[0].extras, vec![0.7]);
    }

    #[test]
    fn wrong_rank_is_an_error() {
        let output = tract_ndarray::ArrayD::from_shape_vec(vec![2, 6], vec![0.0; 12]).unwrap();
        assert!(matches!(
            decode_detections(&output, 0.5),
            Err(DetectError::OutputShape(_))
        ));
    }
}
