//! Image labeling variant, shared by the stock and custom-model paths.

use crate::model::VisionModel;
use crate::{DetectError, Detector, Result};
use iris_preprocess::VisionImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelerOptions {
    pub confidence_threshold: f32,
}

impl Default for LabelerOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageLabel {
    pub label: String,
    pub confidence: f32,
    pub index: usize,
}

/// One label per line, in model output order.
pub fn load_labels(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path).map_err(|source| DetectError::LabelFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

pub struct ImageLabeler {
    model: VisionModel,
    labels: Vec<String>,
    options: LabelerOptions,
}

impl ImageLabeler {
    pub fn new(model: VisionModel, labels: Vec<String>, options: LabelerOptions) -> Self {
        Self {
            model,
            labels,
            options,
        }
    }
}

impl Detector for ImageLabeler {
    fn process_image(&self, image: &VisionImage) -> Result<serde_json::Value> {
        let outputs = self.model.run(image)?;
        let output = outputs.first().ok_or(DetectError::MissingOutput(0))?;

        let mut labels: Vec<ImageLabel> = output
            .iter()
            .enumerate()
            .filter(|(_, score)| **score >= self.options.confidence_threshold)
            .map(|(index, score)| ImageLabel {
                label: self
                    .labels
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| format!("label {index}")),
                confidence: *score,
                index,
            })
            .collect();
        labels.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        Ok(serde_json::to_value(labels)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_file_skips_blank_lines() {
        let dir = std::env::temp_dir().join("iris-detect-label-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("labels.txt");
        std::fs::write(&path, "cat\n\n  dog \n").unwrap();

        let labels = load_labels(&path).unwrap();
        assert_eq!(labels, vec!["cat".to_string(), "dog".to_string()]);
    }

    #[test]
    fn missing_labels_file_is_an_error() {
        let result = load_labels(Path::new("/nonexistent/labels.txt"));
        assert!(matches!(result, Err(DetectError::LabelFile { .. })));
    }

    #[test]
    fn options_default_threshold() {
        let options: LabelerOptions = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!((options.confidence_threshold - 0.5).abs() < f32::EPSILON);
    }
}
