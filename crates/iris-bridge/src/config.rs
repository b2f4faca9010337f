//! Bridge configuration: where the SDK's model files live.

use crate::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Model-file layout for the detector variants that need one.
///
/// Model *setup* (download, export) is out of scope; the bridge only
/// loads files that are already on disk, resolved against `model_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    pub model_dir: PathBuf,

    pub face_model: String,
    /// Face detection input (width, height).
    pub face_input: (u32, u32),

    pub text_detection_model: String,
    pub text_detection_input: (u32, u32),
    pub text_recognition_model: String,
    pub text_recognition_input: (u32, u32),
    /// One recognizer character per line, in class order (blank is 0).
    pub text_charset: String,

    pub label_model: String,
    pub label_input: (u32, u32),
    /// One label per line, in model output order.
    pub label_labels: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("./models"),
            face_model: "face_detection.onnx".to_string(),
            face_input: (320, 320),
            text_detection_model: "text_detection.onnx".to_string(),
            text_detection_input: (640, 640),
            text_recognition_model: "text_recognition.onnx".to_string(),
            text_recognition_input: (100, 32),
            text_charset: "text_charset.txt".to_string(),
            label_model: "image_labeler.onnx".to_string(),
            label_input: (224, 224),
            label_labels: "image_labels.txt".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Read a JSON config file; missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Configuration(format!("config {}: {e}", path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| BridgeError::Configuration(format!("config {}: {e}", path.display())))
    }

    /// Resolve a model or label file against the model directory.
    pub fn resolve(&self, file: &str) -> PathBuf {
        self.model_dir.join(file)
    }
}
