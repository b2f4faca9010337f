// iris-detect/src/lib.rs
// ============================================================
// Detection layer for the iris vision bridge.
// Wraps the on-device vision SDK (tract-onnx models, rqrr for
// barcodes) behind one processImage capability.  Variants for
// barcode, face, text, generic labeling and custom-model
// labeling differ only in request options and result shape,
// never in control flow.
// ============================================================

//! iris – detection layer
//!
//! A [`Detector`] accepts one formatted image and produces a marshaled
//! recognition result.  All concrete variants are collected in the
//! [`AnyDetector`] tagged union; the bridge keys them by caller-assigned
//! handles.  Detection models are expected to emit post-NMS rows
//! `[x1, y1, x2, y2, score, class, …]` normalized to the input;
//! classifiers emit one score per label; text recognizers emit CTC
//! logits with the blank symbol at index zero.

use iris_preprocess::{PreprocessError, VisionImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod barcode;
mod face;
mod label;
mod model;
mod text;

pub use barcode::{Barcode, BarcodeScanOptions, BarcodeScanner};
pub use face::{Face, FaceDetector, FaceDetectorOptions};
pub use label::{load_labels, ImageLabel, ImageLabeler, LabelerOptions};
pub use model::VisionModel;
pub use text::{TextBlock, TextRecognizer, TextRecognizerOptions};

#[derive(Error, Debug)]
pub enum DetectError {
    #[error(transparent)]
    Model(#[from] tract_onnx::prelude::TractError),
    #[error("unexpected model output shape {0:?}")]
    OutputShape(Vec<usize>),
    #[error("model produced no output {0}")]
    MissingOutput(usize),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error("labels file {path}: {source}")]
    LabelFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("result marshaling failed: {0}")]
    Marshal(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DetectError>;

/// The detector families the bridge can instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectorKind {
    Barcode,
    Face,
    Text,
    Label,
    /// Labeling with a caller-supplied custom model.
    EdgeLabel,
}

/// Axis-aligned rectangle in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

/// One formatted image in, one marshaled recognition result out.
pub trait Detector: Send + Sync {
    fn process_image(&self, image: &VisionImage) -> Result<serde_json::Value>;
}

/// Tagged union of the concrete detector variants.
pub enum AnyDetector {
    Barcode(BarcodeScanner),
    Face(FaceDetector),
    Text(TextRecognizer),
    Label(ImageLabeler),
    EdgeLabel(ImageLabeler),
}

impl AnyDetector {
    pub fn kind(&self) -> DetectorKind {
        match self {
            AnyDetector::Barcode(_) => DetectorKind::Barcode,
            AnyDetector::Face(_) => DetectorKind::Face,
            AnyDetector::Text(_) => DetectorKind::Text,
            AnyDetector::Label(_) => DetectorKind::Label,
            AnyDetector::EdgeLabel(_) => DetectorKind::EdgeLabel,
        }
    }
}

impl Detector for AnyDetector {
    fn process_image(&self, image: &VisionImage) -> Result<serde_json::Value> {
        match self {
            AnyDetector::Barcode(scanner) => scanner.process_image(image),
            AnyDetector::Face(detector) => detector.process_image(image),
            AnyDetector::Text(recognizer) => recognizer.process_image(image),
            AnyDetector::Label(labeler) => labeler.process_image(image),
            AnyDetector::EdgeLabel(labeler) => labeler.process_image(image),
        }
    }
}
