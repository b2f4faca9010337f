//! iris-bridge – the plugin surface.
//!
//! Glues the host application to the camera layer and the vision SDK:
//! argument marshaling, handle bookkeeping, session state.  Detection
//! itself happens in `iris-detect`; frame capture in `iris-camera`.
//! Commands arrive through the [`Dispatcher`], which routes method names
//! off the caller's thread; asynchronous session events flow back on the
//! per-texture event stream.

use iris_camera::{
    CameraEvent, CaptureSession, FrameData, PixelFormat, ResolutionPreset, TexturePort, VideoFrame,
};
use iris_detect::{
    load_labels, AnyDetector, BarcodeScanner, DetectError, Detector, DetectorKind, FaceDetector,
    ImageLabeler, TextRecognizer, VisionModel,
};
use iris_preprocess::{PixelBuffer, PlaneDescriptor, VisionImage};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

mod analyzer;
mod config;
mod dispatcher;
mod registry;

use analyzer::LiveFrameAnalyzer;
pub use config::BridgeConfig;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use registry::DetectorRegistry;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// Fatal setup failure: device open, unsatisfiable resolution,
    /// unreadable config.  Surfaced immediately, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Fatal to the triggering call only.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// SDK-originated failure, wrapped with its native code and message
    /// and returned as the triggering command's result.
    #[error("{code}: {message}")]
    Sdk { code: String, message: String },
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<iris_camera::CameraError> for BridgeError {
    fn from(error: iris_camera::CameraError) -> Self {
        BridgeError::Configuration(error.to_string())
    }
}

impl From<iris_preprocess::PreprocessError> for BridgeError {
    fn from(error: iris_preprocess::PreprocessError) -> Self {
        BridgeError::InvalidArgument(error.to_string())
    }
}

fn sdk_code(kind: DetectorKind) -> &'static str {
    match kind {
        DetectorKind::Barcode => "barcodeDetectorError",
        DetectorKind::Face => "faceDetectorError",
        DetectorKind::Text => "textRecognizerError",
        DetectorKind::Label => "imageLabelerError",
        DetectorKind::EdgeLabel => "edgeImageLabelerError",
    }
}

fn sdk_error(kind: DetectorKind, error: DetectError) -> BridgeError {
    BridgeError::Sdk {
        code: sdk_code(kind).to_string(),
        message: error.to_string(),
    }
}

/// Session state mirrored to the controlling side.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraValue {
    pub is_initialized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_size: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInitResult {
    pub texture_id: i64,
    pub preview_width: u32,
    pub preview_height: u32,
}

/// A still image handed to `processImage`: either a file on disk or raw
/// plane bytes plus their geometry.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ImageDescriptor {
    File {
        path: PathBuf,
    },
    Bytes {
        bytes: Vec<u8>,
        metadata: ImageMetadata,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    /// Four-character format code, e.g. "NV12" or "BGRA".
    pub raw_format: String,
    pub plane_data: Vec<PlaneMetadata>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaneMetadata {
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
}

impl ImageDescriptor {
    fn into_vision_image(self) -> Result<VisionImage> {
        match self {
            ImageDescriptor::File { path } => Ok(VisionImage::open(&path)?),
            ImageDescriptor::Bytes { bytes, metadata } => {
                let format = PixelFormat::from_fourcc(&metadata.raw_format).ok_or_else(|| {
                    BridgeError::InvalidArgument(format!(
                        "unknown raw format {:?}",
                        metadata.raw_format
                    ))
                })?;
                let planes: Vec<PlaneDescriptor> = metadata
                    .plane_data
                    .iter()
                    .map(|plane| PlaneDescriptor {
                        width: plane.width,
                        height: plane.height,
                        bytes_per_row: plane.bytes_per_row,
                    })
                    .collect();
                let buffer = PixelBuffer::from_planes(
                    metadata.width,
                    metadata.height,
                    format,
                    FrameData::Copied(Arc::from(bytes)),
                    &planes,
                )?;
                Ok(VisionImage::from_pixel_buffer(&buffer)?)
            }
        }
    }
}

fn parse_options<T: DeserializeOwned>(options: &Value) -> Result<T> {
    let value = if options.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        options.clone()
    };
    serde_json::from_value(value)
        .map_err(|e| BridgeError::InvalidArgument(format!("bad detector options: {e}")))
}

/// Options for labeling with a caller-supplied custom model.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EdgeLabelOptions {
    model_path: String,
    labels_path: String,
    #[serde(default)]
    input: Option<(u32, u32)>,
    #[serde(default)]
    confidence_threshold: Option<f32>,
}

struct SessionEntry {
    session: CaptureSession,
    value: CameraValue,
    events: broadcast::Receiver<CameraEvent>,
}

impl SessionEntry {
    /// Fold pending session events into the mirrored state.
    fn refresh(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(CameraEvent::Error { error_description }) => {
                    self.value.error_description = Some(error_description);
                }
                Ok(CameraEvent::CameraClosing) => {
                    self.value.is_initialized = false;
                }
                Ok(CameraEvent::Detection { .. }) => {}
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }
}

/// The bridge object: owns the detector registry and all open capture
/// sessions.  One instance per plugin, driven by the [`Dispatcher`].
pub struct VisionBridge {
    config: BridgeConfig,
    registry: DetectorRegistry,
    sessions: HashMap<i64, SessionEntry>,
    next_texture_id: i64,
}

impl VisionBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            registry: DetectorRegistry::new(),
            sessions: HashMap::new(),
            next_texture_id: 1,
        }
    }

    /// Ordered sequence of attached cameras.
    pub fn available_cameras(&self) -> Result<Vec<iris_camera::CameraDescription>> {
        Ok(iris_camera::enumerate_cameras()?)
    }

    /// Open a camera and start frame delivery.
    pub fn initialize(
        &mut self,
        camera_name: &str,
        preset: ResolutionPreset,
    ) -> Result<CameraInitResult> {
        let cameras = iris_camera::enumerate_cameras()?;
        let description = cameras
            .into_iter()
            .find(|camera| camera.name == camera_name)
            .ok_or_else(|| {
                BridgeError::Configuration(format!("no camera named {camera_name}"))
            })?;

        let mut session = CaptureSession::open(&description, preset)?;
        session.start()?;

        let (preview_width, preview_height) = session.preview_size();
        let texture_id = self.next_texture_id;
        self.next_texture_id += 1;

        let events = session.events();
        self.sessions.insert(
            texture_id,
            SessionEntry {
                session,
                value: CameraValue {
                    is_initialized: true,
                    error_description: None,
                    preview_size: Some((preview_width, preview_height)),
                },
                events,
            },
        );
        info!(texture_id, camera = camera_name, "camera initialized");

        Ok(CameraInitResult {
            texture_id,
            preview_width,
            preview_height,
        })
    }

    /// Release the camera and all native resources behind `texture_id`.
    /// Safe to call once; later calls are no-ops.
    pub fn dispose(&mut self, texture_id: i64) -> Result<()> {
        if let Some(mut entry) = self.sessions.remove(&texture_id) {
            entry.session.close();
            info!(texture_id, "camera disposed");
        }
        Ok(())
    }

    fn ensure_detector(
        &mut self,
        handle: i64,
        kind: DetectorKind,
        options: &Value,
    ) -> Result<Arc<AnyDetector>> {
        if let Some(existing) = self.registry.get(handle) {
            if existing.kind() != kind {
                return Err(BridgeError::InvalidArgument(format!(
                    "handle {handle} already bound to a {:?} detector",
                    existing.kind()
                )));
            }
            return Ok(existing);
        }

        let detector = Arc::new(self.build_detector(kind, options)?);
        self.registry.add(handle, Arc::clone(&detector))?;
        debug!(handle, ?kind, "detector registered");
        Ok(detector)
    }

    fn build_detector(&self, kind: DetectorKind, options: &Value) -> Result<AnyDetector> {
        let config = &self.config;
        match kind {
            DetectorKind::Barcode => Ok(AnyDetector::Barcode(BarcodeScanner::new(
                parse_options(options)?,
            ))),
            DetectorKind::Face => {
                let (width, height) = config.face_input;
                let model = VisionModel::load(&config.resolve(&config.face_model), width, height)
                    .map_err(|e| sdk_error(kind, e))?;
                Ok(AnyDetector::Face(FaceDetector::new(
                    model,
                    parse_options(options)?,
                )))
            }
            DetectorKind::Text => {
                let (det_w, det_h) = config.text_detection_input;
                let detection =
                    VisionModel::load(&config.resolve(&config.text_detection_model), det_w, det_h)
                        .map_err(|e| sdk_error(kind, e))?;
                let (rec_w, rec_h) = config.text_recognition_input;
                let recognition = VisionModel::load(
                    &config.resolve(&config.text_recognition_model),
                    rec_w,
                    rec_h,
                )
                .map_err(|e| sdk_error(kind, e))?;
                let charset: Vec<char> = load_labels(&config.resolve(&config.text_charset))
                    .map_err(|e| sdk_error(kind, e))?
                    .iter()
                    .filter_map(|line| line.chars().next())
                    .collect();
                Ok(AnyDetector::Text(TextRecognizer::new(
                    detection,
                    recognition,
                    charset,
                    parse_options(options)?,
                )))
            }
            DetectorKind::Label => {
                let (width, height) = config.label_input;
                let model = VisionModel::load(&config.resolve(&config.label_model), width, height)
                    .map_err(|e| sdk_error(kind, e))?;
                let labels = load_labels(&config.resolve(&config.label_labels))
                    .map_err(|e| sdk_error(kind, e))?;
                Ok(AnyDetector::Label(ImageLabeler::new(
                    model,
                    labels,
                    parse_options(options)?,
                )))
            }
            DetectorKind::EdgeLabel => {
                let edge: EdgeLabelOptions = parse_options(options)?;
                let (width, height) = edge.input.unwrap_or((224, 224));
                let model_path = self.resolve_custom(&edge.model_path);
                let labels_path = self.resolve_custom(&edge.labels_path);
                let model = VisionModel::load(&model_path, width, height)
                    .map_err(|e| sdk_error(kind, e))?;
                let labels = load_labels(&labels_path).map_err(|e| sdk_error(kind, e))?;
                let mut labeler_options = iris_detect::LabelerOptions::default();
                if let Some(threshold) = edge.confidence_threshold {
                    labeler_options.confidence_threshold = threshold;
                }
                Ok(AnyDetector::EdgeLabel(ImageLabeler::new(
                    model,
                    labels,
                    labeler_options,
                )))
            }
        }
    }

    fn resolve_custom(&self, path: &str) -> PathBuf {
        let path = PathBuf::from(path);
        if path.is_absolute() {
            path
        } else {
            self.config.model_dir.join(path)
        }
    }

    /// Register (if new) and activate a detector on a capture session.
    /// Idempotent per handle.  With no `texture_id` the sole open session
    /// is targeted; with none open the detector is registered only.
    pub fn start_detection(
        &mut self,
        texture_id: Option<i64>,
        handle: i64,
        kind: DetectorKind,
        options: &Value,
    ) -> Result<()> {
        let detector = self.ensure_detector(handle, kind, options)?;

        let target = match texture_id {
            Some(id) => {
                if !self.sessions.contains_key(&id) {
                    return Err(BridgeError::InvalidArgument(format!(
                        "unknown texture {id}"
                    )));
                }
                Some(id)
            }
            None => match self.sessions.len() {
                0 => None,
                1 => self.sessions.keys().next().copied(),
                _ => {
                    return Err(BridgeError::InvalidArgument(
                        "several cameras are open; pass textureId".to_string(),
                    ))
                }
            },
        };

        if let Some(id) = target {
            if let Some(entry) = self.sessions.get(&id) {
                entry
                    .session
                    .set_analyzer(Some((handle, Arc::new(LiveFrameAnalyzer::new(detector)))));
                debug!(texture_id = id, handle, "detector activated");
            }
        }
        Ok(())
    }

    /// Remove a detector; deactivates it on any session first.  Idempotent.
    pub fn close_detector(&mut self, handle: i64) -> Result<()> {
        for entry in self.sessions.values() {
            if entry.session.active_handle() == Some(handle) {
                entry.session.set_analyzer(None);
            }
        }
        self.registry.remove(handle);
        Ok(())
    }

    /// Run one detector over a still image.  Unseen handles are created
    /// and registered on first use.
    pub fn process_image(
        &mut self,
        handle: i64,
        kind: DetectorKind,
        options: &Value,
        descriptor: ImageDescriptor,
    ) -> Result<Value> {
        let detector = self.ensure_detector(handle, kind, options)?;
        let image = descriptor.into_vision_image()?;
        detector
            .process_image(&image)
            .map_err(|e| sdk_error(kind, e))
    }

    /// Renderer pull: latest frame for a texture, if a new one arrived.
    pub fn acquire_latest_frame(&self, texture_id: i64) -> Result<Option<VideoFrame>> {
        let entry = self.session(texture_id)?;
        Ok(entry.session.acquire_latest_frame())
    }

    /// Subscribe to a texture's asynchronous event stream.
    pub fn events(&self, texture_id: i64) -> Result<broadcast::Receiver<CameraEvent>> {
        Ok(self.session(texture_id)?.session.events())
    }

    /// Renderer port for a texture: direct frame pulls off the command
    /// path.
    pub fn texture_port(&self, texture_id: i64) -> Result<TexturePort> {
        Ok(self.session(texture_id)?.session.texture_port())
    }

    /// Current mirrored session state, with pending events folded in.
    pub fn camera_value(&mut self, texture_id: i64) -> Result<CameraValue> {
        let entry = self
            .sessions
            .get_mut(&texture_id)
            .ok_or_else(|| BridgeError::InvalidArgument(format!("unknown texture {texture_id}")))?;
        entry.refresh();
        Ok(entry.value.clone())
    }

    fn session(&self, texture_id: i64) -> Result<&SessionEntry> {
        self.sessions
            .get(&texture_id)
            .ok_or_else(|| BridgeError::InvalidArgument(format!("unknown texture {texture_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_value_serializes_compactly() {
        let value = CameraValue::default();
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            serde_json::json!({ "isInitialized": false })
        );

        let value = CameraValue {
            is_initialized: true,
            error_description: None,
            preview_size: Some((640, 480)),
        };
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            serde_json::json!({ "isInitialized": true, "previewSize": [640, 480] })
        );
    }

    #[test]
    fn unknown_descriptor_type_fails_to_parse() {
        let result: std::result::Result<ImageDescriptor, _> =
            serde_json::from_value(serde_json::json!({ "type": "url", "path": "x" }));
        assert!(result.is_err());
    }

    #[test]
    fn bytes_descriptor_with_no_planes_is_invalid() {
        let descriptor = ImageDescriptor::Bytes {
            bytes: vec![0u8; 16],
            metadata: ImageMetadata {
                width: 4,
                height: 4,
                raw_format: "GRAY".to_string(),
                plane_data: vec![],
            },
        };
        assert!(matches!(
            descriptor.into_vision_image(),
            Err(BridgeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn bytes_descriptor_with_unknown_format_is_invalid() {
        let descriptor = ImageDescriptor::Bytes {
            bytes: vec![0u8; 16],
            metadata: ImageMetadata {
                width: 4,
                height: 4,
                raw_format: "MJPG".to_string(),
                plane_data: vec![PlaneMetadata {
                    width: 4,
                    height: 4,
                    bytes_per_row: 4,
                }],
            },
        };
        assert!(matches!(
            descriptor.into_vision_image(),
            Err(BridgeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn gray_bytes_descriptor_round_trips() {
        let descriptor = ImageDescriptor::Bytes {
            bytes: vec![100u8; 16],
            metadata: ImageMetadata {
                width: 4,
                height: 4,
                raw_format: "GRAY".to_string(),
                plane_data: vec![PlaneMetadata {
                    width: 4,
                    height: 4,
                    bytes_per_row: 4,
                }],
            },
        };
        let image = descriptor.into_vision_image().unwrap();
        assert_eq!((image.width, image.height), (4, 4));
        assert!(image.rgb.iter().all(|px| *px == 100));
    }

    #[test]
    fn process_image_with_barcode_detector_needs_no_models() {
        let mut bridge = VisionBridge::new(BridgeConfig::default());
        let descriptor = ImageDescriptor::Bytes {
            bytes: vec![255u8; 64 * 64],
            metadata: ImageMetadata {
                width: 64,
                height: 64,
                raw_format: "GRAY".to_string(),
                plane_data: vec![PlaneMetadata {
                    width: 64,
                    height: 64,
                    bytes_per_row: 64,
                }],
            },
        };
        let result = bridge
            .process_image(7, DetectorKind::Barcode, &Value::Null, descriptor)
            .unwrap();
        assert_eq!(result, serde_json::json!([]));
    }

    #[test]
    fn handle_kind_mismatch_is_invalid() {
        let mut bridge = VisionBridge::new(BridgeConfig::default());
        bridge
            .start_detection(None, 3, DetectorKind::Barcode, &Value::Null)
            .unwrap();
        let result = bridge.start_detection(None, 3, DetectorKind::Face, &Value::Null);
        assert!(matches!(result, Err(BridgeError::InvalidArgument(_))));
    }

    #[test]
    fn start_detection_without_camera_registers_only() {
        let mut bridge = VisionBridge::new(BridgeConfig::default());
        bridge
            .start_detection(None, 1, DetectorKind::Barcode, &Value::Null)
            .unwrap();
        // idempotent per handle
        bridge
            .start_detection(None, 1, DetectorKind::Barcode, &Value::Null)
            .unwrap();
        bridge.close_detector(1).unwrap();
        bridge.close_detector(1).unwrap();
    }

    #[test]
    fn dispose_is_idempotent() {
        let mut bridge = VisionBridge::new(BridgeConfig::default());
        bridge.dispose(42).unwrap();
        bridge.dispose(42).unwrap();
    }
}
