//! Method-name routing onto a dedicated worker thread.
//!
//! Every command executes off the caller's thread; results come back
//! asynchronously through a oneshot.  The vision SDK may block the
//! worker for the duration of one call, but never the capture-delivery
//! thread, which lives in `iris-camera`.

use crate::{BridgeError, ImageDescriptor, VisionBridge};
use iris_camera::{ResolutionPreset, TexturePort};
use iris_detect::DetectorKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::mpsc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Terminal outcome of one dispatched command.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum DispatchOutcome {
    Success { result: Value },
    #[serde(rename_all = "camelCase")]
    Error { code: String, message: String },
    /// The method name is not part of this plugin's surface.
    NotImplemented,
}

impl DispatchOutcome {
    fn from_result(result: crate::Result<Value>) -> Self {
        match result {
            Ok(result) => DispatchOutcome::Success { result },
            Err(BridgeError::Configuration(message)) => DispatchOutcome::Error {
                code: "configurationError".to_string(),
                message,
            },
            Err(BridgeError::InvalidArgument(message)) => DispatchOutcome::Error {
                code: "invalidArgument".to_string(),
                message,
            },
            Err(BridgeError::Sdk { code, message }) => DispatchOutcome::Error { code, message },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeArgs {
    camera_name: String,
    resolution_preset: ResolutionPreset,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextureArgs {
    texture_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartDetectionArgs {
    #[serde(default)]
    texture_id: Option<i64>,
    handle: i64,
    kind: DetectorKind,
    #[serde(default)]
    options: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessImageArgs {
    handle: i64,
    kind: DetectorKind,
    #[serde(default)]
    options: Value,
    image: ImageDescriptor,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseDetectorArgs {
    handle: i64,
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: Value) -> crate::Result<T> {
    serde_json::from_value(arguments)
        .map_err(|e| BridgeError::InvalidArgument(format!("bad arguments: {e}")))
}

/// `"FaceDetector#processImage"`-style names address one detector kind
/// directly; they normalize onto the bare methods with the kind injected
/// into the arguments.
fn detector_method(method: &str) -> Option<(DetectorKind, &'static str)> {
    let (prefix, op) = method.split_once('#')?;
    let kind = match prefix {
        "BarcodeDetector" => DetectorKind::Barcode,
        "FaceDetector" => DetectorKind::Face,
        "TextRecognizer" => DetectorKind::Text,
        "ImageLabeler" => DetectorKind::Label,
        "EdgeImageLabeler" => DetectorKind::EdgeLabel,
        _ => return None,
    };
    let op = match op {
        "startDetection" => "startDetection",
        "processImage" => "processImage",
        "close" => "closeDetector",
        _ => return None,
    };
    Some((kind, op))
}

fn normalize(method: &str, arguments: Value) -> (String, Value) {
    match detector_method(method) {
        Some((kind, op)) => {
            let mut arguments = arguments;
            if let (Value::Object(map), Ok(kind)) =
                (&mut arguments, serde_json::to_value(kind))
            {
                map.insert("kind".to_string(), kind);
            }
            (op.to_string(), arguments)
        }
        None => (method.to_string(), arguments),
    }
}

fn route(bridge: &mut VisionBridge, method: &str, arguments: Value) -> DispatchOutcome {
    let (method, arguments) = normalize(method, arguments);
    let result = match method.as_str() {
        "availableCameras" => bridge.available_cameras().and_then(|cameras| {
            serde_json::to_value(cameras)
                .map_err(|e| BridgeError::InvalidArgument(e.to_string()))
        }),
        "initialize" => parse_args::<InitializeArgs>(arguments).and_then(|args| {
            bridge
                .initialize(&args.camera_name, args.resolution_preset)
                .and_then(|init| {
                    serde_json::to_value(init)
                        .map_err(|e| BridgeError::InvalidArgument(e.to_string()))
                })
        }),
        "dispose" => parse_args::<TextureArgs>(arguments)
            .and_then(|args| bridge.dispose(args.texture_id).map(|_| Value::Null)),
        "startDetection" => parse_args::<StartDetectionArgs>(arguments).and_then(|args| {
            bridge
                .start_detection(args.texture_id, args.handle, args.kind, &args.options)
                .map(|_| Value::Null)
        }),
        "processImage" => parse_args::<ProcessImageArgs>(arguments).and_then(|args| {
            bridge.process_image(args.handle, args.kind, &args.options, args.image)
        }),
        "closeDetector" => parse_args::<CloseDetectorArgs>(arguments)
            .and_then(|args| bridge.close_detector(args.handle).map(|_| Value::Null)),
        other => {
            debug!(method = other, "method not implemented");
            return DispatchOutcome::NotImplemented;
        }
    };
    DispatchOutcome::from_result(result)
}

enum Envelope {
    Invoke {
        method: String,
        arguments: Value,
        reply: oneshot::Sender<DispatchOutcome>,
    },
    /// Hands out the renderer port; subsequent frame pulls bypass the
    /// command queue entirely.
    TexturePort {
        texture_id: i64,
        reply: oneshot::Sender<crate::Result<TexturePort>>,
    },
}

/// Owns the bridge on a dedicated worker thread and feeds it commands
/// in arrival order.
pub struct Dispatcher {
    commands: mpsc::Sender<Envelope>,
}

impl Dispatcher {
    pub fn spawn(bridge: VisionBridge) -> Self {
        let (commands, queue) = mpsc::channel::<Envelope>();
        std::thread::spawn(move || {
            let mut bridge = bridge;
            while let Ok(envelope) = queue.recv() {
                match envelope {
                    Envelope::Invoke {
                        method,
                        arguments,
                        reply,
                    } => {
                        let outcome = route(&mut bridge, &method, arguments);
                        if reply.send(outcome).is_err() {
                            warn!(method = %method, "caller went away before the reply");
                        }
                    }
                    Envelope::TexturePort { texture_id, reply } => {
                        let _ = reply.send(bridge.texture_port(texture_id));
                    }
                }
            }
            debug!("dispatcher worker exited");
        });
        Self { commands }
    }

    /// Dispatch one named command; resolves when the worker replies.
    pub async fn invoke(&self, method: &str, arguments: Value) -> DispatchOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(Envelope::Invoke {
                method: method.to_string(),
                arguments,
                reply: reply_tx,
            })
            .is_err()
        {
            return DispatchOutcome::Error {
                code: "dispatcherDown".to_string(),
                message: "command worker is gone".to_string(),
            };
        }
        reply_rx.await.unwrap_or(DispatchOutcome::Error {
            code: "dispatcherDown".to_string(),
            message: "command worker dropped the reply".to_string(),
        })
    }

    /// Fetch the renderer port for an initialized texture.
    pub async fn texture_port(&self, texture_id: i64) -> crate::Result<TexturePort> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(Envelope::TexturePort {
                texture_id,
                reply: reply_tx,
            })
            .is_err()
        {
            return Err(BridgeError::Configuration(
                "command worker is gone".to_string(),
            ));
        }
        reply_rx.await.unwrap_or_else(|_| {
            Err(BridgeError::Configuration(
                "command worker dropped the reply".to_string(),
            ))
        })
    }
}
