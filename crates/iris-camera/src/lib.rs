// iris-camera/src/lib.rs
// ============================================================
// Camera capture layer for the iris vision bridge.
// Owns device enumeration, the capture session state machine
// and the single-slot latest-frame store the renderer pulls
// from.  Frames are NV12, delivered on GStreamer's streaming
// thread and handed off atomically to the renderer and to the
// active detector.
// ------------------------------------------------------------
// Public API:
//   * enumerate_cameras()        – ordered device descriptions
//   * CaptureSession::open()     – configure a capture graph
//   * CaptureSession::start()    – begin frame delivery
//   * CaptureSession::acquire_latest_frame() – renderer pull
// ============================================================

//! iris – camera capture layer
//!
//! This crate wraps a GStreamer capture graph (camera source →
//! `videoflip` → `videoconvert`/`videoscale` → NV12 `appsink`) behind a
//! small session object.  Each delivered frame is published into a
//! [`FrameStore`] holding exactly one pending frame, and handed to the
//! active [`FrameAnalyzer`] on a best-effort basis: a frame that arrives
//! while a detection is still in flight is silently skipped for
//! detection, never queued.

use thiserror::Error;

mod device;
mod frame;
mod session;
mod store;

pub use device::{
    enumerate_cameras, select_resolution, CameraDescription, LensDirection, ResolutionPreset,
};
pub use frame::{FrameData, PixelFormat, VideoFrame};
pub use session::{CameraEvent, CaptureSession, FrameAnalyzer, SessionState, TexturePort};
pub use store::FrameStore;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("GStreamer init failed: {0}")]
    Init(#[source] gst::glib::Error),
    #[error("device monitor failed to start: {0}")]
    Monitor(#[source] gst::glib::BoolError),
    #[error("no camera named {0}")]
    DeviceNotFound(String),
    #[error("failed to create {name} element: {source}")]
    ElementCreate {
        name: &'static str,
        #[source]
        source: gst::glib::BoolError,
    },
    #[error("failed to wire capture graph: {0}")]
    Link(#[source] gst::glib::BoolError),
    #[error("failed to change pipeline state: {0}")]
    StateChange(#[source] gst::StateChangeError),
    #[error("no supported resolution for preset {preset:?}")]
    NoSupportedResolution { preset: ResolutionPreset },
    #[error("AppSink element downcast failed")]
    AppSinkDowncastFailed,
    #[error("capture session is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, CameraError>;
