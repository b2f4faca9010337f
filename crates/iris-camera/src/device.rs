//! Device discovery and resolution policy.

use crate::{CameraError, Result};
use gst::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Which way the lens faces, as reported by the camera stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LensDirection {
    Front,
    Back,
    External,
}

/// Identity and mounting of one camera device.
///
/// Equality is by `(name, lens_direction)`; sensor orientation is
/// advisory metadata used to fix up the capture graph.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDescription {
    pub name: String,
    pub lens_direction: LensDirection,
    /// Sensor mounting rotation in degrees, one of 0/90/180/270.
    pub sensor_orientation: u32,
}

impl PartialEq for CameraDescription {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.lens_direction == other.lens_direction
    }
}

impl Eq for CameraDescription {}

/// Requested capture quality, ordered coarsest to finest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionPreset {
    Low,
    Medium,
    High,
}

impl ResolutionPreset {
    /// Candidate native resolutions for this preset, best first.
    ///
    /// Each preset cascades into the candidates of the presets below it,
    /// so a device that cannot satisfy the preset's own sizes still
    /// configures at the best size it does support.  The order is a
    /// contract; tests pin it.
    pub fn candidates(self) -> &'static [(u32, u32)] {
        match self {
            ResolutionPreset::High => &[
                (1920, 1080),
                (1280, 720),
                (1024, 768),
                (720, 480),
                (640, 480),
                (352, 288),
                (320, 240),
            ],
            ResolutionPreset::Medium => &[
                (1280, 720),
                (720, 480),
                (640, 480),
                (352, 288),
                (320, 240),
            ],
            ResolutionPreset::Low => &[(640, 480), (352, 288), (320, 240)],
        }
    }
}

/// Pick the first candidate of `preset` the device supports.
///
/// An empty `supported` list means the device did not pin fixed sizes in
/// its caps; the graph then negotiates through `videoscale` and the
/// preset's best candidate is used as-is.
pub fn select_resolution(preset: ResolutionPreset, supported: &[(u32, u32)]) -> Result<(u32, u32)> {
    if supported.is_empty() {
        return Ok(preset.candidates()[0]);
    }
    preset
        .candidates()
        .iter()
        .copied()
        .find(|candidate| supported.contains(candidate))
        .ok_or(CameraError::NoSupportedResolution { preset })
}

/// Normalise a reported rotation to one of 0/90/180/270 degrees.
fn normalize_orientation(degrees: i32) -> u32 {
    match degrees.rem_euclid(360) {
        90 => 90,
        180 => 180,
        270 => 270,
        _ => 0,
    }
}

/// `videoflip` method covering the sensor rotation fix plus the
/// horizontal mirror applied to user-facing cameras.  The diagonal
/// methods are transposes, i.e. a 90° rotation combined with a flip.
pub(crate) fn flip_method(orientation: u32, mirror: bool) -> Option<&'static str> {
    match (orientation, mirror) {
        (0, false) => None,
        (90, false) => Some("clockwise"),
        (180, false) => Some("rotate-180"),
        (270, false) => Some("counterclockwise"),
        (0, true) => Some("horizontal-flip"),
        (90, true) => Some("upper-right-diagonal"),
        (180, true) => Some("vertical-flip"),
        (270, true) => Some("upper-left-diagonal"),
        _ => None,
    }
}

fn describe_device(device: &gst::Device) -> CameraDescription {
    let props = device.properties();

    let location = props
        .as_ref()
        .and_then(|s| s.get::<String>("api.libcamera.location").ok());
    let lens_direction = match location.as_deref() {
        Some("front") => LensDirection::Front,
        Some("back") => LensDirection::Back,
        _ => LensDirection::External,
    };

    let rotation = props
        .as_ref()
        .and_then(|s| s.get::<i32>("api.libcamera.rotation").ok())
        .unwrap_or(0);

    CameraDescription {
        name: device.display_name().to_string(),
        lens_direction,
        sensor_orientation: normalize_orientation(rotation),
    }
}

/// Enumerate video sources, in discovery order.
pub fn enumerate_cameras() -> Result<Vec<CameraDescription>> {
    gst::init().map_err(CameraError::Init)?;

    let monitor = gst::DeviceMonitor::new();
    monitor.add_filter(Some("Video/Source"), None);
    monitor.start().map_err(CameraError::Monitor)?;

    let descriptions: Vec<CameraDescription> = monitor
        .devices()
        .iter()
        .map(describe_device)
        .collect();
    monitor.stop();

    debug!(count = descriptions.len(), "enumerated cameras");
    Ok(descriptions)
}

/// Resolve a device by name for session configuration.
pub(crate) fn find_device(name: &str) -> Result<gst::Device> {
    gst::init().map_err(CameraError::Init)?;

    let monitor = gst::DeviceMonitor::new();
    monitor.add_filter(Some("Video/Source"), None);
    monitor.start().map_err(CameraError::Monitor)?;

    let device = monitor
        .devices()
        .iter()
        .find(|device| device.display_name() == name)
        .cloned();
    monitor.stop();

    device.ok_or_else(|| CameraError::DeviceNotFound(name.to_string()))
}

/// Fixed frame sizes advertised in the device caps.  Caps entries with
/// ranged width/height are skipped; they negotiate through `videoscale`.
pub(crate) fn supported_resolutions(device: &gst::Device) -> Vec<(u32, u32)> {
    let Some(caps) = device.caps() else {
        warn!(device = %device.display_name(), "device advertises no caps");
        return Vec::new();
    };

    let mut sizes = Vec::new();
    for structure in caps.iter() {
        let (Ok(width), Ok(height)) = (
            structure.get::<i32>("width"),
            structure.get::<i32>("height"),
        ) else {
            continue;
        };
        if width > 0 && height > 0 {
            let size = (width as u32, height as u32);
            if !sizes.contains(&size) {
                sizes.push(size);
            }
        }
    }
    sizes
}
