//! Adapts a registered detector to the capture session's frame tap.

use iris_camera::{FrameAnalyzer, VideoFrame};
use iris_detect::{AnyDetector, Detector};
use iris_preprocess::{PixelBuffer, VisionImage};
use std::sync::Arc;

/// Runs one detector against live camera frames.  Invoked on the
/// session's detection worker thread, never on the delivery thread.
pub(crate) struct LiveFrameAnalyzer {
    detector: Arc<AnyDetector>,
}

impl LiveFrameAnalyzer {
    pub(crate) fn new(detector: Arc<AnyDetector>) -> Self {
        Self { detector }
    }
}

impl FrameAnalyzer for LiveFrameAnalyzer {
    fn analyze(&self, frame: &VideoFrame) -> anyhow::Result<serde_json::Value> {
        let buffer = PixelBuffer::from_video_frame(frame)?;
        let image = VisionImage::from_pixel_buffer(&buffer)?;
        Ok(self.detector.process_image(&image)?)
    }
}
