//! Barcode variant, backed by the rqrr decoding SDK.

use crate::{BoundingBox, Detector, Result};
use iris_preprocess::VisionImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Format filter, mirroring the request options of the wrapped SDK.
/// rqrr decodes QR codes; asking only for other symbologies yields an
/// empty result rather than an error.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BarcodeScanOptions {
    pub formats: Vec<String>,
}

impl Default for BarcodeScanOptions {
    fn default() -> Self {
        Self {
            formats: vec!["all".to_string()],
        }
    }
}

impl BarcodeScanOptions {
    fn wants_qr(&self) -> bool {
        self.formats
            .iter()
            .any(|format| format == "all" || format == "qrCode")
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Barcode {
    pub raw_value: String,
    pub format: &'static str,
    pub bounding_box: BoundingBox,
    /// The four grid corners, clockwise from top-left.
    pub corners: Vec<[f32; 2]>,
}

pub struct BarcodeScanner {
    options: BarcodeScanOptions,
}

impl BarcodeScanner {
    pub fn new(options: BarcodeScanOptions) -> Self {
        Self { options }
    }
}

impl Detector for BarcodeScanner {
    fn process_image(&self, image: &VisionImage) -> Result<serde_json::Value> {
        if !self.options.wants_qr() {
            return Ok(serde_json::json!([]));
        }

        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            image.width as usize,
            image.height as usize,
            |x, y| image.luma_at(x as u32, y as u32),
        );

        let mut barcodes = Vec::new();
        for grid in prepared.detect_grids() {
            let corners: Vec<[f32; 2]> = grid
                .bounds
                .iter()
                .map(|point| [point.x as f32, point.y as f32])
                .collect();
            match grid.decode() {
                Ok((_meta, content)) => barcodes.push(Barcode {
                    raw_value: content,
                    format: "qrCode",
                    bounding_box: corners_to_box(&corners),
                    corners,
                }),
                // an undecodable grid is noise, not a failed call
                Err(error) => debug!(%error, "skipping undecodable grid"),
            }
        }

        Ok(serde_json::to_value(barcodes)?)
    }
}

fn corners_to_box(corners: &[[f32; 2]]) -> BoundingBox {
    let mut min = [f32::MAX, f32::MAX];
    let mut max = [f32::MIN, f32::MIN];
    for corner in corners {
        min[0] = min[0].min(corner[0]);
        min[1] = min[1].min(corner[1]);
        max[0] = max[0].max(corner[0]);
        max[1] = max[1].max(corner[1]);
    }
    BoundingBox {
        left: min[0],
        top: min[1],
        width: max[0] - min[0],
        height: max[1] - min[1],
    }
}
