use iris_detect::{Detector, FaceDetector, FaceDetectorOptions, VisionModel};
use iris_preprocess::VisionImage;
use std::path::Path;

#[test]
#[ignore = "requires a face detection model on disk"]
fn face_smoke() -> anyhow::Result<()> {
    let model_path =
        std::env::var("FACE_MODEL").unwrap_or_else(|_| "models/face_detection.onnx".to_string());
    let model = VisionModel::load(Path::new(&model_path), 320, 320)?;
    let detector = FaceDetector::new(model, FaceDetectorOptions::default());

    // Blank 320×320 image → no faces
    let image = VisionImage::from_rgb8(vec![0u8; 320 * 320 * 3], 320, 320)?;
    let out = detector.process_image(&image)?;
    assert_eq!(out, serde_json::json!([]));
    Ok(())
}
