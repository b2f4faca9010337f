use iris_camera::{FrameData, PixelFormat, VideoFrame};
use iris_preprocess::{PixelBuffer, VisionImage};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn nv12_frame_to_tensor() {
    // Fake white NV12 640×480
    let w = 640u32;
    let h = 480u32;
    let mut bytes = vec![128u8; (w * h * 3 / 2) as usize];
    bytes[..(w * h) as usize].fill(255);

    let frame = VideoFrame {
        data: FrameData::Copied(Arc::from(bytes.as_slice())),
        width: w,
        height: h,
        stride: w,
        format: PixelFormat::Nv12,
        pts: Duration::ZERO,
    };

    let buffer = PixelBuffer::from_video_frame(&frame).expect("planes");
    let image = VisionImage::from_pixel_buffer(&buffer).expect("convert");
    assert_eq!((image.width, image.height), (w, h));

    let tensor = image.to_tensor(224, 224).expect("tensor");
    assert_eq!(tensor.shape(), &[224, 224, 3]);
    assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
}
