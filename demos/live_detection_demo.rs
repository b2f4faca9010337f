//! Live detection demo
//!
//! Drives the full bridge surface end to end:
//! 1. Enumerate cameras through the command dispatcher
//! 2. Initialize the first one at the low preset
//! 3. Activate a barcode detector on the live stream
//! 4. Pull preview frames from the renderer port while printing events
//! 5. Dispose and close everything
//!
//! Usage: cargo run --bin live_detection_demo

use anyhow::{anyhow, Context, Result};
use iris_bridge::{BridgeConfig, DispatchOutcome, Dispatcher, VisionBridge};
use serde_json::json;
use std::time::Duration;

const PREVIEW_FRAMES: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let dispatcher = Dispatcher::spawn(VisionBridge::new(BridgeConfig::default()));

    // 1. Which cameras do we have?
    let cameras = expect_success(dispatcher.invoke("availableCameras", json!({})).await)?;
    let camera_name = cameras
        .as_array()
        .and_then(|list| list.first())
        .and_then(|camera| camera["name"].as_str())
        .ok_or_else(|| anyhow!("no cameras attached"))?
        .to_string();
    println!("📷 Using camera {camera_name}");

    // 2. Open it
    let init = expect_success(
        dispatcher
            .invoke(
                "initialize",
                json!({ "cameraName": camera_name, "resolutionPreset": "low" }),
            )
            .await,
    )?;
    let texture_id = init["textureId"]
        .as_i64()
        .ok_or_else(|| anyhow!("initialize returned no texture id"))?;
    println!(
        "✅ Preview {}x{} on texture {texture_id}",
        init["previewWidth"], init["previewHeight"]
    );

    // 3. Watch for barcodes on the live stream
    expect_success(
        dispatcher
            .invoke(
                "startDetection",
                json!({ "textureId": texture_id, "handle": 1, "kind": "barcode" }),
            )
            .await,
    )?;

    let port = dispatcher
        .texture_port(texture_id)
        .await
        .context("renderer port")?;
    let mut events = port.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("📨 {}", serde_json::to_string(&event).unwrap_or_default());
        }
    });

    // 4. Consume the preview like a rendering surface would
    let mut frames = port.frames();
    let mut pulled = 0u64;
    while pulled < PREVIEW_FRAMES {
        if tokio::time::timeout(Duration::from_secs(5), frames.changed())
            .await
            .is_err()
        {
            return Err(anyhow!("camera stopped delivering frames"));
        }
        if let Some(frame) = port.acquire_latest_frame() {
            pulled += 1;
            if pulled % 10 == 0 {
                println!(
                    "🎞  frame {pulled}: {}x{} ({} bytes)",
                    frame.width,
                    frame.height,
                    frame.data.len()
                );
            }
        }
    }

    // 5. Tear down
    expect_success(
        dispatcher
            .invoke("closeDetector", json!({ "handle": 1 }))
            .await,
    )?;
    expect_success(
        dispatcher
            .invoke("dispose", json!({ "textureId": texture_id }))
            .await,
    )?;
    println!("👋 Done");
    Ok(())
}

fn expect_success(outcome: DispatchOutcome) -> Result<serde_json::Value> {
    match outcome {
        DispatchOutcome::Success { result } => Ok(result),
        DispatchOutcome::Error { code, message } => Err(anyhow!("{code}: {message}")),
        DispatchOutcome::NotImplemented => Err(anyhow!("method not implemented")),
    }
}
