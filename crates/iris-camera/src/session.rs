//! Capture session: owns the camera graph and fans each delivered frame
//! out to the renderer slot and the active detector.

use crate::device::{self, CameraDescription, LensDirection, ResolutionPreset};
use crate::frame::{FrameData, PixelFormat, VideoFrame};
use crate::store::FrameStore;
use crate::{CameraError, Result};
use gst::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};

/// Receives the frames the session elects for detection.
///
/// Implementations run on the session's detection worker thread, never on
/// the frame-delivery thread, and may block for the duration of one SDK
/// call.  The returned value is forwarded on the session's event stream.
pub trait FrameAnalyzer: Send + Sync {
    fn analyze(&self, frame: &VideoFrame) -> anyhow::Result<serde_json::Value>;
}

/// Asynchronous session events pushed to the controlling side.
///
/// `CameraClosing` means "camera offline, detection stopped" and asks for
/// re-initialization; it is not a fatal bridge error.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "eventType", rename_all = "camelCase")]
pub enum CameraEvent {
    #[serde(rename_all = "camelCase")]
    Error { error_description: String },
    CameraClosing,
    #[serde(rename_all = "camelCase")]
    Detection {
        handle: i64,
        result: serde_json::Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Before the capture graph exists.  [`CaptureSession::open`] runs
    /// the whole Created → Configured leg in one call.
    Created,
    Configured,
    Running,
    Stopped,
    Closed,
}

/// Re-entrancy guard for detection: at most one invocation per session.
///
/// `try_begin` wins the flag or reports the session busy; `finish` must
/// follow every won `try_begin` once the detector returns.
struct DetectionGate(AtomicBool);

impl DetectionGate {
    fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    fn try_begin(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self) {
        self.0.store(false, Ordering::Release);
    }
}

type ActiveAnalyzer = Option<(i64, Arc<dyn FrameAnalyzer>)>;

struct DetectJob {
    handle: i64,
    analyzer: Arc<dyn FrameAnalyzer>,
    frame: VideoFrame,
}

/// Per-frame fan-out, shared between the appsink callback and tests.
struct FrameFanout {
    store: Arc<FrameStore>,
    gate: Arc<DetectionGate>,
    active: Arc<Mutex<ActiveAnalyzer>>,
    detect_tx: mpsc::SyncSender<DetectJob>,
    counter: AtomicU64,
    frame_seq: Arc<watch::Sender<u64>>,
}

impl FrameFanout {
    fn deliver(&self, frame: VideoFrame) {
        // best-effort detection first, so it sees the freshest frame
        if self.gate.try_begin() {
            let active = match self.active.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            };
            match active {
                Some((handle, analyzer)) => {
                    let job = DetectJob {
                        handle,
                        analyzer,
                        frame: frame.clone(),
                    };
                    if self.detect_tx.try_send(job).is_err() {
                        self.gate.finish();
                    }
                }
                None => self.gate.finish(),
            }
        } else {
            trace!("detector busy, frame skipped for detection");
        }

        self.store.publish(frame);
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.frame_seq.send_replace(seq);
    }
}

fn spawn_detection_worker(
    detect_rx: mpsc::Receiver<DetectJob>,
    events: broadcast::Sender<CameraEvent>,
    shutdown: Arc<AtomicBool>,
    gate: Arc<DetectionGate>,
) {
    std::thread::spawn(move || {
        while let Ok(job) = detect_rx.recv() {
            let outcome = job.analyzer.analyze(&job.frame);
            // a completion that lands after close() must not write state
            if !shutdown.load(Ordering::Acquire) {
                let event = match outcome {
                    Ok(result) => CameraEvent::Detection {
                        handle: job.handle,
                        result,
                    },
                    Err(error) => CameraEvent::Error {
                        error_description: error.to_string(),
                    },
                };
                let _ = events.send(event);
            }
            gate.finish();
        }
        debug!("detection worker exited");
    });
}

fn make_element(name: &'static str) -> Result<gst::Element> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|source| CameraError::ElementCreate { name, source })
}

/// Decode one appsink sample into a [`VideoFrame`].
///
/// Any sample that cannot be fully read yet surfaces as an error string;
/// the caller reports it on the event stream and drops the sample.
fn read_frame(sample: gst::Sample) -> std::result::Result<VideoFrame, String> {
    let caps = sample.caps().ok_or("sample has no caps")?;
    let structure = caps.structure(0).ok_or("caps missing structure")?;
    let width = structure
        .get::<i32>("width")
        .map_err(|e| e.to_string())? as u32;
    let height = structure
        .get::<i32>("height")
        .map_err(|e| e.to_string())? as u32;

    let buffer = sample.buffer_owned().ok_or("sample has no buffer")?;
    if buffer.flags().contains(gst::BufferFlags::CORRUPTED) {
        return Err("camera sample is not ready to be read".into());
    }

    let pts = buffer
        .pts()
        .map(|t| Duration::from_nanos(t.nseconds()))
        .unwrap_or(Duration::ZERO);

    let mapped = buffer
        .into_mapped_buffer_readable()
        .map_err(|_| "failed to map camera sample")?;

    Ok(VideoFrame {
        data: FrameData::from_mapped_buffer(mapped),
        width,
        height,
        stride: width,
        format: PixelFormat::Nv12,
        pts,
    })
}

/// Renderer-facing view of a session: direct pull access to the frame
/// store plus the event stream, detached from command dispatch so a
/// blocked SDK call never stalls rendering.
#[derive(Clone)]
pub struct TexturePort {
    store: Arc<FrameStore>,
    events: broadcast::Sender<CameraEvent>,
    frame_seq: Arc<watch::Sender<u64>>,
}

impl TexturePort {
    /// Take the latest frame if a new one arrived since the last pull.
    pub fn acquire_latest_frame(&self) -> Option<VideoFrame> {
        self.store.consume()
    }

    pub fn events(&self) -> broadcast::Receiver<CameraEvent> {
        self.events.subscribe()
    }

    /// Frame-sequence watch; bumps once per published frame.
    pub fn frames(&self) -> watch::Receiver<u64> {
        self.frame_seq.subscribe()
    }
}

/// One camera, one capture graph.
///
/// Lifecycle: `open` (Created → Configured), `start` (→ Running), `stop`
/// (→ Stopped, idempotent), `close` (→ Closed, idempotent).  Frames are
/// delivered on the GStreamer streaming thread; the renderer pulls the
/// latest frame with [`CaptureSession::acquire_latest_frame`].
pub struct CaptureSession {
    pipeline: gst::Pipeline,
    description: CameraDescription,
    preview_size: (u32, u32),
    state: SessionState,
    store: Arc<FrameStore>,
    shutdown: Arc<AtomicBool>,
    active: Arc<Mutex<ActiveAnalyzer>>,
    events: broadcast::Sender<CameraEvent>,
    frame_seq: Arc<watch::Sender<u64>>,
}

impl CaptureSession {
    /// Resolve the device and build the capture graph.
    ///
    /// Failure to open the device or to satisfy the resolution preset is
    /// fatal and is not retried.
    pub fn open(description: &CameraDescription, preset: ResolutionPreset) -> Result<Self> {
        gst::init().map_err(CameraError::Init)?;

        let device = device::find_device(&description.name)?;
        let supported = device::supported_resolutions(&device);
        let (width, height) = device::select_resolution(preset, &supported)?;
        info!(
            camera = %description.name,
            width, height, "configuring capture session"
        );

        let source = device
            .create_element(None)
            .map_err(|source| CameraError::ElementCreate {
                name: "source",
                source,
            })?;
        let convert = make_element("videoconvert")?;
        let scale = make_element("videoscale")?;
        let caps = gst::Caps::builder("video/x-raw")
            .field("format", "NV12")
            .field("width", width as i32)
            .field("height", height as i32)
            .build();
        let capsfilter = make_element("capsfilter")?;
        capsfilter.set_property("caps", &caps);

        let sink = make_element("appsink")?;
        let appsink = sink
            .downcast::<gst_app::AppSink>()
            .map_err(|_| CameraError::AppSinkDowncastFailed)?;
        appsink.set_property("sync", false);
        appsink.set_property("max-buffers", 2u32);
        appsink.set_property("drop", true);
        appsink.set_property("enable-last-sample", false);

        let pipeline = gst::Pipeline::new();
        let mirror = description.lens_direction == LensDirection::Front;
        let elements: Vec<gst::Element> =
            match device::flip_method(description.sensor_orientation, mirror) {
                Some(method) => {
                    let flip = make_element("videoflip")?;
                    flip.set_property_from_str("method", method);
                    vec![
                        source,
                        flip,
                        convert,
                        scale,
                        capsfilter,
                        appsink.clone().upcast(),
                    ]
                }
                None => vec![
                    source,
                    convert,
                    scale,
                    capsfilter,
                    appsink.clone().upcast(),
                ],
            };
        pipeline.add_many(&elements).map_err(CameraError::Link)?;
        gst::Element::link_many(&elements).map_err(CameraError::Link)?;

        let store = Arc::new(FrameStore::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let gate = Arc::new(DetectionGate::new());
        let active: Arc<Mutex<ActiveAnalyzer>> = Arc::new(Mutex::new(None));
        let (events, _) = broadcast::channel(32);
        let (frame_seq, _) = watch::channel(0u64);
        let frame_seq = Arc::new(frame_seq);

        let (detect_tx, detect_rx) = mpsc::sync_channel::<DetectJob>(1);
        spawn_detection_worker(
            detect_rx,
            events.clone(),
            Arc::clone(&shutdown),
            Arc::clone(&gate),
        );

        let fanout = FrameFanout {
            store: Arc::clone(&store),
            gate,
            active: Arc::clone(&active),
            detect_tx,
            counter: AtomicU64::new(0),
            frame_seq: Arc::clone(&frame_seq),
        };
        let callback_events = events.clone();
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    match read_frame(sample) {
                        Ok(frame) => fanout.deliver(frame),
                        Err(description) => {
                            warn!(%description, "dropping unreadable sample");
                            let _ = callback_events.send(CameraEvent::Error {
                                error_description: description,
                            });
                        }
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        if let Some(bus) = pipeline.bus() {
            spawn_bus_watch(bus, events.clone(), Arc::clone(&shutdown));
        }

        Ok(Self {
            pipeline,
            description: description.clone(),
            preview_size: (width, height),
            state: SessionState::Configured,
            store,
            shutdown,
            active,
            events,
            frame_seq,
        })
    }

    /// Start frame delivery.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            SessionState::Running => Ok(()),
            SessionState::Closed => Err(CameraError::Closed),
            _ => {
                self.pipeline
                    .set_state(gst::State::Playing)
                    .map_err(CameraError::StateChange)?;
                self.state = SessionState::Running;
                debug!(camera = %self.description.name, "capture running");
                Ok(())
            }
        }
    }

    /// Stop the capture graph.  Idempotent; the session can be restarted.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            SessionState::Running => {
                self.pipeline
                    .set_state(gst::State::Null)
                    .map_err(CameraError::StateChange)?;
                self.state = SessionState::Stopped;
                debug!(camera = %self.description.name, "capture stopped");
                Ok(())
            }
            SessionState::Closed => Err(CameraError::Closed),
            _ => Ok(()),
        }
    }

    /// Tear the session down: stop the graph first, then release the held
    /// frame and the active detector.  Safe to call with a frame delivery
    /// or detection in flight, and safe to call more than once.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.shutdown.store(true, Ordering::Release);
        if let Err(error) = self.pipeline.set_state(gst::State::Null) {
            warn!(%error, "pipeline refused to stop during close");
        }
        self.store.clear();
        self.set_analyzer(None);
        self.state = SessionState::Closed;
        let _ = self.events.send(CameraEvent::CameraClosing);
        info!(camera = %self.description.name, "capture session closed");
    }

    /// Renderer pull: take the latest frame if one is pending.
    pub fn acquire_latest_frame(&self) -> Option<VideoFrame> {
        self.store.consume()
    }

    /// Install (or clear) the detector receiving live frames.
    pub fn set_analyzer(&self, analyzer: Option<(i64, Arc<dyn FrameAnalyzer>)>) {
        let mut slot = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = analyzer;
    }

    /// Handle of the currently active detector, if any.
    pub fn active_handle(&self) -> Option<i64> {
        let slot = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.as_ref().map(|(handle, _)| *handle)
    }

    /// Subscribe to session events.
    pub fn events(&self) -> broadcast::Receiver<CameraEvent> {
        self.events.subscribe()
    }

    /// Frame-sequence watch; bumps once per published frame.
    pub fn frames(&self) -> watch::Receiver<u64> {
        self.frame_seq.subscribe()
    }

    /// Detachable renderer port over this session's frame store.
    pub fn texture_port(&self) -> TexturePort {
        TexturePort {
            store: Arc::clone(&self.store),
            events: self.events.clone(),
            frame_seq: Arc::clone(&self.frame_seq),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn description(&self) -> &CameraDescription {
        &self.description
    }

    pub fn preview_size(&self) -> (u32, u32) {
        self.preview_size
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn spawn_bus_watch(
    bus: gst::Bus,
    events: broadcast::Sender<CameraEvent>,
    shutdown: Arc<AtomicBool>,
) {
    std::thread::spawn(move || {
        while !shutdown.load(Ordering::Acquire) {
            let Some(message) = bus.timed_pop_filtered(
                gst::ClockTime::from_mseconds(100),
                &[gst::MessageType::Error],
            ) else {
                continue;
            };
            if let gst::MessageView::Error(error) = message.view() {
                warn!(error = %error.error(), "capture pipeline error");
                let _ = events.send(CameraEvent::Error {
                    error_description: error.error().to_string(),
                });
            }
        }
        debug!("bus watch exited");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::atomic::AtomicUsize;

    struct CountingAnalyzer {
        running: AtomicUsize,
        calls: AtomicUsize,
        overlapped: AtomicBool,
        hold: Duration,
    }

    impl CountingAnalyzer {
        fn new(hold: Duration) -> Self {
            Self {
                running: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                overlapped: AtomicBool::new(false),
                hold,
            }
        }
    }

    impl FrameAnalyzer for CountingAnalyzer {
        fn analyze(&self, _frame: &VideoFrame) -> anyhow::Result<serde_json::Value> {
            if self.running.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            std::thread::sleep(self.hold);
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({ "ok": true }))
        }
    }

    fn test_frame(marker: u8) -> VideoFrame {
        VideoFrame {
            data: FrameData::Copied(Arc::from(vec![marker; 48].as_slice())),
            width: 4,
            height: 8,
            stride: 4,
            format: PixelFormat::Nv12,
            pts: Duration::ZERO,
        }
    }

    fn test_fanout() -> (FrameFanout, broadcast::Sender<CameraEvent>, Arc<AtomicBool>) {
        let gate = Arc::new(DetectionGate::new());
        let (events, _) = broadcast::channel(64);
        let shutdown = Arc::new(AtomicBool::new(false));
        let (detect_tx, detect_rx) = mpsc::sync_channel(1);
        spawn_detection_worker(
            detect_rx,
            events.clone(),
            Arc::clone(&shutdown),
            Arc::clone(&gate),
        );
        let (frame_seq, _) = watch::channel(0u64);
        let fanout = FrameFanout {
            store: Arc::new(FrameStore::new()),
            gate,
            active: Arc::new(Mutex::new(None)),
            detect_tx,
            counter: AtomicU64::new(0),
            frame_seq: Arc::new(frame_seq),
        };
        (fanout, events, shutdown)
    }

    #[test]
    fn gate_blocks_reentry() {
        let gate = DetectionGate::new();
        assert!(gate.try_begin());
        assert!(!gate.try_begin());
        gate.finish();
        assert!(gate.try_begin());
    }

    #[test]
    fn busy_detector_skips_frames_but_publishes_them() {
        let (fanout, _events, _shutdown) = test_fanout();
        let analyzer = Arc::new(CountingAnalyzer::new(Duration::from_millis(100)));
        *fanout.active.lock().unwrap() = Some((7, analyzer.clone() as Arc<dyn FrameAnalyzer>));

        for marker in 0..5 {
            fanout.deliver(test_frame(marker));
        }

        // every frame reached the store even while the detector was busy
        let latest = fanout.store.consume().expect("latest frame");
        assert_eq!(latest.data.as_slice()[0], 4);

        std::thread::sleep(Duration::from_millis(300));
        assert!(
            !analyzer.overlapped.load(Ordering::SeqCst),
            "detections overlapped"
        );
        let calls = analyzer.calls.load(Ordering::SeqCst);
        assert!(calls >= 1);
        assert!(calls < 5, "busy frames should have been skipped");
    }

    #[test]
    fn gate_clears_after_completion() {
        let (fanout, _events, _shutdown) = test_fanout();
        let analyzer = Arc::new(CountingAnalyzer::new(Duration::from_millis(5)));
        *fanout.active.lock().unwrap() = Some((1, analyzer.clone() as Arc<dyn FrameAnalyzer>));

        fanout.deliver(test_frame(0));
        std::thread::sleep(Duration::from_millis(50));
        fanout.deliver(test_frame(1));
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn detection_results_reach_the_event_stream() {
        let (fanout, events, _shutdown) = test_fanout();
        let mut rx = events.subscribe();
        let analyzer = Arc::new(CountingAnalyzer::new(Duration::ZERO));
        *fanout.active.lock().unwrap() = Some((42, analyzer as Arc<dyn FrameAnalyzer>));

        fanout.deliver(test_frame(0));
        std::thread::sleep(Duration::from_millis(50));

        match rx.try_recv().expect("detection event") {
            CameraEvent::Detection { handle, result } => {
                assert_eq!(handle, 42);
                assert_eq!(result["ok"], serde_json::json!(true));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn late_completion_after_shutdown_is_discarded() {
        let (fanout, events, shutdown) = test_fanout();
        let mut rx = events.subscribe();
        let analyzer = Arc::new(CountingAnalyzer::new(Duration::from_millis(60)));
        *fanout.active.lock().unwrap() = Some((1, analyzer as Arc<dyn FrameAnalyzer>));

        fanout.deliver(test_frame(0));
        shutdown.store(true, Ordering::Release);
        std::thread::sleep(Duration::from_millis(150));

        assert!(rx.try_recv().is_err(), "closed session must stay silent");
    }

    #[test]
    fn frames_without_analyzer_only_feed_the_store() {
        let (fanout, events, _shutdown) = test_fanout();
        let mut rx = events.subscribe();
        fanout.deliver(test_frame(9));
        assert!(fanout.store.consume().is_some());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    #[ignore = "requires a camera"]
    #[serial]
    fn capture_delivers_frames() {
        let cameras = crate::enumerate_cameras().expect("enumerate");
        let Some(description) = cameras.first() else {
            return;
        };
        let mut session =
            CaptureSession::open(description, ResolutionPreset::Low).expect("open session");
        assert_eq!(session.state(), SessionState::Configured);

        session.start().expect("start");
        assert_eq!(session.state(), SessionState::Running);
        std::thread::sleep(Duration::from_secs(2));
        assert!(session.acquire_latest_frame().is_some());

        session.stop().expect("stop");
        session.stop().expect("stop is idempotent");
        assert_eq!(session.state(), SessionState::Stopped);

        session.close();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
    }
}
