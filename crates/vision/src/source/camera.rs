//! V4L2 webcam source.
//!
//! With the `camera` feature the source runs a GStreamer pipeline ending in
//! an `appsink` that keeps a single buffer, so a slow reader always gets the
//! newest image. Without the feature, opening fails with `DeviceUnavailable`
//! and the usual synthetic fallback applies.

use image::RgbImage;
use mochi_common::config::CaptureSettings;
use mochi_common::error::{MochiError, MochiResult};

use super::FrameSource;

#[cfg(feature = "camera")]
use gst::prelude::*;
#[cfg(feature = "camera")]
use gstreamer as gst;
#[cfg(feature = "camera")]
use gstreamer_app as gst_app;

/// A V4L2 capture device found on this machine.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CameraDevice {
    pub path: String,
    pub name: String,
    /// Higher means more likely to be a webcam.
    pub priority: u32,
}

/// Webcam frame source.
pub struct CameraSource {
    device_index: u32,
    device_path: Option<String>,
    #[cfg(feature = "camera")]
    pipeline: Option<gst::Pipeline>,
    #[cfg(feature = "camera")]
    sink: Option<gst_app::AppSink>,
    #[cfg(feature = "camera")]
    pull_timeout_ms: u64,
}

impl CameraSource {
    pub fn new(device_index: u32) -> Self {
        Self {
            device_index,
            device_path: None,
            #[cfg(feature = "camera")]
            pipeline: None,
            #[cfg(feature = "camera")]
            sink: None,
            #[cfg(feature = "camera")]
            pull_timeout_ms: 200,
        }
    }

    /// Device node in use once opened.
    pub fn device_path(&self) -> Option<&str> {
        self.device_path.as_deref()
    }
}

/// Whether this build can capture from a camera at all.
pub fn camera_support_compiled() -> bool {
    cfg!(feature = "camera")
}

#[cfg(not(feature = "camera"))]
impl FrameSource for CameraSource {
    fn name(&self) -> &str {
        "camera"
    }

    fn open(&mut self, _settings: &CaptureSettings) -> MochiResult<()> {
        Err(MochiError::device_unavailable(format!(
            "camera {} requested but this build has no camera support (enable the `camera` feature)",
            self.device_index
        )))
    }

    fn grab(&mut self) -> MochiResult<Option<RgbImage>> {
        Err(MochiError::capture("camera is not open"))
    }

    fn close(&mut self) {
        self.device_path = None;
    }
}

#[cfg(feature = "camera")]
impl FrameSource for CameraSource {
    fn name(&self) -> &str {
        "camera"
    }

    fn open(&mut self, settings: &CaptureSettings) -> MochiResult<()> {
        init_gstreamer()?;

        let device = resolve_device(self.device_index).ok_or_else(|| {
            MochiError::device_unavailable(format!(
                "no video capture device for index {} (expected /dev/video{})",
                self.device_index, self.device_index
            ))
        })?;

        let launch = format!(
            "v4l2src device=\"{device}\" ! videoconvert ! videoscale ! video/x-raw,format=RGB,width={},height={} ! appsink name=sink max-buffers=1 drop=true sync=false",
            settings.width, settings.height
        );
        let pipeline = gst::parse::launch(&launch)
            .map_err(|e| {
                MochiError::device_unavailable(format!("Failed to build camera pipeline: {e}"))
            })?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| {
                MochiError::device_unavailable("Launch string did not produce a pipeline")
            })?;
        let sink = pipeline
            .by_name("sink")
            .and_then(|element| element.dynamic_cast::<gst_app::AppSink>().ok())
            .ok_or_else(|| MochiError::device_unavailable("Camera pipeline has no appsink"))?;

        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(MochiError::device_unavailable(format!(
                "Failed to start camera {device}: {e:?}"
            )));
        }

        // State changes are async; wait so a busy or missing device fails here.
        match pipeline.state(gst::ClockTime::from_seconds(5)) {
            (Ok(_), gst::State::Playing, _) => {}
            (Ok(_), state, _) => {
                tracing::warn!(
                    device = %device,
                    ?state,
                    "Camera did not reach Playing state within timeout"
                );
            }
            (Err(e), _, _) => {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(MochiError::device_unavailable(format!(
                    "Camera {device} failed to start: {e:?}"
                )));
            }
        }

        self.pull_timeout_ms = (2_000 / settings.fps.max(1) as u64).max(50);
        self.pipeline = Some(pipeline);
        self.sink = Some(sink);
        self.device_path = Some(device.clone());
        tracing::info!(
            device = %device,
            width = settings.width,
            height = settings.height,
            "Camera opened"
        );
        Ok(())
    }

    fn grab(&mut self) -> MochiResult<Option<RgbImage>> {
        let sink = self
            .sink
            .as_ref()
            .ok_or_else(|| MochiError::capture("camera is not open"))?;

        let Some(sample) = sink.try_pull_sample(gst::ClockTime::from_mseconds(self.pull_timeout_ms))
        else {
            if sink.is_eos() {
                return Err(MochiError::capture("camera stream ended"));
            }
            return Ok(None);
        };

        let caps = sample
            .caps()
            .ok_or_else(|| MochiError::capture("camera sample has no caps"))?;
        let structure = caps
            .structure(0)
            .ok_or_else(|| MochiError::capture("camera caps have no structure"))?;
        let width = structure
            .get::<i32>("width")
            .map_err(|e| MochiError::capture(format!("camera caps missing width: {e}")))?;
        let height = structure
            .get::<i32>("height")
            .map_err(|e| MochiError::capture(format!("camera caps missing height: {e}")))?;

        let buffer = sample
            .buffer()
            .ok_or_else(|| MochiError::capture("camera sample has no buffer"))?;
        let map = buffer
            .map_readable()
            .map_err(|e| MochiError::capture(format!("Failed to map camera buffer: {e}")))?;

        let image = pack_rgb_rows(map.as_slice(), width.max(0) as u32, height.max(0) as u32)?;
        Ok(Some(image))
    }

    fn close(&mut self) {
        self.sink = None;
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                tracing::warn!(error = ?e, "Failed to stop camera pipeline");
            }
            tracing::info!(device = ?self.device_path, "Camera released");
        }
        self.device_path = None;
    }
}

#[cfg(feature = "camera")]
impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(feature = "camera")]
fn init_gstreamer() -> MochiResult<()> {
    use std::sync::OnceLock;

    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    match GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string())) {
        Ok(()) => Ok(()),
        Err(e) => Err(MochiError::device_unavailable(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

/// Copy RGB rows out of a buffer whose rows may be padded.
#[cfg_attr(not(feature = "camera"), allow(dead_code))]
fn pack_rgb_rows(data: &[u8], width: u32, height: u32) -> MochiResult<RgbImage> {
    let row_len = width as usize * 3;
    if width == 0 || height == 0 {
        return Err(MochiError::capture("camera produced an empty frame"));
    }
    let stride = data.len() / height as usize;
    if stride < row_len {
        return Err(MochiError::capture(format!(
            "camera buffer of {} bytes is too small for {width}x{height} RGB",
            data.len()
        )));
    }

    let mut packed = Vec::with_capacity(row_len * height as usize);
    for row in data.chunks(stride).take(height as usize) {
        packed.extend_from_slice(&row[..row_len]);
    }
    RgbImage::from_raw(width, height, packed)
        .ok_or_else(|| MochiError::capture("camera frame size mismatch"))
}

/// Pick the device node for `index`.
///
/// An explicit `/dev/videoN` wins. Index 0 also accepts the best-scoring
/// webcam when `/dev/video0` is something else or missing.
#[cfg_attr(not(feature = "camera"), allow(dead_code))]
fn resolve_device(index: u32) -> Option<String> {
    let best = pick_device(index, probe_devices())?;
    tracing::info!(
        device = %best.path,
        name = %best.name,
        priority = best.priority,
        "Selected webcam device"
    );
    Some(best.path)
}

/// Device selection over probed nodes. Nodes scored zero are never chosen
/// for index 0.
#[cfg_attr(not(feature = "camera"), allow(dead_code))]
fn pick_device(index: u32, devices: Vec<CameraDevice>) -> Option<CameraDevice> {
    let explicit = format!("/dev/video{index}");
    if index != 0 {
        return devices.into_iter().find(|d| d.path == explicit);
    }

    // `/dev/video0` is kept when it looks like a webcam at all.
    let webcams: Vec<CameraDevice> = devices.into_iter().filter(|d| d.priority > 0).collect();
    if let Some(first) = webcams.iter().find(|d| d.path == explicit) {
        return Some(first.clone());
    }
    webcams.into_iter().max_by_key(|d| d.priority)
}

/// Enumerate `/dev/video0` through `/dev/video15` and score each as a webcam.
pub fn probe_devices() -> Vec<CameraDevice> {
    (0..16u32)
        .filter_map(|idx| {
            let path = format!("/dev/video{idx}");
            if !std::path::Path::new(&path).exists() {
                return None;
            }
            let name = std::fs::read_to_string(format!("/sys/class/video4linux/video{idx}/name"))
                .map(|s| s.trim().to_string())
                .unwrap_or_default();
            let priority = webcam_priority(&name, probe_v4l2_capture_capability(&path));
            Some(CameraDevice {
                path,
                name,
                priority,
            })
        })
        .collect()
}

/// Score a device name (and optional capture capability) as a webcam.
/// Zero means definitely not a webcam.
fn webcam_priority(name: &str, supports_capture: Option<bool>) -> u32 {
    const WEBCAM_KEYWORDS: &[&str] = &[
        "webcam", "camera", "cam", "facetime", "logitech", "microsoft", "razer", "v4l2loopback",
    ];
    const NON_WEBCAM_KEYWORDS: &[&str] = &[
        "tuner", "dvb", "hdmi", "capture", "encoder", "decoder", "metadata",
    ];

    let name = name.to_lowercase();
    if NON_WEBCAM_KEYWORDS.iter().any(|kw| name.contains(kw)) {
        return 0;
    }
    let named_webcam = WEBCAM_KEYWORDS.iter().any(|kw| name.contains(kw));

    match (named_webcam, supports_capture) {
        (true, Some(true)) => 100,
        (true, _) => 80,
        (false, Some(true)) => 50,
        (false, Some(false)) => 0,
        (false, None) => 10,
    }
}

/// Ask `v4l2-ctl` whether a device reports Video Capture. `None` if the tool
/// is not installed.
fn probe_v4l2_capture_capability(dev_path: &str) -> Option<bool> {
    let output = std::process::Command::new("v4l2-ctl")
        .args(["--device", dev_path, "--info"])
        .output()
        .ok()?;
    if !output.status.success() {
        return Some(false);
    }
    Some(
        String::from_utf8_lossy(&output.stdout)
            .to_lowercase()
            .contains("video capture"),
    )
}
