//! Check camera devices and model availability.

use mochi_common::config::{AppConfig, DetectorBackend, SourceKind};
use mochi_vision::detector::onnx_support_compiled;
use mochi_vision::source::camera::{camera_support_compiled, probe_devices};

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("FocusMochi System Check");
    println!("{}", "=".repeat(50));

    let mut ready = true;

    match config.pipeline() {
        Ok(pipeline) => println!(
            "[OK] Config valid: capture {} fps, inference every {} frames",
            pipeline.capture.fps,
            pipeline.inference_stride()
        ),
        Err(e) => {
            println!("[FAIL] Config invalid: {e}");
            ready = false;
        }
    }

    // Camera
    if camera_support_compiled() {
        println!("[OK] Camera support compiled in");
    } else {
        println!("[WARN] Camera support not compiled in (build with --features camera)");
    }
    let devices = probe_devices();
    if devices.is_empty() {
        println!("[WARN] No video devices found");
    } else {
        println!("[OK] Video devices detected: {}", devices.len());
        for d in &devices {
            println!(
                "     {} {} {}",
                d.path,
                if d.name.is_empty() { "(unnamed)" } else { d.name.as_str() },
                if d.priority > 0 { "(webcam)" } else { "" }
            );
        }
    }
    if config.capture.source == SourceKind::Camera
        && (devices.is_empty() || !camera_support_compiled())
    {
        if config.capture.fallback_to_synthetic {
            println!("[WARN] Camera unusable; synthetic frames will be used");
        } else {
            println!("[FAIL] Camera unusable and synthetic fallback is disabled");
            ready = false;
        }
    }

    // Detector
    match config.detector.backend {
        DetectorBackend::Marker => println!("[OK] Detector: colour-marker model"),
        DetectorBackend::Onnx => {
            if onnx_support_compiled() {
                println!("[OK] ONNX support compiled in");
            } else {
                println!("[FAIL] ONNX support not compiled in (build with --features onnx)");
                ready = false;
            }
            let model = &config.detector.model_path;
            if model.is_file() {
                println!("[OK] Model: {}", model.display());
            } else {
                println!("[FAIL] Model missing: {}", model.display());
                ready = false;
            }
            match &config.detector.anchors_path {
                Some(anchors) if anchors.is_file() => {
                    println!("[OK] Anchors: {}", anchors.display())
                }
                Some(anchors) => println!(
                    "[WARN] Anchors missing: {} (generated anchors will be used)",
                    anchors.display()
                ),
                None => println!("[OK] Anchors: generated"),
            }
        }
    }

    println!();
    if ready {
        println!("FocusMochi is ready.");
    } else {
        println!("Some requirements are missing. See above for fixes.");
    }

    Ok(())
}
