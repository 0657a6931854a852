//! BlazeFace short-range face model.
//!
//! Input is a 1x3x128x128 tensor in [-1, 1]. The model emits 896 anchors
//! worth of regressors (`[1, 896, 16]`: box centre, box size, then six
//! landmark x/y pairs, all offsets in input pixels) and raw classifier
//! logits (`[1, 896, 1]`).
//!
//! Decoding is independent of ONNX Runtime; only [`BlazeFaceModel`] needs the
//! `onnx` feature.

use std::path::Path;

use mochi_common::error::{MochiError, MochiResult};

use super::{expect_len, non_max_suppression, Candidate, LANDMARK_COUNT};
use crate::frame::{BBox, Point};

pub const INPUT_SIZE: u32 = 128;
pub const NUM_ANCHORS: usize = 896;
pub const NUM_REGRESSORS: usize = 4 + LANDMARK_COUNT * 2;

/// Overlap above which two decoded boxes are treated as the same face.
const NMS_IOU_THRESHOLD: f32 = 0.3;

/// Logits are clamped before the sigmoid to keep it finite.
const SCORE_CLIP: f32 = 100.0;

/// Anchor centres in normalized [0, 1] coordinates.
pub type Anchor = [f32; 2];

/// Anchor grid for the 128x128 model: a 16x16 grid with two anchors per cell
/// followed by an 8x8 grid with six per cell.
pub fn generate_anchors() -> Vec<Anchor> {
    const LAYERS: [(u32, usize); 2] = [(8, 2), (16, 6)];

    let mut anchors = Vec::with_capacity(NUM_ANCHORS);
    for (stride, per_cell) in LAYERS {
        let grid = INPUT_SIZE / stride;
        for y in 0..grid {
            for x in 0..grid {
                let center = [
                    (x as f32 + 0.5) / grid as f32,
                    (y as f32 + 0.5) / grid as f32,
                ];
                anchors.extend(std::iter::repeat(center).take(per_cell));
            }
        }
    }
    anchors
}

/// Parse a little-endian float32 `.npy` array of shape (896, 2) or more
/// columns (only the first two are used).
pub fn parse_anchors_npy(bytes: &[u8]) -> MochiResult<Vec<Anchor>> {
    const MAGIC: &[u8] = b"\x93NUMPY";

    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(MochiError::model_load("anchors file is not a .npy array"));
    }
    let (header_len, header_start) = match bytes[6] {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 if bytes.len() >= 12 => (
            u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
            12,
        ),
        version => {
            return Err(MochiError::model_load(format!(
                "unsupported .npy version {version}"
            )))
        }
    };

    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .map(String::from_utf8_lossy)
        .ok_or_else(|| MochiError::model_load("truncated .npy header"))?;

    if !header.contains("'descr': '<f4'") {
        return Err(MochiError::model_load(format!(
            "anchors must be little-endian float32, header was {}",
            header.trim()
        )));
    }
    if header.contains("'fortran_order': True") {
        return Err(MochiError::model_load("anchors must be in C order"));
    }

    let values: Vec<f32> = bytes[data_start..]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    if values.is_empty() || values.len() % NUM_ANCHORS != 0 {
        return Err(MochiError::model_load(format!(
            "anchors file holds {} floats, expected a multiple of {NUM_ANCHORS}",
            values.len()
        )));
    }
    let columns = values.len() / NUM_ANCHORS;
    if columns < 2 {
        return Err(MochiError::model_load("anchors need at least two columns"));
    }

    Ok(values
        .chunks_exact(columns)
        .map(|row| [row[0], row[1]])
        .collect())
}

/// Load anchors from `path`, falling back to the generated grid when the
/// file is missing or malformed.
pub fn load_anchors(path: Option<&Path>) -> Vec<Anchor> {
    let Some(path) = path else {
        return generate_anchors();
    };
    let parsed = std::fs::read(path)
        .map_err(MochiError::from)
        .and_then(|bytes| parse_anchors_npy(&bytes));
    match parsed {
        Ok(anchors) => {
            tracing::debug!(path = %path.display(), "Loaded BlazeFace anchors");
            anchors
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Using generated BlazeFace anchors");
            generate_anchors()
        }
    }
}

pub fn sigmoid(logit: f32) -> f32 {
    1.0 / (1.0 + (-logit.clamp(-SCORE_CLIP, SCORE_CLIP)).exp())
}

/// Decode raw model outputs into candidates in input-pixel coordinates.
///
/// Candidates scoring below `min_score` are dropped and overlapping boxes
/// are merged by non-maximum suppression.
pub fn decode(
    anchors: &[Anchor],
    regressors: &[f32],
    logits: &[f32],
    min_score: f32,
) -> MochiResult<Vec<Candidate>> {
    expect_len("classifier output", logits.len(), anchors.len())?;
    expect_len(
        "regressor output",
        regressors.len(),
        anchors.len() * NUM_REGRESSORS,
    )?;

    let size = INPUT_SIZE as f32;
    let mut candidates = Vec::new();
    for (i, (anchor, logit)) in anchors.iter().zip(logits).enumerate() {
        let score = sigmoid(*logit);
        if score < min_score {
            continue;
        }
        let reg = &regressors[i * NUM_REGRESSORS..(i + 1) * NUM_REGRESSORS];
        let cx = anchor[0] * size + reg[0];
        let cy = anchor[1] * size + reg[1];
        let (w, h) = (reg[2], reg[3]);

        let landmarks = std::array::from_fn(|j| {
            Point::new(
                anchor[0] * size + reg[4 + j * 2],
                anchor[1] * size + reg[5 + j * 2],
            )
        });

        candidates.push(Candidate {
            bbox: BBox::new(cx - w / 2.0, cy - h / 2.0, w, h),
            score,
            landmarks,
        });
    }

    Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD))
}

#[cfg(feature = "onnx")]
pub use session::BlazeFaceModel;

#[cfg(feature = "onnx")]
mod session {
    use mochi_common::config::DetectorSettings;
    use mochi_common::error::{MochiError, MochiResult};
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use ort::value::Tensor;

    use super::{decode, load_anchors, Anchor, INPUT_SIZE};
    use crate::detector::{Candidate, InferenceModel, InputTensor};

    /// BlazeFace running in ONNX Runtime.
    pub struct BlazeFaceModel {
        session: Session,
        anchors: Vec<Anchor>,
        min_score: f32,
    }

    impl BlazeFaceModel {
        pub fn load(settings: &DetectorSettings) -> MochiResult<Self> {
            if settings.input_size != INPUT_SIZE {
                return Err(MochiError::model_load(format!(
                    "BlazeFace expects {INPUT_SIZE}x{INPUT_SIZE} input, configured {}",
                    settings.input_size
                )));
            }
            if !settings.model_path.exists() {
                return Err(MochiError::model_load(format!(
                    "model file {} not found",
                    settings.model_path.display()
                )));
            }

            let session = Session::builder()
                .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
                .and_then(|b| b.with_intra_threads(2))
                .and_then(|b| b.commit_from_file(&settings.model_path))
                .map_err(|e| {
                    MochiError::model_load(format!(
                        "Failed to load {}: {e}",
                        settings.model_path.display()
                    ))
                })?;

            tracing::info!(path = %settings.model_path.display(), "BlazeFace model loaded");
            Ok(Self {
                session,
                anchors: load_anchors(settings.anchors_path.as_deref()),
                min_score: settings.min_confidence,
            })
        }
    }

    impl InferenceModel for BlazeFaceModel {
        fn name(&self) -> &str {
            "blazeface"
        }

        fn input_size(&self) -> u32 {
            INPUT_SIZE
        }

        fn infer(&mut self, input: &InputTensor) -> MochiResult<Vec<Candidate>> {
            if input.size != INPUT_SIZE {
                return Err(MochiError::inference(format!(
                    "input is {}x{}, model expects {INPUT_SIZE}x{INPUT_SIZE}",
                    input.size, input.size
                )));
            }

            let tensor = Tensor::from_array((input.shape().to_vec(), input.data.clone()))
                .map_err(|e| MochiError::inference(format!("Failed to build input tensor: {e}")))?;
            let outputs = self
                .session
                .run(ort::inputs![tensor])
                .map_err(|e| MochiError::inference(format!("BlazeFace run failed: {e}")))?;
            if outputs.len() < 2 {
                return Err(MochiError::inference(format!(
                    "BlazeFace produced {} outputs, expected 2",
                    outputs.len()
                )));
            }

            let (_, regressors) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| MochiError::inference(format!("Bad regressor output: {e}")))?;
            let (_, logits) = outputs[1]
                .try_extract_tensor::<f32>()
                .map_err(|e| MochiError::inference(format!("Bad classifier output: {e}")))?;

            decode(&self.anchors, regressors, logits, self.min_score)
        }
    }
}
