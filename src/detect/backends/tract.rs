#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::labels::coco_label;
use crate::detect::result::{BoundingBox, Detection, DetectionResult};

const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_NMS_IOU: f32 = 0.45;

/// Tract-based YOLOv8 backend.
///
/// Loads a local ONNX export of a YOLOv8 detector (output `[1, 4 + nc, N]`),
/// resizes each RGB24 frame to the model input, and decodes boxes back into
/// frame coordinates. Does not track; wrap it in an `IouTracker` for ids.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_width: u32,
    input_height: u32,
    confidence_threshold: f32,
    nms_iou: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        Self::with_input_size(model_path, DEFAULT_INPUT_SIZE, DEFAULT_INPUT_SIZE)
    }

    pub fn with_input_size<P: AsRef<Path>>(
        model_path: P,
        input_width: u32,
        input_height: u32,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        if !model_path.is_file() {
            return Err(anyhow!("model not found: {}", model_path.display()));
        }
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_width,
            input_height,
            confidence_threshold: 0.3,
            nms_iou: DEFAULT_NMS_IOU,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn decode(&self, output: &Tensor, width: u32, height: u32) -> Result<Vec<Detection>> {
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .map_err(|_| anyhow!("unexpected YOLOv8 output shape {:?}", output.shape()))?;
        let scale = (
            width as f32 / self.input_width as f32,
            height as f32 / self.input_height as f32,
        );
        let candidates = decode_yolov8(view, scale, self.confidence_threshold)?;
        Ok(non_max_suppression(candidates, self.nms_iou))
    }
}

/// Resize an RGB24 frame (nearest neighbour) into a `[1, 3, in_h, in_w]`
/// tensor scaled to `0..=1`.
pub(crate) fn frame_to_input(
    pixels: &[u8],
    width: u32,
    height: u32,
    input_width: u32,
    input_height: u32,
) -> Result<Tensor> {
    if width == 0 || height == 0 {
        return Err(anyhow!("frame has no pixels ({}x{})", width, height));
    }
    let expected_len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    if pixels.len() != expected_len {
        return Err(anyhow!(
            "expected {} RGB bytes, received {}",
            expected_len,
            pixels.len()
        ));
    }

    let (in_w, in_h) = (input_width as usize, input_height as usize);
    let (src_w, src_h) = (width as usize, height as usize);
    let input = tract_ndarray::Array4::from_shape_fn((1, 3, in_h, in_w), |(_, c, y, x)| {
        let sy = (y * src_h / in_h).min(src_h - 1);
        let sx = (x * src_w / in_w).min(src_w - 1);
        pixels[(sy * src_w + sx) * 3 + c] as f32 / 255.0
    });
    Ok(input.into_tensor())
}

/// Decode a YOLOv8 head laid out as `[1, 4 + classes, anchors]`.
///
/// Rows 0..4 hold `cx, cy, w, h` in model input pixels, the remaining rows
/// hold per-class scores. Each anchor keeps its best class when that score
/// reaches `threshold`; boxes are scaled by `scale = (sx, sy)` into frame
/// coordinates. No suppression is applied here.
pub(crate) fn decode_yolov8(
    output: tract_ndarray::ArrayView3<'_, f32>,
    scale: (f32, f32),
    threshold: f32,
) -> Result<Vec<Detection>> {
    let (batch, rows, anchors) = output.dim();
    if batch != 1 || rows <= 4 {
        return Err(anyhow!(
            "unexpected YOLOv8 output shape {:?}",
            output.shape()
        ));
    }
    let (sx, sy) = scale;

    let mut candidates = Vec::new();
    for i in 0..anchors {
        let (class_id, score) = (4..rows)
            .map(|row| (row - 4, output[[0, row, i]]))
            .fold((0, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if score < threshold {
            continue;
        }
        let class_id = class_id as u32;
        candidates.push(Detection::new(
            BoundingBox::centered(
                output[[0, 0, i]] * sx,
                output[[0, 1, i]] * sy,
                output[[0, 2, i]] * sx,
                output[[0, 3, i]] * sy,
            ),
            score,
            class_id,
            coco_label(class_id),
        ));
    }
    Ok(candidates)
}

/// Per-class greedy NMS, highest confidence first.
pub(crate) fn non_max_suppression(mut candidates: Vec<Detection>, iou: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for det in candidates {
        let overlaps = kept
            .iter()
            .any(|k| k.class_id == det.class_id && k.bbox.iou(&det.bbox) > iou);
        if !overlaps {
            kept.push(det);
        }
    }
    kept
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::ObjectDetection)
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<DetectionResult> {
        let input = frame_to_input(pixels, width, height, self.input_width, self.input_height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let detections = self.decode(output, width, height)?;
        Ok(DetectionResult::new(detections))
    }

    fn warm_up(&mut self) -> Result<()> {
        let (w, h) = (self.input_width, self.input_height);
        let blank = vec![0u8; (w * h * 3) as usize];
        self.detect(&blank, w, h).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::COW_CLASS_ID;

    #[test]
    fn missing_model_is_a_configuration_error() {
        let err = TractBackend::new("/nonexistent/yolov8n.onnx")
            .err()
            .expect("missing model must fail");
        assert!(err.to_string().contains("model not found"));
    }

    #[test]
    fn empty_frames_are_rejected_before_resizing() {
        let err = frame_to_input(&[], 0, 0, 640, 640).expect_err("zero-sized frame");
        assert!(err.to_string().contains("no pixels"));
        assert!(frame_to_input(&[], 0, 480, 640, 640).is_err());
        assert!(frame_to_input(&[0u8; 6], 2, 2, 640, 640).is_err());
    }

    #[test]
    fn input_tensor_is_nchw_and_normalized() -> Result<()> {
        // 2x1 frame: a red pixel then a blue one.
        let pixels = [255, 0, 0, 0, 0, 255];
        let tensor = frame_to_input(&pixels, 2, 1, 4, 2)?;
        assert_eq!(tensor.shape(), &[1, 3, 2, 4]);
        let view = tensor.to_array_view::<f32>()?;
        assert_eq!(view[[0, 0, 1, 0]], 1.0);
        assert_eq!(view[[0, 2, 0, 0]], 0.0);
        assert_eq!(view[[0, 2, 0, 3]], 1.0);
        Ok(())
    }

    #[test]
    fn decode_scales_boxes_and_picks_best_class() -> Result<()> {
        // Three anchors over 20 classes: a cow, a weak person, a cat.
        let mut head = tract_ndarray::Array3::<f32>::zeros((1, 4 + 20, 3));
        for (i, (cx, cy, w, h)) in [
            (320.0, 320.0, 64.0, 32.0),
            (100.0, 100.0, 10.0, 10.0),
            (600.0, 40.0, 20.0, 20.0),
        ]
        .into_iter()
        .enumerate()
        {
            head[[0, 0, i]] = cx;
            head[[0, 1, i]] = cy;
            head[[0, 2, i]] = w;
            head[[0, 3, i]] = h;
        }
        head[[0, 4 + 19, 0]] = 0.8;
        head[[0, 4 + 17, 0]] = 0.4;
        head[[0, 4, 1]] = 0.1;
        head[[0, 4 + 15, 2]] = 0.5;

        let detections = decode_yolov8(head.view(), (2.0, 0.75), 0.3)?;
        assert_eq!(detections.len(), 2);

        let cow = &detections[0];
        assert_eq!(cow.class_id, COW_CLASS_ID);
        assert_eq!(cow.label, "cow");
        assert_eq!(cow.confidence, 0.8);
        assert_eq!(cow.bbox, BoundingBox::new(576.0, 228.0, 704.0, 252.0));

        assert_eq!(detections[1].label, "cat");
        Ok(())
    }

    #[test]
    fn decode_rejects_heads_without_class_rows() {
        let head = tract_ndarray::Array3::<f32>::zeros((1, 4, 8));
        assert!(decode_yolov8(head.view(), (1.0, 1.0), 0.3).is_err());
    }

    #[test]
    fn nms_keeps_best_box_per_class() {
        let a = Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9, 19, "cow");
        let b = Detection::new(BoundingBox::new(1.0, 1.0, 11.0, 11.0), 0.6, 19, "cow");
        let c = Detection::new(BoundingBox::new(1.0, 1.0, 11.0, 11.0), 0.5, 0, "person");
        let kept = non_max_suppression(vec![b, c, a], 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].label, "person");
    }
}
