//! Decoding raw YOLOv8 head outputs into [`DetectionResult`] fields.
//!
//! Detection-style heads emit one `(4 + nc + extra, anchors)` tensor per image, where the
//! first four channels are `cx, cy, w, h` in letterboxed input pixels and `extra` holds mask
//! coefficients (segment), keypoint triplets (pose) or the box angle (obb).

use image::{imageops, GrayImage};
use ndarray::{s, ArrayD, ArrayView1, ArrayView2, ArrayView3, Axis, Ix3, Ix4};

use crate::models::Task;
use crate::results::{Bbox, DetectionResult, Mask, OrientedBox, Point2, Probs};
use crate::utils::{nms, probiou, sigmoid};
use crate::{DetectorConfig, Error, Result};

/// Scale from original image to letterboxed input. Both shapes are `(height, width)`.
pub(crate) fn letterbox_ratio(input: (u32, u32), orig: (u32, u32)) -> f32 {
    let (h, w) = input;
    let (h0, w0) = orig;
    (w as f32 / w0 as f32).min(h as f32 / h0 as f32)
}

#[derive(Debug, Clone)]
struct Candidate {
    bbox: Bbox,
    extra: Vec<f32>,
}

pub(crate) struct Postprocessor<'a> {
    pub task: Task,
    /// Model input `(height, width)`.
    pub input: (u32, u32),
    /// `(keypoints, values per keypoint)` of pose models.
    pub kpt_shape: (usize, usize),
    pub config: &'a DetectorConfig,
}

impl Postprocessor<'_> {
    /// Fill the task fields of `result` from the model outputs for its image.
    pub fn run(&self, outputs: &[ArrayD<f32>], result: &mut DetectionResult) -> Result<()> {
        let first = outputs
            .first()
            .ok_or_else(|| Error::Inference("model produced no outputs".to_string()))?;

        let orig = result.orig_shape();
        let r = letterbox_ratio(self.input, orig);

        match self.task {
            Task::Classify => {
                result.probs = Some(Probs::new(first.iter().copied().collect()));
            }
            Task::Obb => {
                result.obb = Some(self.oriented_boxes(head(first)?, r)?);
            }
            Task::Detect | Task::Pose | Task::Segment => {
                let preds = head(first)?;
                let protos = match self.task {
                    Task::Segment => {
                        let protos = outputs.get(1).ok_or_else(|| {
                            Error::Inference(
                                "segmentation model without mask prototypes".to_string(),
                            )
                        })?;
                        Some(
                            protos
                                .view()
                                .into_dimensionality::<Ix4>()
                                .map_err(|err| {
                                    Error::Inference(format!("unexpected prototype shape: {err}"))
                                })?
                                .index_axis_move(Axis(0), 0),
                        )
                    }
                    _ => None,
                };

                let extra = match self.task {
                    Task::Segment => protos.as_ref().map_or(0, |p| p.shape()[0]),
                    Task::Pose => self.kpt_shape.0 * self.kpt_shape.1,
                    _ => 0,
                };
                let nc = self.num_classes(preds.nrows(), extra)?;

                let kept =
                    self.suppress(candidates(preds, nc, r, orig, self.config.conf_threshold));

                if let Task::Pose = self.task {
                    result.keypoints = Some(
                        kept.iter()
                            .map(|c| self.keypoints(&c.extra, r, orig))
                            .collect(),
                    );
                }

                if let Some(protos) = protos {
                    result.masks = Some(
                        kept.iter()
                            .map(|c| {
                                decode_mask(&c.extra, protos.view(), &c.bbox, r, self.input, orig)
                            })
                            .collect::<Result<_>>()?,
                    );
                }

                result.boxes = Some(kept.into_iter().map(|c| c.bbox).collect());
            }
        }

        Ok(())
    }

    fn num_classes(&self, channels: usize, extra: usize) -> Result<usize> {
        channels
            .checked_sub(4 + extra)
            .filter(|&nc| nc > 0)
            .ok_or_else(|| {
                Error::Inference(format!(
                    "{channels} output channels cannot hold a {:?} head with {extra} extra values",
                    self.task
                ))
            })
    }

    fn suppress(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let keep = nms(
            &candidates,
            |c| c.bbox.confidence,
            |c| c.bbox.class_id,
            |a, b| a.bbox.iou(&b.bbox),
            self.config.iou_threshold,
            self.config.agnostic_nms,
            self.config.max_det,
        );
        keep.into_iter().map(|i| candidates[i].clone()).collect()
    }

    fn keypoints(&self, raw: &[f32], r: f32, orig: (u32, u32)) -> Vec<Point2> {
        let (h0, w0) = (orig.0 as f32, orig.1 as f32);
        let (nk, nd) = self.kpt_shape;
        (0..nk)
            .map(|i| {
                let k = &raw[i * nd..(i + 1) * nd];
                let conf = if nd > 2 { k[2] } else { 1. };
                if conf < self.config.kpt_conf_threshold {
                    Point2::default()
                } else {
                    Point2::new((k[0] / r).clamp(0., w0), (k[1] / r).clamp(0., h0), conf)
                }
            })
            .collect()
    }

    fn oriented_boxes(&self, preds: ArrayView2<f32>, r: f32) -> Result<Vec<OrientedBox>> {
        let nc = self.num_classes(preds.nrows(), 1)?;

        let candidates: Vec<OrientedBox> = preds
            .axis_iter(Axis(1))
            .filter_map(|pred| {
                let (class_id, confidence) = best_class(pred, nc)?;
                if confidence < self.config.conf_threshold {
                    return None;
                }
                Some(OrientedBox {
                    cx: pred[0] / r,
                    cy: pred[1] / r,
                    width: pred[2] / r,
                    height: pred[3] / r,
                    angle: pred[4 + nc],
                    class_id,
                    confidence,
                })
            })
            .collect();

        let keep = nms(
            &candidates,
            |b| b.confidence,
            |b| b.class_id,
            probiou,
            self.config.iou_threshold,
            self.config.agnostic_nms,
            self.config.max_det,
        );
        Ok(keep.into_iter().map(|i| candidates[i].clone()).collect())
    }
}

/// First image of a `(batch, channels, anchors)` head output.
fn head(output: &ArrayD<f32>) -> Result<ArrayView2<'_, f32>> {
    Ok(output
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|err| Error::Inference(format!("unexpected output shape: {err}")))?
        .index_axis_move(Axis(0), 0))
}

fn best_class(pred: ArrayView1<f32>, nc: usize) -> Option<(usize, f32)> {
    pred.slice(s![4..4 + nc])
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// Anchors scoring at least `conf`, with boxes mapped back onto the original image.
fn candidates(
    preds: ArrayView2<f32>,
    nc: usize,
    r: f32,
    orig: (u32, u32),
    conf: f32,
) -> Vec<Candidate> {
    let (h0, w0) = (orig.0 as f32, orig.1 as f32);
    preds
        .axis_iter(Axis(1))
        .filter_map(|pred| {
            let (class_id, confidence) = best_class(pred, nc)?;
            if confidence < conf {
                return None;
            }
            let mut bbox = Bbox::from_cxcywh(
                pred[0] / r,
                pred[1] / r,
                pred[2] / r,
                pred[3] / r,
                class_id,
                confidence,
            );
            bbox.clamp(w0, h0);
            Some(Candidate {
                bbox,
                extra: pred.slice(s![4 + nc..]).to_vec(),
            })
        })
        .collect()
}

/// Combine mask coefficients with the prototypes, undo the letterbox and crop to the box.
fn decode_mask(
    coefs: &[f32],
    protos: ArrayView3<f32>,
    bbox: &Bbox,
    r: f32,
    input: (u32, u32),
    orig: (u32, u32),
) -> Result<Mask> {
    let (nm, mh, mw) = protos.dim();
    let protos = protos
        .to_shape((nm, mh * mw))
        .map_err(|err| Error::Inference(format!("mask prototypes: {err}")))?;
    let logits = ArrayView1::from(coefs).dot(&protos);

    let pixels: Vec<u8> = logits.iter().map(|&v| (sigmoid(v) * 255.) as u8).collect();
    let proto_img = GrayImage::from_raw(mw as u32, mh as u32, pixels)
        .ok_or_else(|| Error::Inference("mask prototype buffer size mismatch".to_string()))?;

    // the letterbox pads right and bottom, keep only the part covering the image
    let (h0, w0) = orig;
    let crop_w = (w0 as f32 * r / input.1 as f32 * mw as f32).round().clamp(1., mw as f32) as u32;
    let crop_h = (h0 as f32 * r / input.0 as f32 * mh as f32).round().clamp(1., mh as f32) as u32;
    let cropped = imageops::crop_imm(&proto_img, 0, 0, crop_w, crop_h).to_image();
    let full = imageops::resize(&cropped, w0, h0, imageops::FilterType::Triangle);

    let [x1, y1, x2, y2] = bbox.xyxy();
    let data = full
        .enumerate_pixels()
        .map(|(x, y, p)| {
            let (x, y) = (x as f32, y as f32);
            let inside = x >= x1 && x < x2 && y >= y1 && y < y2;
            if inside && p.0[0] > 127 {
                255
            } else {
                0
            }
        })
        .collect();

    Ok(Mask {
        width: w0,
        height: h0,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use image::DynamicImage;
    use ndarray::{Array3, Array4};

    fn result(width: u32, height: u32) -> DetectionResult {
        let names = vec!["cat".to_string(), "dog".to_string()];
        DetectionResult::new("test.png", DynamicImage::new_rgb8(width, height), names)
    }

    fn set_anchor(preds: &mut Array3<f32>, anchor: usize, values: &[f32]) {
        for (c, v) in values.iter().enumerate() {
            preds[[0, c, anchor]] = *v;
        }
    }

    fn processor(task: Task, config: &DetectorConfig) -> Postprocessor<'_> {
        Postprocessor {
            task,
            input: (640, 640),
            kpt_shape: (2, 3),
            config,
        }
    }

    #[test]
    fn letterbox_ratio_uses_tighter_side() {
        assert!(approx_eq!(f32, letterbox_ratio((640, 640), (480, 1280)), 0.5));
        assert!(approx_eq!(f32, letterbox_ratio((640, 640), (320, 320)), 2.0));
    }

    #[test]
    fn detect_filters_and_suppresses() {
        let mut preds = Array3::<f32>::zeros((1, 6, 3));
        set_anchor(&mut preds, 0, &[320., 320., 100., 100., 0.9, 0.1]);
        set_anchor(&mut preds, 1, &[322., 322., 100., 100., 0.8, 0.05]);
        set_anchor(&mut preds, 2, &[100., 100., 20., 20., 0.1, 0.2]);

        let config = DetectorConfig::default();
        let mut res = result(1280, 1280);
        processor(Task::Detect, &config)
            .run(&[preds.into_dyn()], &mut res)
            .unwrap();

        let boxes = res.boxes.as_ref().unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].class_id, 0);
        assert_eq!(boxes[0].xyxy(), [540., 540., 740., 740.]);
        assert!(res.masks.is_none() && res.keypoints.is_none());
        assert!(res.probs.is_none() && res.obb.is_none());
    }

    #[test]
    fn detect_with_nothing_above_threshold_has_empty_boxes() {
        let preds = Array3::<f32>::zeros((1, 6, 4));
        let config = DetectorConfig::default();
        let mut res = result(64, 64);
        processor(Task::Detect, &config)
            .run(&[preds.into_dyn()], &mut res)
            .unwrap();
        assert_eq!(res.boxes, Some(vec![]));
    }

    #[test]
    fn classify_fills_probs_only() {
        let probs = ndarray::arr2(&[[0.1_f32, 0.7, 0.2]]).into_dyn();
        let config = DetectorConfig::default();
        let mut res = result(8, 8);
        processor(Task::Classify, &config)
            .run(&[probs], &mut res)
            .unwrap();
        assert_eq!(res.probs.as_ref().unwrap().top1(), Some((1, 0.7)));
        assert!(res.boxes.is_none());
    }

    #[test]
    fn pose_decodes_and_hides_low_confidence_keypoints() {
        // 4 box + 1 class + 2 keypoints * (x, y, conf)
        let mut preds = Array3::<f32>::zeros((1, 11, 1));
        set_anchor(
            &mut preds,
            0,
            &[320., 320., 200., 400., 0.95, 300., 200., 0.9, 340., 260., 0.1],
        );

        let config = DetectorConfig::default();
        let mut res = result(640, 640);
        processor(Task::Pose, &config)
            .run(&[preds.into_dyn()], &mut res)
            .unwrap();

        let kpts = res.keypoints.as_ref().unwrap();
        assert_eq!(kpts.len(), 1);
        assert_eq!(kpts[0][0], Point2::new(300., 200., 0.9));
        assert_eq!(kpts[0][1], Point2::default());
        assert_eq!(res.boxes.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn obb_keeps_angle_and_scales_back() {
        // 4 box + 2 classes + angle
        let mut preds = Array3::<f32>::zeros((1, 7, 2));
        set_anchor(&mut preds, 0, &[100., 100., 80., 20., 0.2, 0.85, 0.5]);
        set_anchor(&mut preds, 1, &[101., 100., 80., 20., 0.1, 0.6, 0.5]);

        let config = DetectorConfig::default();
        let mut res = result(1280, 1280);
        processor(Task::Obb, &config)
            .run(&[preds.into_dyn()], &mut res)
            .unwrap();

        let obb = res.obb.as_ref().unwrap();
        assert_eq!(obb.len(), 1);
        assert_eq!(obb[0].class_id, 1);
        assert!(approx_eq!(f32, obb[0].cx, 200.));
        assert!(approx_eq!(f32, obb[0].width, 160.));
        assert!(approx_eq!(f32, obb[0].angle, 0.5));
        assert!(res.boxes.is_none());
    }

    #[test]
    fn segment_masks_are_cropped_to_boxes() {
        // 4 box + 2 classes + 2 mask coefficients
        let mut preds = Array3::<f32>::zeros((1, 8, 1));
        set_anchor(&mut preds, 0, &[320., 320., 320., 320., 0.1, 0.9, 1., 0.]);
        let mut protos = Array4::<f32>::zeros((1, 2, 4, 4));
        protos.slice_mut(s![0, 0, .., ..]).fill(10.);

        let config = DetectorConfig::default();
        let mut res = result(640, 640);
        processor(Task::Segment, &config)
            .run(&[preds.into_dyn(), protos.into_dyn()], &mut res)
            .unwrap();

        let masks = res.masks.as_ref().unwrap();
        assert_eq!(masks.len(), 1);
        assert_eq!((masks[0].width, masks[0].height), (640, 640));
        assert!(masks[0].get(320, 320));
        assert!(!masks[0].get(10, 10));
        assert_eq!(masks[0].area(), 320 * 320);
    }

    #[test]
    fn too_few_channels_is_an_inference_error() {
        let preds = Array3::<f32>::zeros((1, 4, 10));
        let config = DetectorConfig::default();
        let mut res = result(64, 64);
        let err = processor(Task::Detect, &config)
            .run(&[preds.into_dyn()], &mut res)
            .unwrap_err();
        assert!(matches!(err, Error::Inference(_)), "{err}");
    }
}
