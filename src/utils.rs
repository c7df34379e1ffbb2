use std::cmp::Ordering;

use crate::results::OrientedBox;

// argsort_by function from: https://github.com/rust-ndarray/ndarray/issues/1145
pub fn argsort_by<T, F>(arr: &[T], mut compare: F) -> Vec<usize>
where
    F: FnMut(&T, &T) -> Ordering,
{
    let mut indices: Vec<usize> = (0..arr.len()).collect();
    indices.sort_by(move |&i, &j| compare(&arr[i], &arr[j]));
    indices
}

/// Greedy non-maximum suppression.
///
/// Returns the indices of the kept candidates, highest score first. A candidate is
/// dropped when `overlap` with an already kept one exceeds `iou_thr`. Boxes of
/// different classes never suppress each other unless `agnostic` is set.
pub(crate) fn nms<T>(
    candidates: &[T],
    score: impl Fn(&T) -> f32,
    class: impl Fn(&T) -> usize,
    overlap: impl Fn(&T, &T) -> f32,
    iou_thr: f32,
    agnostic: bool,
    max_det: usize,
) -> Vec<usize> {
    let order = argsort_by(candidates, |a, b| score(b).total_cmp(&score(a)));

    let mut keep: Vec<usize> = vec![];
    for i in order {
        if keep.len() >= max_det {
            break;
        }
        let suppressed = keep.iter().any(|&k| {
            (agnostic || class(&candidates[k]) == class(&candidates[i]))
                && overlap(&candidates[k], &candidates[i]) > iou_thr
        });
        if !suppressed {
            keep.push(i);
        }
    }

    keep
}

/// Probabilistic IoU of two rotated boxes, from their Gaussian approximations.
///
/// See "Gaussian Bounding Boxes and Probabilistic Intersection-over-Union" (Llerena et al.).
pub(crate) fn probiou(b1: &OrientedBox, b2: &OrientedBox) -> f32 {
    const EPS: f32 = 1e-7;

    let (a1, b1c, c1) = b1.covariance();
    let (a2, b2c, c2) = b2.covariance();
    let (dx, dy) = (b1.cx - b2.cx, b1.cy - b2.cy);

    let (a, b, c) = (a1 + a2, b1c + b2c, c1 + c2);
    let denom = a * b - c * c + EPS;

    let t1 = (a * dy * dy + b * dx * dx) / denom * 0.25;
    let t2 = (c * (-dx) * dy) / denom * 0.5;
    let det1 = (a1 * b1c - c1 * c1).max(0.);
    let det2 = (a2 * b2c - c2 * c2).max(0.);
    let t3 = ((a * b - c * c) / (4. * (det1 * det2).sqrt() + EPS) + EPS).ln() * 0.5;

    let bd = (t1 + t2 + t3).clamp(EPS, 100.);
    let hd = (1. - (-bd).exp() + EPS).sqrt();
    1. - hd
}

pub(crate) fn sigmoid(x: f32) -> f32 {
    1. / (1. + (-x).exp())
}
