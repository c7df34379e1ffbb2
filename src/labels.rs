use regex::Regex;

/// Class names of the 80-class COCO detection models.
pub const COCO_CLASS_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Largest class id accepted from model metadata.
pub const MAX_CLASS_ID: usize = 1 << 16;

/// Parse the `names` entry Ultralytics writes into ONNX metadata,
/// e.g. `{0: 'person', 1: 'bicycle'}`, into a dense list indexed by class id.
///
/// Returns `None` when nothing in the string looks like a name or a class id exceeds
/// [`MAX_CLASS_ID`].
pub fn parse_names(raw: &str) -> Option<Vec<String>> {
    let re = Regex::new(r#"(\d+)\s*:\s*['"]([^'"]*)['"]"#).ok()?;

    let mut entries: Vec<(usize, String)> = re
        .captures_iter(raw)
        .filter_map(|c| Some((c[1].parse().ok()?, c[2].to_string())))
        .collect();
    if entries.is_empty() || entries.iter().any(|(id, _)| *id > MAX_CLASS_ID) {
        return None;
    }
    entries.sort_by_key(|(id, _)| *id);

    let len = entries.last().map(|(id, _)| id + 1)?;
    let mut names: Vec<String> = (0..len).map(|i| format!("class{i}")).collect();
    for (id, name) in entries {
        names[id] = name;
    }
    Some(names)
}

/// Parse a two element metadata entry such as `kpt_shape: [17, 3]` or `imgsz: [640, 640]`.
pub fn parse_pair(raw: &str) -> Option<(usize, usize)> {
    let dims: Vec<usize> = raw
        .trim_matches(|c| c == '[' || c == ']' || c == '(' || c == ')')
        .split(',')
        .map(|d| d.trim().parse().ok())
        .collect::<Option<_>>()?;
    match dims[..] {
        [n, d] => Some((n, d)),
        _ => None,
    }
}

pub fn coco_names() -> Vec<String> {
    COCO_CLASS_LABELS.iter().map(|s| s.to_string()).collect()
}
