use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Encoded image bytes, shared by reference between steps
#[derive(Clone)]
pub struct Image {
    data: Arc<[u8]>,
}

impl Image {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Arc::from(bytes.into()),
        }
    }

    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        Ok(Self::from_bytes(BASE64.decode(encoded.trim())?))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.data)
    }

    /// True when both handles point at the same buffer
    pub fn ptr_eq(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.data == other.data
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Image({} bytes)", self.data.len())
    }
}

/// Pixel-space box `[x1, y1, x2, y2]`, origin top-left
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Result<Self, String> {
        if ![x1, y1, x2, y2].iter().all(|c| c.is_finite()) {
            return Err("bounding box coordinates must be finite".to_string());
        }
        if x1 > x2 || y1 > y2 {
            return Err(format!(
                "bounding box [{}, {}, {}, {}] has inverted corners",
                x1, y1, x2, y2
            ));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Coerce a literal plan value such as `[10, 10, 100, 100]`
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let coords = value
            .as_array()
            .ok_or_else(|| format!("expected a 4-element array, got {}", value))?;
        if coords.len() != 4 {
            return Err(format!("expected 4 coordinates, got {}", coords.len()));
        }
        let mut parsed = [0f64; 4];
        for (slot, coord) in parsed.iter_mut().zip(coords) {
            *slot = coord
                .as_f64()
                .ok_or_else(|| format!("coordinate {} is not a number", coord))?;
        }
        Self::try_from(parsed)
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }
}

impl TryFrom<[f64; 4]> for BoundingBox {
    type Error = String;

    fn try_from([x1, y1, x2, y2]: [f64; 4]) -> Result<Self, Self::Error> {
        Self::new(x1, y1, x2, y2)
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x1, self.y1, self.x2, self.y2)
    }
}

/// Output of one dispatched step
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Image(Image),
    Text(String),
    BoundingBox(BoundingBox),
    /// Explicit "nothing found"
    None,
}

impl ToolResult {
    pub fn is_none(&self) -> bool {
        matches!(self, ToolResult::None)
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            ToolResult::Image(_) => "image",
            ToolResult::Text(_) => "text",
            ToolResult::BoundingBox(_) => "bounding_box",
            ToolResult::None => "none",
        }
    }

    /// Serialised form stored on a successful job
    pub fn to_payload(&self) -> ResultPayload {
        match self {
            ToolResult::Image(image) => ResultPayload::Image(image.to_base64()),
            ToolResult::Text(text) => ResultPayload::Text(text.clone()),
            ToolResult::BoundingBox(b) => ResultPayload::Text(b.to_string()),
            ToolResult::None => ResultPayload::Text(NO_RESULT_TEXT.to_string()),
        }
    }
}

pub const NO_RESULT_TEXT: &str = "No result found.";

/// Final result of a job as seen by observers: `{"type": ..., "data": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ResultPayload {
    /// Base64-encoded image
    Image(String),
    Text(String),
}

impl ResultPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            ResultPayload::Image(_) => "image",
            ResultPayload::Text(_) => "text",
        }
    }

    pub fn data(&self) -> &str {
        match self {
            ResultPayload::Image(data) | ResultPayload::Text(data) => data,
        }
    }
}
