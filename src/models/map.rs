//! Records served by the map API and persisted in the JSON documents.
//!
//! Notes
//! - Device and floor records are kept exactly as stored. Accessors read fields leniently: a
//!   value of an unexpected type reads as absent (numbers stand in for text), and the record is
//!   written back untouched.
//! - Identifiers may be JSON strings or numbers; see [`Scalar`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt;

/// A JSON string or number used as an identifier or label.
///
/// Equality is strict on type (`"2"` != `2`) but numeric across number encodings (`7` == `7.0`);
/// [`Scalar::as_key`] gives the string form used for identity, lookup and search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Number(Number),
}

impl Scalar {
    /// Strings and numbers only; anything else is absent.
    pub fn from_value(value: &Value) -> Option<Scalar> {
        match value {
            Value::String(s) => Some(Scalar::Text(s.clone())),
            Value::Number(n) => Some(Scalar::Number(n.clone())),
            _ => None,
        }
    }

    pub fn as_key(&self) -> String {
        match self {
            Scalar::Text(s) => s.clone(),
            Scalar::Number(n) => number_key(n),
        }
    }
}

/// Integral floats print without a fractional part, so `7.0` keys as `"7"`.
fn number_key(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e21 => {
            if f == 0.0 {
                "0".to_string()
            } else {
                format!("{:.0}", f)
            }
        }
        _ => n.to_string(),
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Text(a), Scalar::Text(b)) => a == b,
            (Scalar::Number(a), Scalar::Number(b)) if a.is_f64() || b.is_f64() => a.as_f64() == b.as_f64(),
            (Scalar::Number(a), Scalar::Number(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Number(value.into())
    }
}

/// Normalized position of a device on its floor, both axes in [0,1].
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coords {
    pub x: f64,
    pub y: f64,
}

impl Coords {
    /// Where a device without stored coordinates is drawn.
    pub const CENTER: Coords = Coords { x: 0.5, y: 0.5 };

    pub fn new(x: f64, y: f64) -> Self {
        Coords { x, y }
    }

    pub fn clamped(self) -> Self {
        Coords {
            x: crate::utils::clamp01(self.x),
            y: crate::utils::clamp01(self.y),
        }
    }
}

/// Axis-aligned rectangle in SVG user space (`{minX, minY, width, height}` on the wire).
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBox {
    pub min_x: f64,
    pub min_y: f64,
    pub width: f64,
    pub height: f64,
}

impl ContentBox {
    pub fn new(min_x: f64, min_y: f64, width: f64, height: f64) -> Self {
        ContentBox {
            min_x,
            min_y,
            width,
            height,
        }
    }

    pub fn from_corners(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        ContentBox::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    pub fn max_x(&self) -> f64 {
        self.min_x + self.width
    }

    pub fn max_y(&self) -> f64 {
        self.min_y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Finite origin and strictly positive extent.
    pub fn is_usable(&self) -> bool {
        self.min_x.is_finite()
            && self.min_y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0
    }

    pub fn union(&self, other: &ContentBox) -> ContentBox {
        ContentBox::from_corners(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x().max(other.max_x()),
            self.max_y().max(other.max_y()),
        )
    }

    /// Map a normalized coordinate into this box.
    pub fn denormalize(&self, coords: Coords) -> (f64, f64) {
        (self.min_x + coords.x * self.width, self.min_y + coords.y * self.height)
    }

    /// Inverse of [`ContentBox::denormalize`], clamped into [0,1].
    pub fn normalize(&self, x: f64, y: f64) -> Coords {
        Coords::new((x - self.min_x) / self.width, (y - self.min_y) / self.height).clamped()
    }
}

/// Finite `x` and `y` of a stored `coords` object.
fn read_coords(value: &Value) -> Option<Coords> {
    let axis = |name: &str| value.get(name).and_then(Value::as_f64).filter(|v| v.is_finite());
    Some(Coords::new(axis("x")?, axis("y")?))
}

/// One provisioned device record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Device(Value);

impl Device {
    /// True when the record is a JSON object; anything else never matches or merges.
    pub fn is_record(&self) -> bool {
        self.0.is_object()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    fn scalar(&self, field: &str) -> Option<Scalar> {
        self.get(field).and_then(Scalar::from_value)
    }

    fn text(&self, field: &str) -> Option<String> {
        self.scalar(field).map(|s| s.as_key())
    }

    pub fn id(&self) -> Option<Scalar> {
        self.scalar("id")
    }

    pub fn ip(&self) -> Option<Scalar> {
        self.scalar("ip")
    }

    pub fn name(&self) -> Option<String> {
        self.text("name")
    }

    pub fn building(&self) -> Option<Scalar> {
        self.scalar("building")
    }

    pub fn floor(&self) -> Option<Scalar> {
        self.scalar("floor")
    }

    pub fn orientation(&self) -> Option<String> {
        self.text("orientation")
    }

    /// Stored coordinates when both axes are finite numbers.
    pub fn coords(&self) -> Option<Coords> {
        self.get("coords").and_then(read_coords)
    }

    /// Replace `coords` with `{x, y}`. No-op on a record that is not an object.
    pub fn set_coords(&mut self, coords: Coords) {
        if let Value::Object(fields) = &mut self.0 {
            let mut value = Map::new();
            value.insert("x".to_string(), Value::from(coords.x));
            value.insert("y".to_string(), Value::from(coords.y));
            fields.insert("coords".to_string(), Value::Object(value));
        }
    }

    /// First non-empty of `id`, `ip`, `name`; empty when none is set.
    pub fn identity_key(&self) -> String {
        ["id", "ip", "name"]
            .into_iter()
            .filter_map(|field| self.text(field))
            .find(|key| !key.is_empty())
            .unwrap_or_default()
    }

    /// True when `id` (string form) equals `id`. Used by the coordinate endpoint.
    pub fn has_id(&self, id: &str) -> bool {
        self.id().is_some_and(|own| own.as_key() == id)
    }

    /// Realtime identity rule: shared id, else shared ip, else shared name.
    pub fn same_device(&self, other: &Device) -> bool {
        ["id", "ip", "name"].into_iter().any(|field| match (self.text(field), other.text(field)) {
            (Some(a), Some(b)) => !a.is_empty() && a == b,
            _ => false,
        })
    }

    /// Shallow merge: fields present on `update` overwrite, absent ones are kept.
    pub fn merge_from(&mut self, update: &Device) {
        let Value::Object(changes) = &update.0 else {
            return;
        };
        match &mut self.0 {
            Value::Object(fields) => {
                for (k, v) in changes {
                    fields.insert(k.clone(), v.clone());
                }
            }
            other => *other = update.0.clone(),
        }
    }

    pub fn coords_or_center(&self) -> Coords {
        self.coords().unwrap_or(Coords::CENTER)
    }

    /// Display name: `name`, else the id, else the identity key.
    pub fn display_name(&self) -> String {
        match (self.name(), self.id()) {
            (Some(name), _) if !name.is_empty() => name,
            (_, Some(id)) => id.as_key(),
            _ => self.identity_key(),
        }
    }
}

impl From<Value> for Device {
    fn from(value: Value) -> Self {
        Device(value)
    }
}

/// One floor record: which building/floor it shows and where its drawing lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Floor(Value);

impl Floor {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn id(&self) -> Option<Scalar> {
        self.get("id").and_then(Scalar::from_value)
    }

    /// String form of the id; empty when the record has none.
    pub fn key(&self) -> String {
        self.id().map(|id| id.as_key()).unwrap_or_default()
    }

    pub fn label(&self) -> Option<String> {
        self.get("label").and_then(Scalar::from_value).map(|s| s.as_key())
    }

    pub fn building(&self) -> Option<Scalar> {
        self.get("building").and_then(Scalar::from_value)
    }

    pub fn floor(&self) -> Option<Scalar> {
        self.get("floor").and_then(Scalar::from_value)
    }

    /// Path or URL of the floor-plan SVG.
    pub fn svg(&self) -> Option<String> {
        self.get("svg").and_then(Value::as_str).map(str::to_string)
    }

    /// Manual override of the auto-computed content box (`box`), when all four fields are numbers.
    pub fn content_box(&self) -> Option<ContentBox> {
        let value = self.get("box")?;
        let field = |name: &str| value.get(name).and_then(Value::as_f64);
        Some(ContentBox::new(field("minX")?, field("minY")?, field("width")?, field("height")?))
    }

    pub fn label_or_id(&self) -> String {
        self.label().unwrap_or_else(|| self.key())
    }

    /// A device is on this floor when both building and floor are strictly equal.
    pub fn hosts(&self, device: &Device) -> bool {
        self.building() == device.building() && self.floor() == device.floor()
    }
}

impl From<Value> for Floor {
    fn from(value: Value) -> Self {
        Floor(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceDocument {
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FloorDocument {
    #[serde(default)]
    pub floors: Vec<Floor>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Server-to-client realtime frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "hello")]
    Hello { ts: i64 },
    #[serde(rename = "device.coords.updated")]
    DeviceCoordsUpdated { device: Device },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordsUpdateResponse {
    pub ok: bool,
    pub device: Device,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
