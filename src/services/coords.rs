use crate::db::store::{DocumentStore, StoreError};
use crate::models::map::{Coords, Device};
use log::info;
use serde_json::Value;
use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Errors from the coordinate update path.
#[derive(Debug)]
pub enum UpdateError {
    /// `x` or `y` missing, non-numeric or non-finite.
    InvalidCoords,
    /// No device has the requested `id`.
    DeviceNotFound(String),
    Store(StoreError),
}

impl Display for UpdateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            UpdateError::InvalidCoords => write!(f, "x and y must be finite numbers in [0,1]"),
            UpdateError::DeviceNotFound(_) => write!(f, "Device not found"),
            UpdateError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl Error for UpdateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            UpdateError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for UpdateError {
    fn from(value: StoreError) -> Self {
        UpdateError::Store(value)
    }
}

/// Validate a request body `{x, y}` and clamp both into [0,1].
///
/// Anything that is not a JSON number (strings, null, absent) is rejected, as is any body
/// that is not an object.
pub fn parse_coords(body: &Value) -> Result<Coords, UpdateError> {
    let axis = |name: &str| {
        body.get(name)
            .filter(|v| v.is_number())
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite())
            .ok_or(UpdateError::InvalidCoords)
    };
    Ok(Coords::new(axis("x")?, axis("y")?).clamped())
}

/// Store `coords` on the device whose `id` string-equals `id` and persist the collection.
///
/// `on_saved` sees the updated record before the next writer can start.
pub fn apply_coords<F>(store: &DocumentStore, id: &str, coords: Coords, on_saved: F) -> Result<Device, UpdateError>
where
    F: FnOnce(&Device),
{
    let device = store
        .update_device(id, |d| d.set_coords(coords), on_saved)?
        .ok_or_else(|| UpdateError::DeviceNotFound(id.to_string()))?;
    info!("Device {} moved to ({:.4}, {:.4})", id, coords.x, coords.y);
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::{StorePaths, DEVICES_FILE};
    use serde_json::json;

    #[test]
    fn clamps_out_of_range_values() {
        let c = parse_coords(&json!({"x": 1.5, "y": -0.2})).expect("valid");
        assert_eq!(c, Coords::new(1.0, 0.0));
        let c = parse_coords(&json!({"x": 0.3, "y": 0.6})).expect("valid");
        assert_eq!(c, Coords::new(0.3, 0.6));
    }

    #[test]
    fn rejects_non_numeric_and_missing_values() {
        for body in [
            json!({"x": "0.5", "y": 0.5}),
            json!({"x": 0.5}),
            json!({"x": null, "y": 0.5}),
            json!({"x": 0.5, "y": [1]}),
            json!([0.5, 0.5]),
            Value::Null,
            Value::from(f64::NAN),
        ] {
            assert!(
                matches!(parse_coords(&body), Err(UpdateError::InvalidCoords)),
                "accepted {body}"
            );
        }
    }

    #[test]
    fn unknown_device_is_not_found_and_leaves_store_untouched() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join(DEVICES_FILE);
        let original = r#"{"devices":[{"id":"dev-1"}]}"#;
        std::fs::write(&path, original).expect("seed");
        let store = DocumentStore::new(StorePaths::resolve(tmp.path(), None));

        let err = apply_coords(&store, "dev-9", Coords::CENTER, |_| {}).expect_err("unknown id");
        assert!(matches!(err, UpdateError::DeviceNotFound(ref id) if id == "dev-9"));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), original);
    }

    #[test]
    fn float_encoded_id_is_found_by_its_integer_form() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::write(tmp.path().join(DEVICES_FILE), r#"{"devices":[{"id":7.0}]}"#).expect("seed");
        let store = DocumentStore::new(StorePaths::resolve(tmp.path(), None));
        let device = apply_coords(&store, "7", Coords::CENTER, |_| {}).expect("found");
        assert_eq!(device.coords(), Some(Coords::CENTER));
    }

    #[test]
    fn repeated_update_is_idempotent() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::write(tmp.path().join(DEVICES_FILE), r#"{"devices":[{"id":"dev-1"}]}"#).expect("seed");
        let store = DocumentStore::new(StorePaths::resolve(tmp.path(), None));
        let coords = parse_coords(&json!({"x": 0.4, "y": 0.9})).expect("valid");

        let mut notified = 0;
        let first = apply_coords(&store, "dev-1", coords, |_| notified += 1).expect("first");
        let second = apply_coords(&store, "dev-1", coords, |_| notified += 1).expect("second");
        assert_eq!(first, second);
        assert_eq!(notified, 2);
        let stored = store.load_devices().expect("load");
        assert_eq!(stored.devices[0].coords(), Some(Coords::new(0.4, 0.9)));
    }
}
