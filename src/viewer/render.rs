//! Pure rendering of [`ViewerState`] into marker and device-list models.
//!
//! `render` has no side effects and gives the same [`View`] for the same state, so callers can
//! redraw wholesale after every mutation.

use crate::models::map::{Device, Floor, Scalar};
use crate::viewer::state::{FloorOption, ViewerState};
use std::fmt::Write as _;

pub const MARKER_RADIUS: f64 = 6.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    /// Identity key of the device (id, else ip, else name).
    pub key: String,
    pub label: String,
    /// Position in floor user space.
    pub x: f64,
    pub y: f64,
    pub dragging: bool,
}

impl Marker {
    fn write_svg(&self, out: &mut String) {
        let class = if self.dragging { "marker dragging" } else { "marker" };
        let _ = write!(
            out,
            r#"<g class="{}" data-id="{}" transform="translate({}, {})"><circle r="{}"/><text x="10" y="4">{}</text></g>"#,
            class,
            htmlize::escape_attribute(self.key.as_str()),
            self.x,
            self.y,
            MARKER_RADIUS,
            htmlize::escape_text(self.label.as_str()),
        );
    }
}

/// One entry of the device list.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCard {
    pub key: String,
    pub title: String,
    pub ip: String,
    pub orientation: String,
    pub building: String,
    pub floor: String,
    pub x: f64,
    pub y: f64,
}

impl DeviceCard {
    fn from_device(device: &Device) -> Self {
        let text = |v: Option<Scalar>| v.as_ref().map(Scalar::as_key).unwrap_or_default();
        let coords = device.coords_or_center();
        DeviceCard {
            key: device.identity_key(),
            title: device.display_name(),
            ip: text(device.ip()),
            orientation: device.orientation().unwrap_or_default(),
            building: text(device.building()),
            floor: text(device.floor()),
            x: coords.x,
            y: coords.y,
        }
    }

    pub fn lines(&self) -> [String; 4] {
        [
            self.title.clone(),
            format!("{} - {}", self.ip, self.orientation),
            format!("{} / {}", self.building, self.floor),
            format!("x:{:.3} y:{:.3}", self.x, self.y),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub floor_options: Vec<FloorOption>,
    pub selected_floor: Option<String>,
    /// Shared viewBox of the floor drawing and the marker overlay, once a drawing is loaded.
    pub view_box: Option<String>,
    pub markers: Vec<Marker>,
    pub cards: Vec<DeviceCard>,
}

impl View {
    /// The `<g id="markers">` fragment placed inside the overlay.
    pub fn markers_svg(&self) -> String {
        let mut out = String::from(r#"<g id="markers">"#);
        for marker in &self.markers {
            marker.write_svg(&mut out);
        }
        out.push_str("</g>");
        out
    }

    /// Full overlay element carrying the camera viewBox.
    pub fn marker_layer_svg(&self) -> String {
        match &self.view_box {
            Some(vb) => format!(
                r#"<svg xmlns="http://www.w3.org/2000/svg" id="marker-layer" viewBox="{}">{}</svg>"#,
                vb,
                self.markers_svg()
            ),
            None => format!(
                r#"<svg xmlns="http://www.w3.org/2000/svg" id="marker-layer">{}</svg>"#,
                self.markers_svg()
            ),
        }
    }
}

pub fn render(state: &ViewerState) -> View {
    let visible = state.devices_for_current_floor();
    let dragging = state.dragging();
    let markers = visible
        .iter()
        .map(|d| {
            let (x, y) = state.marker_position(d);
            let key = d.identity_key();
            Marker {
                dragging: dragging == Some(key.as_str()),
                key,
                label: d.display_name(),
                x,
                y,
            }
        })
        .collect();

    View {
        floor_options: state.floor_options(),
        selected_floor: state.current_floor().map(Floor::key),
        view_box: state.camera().map(|c| c.view().view_box_attr()),
        markers,
        cards: visible.into_iter().map(DeviceCard::from_device).collect(),
    }
}
