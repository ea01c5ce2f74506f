//! Single-owner viewer state: loaded collections, floor selection, filters, camera and drag.
//!
//! All mutation is synchronous. Rendering reads this state through [`crate::viewer::render`].

use crate::models::map::{ContentBox, Coords, Device, Floor, ServerEvent};
use crate::viewer::camera::{Camera, ScreenSize};
use crate::viewer::geometry::{self, FloorGeometry, SvgError};
use log::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    /// Case-insensitive substring over name, ip and id; trimmed before use.
    pub search: String,
    /// Exact match on `orientation` when set.
    pub orientation: Option<String>,
}

/// Entry of the floor selector.
#[derive(Debug, Clone, PartialEq)]
pub struct FloorOption {
    pub id: String,
    pub label: String,
}

/// Coordinate write produced by a finished drag, keyed by the device identity key.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSave {
    pub device_key: String,
    pub coords: Coords,
}

#[derive(Debug, Clone, PartialEq)]
struct DragState {
    device_key: String,
    /// User-space pointer position at the last pointer event.
    last_pointer: (f64, f64),
    /// User-space marker position, moved by pointer deltas.
    position: (f64, f64),
}

#[derive(Debug, Clone, PartialEq)]
struct LoadedFloor {
    floor_key: String,
    geometry: FloorGeometry,
    content_box: ContentBox,
    camera: Camera,
}

#[derive(Debug, Clone)]
pub struct ViewerState {
    pub floors: Vec<Floor>,
    pub devices: Vec<Device>,
    pub filters: Filters,
    pub admin: bool,
    current_floor: Option<String>,
    screen: ScreenSize,
    loaded: Option<LoadedFloor>,
    drag: Option<DragState>,
}

impl ViewerState {
    pub fn new(screen: ScreenSize) -> Self {
        ViewerState {
            floors: Vec::new(),
            devices: Vec::new(),
            filters: Filters::default(),
            admin: false,
            current_floor: None,
            screen,
            loaded: None,
            drag: None,
        }
    }

    pub fn floor_options(&self) -> Vec<FloorOption> {
        self.floors
            .iter()
            .map(|f| FloorOption {
                id: f.key(),
                label: f.label_or_id(),
            })
            .collect()
    }

    /// Distinct device orientations, sorted, for the orientation filter.
    pub fn orientations(&self) -> Vec<String> {
        let mut all: Vec<String> = self.devices.iter().filter_map(Device::orientation).collect();
        all.sort();
        all.dedup();
        all
    }

    pub fn current_floor(&self) -> Option<&Floor> {
        let key = self.current_floor.as_deref()?;
        self.floors.iter().find(|f| f.key() == key)
    }

    /// Select a floor by id; drops the loaded drawing until [`ViewerState::load_floor_svg`] runs.
    pub fn select_floor(&mut self, id: &str) -> Option<&Floor> {
        if !self.floors.iter().any(|f| f.key() == id) {
            debug!("Ignoring selection of unknown floor {}", id);
            return None;
        }
        self.current_floor = Some(id.to_string());
        self.loaded = None;
        self.drag = None;
        self.current_floor()
    }

    /// Pick the first floor when nothing is selected yet.
    pub fn select_first_floor(&mut self) -> Option<&Floor> {
        if self.current_floor.is_none() {
            let first = self.floors.first()?.key();
            return self.select_floor(&first);
        }
        self.current_floor()
    }

    /// Analyze the selected floor's SVG and fit the camera to its effective box.
    pub fn load_floor_svg(&mut self, svg: &str) -> Result<&FloorGeometry, SvgError> {
        let geometry = geometry::analyze_svg(svg)?;
        let floor = self.current_floor();
        let floor_key = floor.map(Floor::key).unwrap_or_default();
        let content_box = geometry.effective_box(floor.and_then(Floor::content_box));
        debug!("Floor {} content box {:?}", floor_key, content_box);
        let camera = Camera::new(content_box, self.screen, geometry.fit);
        self.drag = None;
        let loaded = self.loaded.insert(LoadedFloor {
            floor_key,
            geometry,
            content_box,
            camera,
        });
        Ok(&loaded.geometry)
    }

    pub fn geometry(&self) -> Option<&FloorGeometry> {
        self.loaded.as_ref().map(|l| &l.geometry)
    }

    pub fn camera(&self) -> Option<&Camera> {
        self.loaded.as_ref().map(|l| &l.camera)
    }

    pub fn camera_mut(&mut self) -> Option<&mut Camera> {
        self.loaded.as_mut().map(|l| &mut l.camera)
    }

    pub fn loaded_floor_id(&self) -> Option<&str> {
        self.loaded.as_ref().map(|l| l.floor_key.as_str())
    }

    pub fn resize(&mut self, screen: ScreenSize) {
        self.screen = screen;
        if let Some(camera) = self.camera_mut() {
            camera.resize(screen);
        }
    }

    /// Normalization reference for marker placement.
    ///
    /// Before any drawing is loaded: the floor's manual box, else `0 0 100 100`.
    pub fn effective_box(&self) -> ContentBox {
        if let Some(loaded) = &self.loaded {
            return loaded.content_box;
        }
        self.current_floor()
            .and_then(Floor::content_box)
            .filter(ContentBox::is_usable)
            .unwrap_or(geometry::FALLBACK_VIEW_BOX)
    }

    pub fn devices_for_current_floor(&self) -> Vec<&Device> {
        let Some(floor) = self.current_floor() else {
            return Vec::new();
        };
        let term = self.filters.search.trim().to_lowercase();
        self.devices
            .iter()
            .filter(|d| floor.hosts(d))
            .filter(|d| match &self.filters.orientation {
                Some(o) => d.orientation().as_ref() == Some(o),
                None => true,
            })
            .filter(|d| term.is_empty() || matches_search(d, &term))
            .collect()
    }

    /// User-space marker position; the drag position wins while that device is dragged.
    pub fn marker_position(&self, device: &Device) -> (f64, f64) {
        if let Some(drag) = &self.drag {
            if drag.device_key == device.identity_key() {
                return drag.position;
            }
        }
        self.effective_box().denormalize(device.coords_or_center())
    }

    pub fn dragging(&self) -> Option<&str> {
        self.drag.as_ref().map(|d| d.device_key.as_str())
    }

    /// Set coordinates on the first device whose identity key equals `key`.
    pub fn optimistic_set_coords(&mut self, key: &str, coords: Coords) -> bool {
        match self.devices.iter_mut().find(|d| d.identity_key() == key) {
            Some(device) => {
                device.set_coords(coords);
                true
            }
            None => false,
        }
    }

    /// Merge a pushed device into the matching record, or append it.
    pub fn reconcile(&mut self, update: &Device) {
        if !update.is_record() {
            debug!("Ignoring pushed device that is not an object");
            return;
        }
        match self.devices.iter_mut().find(|d| d.same_device(update)) {
            Some(existing) => existing.merge_from(update),
            None => self.devices.push(update.clone()),
        }
    }

    pub fn apply_event(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::Hello { ts } => debug!("Realtime channel greeted at {}", ts),
            ServerEvent::DeviceCoordsUpdated { device } => self.reconcile(device),
        }
    }

    /// Pointer-down on a marker at screen point `(px, py)`. Admin mode and a loaded floor only.
    pub fn begin_drag(&mut self, key: &str, px: f64, py: f64) -> bool {
        if !self.admin {
            return false;
        }
        let Some(pointer) = self.camera().map(|c| c.screen_to_user(px, py)) else {
            return false;
        };
        let Some(position) = self
            .devices_for_current_floor()
            .into_iter()
            .find(|d| d.identity_key() == key)
            .map(|d| self.marker_position(d))
        else {
            return false;
        };
        self.drag = Some(DragState {
            device_key: key.to_string(),
            last_pointer: pointer,
            position,
        });
        true
    }

    /// Pointer-move: translate the dragged marker by the user-space pointer delta.
    pub fn drag_move(&mut self, px: f64, py: f64) {
        let Some(pointer) = self.camera().map(|c| c.screen_to_user(px, py)) else {
            return;
        };
        if let Some(drag) = self.drag.as_mut() {
            drag.position.0 += pointer.0 - drag.last_pointer.0;
            drag.position.1 += pointer.1 - drag.last_pointer.1;
            drag.last_pointer = pointer;
        }
    }

    /// Pointer-up: normalize the final position, update locally and return the write to send.
    pub fn end_drag(&mut self) -> Option<PendingSave> {
        let drag = self.drag.take()?;
        let coords = self.effective_box().normalize(drag.position.0, drag.position.1);
        self.optimistic_set_coords(&drag.device_key, coords);
        Some(PendingSave {
            device_key: drag.device_key,
            coords,
        })
    }

    pub fn cancel_drag(&mut self) {
        self.drag = None;
    }
}

fn matches_search(device: &Device, term: &str) -> bool {
    let name = device.name().map(|v| v.to_lowercase());
    let ip = device.ip().map(|v| v.as_key().to_lowercase());
    let id = device.id().map(|v| v.as_key().to_lowercase());
    [name, ip, id].into_iter().flatten().any(|field| field.contains(term))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PLAIN_FLOOR: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 1000 800"></svg>"#;

    fn state() -> ViewerState {
        let mut s = ViewerState::new(ScreenSize::new(1000.0, 800.0));
        s.floors = serde_json::from_value(json!([
            {"id": "hq-1", "label": "HQ / 1", "building": "HQ", "floor": 1, "svg": "/floors/hq-1.svg"},
            {"id": "hq-2", "building": "HQ", "floor": 2, "svg": "/floors/hq-2.svg",
             "box": {"minX": 100, "minY": 100, "width": 200, "height": 100}}
        ]))
        .expect("floors");
        s.devices = serde_json::from_value(json!([
            {"id": "dev-1", "name": "Lobby AP", "ip": "10.0.0.1", "building": "HQ", "floor": 1, "orientation": "ceiling"},
            {"id": "dev-2", "name": "Desk Sensor", "ip": "10.0.0.2", "building": "HQ", "floor": 1, "orientation": "wall",
             "coords": {"x": 0.25, "y": 0.75}},
            {"ip": "10.0.0.3", "name": "Printer", "building": "HQ", "floor": "1"},
            {"id": "dev-4", "building": "HQ", "floor": 2}
        ]))
        .expect("devices");
        s
    }

    fn keys(devices: Vec<&Device>) -> Vec<String> {
        devices.into_iter().map(Device::identity_key).collect()
    }

    #[test]
    fn first_floor_is_auto_selected() {
        let mut s = state();
        assert_eq!(
            s.floor_options(),
            vec![
                FloorOption { id: "hq-1".into(), label: "HQ / 1".into() },
                FloorOption { id: "hq-2".into(), label: "hq-2".into() },
            ]
        );
        assert_eq!(s.select_first_floor().map(Floor::key), Some("hq-1".to_string()));
        s.select_floor("hq-2");
        assert_eq!(s.select_first_floor().map(Floor::key), Some("hq-2".to_string()));
        assert!(s.select_floor("nope").is_none());
    }

    #[test]
    fn filters_by_floor_orientation_and_search() {
        let mut s = state();
        s.select_first_floor();
        // "1" (string) on the printer does not match floor 1 (number)
        assert_eq!(keys(s.devices_for_current_floor()), ["dev-1", "dev-2"]);

        s.filters.orientation = Some("wall".into());
        assert_eq!(keys(s.devices_for_current_floor()), ["dev-2"]);

        s.filters.orientation = None;
        s.filters.search = "  LOBBY ".into();
        assert_eq!(keys(s.devices_for_current_floor()), ["dev-1"]);
        s.filters.search = "10.0.0.2".into();
        assert_eq!(keys(s.devices_for_current_floor()), ["dev-2"]);
        s.filters.search = "DEV-".into();
        assert_eq!(keys(s.devices_for_current_floor()), ["dev-1", "dev-2"]);
        assert_eq!(s.orientations(), ["ceiling", "wall"]);
    }

    #[test]
    fn marker_sits_at_content_box_centre_by_default() {
        let mut s = state();
        s.select_first_floor();
        s.load_floor_svg(PLAIN_FLOOR).expect("svg");
        let dev = s.devices[0].clone();
        assert_eq!(s.marker_position(&dev), (500.0, 400.0));
        let placed = s.devices[1].clone();
        assert_eq!(s.marker_position(&placed), (250.0, 600.0));
    }

    #[test]
    fn manual_box_overrides_drawing_bounds() {
        let mut s = state();
        s.select_floor("hq-2");
        assert_eq!(s.effective_box(), ContentBox::new(100.0, 100.0, 200.0, 100.0));
        s.load_floor_svg(PLAIN_FLOOR).expect("svg");
        assert_eq!(s.effective_box(), ContentBox::new(100.0, 100.0, 200.0, 100.0));
        assert_eq!(s.loaded_floor_id(), Some("hq-2"));
        let dev = s.devices[3].clone();
        assert_eq!(s.marker_position(&dev), (200.0, 150.0));
    }

    #[test]
    fn realtime_update_merges_or_appends() {
        let mut s = state();
        let update: Device = serde_json::from_value(json!({"id": "dev-1", "coords": {"x": 1.0, "y": 0.0}})).expect("device");
        s.apply_event(&ServerEvent::DeviceCoordsUpdated { device: update });
        assert_eq!(s.devices.len(), 4);
        assert_eq!(s.devices[0].coords(), Some(Coords::new(1.0, 0.0)));
        assert_eq!(s.devices[0].name().as_deref(), Some("Lobby AP"));

        let by_ip: Device = serde_json::from_value(json!({"ip": "10.0.0.3", "coords": {"x": 0.1, "y": 0.1}})).expect("device");
        s.reconcile(&by_ip);
        assert_eq!(s.devices[2].coords(), Some(Coords::new(0.1, 0.1)));

        let stranger: Device = serde_json::from_value(json!({"id": "dev-9", "building": "HQ", "floor": 1})).expect("device");
        s.reconcile(&stranger);
        assert_eq!(s.devices.len(), 5);
        s.apply_event(&ServerEvent::Hello { ts: 1 });
        s.reconcile(&Device::from(json!(42)));
        assert_eq!(s.devices.len(), 5);
    }

    #[test]
    fn drag_requires_admin_and_produces_clamped_save() {
        let mut s = state();
        s.select_first_floor();
        s.load_floor_svg(PLAIN_FLOOR).expect("svg");
        // camera shows (-50,-40)..(1050,840) at 1000/1100 px per unit
        let (px, py) = s.camera().expect("camera").user_to_screen(500.0, 400.0);
        assert!(!s.begin_drag("dev-1", px, py));

        s.admin = true;
        assert!(s.begin_drag("dev-1", px, py));
        assert_eq!(s.dragging(), Some("dev-1"));
        s.drag_move(px + 100.0, py);
        s.drag_move(px + 100.0, py + 50.0);
        let dragged = s.devices[0].clone();
        let (mx, my) = s.marker_position(&dragged);
        assert!((mx - 610.0).abs() < 1e-9 && (my - 455.0).abs() < 1e-9);

        let save = s.end_drag().expect("save");
        assert_eq!(save.device_key, "dev-1");
        assert!((save.coords.x - 0.61).abs() < 1e-9);
        assert!((save.coords.y - 455.0 / 800.0).abs() < 1e-9);
        assert_eq!(s.devices[0].coords(), Some(save.coords));
        assert_eq!(s.dragging(), None);

        assert!(s.begin_drag("dev-2", 0.0, 0.0));
        s.drag_move(-5000.0, -5000.0);
        let save = s.end_drag().expect("save");
        assert_eq!(save.coords, Coords::new(0.0, 0.0));
    }

    #[test]
    fn drag_of_device_not_on_floor_is_refused() {
        let mut s = state();
        s.admin = true;
        s.select_first_floor();
        assert!(!s.begin_drag("dev-1", 10.0, 10.0), "no drawing loaded yet");
        s.load_floor_svg(PLAIN_FLOOR).expect("svg");
        assert!(!s.begin_drag("dev-4", 10.0, 10.0));
        assert!(s.end_drag().is_none());
    }
}
