//! Viewer session: drives [`ViewerState`] over the map API.
//!
//! Load order: floors, devices, realtime channel, floor selector, first floor, its drawing.
//! Pushed frames are pulled with [`ViewerSession::next_event`].

use crate::client::{MapClient, MapClientError, RealtimeChannel};
use crate::models::map::{Device, Floor, ServerEvent};
use crate::viewer::camera::ScreenSize;
use crate::viewer::geometry::SvgError;
use crate::viewer::render::{self, View};
use crate::viewer::state::{PendingSave, ViewerState};
use log::{debug, error, info, warn};
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

#[derive(Debug)]
pub enum SessionError {
    Client(MapClientError),
    Svg(SvgError),
    UnknownFloor(String),
    /// No realtime channel is open.
    Offline,
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Client(e) => write!(f, "{}", e),
            SessionError::Svg(e) => write!(f, "{}", e),
            SessionError::UnknownFloor(id) => write!(f, "unknown floor {}", id),
            SessionError::Offline => write!(f, "realtime channel is not connected"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SessionError::Client(e) => Some(e),
            SessionError::Svg(e) => Some(e),
            SessionError::UnknownFloor(_) | SessionError::Offline => None,
        }
    }
}

impl From<MapClientError> for SessionError {
    fn from(value: MapClientError) -> Self {
        SessionError::Client(value)
    }
}

impl From<SvgError> for SessionError {
    fn from(value: SvgError) -> Self {
        SessionError::Svg(value)
    }
}

pub struct ViewerSession {
    client: MapClient,
    state: ViewerState,
    realtime: Option<RealtimeChannel>,
}

impl ViewerSession {
    pub fn new(client: MapClient, screen: ScreenSize) -> Self {
        ViewerSession {
            client,
            state: ViewerState::new(screen),
            realtime: None,
        }
    }

    pub fn state(&self) -> &ViewerState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ViewerState {
        &mut self.state
    }

    pub fn view(&self) -> View {
        render::render(&self.state)
    }

    /// Fetch both collections, open the realtime channel and open the first floor.
    ///
    /// A channel that cannot be opened is logged and the session stays offline. A floor
    /// drawing that cannot be fetched or parsed is logged; markers then fall back to the floor's
    /// manual box or the default viewBox.
    pub fn load(&mut self) -> Result<(), SessionError> {
        self.state.floors = self.client.floors()?;
        self.state.devices = self.client.devices()?;
        info!(
            "Loaded {} floor(s) and {} device(s) from {}",
            self.state.floors.len(),
            self.state.devices.len(),
            self.client.base_url()
        );
        self.connect_realtime();
        if self.state.select_first_floor().is_some() {
            if let Err(e) = self.load_current_drawing() {
                warn!("Floor drawing unavailable: {}", e);
            }
        }
        Ok(())
    }

    pub fn select_floor(&mut self, id: &str) -> Result<(), SessionError> {
        if self.state.select_floor(id).is_none() {
            return Err(SessionError::UnknownFloor(id.to_string()));
        }
        self.load_current_drawing()
    }

    /// (Re)open the realtime channel, replacing any open one.
    pub fn connect_realtime(&mut self) -> bool {
        if let Some(old) = self.realtime.take() {
            old.close();
        }
        match self.client.connect_realtime() {
            Ok(channel) => {
                self.realtime = Some(channel);
                true
            }
            Err(e) => {
                warn!("Realtime channel unavailable: {}", e);
                false
            }
        }
    }

    pub fn is_online(&self) -> bool {
        self.realtime.is_some()
    }

    /// Wait up to `timeout` for one pushed event and apply it.
    ///
    /// Returns `None` on timeout. Frames that are not known events are skipped. A read failure
    /// closes the channel and the session goes offline.
    pub fn next_event(&mut self, timeout: Duration) -> Result<Option<ServerEvent>, SessionError> {
        loop {
            let Some(channel) = self.realtime.as_mut() else {
                return Err(SessionError::Offline);
            };
            let text = match channel.next_text(timeout) {
                Ok(Some(text)) => text,
                Ok(None) => return Ok(None),
                Err(e) => {
                    self.realtime = None;
                    return Err(e.into());
                }
            };
            if let Some(event) = decode_event(&text) {
                self.state.apply_event(&event);
                return Ok(Some(event));
            }
        }
    }

    fn load_current_drawing(&mut self) -> Result<(), SessionError> {
        let Some(svg_path) = self.state.current_floor().and_then(Floor::svg) else {
            debug!("Floor has no drawing");
            return Ok(());
        };
        let svg = self.client.floor_svg(&svg_path)?;
        self.state.load_floor_svg(&svg)?;
        Ok(())
    }

    pub fn pointer_down(&mut self, key: &str, px: f64, py: f64) -> bool {
        self.state.begin_drag(key, px, py)
    }

    pub fn pointer_move(&mut self, px: f64, py: f64) {
        self.state.drag_move(px, py);
    }

    /// Finish a drag: local state is already updated when the save is sent.
    ///
    /// A failed save is logged and the optimistic position is kept.
    pub fn pointer_up(&mut self) -> Option<PendingSave> {
        let pending = self.state.end_drag()?;
        if let Err(e) = self.save(&pending) {
            error!("Saving coordinates for {} failed: {}", pending.device_key, e);
        }
        Some(pending)
    }

    pub fn save(&self, pending: &PendingSave) -> Result<Device, MapClientError> {
        self.client
            .put_coords(&pending.device_key, pending.coords.x, pending.coords.y)
    }

    /// Apply one realtime text frame. Returns whether local state changed.
    pub fn handle_realtime_message(&mut self, text: &str) -> bool {
        match decode_event(text) {
            Some(event) => {
                self.state.apply_event(&event);
                matches!(event, ServerEvent::DeviceCoordsUpdated { .. })
            }
            None => false,
        }
    }
}

fn decode_event(text: &str) -> Option<ServerEvent> {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!("Ignoring realtime frame: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::{DocumentStore, StorePaths, DEVICES_FILE, FLOORS_FILE};
    use crate::models::map::Coords;
    use crate::server::{build_router, AppState};
    use axum::routing::get;
    use serde_json::json;
    use std::net::SocketAddr;

    const FLOOR_SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 1000 800"></svg>"#;

    async fn spawn_map_server(dir: &std::path::Path) -> (SocketAddr, AppState) {
        std::fs::write(
            dir.join(DEVICES_FILE),
            json!({"devices": [
                {"id": "dev-1", "name": "Lobby AP", "building": "HQ", "floor": 1},
                {"id": "dev-2", "building": "HQ", "floor": 2}
            ]})
            .to_string(),
        )
        .expect("seed devices");
        std::fs::write(
            dir.join(FLOORS_FILE),
            json!({"floors": [
                {"id": "hq-1", "label": "HQ / 1", "building": "HQ", "floor": 1, "svg": "/floors/hq-1.svg"},
                {"id": "hq-2", "label": "HQ / 2", "building": "HQ", "floor": 2, "svg": "/floors/missing.svg"}
            ]})
            .to_string(),
        )
        .expect("seed floors");
        let state = AppState::new(DocumentStore::new(StorePaths::resolve(dir, None)));
        let app = build_router(state.clone()).route("/floors/hq-1.svg", get(|| async { FLOOR_SVG }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move { axum::serve(listener, app).await.expect("serve app") });
        (addr, state)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_drag_and_save_roundtrip() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (addr, app) = spawn_map_server(tmp.path()).await;
        let (_, mut pushed) = app.hub.connect(&ServerEvent::Hello { ts: 0 });
        pushed.try_recv().expect("hello");

        let frame = tokio::task::spawn_blocking(move || {
            let client = MapClient::new(&format!("http://{addr}")).expect("client");
            let mut session = ViewerSession::new(client, ScreenSize::new(1000.0, 800.0));
            session.load().expect("load");

            let view = session.view();
            assert_eq!(view.selected_floor.as_deref(), Some("hq-1"));
            assert_eq!(view.markers.len(), 1);
            assert_eq!((view.markers[0].x, view.markers[0].y), (500.0, 400.0));

            session.state_mut().admin = true;
            let (px, py) = session.state().camera().expect("camera").user_to_screen(500.0, 400.0);
            assert!(session.pointer_down("dev-1", px, py));
            session.pointer_move(px + 1.0e5, py);
            let pending = session.pointer_up().expect("save");
            assert_eq!(pending.coords, Coords::new(1.0, 0.5));

            let err = session.select_floor("hq-2").expect_err("drawing missing");
            assert!(matches!(err, SessionError::Client(MapClientError::Http { status: 404, .. })));
            assert!(matches!(session.select_floor("hq-9"), Err(SessionError::UnknownFloor(_))));
            pending
        })
        .await
        .expect("session thread");

        let stored = app.store.load_devices().expect("load");
        assert_eq!(stored.devices[0].coords(), Some(frame.coords));
        let pushed_frame = pushed.try_recv().expect("broadcast");
        assert!(pushed_frame.contains("device.coords.updated"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_save_keeps_optimistic_position() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (addr, app) = spawn_map_server(tmp.path()).await;

        tokio::task::spawn_blocking(move || {
            let client = MapClient::new(&format!("http://{addr}")).expect("client");
            let mut session = ViewerSession::new(client, ScreenSize::new(1000.0, 800.0));
            session.load().expect("load");
            // Known to the viewer only by name, so the server cannot find it by id.
            let ghost: Device =
                serde_json::from_value(json!({"name": "Ghost", "building": "HQ", "floor": 1})).expect("device");
            session.handle_realtime_message(
                &json!({"type": "device.coords.updated", "device": ghost}).to_string(),
            );
            session.state_mut().admin = true;
            assert!(session.pointer_down("Ghost", 500.0, 400.0));
            session.pointer_move(400.0, 400.0);
            let pending = session.pointer_up().expect("pending");
            let ghost = session
                .state()
                .devices
                .iter()
                .find(|d| d.identity_key() == "Ghost")
                .expect("ghost kept");
            assert_eq!(ghost.coords(), Some(pending.coords));
        })
        .await
        .expect("session thread");

        assert!(app.store.load_devices().expect("load").devices.iter().all(|d| d.coords().is_none()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn loaded_session_sees_updates_from_other_clients() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (addr, _app) = spawn_map_server(tmp.path()).await;

        tokio::task::spawn_blocking(move || {
            let base = format!("http://{addr}");
            let mut session = ViewerSession::new(MapClient::new(&base).expect("client"), ScreenSize::new(1000.0, 800.0));
            session.load().expect("load");
            assert!(session.is_online());

            let greeting = session.next_event(Duration::from_secs(5)).expect("read");
            assert!(matches!(greeting, Some(ServerEvent::Hello { .. })));
            assert_eq!(session.next_event(Duration::from_millis(50)).expect("read"), None);

            let other = MapClient::new(&base).expect("client");
            other.put_coords("dev-1", 0.3, 0.6).expect("put");

            let event = session.next_event(Duration::from_secs(5)).expect("read");
            assert!(matches!(event, Some(ServerEvent::DeviceCoordsUpdated { .. })));
            let moved = session.state().devices.iter().find(|d| d.has_id("dev-1")).expect("dev-1");
            assert_eq!(moved.coords(), Some(Coords::new(0.3, 0.6)));
            assert_eq!(moved.name().as_deref(), Some("Lobby AP"));
            assert_eq!(session.view().markers[0].x, 300.0);
        })
        .await
        .expect("session thread");
    }

    #[test]
    fn offline_session_reports_it() {
        let client = MapClient::new("http://127.0.0.1:9").expect("client");
        let mut session = ViewerSession::new(client, ScreenSize::new(800.0, 600.0));
        assert!(!session.connect_realtime());
        assert!(matches!(session.next_event(Duration::from_millis(10)), Err(SessionError::Offline)));
    }

    #[test]
    fn realtime_frames_are_reconciled_or_ignored() {
        let client = MapClient::new("http://127.0.0.1:9").expect("client");
        let mut session = ViewerSession::new(client, ScreenSize::new(800.0, 600.0));
        session.state_mut().devices =
            serde_json::from_value(json!([{"id": "dev-1", "name": "Lobby AP"}])).expect("devices");

        assert!(session.handle_realtime_message(
            r#"{"type":"device.coords.updated","device":{"id":"dev-1","coords":{"x":0.2,"y":0.3}}}"#
        ));
        assert_eq!(session.state().devices[0].coords(), Some(Coords::new(0.2, 0.3)));
        assert_eq!(session.state().devices[0].name().as_deref(), Some("Lobby AP"));

        assert!(!session.handle_realtime_message(r#"{"type":"hello","ts":1}"#));
        assert!(!session.handle_realtime_message(r#"{"type":"device.deleted","id":"dev-1"}"#));
        assert!(!session.handle_realtime_message("not json"));
        assert_eq!(session.state().devices.len(), 1);
    }
}
