//! Blocking client for the map API.
//!
//! - Uses `ureq` for HTTP and `tungstenite` for the realtime channel (no async); the viewer
//!   session and the `render` command drive it.
//! - Non-2xx responses become [`MapClientError::Http`] with the response body as the message.
//! - Device keys are percent-encoded as a single path segment.

use crate::models::map::{CoordsUpdateResponse, Device, Floor, HealthResponse};
use serde::de::DeserializeOwned;
use log::debug;
use serde_json::json;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::{Duration, Instant};
use tungstenite::{Message, WebSocket};
use ureq::Agent;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

#[derive(Debug)]
pub enum MapClientError {
    Url(String),
    Transport(String),
    Http { status: u16, message: String },
    Json(serde_json::Error),
    Realtime(tungstenite::Error),
}

impl core::fmt::Display for MapClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MapClientError::Url(s) => write!(f, "invalid url: {}", s),
            MapClientError::Transport(s) => write!(f, "transport error: {}", s),
            MapClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            MapClientError::Json(e) => write!(f, "json error: {}", e),
            MapClientError::Realtime(e) => write!(f, "realtime channel: {}", e),
        }
    }
}

impl std::error::Error for MapClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MapClientError::Json(e) => Some(e),
            MapClientError::Realtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<tungstenite::Error> for MapClientError {
    fn from(value: tungstenite::Error) -> Self {
        MapClientError::Realtime(value)
    }
}

impl From<serde_json::Error> for MapClientError {
    fn from(value: serde_json::Error) -> Self {
        MapClientError::Json(value)
    }
}

impl From<ureq::Error> for MapClientError {
    fn from(value: ureq::Error) -> Self {
        MapClientError::Transport(value.to_string())
    }
}

pub struct MapClient {
    agent: Agent,
    base: Url,
}

impl MapClient {
    pub fn new(base_url: &str) -> Result<Self, MapClientError> {
        let base = Url::parse(base_url).map_err(|e| MapClientError::Url(format!("{}: {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(MapClientError::Url(format!("{}: not a base url", base_url)));
        }
        // Status codes are inspected by hand so error bodies can be surfaced.
        let agent: Agent = Agent::config_builder().http_status_as_error(false).build().into();
        Ok(MapClient { agent, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `base` with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, MapClientError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| MapClientError::Url(format!("{}: not a base url", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn read_body(mut resp: http::Response<ureq::Body>) -> Result<String, MapClientError> {
        let status = resp.status();
        let body = resp.body_mut().read_to_string();
        if !status.is_success() {
            return Err(MapClientError::Http {
                status: status.as_u16(),
                message: body.unwrap_or_else(|_| String::from("<no body>")),
            });
        }
        Ok(body?)
    }

    fn get_text(&self, url: &Url) -> Result<String, MapClientError> {
        let resp = self.agent.get(url.as_str()).call()?;
        Self::read_body(resp)
    }

    fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, MapClientError> {
        let url = self.endpoint(segments)?;
        let resp = self.agent.get(url.as_str()).header("Accept", "application/json").call()?;
        Ok(serde_json::from_str(&Self::read_body(resp)?)?)
    }

    pub fn health(&self) -> Result<HealthResponse, MapClientError> {
        self.get_json(&["api", "health"])
    }

    pub fn floors(&self) -> Result<Vec<Floor>, MapClientError> {
        self.get_json(&["api", "floors"])
    }

    pub fn devices(&self) -> Result<Vec<Device>, MapClientError> {
        self.get_json(&["api", "devices"])
    }

    /// Fetch floor-plan markup; relative paths resolve against the server base URL.
    pub fn floor_svg(&self, svg: &str) -> Result<String, MapClientError> {
        let url = self
            .base
            .join(svg)
            .map_err(|e| MapClientError::Url(format!("{}: {}", svg, e)))?;
        self.get_text(&url)
    }

    /// Store normalized coordinates for the device with `id`; returns the updated record.
    pub fn put_coords(&self, id: &str, x: f64, y: f64) -> Result<Device, MapClientError> {
        let url = self.endpoint(&["api", "devices", id, "coords"])?;
        // serde_json writes non-finite floats as null, which the server rejects with 400.
        let resp = self
            .agent
            .put(url.as_str())
            .header("Accept", "application/json")
            .send_json(&json!({ "x": x, "y": y }))?;
        let CoordsUpdateResponse { device, .. } = serde_json::from_str(&Self::read_body(resp)?)?;
        Ok(device)
    }

    /// `ws://` form of `{base}/ws`. Only plain `http` bases are supported.
    pub fn realtime_url(&self) -> Result<Url, MapClientError> {
        if self.base.scheme() != "http" {
            return Err(MapClientError::Url(format!(
                "{}: realtime channel needs an http base url",
                self.base
            )));
        }
        let mut url = self.endpoint(&["ws"])?;
        url.set_scheme("ws")
            .map_err(|_| MapClientError::Url(format!("{}: cannot switch to ws", url)))?;
        Ok(url)
    }

    pub fn connect_realtime(&self) -> Result<RealtimeChannel, MapClientError> {
        RealtimeChannel::connect(&self.realtime_url()?)
    }
}

/// Server-to-client event stream; frames arrive as JSON text.
pub struct RealtimeChannel {
    socket: WebSocket<TcpStream>,
}

impl RealtimeChannel {
    pub fn connect(url: &Url) -> Result<Self, MapClientError> {
        let addrs = url
            .socket_addrs(|| None)
            .map_err(|e| MapClientError::Url(format!("{}: {}", url, e)))?;
        let stream =
            TcpStream::connect(&*addrs).map_err(|e| MapClientError::Transport(format!("{}: {}", url, e)))?;
        let (socket, _) = tungstenite::client(url.as_str(), stream)
            .map_err(|e| MapClientError::Transport(format!("websocket handshake with {} failed: {}", url, e)))?;
        debug!("Realtime channel open at {}", url);
        Ok(RealtimeChannel { socket })
    }

    /// Next text frame, or `None` once `timeout` passes without one.
    ///
    /// Control and binary frames are skipped. A closed channel is an error.
    pub fn next_text(&mut self, timeout: Duration) -> Result<Option<String>, MapClientError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.socket
                .get_ref()
                .set_read_timeout(Some(remaining))
                .map_err(|e| MapClientError::Transport(e.to_string()))?;
            match self.socket.read() {
                Ok(Message::Text(text)) => return Ok(Some(text.as_str().to_string())),
                Ok(_) => {}
                Err(tungstenite::Error::Io(e)) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn close(mut self) {
        if let Err(e) = self.socket.close(None).and_then(|_| self.socket.flush()) {
            debug!("Realtime channel close: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_encode_device_keys_as_one_segment() {
        let client = MapClient::new("http://localhost:8080").expect("client");
        let url = client.endpoint(&["api", "devices", "a b/c", "coords"]).expect("url");
        assert_eq!(url.as_str(), "http://localhost:8080/api/devices/a%20b%2Fc/coords");
    }

    #[test]
    fn endpoints_keep_a_base_path_prefix() {
        let client = MapClient::new("http://example.test/map/").expect("client");
        let url = client.endpoint(&["api", "floors"]).expect("url");
        assert_eq!(url.as_str(), "http://example.test/map/api/floors");
    }

    #[test]
    fn realtime_url_follows_the_base() {
        let client = MapClient::new("http://example.test:9000/map/").expect("client");
        assert_eq!(client.realtime_url().expect("url").as_str(), "ws://example.test:9000/map/ws");
        let tls = MapClient::new("https://example.test").expect("client");
        assert!(matches!(tls.realtime_url(), Err(MapClientError::Url(_))));
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(matches!(MapClient::new("not a url"), Err(MapClientError::Url(_))));
        assert!(matches!(MapClient::new("mailto:ops@example.test"), Err(MapClientError::Url(_))));
    }
}
