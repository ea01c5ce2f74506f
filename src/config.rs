//! Runtime configuration helpers.
//! Defaults serve `./data` on port 8080 on all interfaces.

use crate::db::store::StorePaths;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_BIND_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind_addr: IpAddr,
    /// Directory holding `floors.json` and the default `devices.json`.
    pub data_dir: PathBuf,
    /// `MAP_DEVICES_PATH`; only used when the file exists.
    pub devices_path_override: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match non_empty("PORT") {
            Some(s) => s.parse::<u16>().map_err(|_| format!("PORT must be a port number, got {:?}", s))?,
            None => DEFAULT_PORT,
        };
        let bind_addr = match non_empty("MAP_BIND_ADDR") {
            Some(s) => s
                .parse::<IpAddr>()
                .map_err(|_| format!("MAP_BIND_ADDR must be an IP address, got {:?}", s))?,
            None => DEFAULT_BIND_ADDR,
        };
        let data_dir = non_empty("MAP_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        Ok(Config {
            port,
            bind_addr,
            data_dir,
            devices_path_override: non_empty("MAP_DEVICES_PATH").map(PathBuf::from),
        })
    }

    pub fn store_paths(&self) -> StorePaths {
        StorePaths::resolve(&self.data_dir, self.devices_path_override.as_deref())
    }

    /// Base URL a local viewer uses to reach this server.
    pub fn local_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

/// Apply `KEY=value` lines from `path` to the process environment.
///
/// Variables already present in the environment win over the file.
pub fn load_env_file(path: &Path) -> Result<(), String> {
    let file = File::open(path).map_err(|e| format!("failed to open {}: {}", path.display(), e))?;
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| format!("failed to read {} at line {}: {}", path.display(), index + 1, e))?;
        let Some((key, value)) =
            parse_env_line(&line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        if std::env::var_os(&key).is_none() {
            // Mutating the process environment is unsafe on some targets; this runs before any
            // other thread is started.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

/// Parse one `.env` line. Blank lines and comments yield `None`.
fn parse_env_line(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let assignment = trimmed.strip_prefix("export ").map(str::trim_start).unwrap_or(trimmed);
    let (key, raw) = assignment
        .split_once('=')
        .ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    if key.contains(char::is_whitespace) {
        return Err(format!("environment variable name contains whitespace: {}", key));
    }
    Ok(Some((key.to_string(), parse_env_value(raw.trim())?)))
}

fn parse_env_value(raw: &str) -> Result<String, String> {
    let Some(quote) = raw.chars().next().filter(|c| *c == '"' || *c == '\'') else {
        // Unquoted: an inline comment ends the value.
        return Ok(raw.split('#').next().unwrap_or_default().trim_end().to_string());
    };

    let mut value = String::new();
    let mut chars = raw[1..].chars();
    let mut escaped = false;
    while let Some(ch) = chars.next() {
        if escaped {
            value.push(match ch {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                other => other,
            });
            escaped = false;
        } else if ch == '\\' && quote == '"' {
            escaped = true;
        } else if ch == quote {
            let rest = chars.as_str().trim();
            return if rest.is_empty() || rest.starts_with('#') {
                Ok(value)
            } else {
                Err("unexpected characters after closing quote".to_string())
            };
        } else {
            value.push(ch);
        }
    }
    Err("unterminated quoted value".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, String> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config_from(&[]).expect("config");
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(cfg.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(cfg.devices_path_override, None);
        assert_eq!(cfg.local_url(), "http://localhost:8080");
    }

    #[test]
    fn reads_overrides() {
        let cfg = config_from(&[
            ("PORT", "9090"),
            ("MAP_BIND_ADDR", "127.0.0.1"),
            ("MAP_DATA_DIR", "/srv/map"),
            ("MAP_DEVICES_PATH", "/srv/shared/devices.json"),
        ])
        .expect("config");
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.bind_addr, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(cfg.data_dir, PathBuf::from("/srv/map"));
        assert_eq!(cfg.devices_path_override, Some(PathBuf::from("/srv/shared/devices.json")));
    }

    #[test]
    fn rejects_bad_port() {
        assert!(config_from(&[("PORT", "http")]).is_err());
        assert!(config_from(&[("PORT", "70000")]).is_err());
    }

    #[test]
    fn env_lines() {
        assert_eq!(parse_env_line("# comment").expect("ok"), None);
        assert_eq!(parse_env_line("   ").expect("ok"), None);
        assert_eq!(
            parse_env_line("export PORT=9000 # local").expect("ok"),
            Some(("PORT".to_string(), "9000".to_string()))
        );
        assert_eq!(
            parse_env_line(r#"MAP_DATA_DIR="/srv/map data""#).expect("ok"),
            Some(("MAP_DATA_DIR".to_string(), "/srv/map data".to_string()))
        );
        assert_eq!(
            parse_env_line("RUST_LOG='floormap=debug'").expect("ok"),
            Some(("RUST_LOG".to_string(), "floormap=debug".to_string()))
        );
        assert!(parse_env_line("NOVALUE").is_err());
        assert!(parse_env_line(r#"A="open"#).is_err());
        assert!(parse_env_line(r#"A="x" y"#).is_err());
    }
}
