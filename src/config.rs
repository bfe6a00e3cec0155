use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

use crate::geo::LatLng;

const DEFAULT_PLACES_API_BASE: &str = "https://maps.googleapis.com/maps/api/place";
const DEFAULT_FAVORITES_API_BASE: &str = "http://localhost:8080/api";
const DEFAULT_HISTORY_LIMIT: usize = 20;

pub const DEFAULT_CENTER: LatLng = LatLng {
    lat: 3.139,
    lng: 101.686,
};
pub const DEFAULT_ZOOM: u8 = 11;
pub const FOCUS_ZOOM: u8 = 15;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub google_maps_api_key: Option<SecretString>,
    pub places_api_base: String,
    pub maps_libraries: Vec<String>,
    pub favorites_api_base: String,
    pub init_timeout_ms: u64,
    pub validation_timeout_ms: u64,
    pub search_debounce_ms: u64,
    pub selection_settle_ms: u64,
    pub marker_highlight_ms: u64,
    pub search_history_limit: usize,
    pub http_timeout_secs: u64,
    pub default_center: LatLng,
    pub default_zoom: u8,
    pub focus_zoom: u8,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub places_api_base: String,
    pub maps_libraries: Vec<String>,
    pub favorites_api_base: String,
    pub init_timeout_ms: u64,
    pub search_debounce_ms: u64,
    pub search_history_limit: usize,
    pub has_google_maps_key: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            google_maps_api_key: env::var("GOOGLE_MAPS_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            places_api_base: env::var("PLACES_API_BASE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_PLACES_API_BASE.to_string()),
            maps_libraries: parse_list("MAPS_LIBRARIES", &["places", "geometry"]),
            favorites_api_base: env::var("FAVORITES_API_BASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_FAVORITES_API_BASE.to_string()),
            init_timeout_ms: parse_u64("MAPS_INIT_TIMEOUT_MS", 20_000),
            validation_timeout_ms: parse_u64("MAPS_VALIDATION_TIMEOUT_MS", 8_000),
            search_debounce_ms: parse_u64("SEARCH_DEBOUNCE_MS", 500),
            selection_settle_ms: parse_u64("SELECTION_SETTLE_MS", 200),
            marker_highlight_ms: parse_u64("MARKER_HIGHLIGHT_MS", 1_500),
            search_history_limit: parse_usize("SEARCH_HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT)
                .max(1),
            http_timeout_secs: parse_u64("HTTP_TIMEOUT_SECS", 10).max(1),
            default_center: DEFAULT_CENTER,
            default_zoom: DEFAULT_ZOOM,
            focus_zoom: FOCUS_ZOOM,
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            places_api_base: self.places_api_base.clone(),
            maps_libraries: self.maps_libraries.clone(),
            favorites_api_base: self.favorites_api_base.clone(),
            init_timeout_ms: self.init_timeout_ms,
            search_debounce_ms: self.search_debounce_ms,
            search_history_limit: self.search_history_limit,
            has_google_maps_key: self.google_maps_api_key.is_some(),
        }
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn selection_settle(&self) -> Duration {
        Duration::from_millis(self.selection_settle_ms)
    }

    pub fn marker_highlight(&self) -> Duration {
        Duration::from_millis(self.marker_highlight_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            google_maps_api_key: None,
            places_api_base: DEFAULT_PLACES_API_BASE.to_string(),
            maps_libraries: vec!["places".into(), "geometry".into()],
            favorites_api_base: DEFAULT_FAVORITES_API_BASE.to_string(),
            init_timeout_ms: 20_000,
            validation_timeout_ms: 8_000,
            search_debounce_ms: 500,
            selection_settle_ms: 200,
            marker_highlight_ms: 1_500,
            search_history_limit: DEFAULT_HISTORY_LIMIT,
            http_timeout_secs: 10,
            default_center: DEFAULT_CENTER,
            default_zoom: DEFAULT_ZOOM,
            focus_zoom: FOCUS_ZOOM,
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_list(key: &str, default: &[&str]) -> Vec<String> {
    let parsed = env::var(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if parsed.is_empty() {
        default.iter().map(|item| (*item).to_string()).collect()
    } else {
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_public_profile_without_secrets() {
        env::set_var("GOOGLE_MAPS_API_KEY", "secret");
        env::set_var("SEARCH_HISTORY_LIMIT", "0");
        env::set_var("MAPS_LIBRARIES", "places, geometry ,");
        env::set_var("FAVORITES_API_BASE_URL", "http://favorites.test/api/");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert!(public.has_google_maps_key);
        assert!(config.google_maps_api_key.is_some());
        assert_eq!(public.search_history_limit, 1);
        assert_eq!(public.maps_libraries, vec!["places", "geometry"]);
        assert_eq!(public.favorites_api_base, "http://favorites.test/api");
        let serialized = serde_json::to_string(&public).unwrap();
        assert!(!serialized.contains("secret"));
    }

    #[test]
    fn defaults_match_documented_timings() {
        let config = AppConfig::default();
        assert_eq!(config.init_timeout(), Duration::from_secs(20));
        assert_eq!(config.search_debounce(), Duration::from_millis(500));
        assert_eq!(config.marker_highlight(), Duration::from_millis(1_500));
        assert_eq!(config.focus_zoom, 15);
        assert!(config.default_center.is_valid());
    }
}
