use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use crate::errors::{AppError, AppResult};
use crate::geo::LatLng;

pub type CoordinateAccessor = Arc<dyn Fn() -> f64 + Send + Sync>;

#[derive(Clone)]
pub enum RawCoordinate {
    Value(f64),
    Accessor(CoordinateAccessor),
}

impl RawCoordinate {
    pub fn accessor(value: f64) -> Self {
        Self::Accessor(Arc::new(move || value))
    }

    pub fn resolve(&self) -> f64 {
        match self {
            Self::Value(value) => *value,
            Self::Accessor(read) => read(),
        }
    }
}

impl From<f64> for RawCoordinate {
    fn from(value: f64) -> Self {
        Self::Value(value)
    }
}

impl fmt::Debug for RawCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => write!(f, "{value}"),
            Self::Accessor(_) => f.write_str("<accessor>"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RawLatLng {
    pub lat: RawCoordinate,
    pub lng: RawCoordinate,
}

impl RawLatLng {
    pub fn plain(lat: f64, lng: f64) -> Self {
        Self {
            lat: RawCoordinate::Value(lat),
            lng: RawCoordinate::Value(lng),
        }
    }

    pub fn lazy(lat: f64, lng: f64) -> Self {
        Self {
            lat: RawCoordinate::accessor(lat),
            lng: RawCoordinate::accessor(lng),
        }
    }
}

impl From<LatLng> for RawLatLng {
    fn from(value: LatLng) -> Self {
        Self::plain(value.lat, value.lng)
    }
}

#[derive(Clone, Debug)]
pub enum RawBounds {
    Corners {
        northeast: RawLatLng,
        southwest: RawLatLng,
    },
    Cardinal {
        north: f64,
        east: f64,
        south: f64,
        west: f64,
    },
}

#[derive(Clone, Debug, Default)]
pub struct RawGeometry {
    pub location: Option<RawLatLng>,
    pub viewport: Option<RawBounds>,
    pub bounds: Option<RawBounds>,
}

pub trait PhotoSource: Send + Sync {
    fn url(&self, max_width: Option<u32>) -> String;
}

#[derive(Clone, Default)]
pub struct ProviderPhoto {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub html_attributions: Vec<String>,
    pub source: Option<Arc<dyn PhotoSource>>,
}

impl fmt::Debug for ProviderPhoto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderPhoto")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("html_attributions", &self.html_attributions)
            .field("source", &self.source.as_ref().map(|_| "<live>"))
            .finish()
    }
}

#[derive(Clone)]
pub enum ProviderValue {
    Plain(Value),
    Date(DateTime<Utc>),
    Callable(Arc<dyn Fn() -> Value + Send + Sync>),
    Opaque { type_name: String },
}

impl fmt::Debug for ProviderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(value) => write!(f, "Plain({value})"),
            Self::Date(value) => write!(f, "Date({value})"),
            Self::Callable(_) => f.write_str("Callable"),
            Self::Opaque { type_name } => write!(f, "Opaque({type_name})"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ProviderPlace {
    pub place_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub formatted_address: Option<String>,
    pub types: Vec<String>,
    pub rating: Option<f64>,
    pub user_ratings_total: Option<u32>,
    pub geometry: Option<RawGeometry>,
    pub photos: Vec<ProviderPhoto>,
    pub extra: BTreeMap<String, ProviderValue>,
}

#[derive(Clone, Debug, Default)]
pub struct ProviderPrediction {
    pub place_id: String,
    pub description: String,
    pub main_text: Option<String>,
    pub secondary_text: Option<String>,
    pub types: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlacesStatus {
    Ok,
    ZeroResults,
    NotFound,
    RequestDenied,
    OverQueryLimit,
    InvalidRequest,
    UnknownError,
    Other(String),
}

impl PlacesStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "OK" => Self::Ok,
            "ZERO_RESULTS" => Self::ZeroResults,
            "NOT_FOUND" => Self::NotFound,
            "REQUEST_DENIED" => Self::RequestDenied,
            "OVER_QUERY_LIMIT" => Self::OverQueryLimit,
            "INVALID_REQUEST" => Self::InvalidRequest,
            "UNKNOWN_ERROR" => Self::UnknownError,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Ok => "OK",
            Self::ZeroResults => "ZERO_RESULTS",
            Self::NotFound => "NOT_FOUND",
            Self::RequestDenied => "REQUEST_DENIED",
            Self::OverQueryLimit => "OVER_QUERY_LIMIT",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::UnknownError => "UNKNOWN_ERROR",
            Self::Other(other) => other.as_str(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PlacesReply<T> {
    pub status: PlacesStatus,
    pub payload: T,
}

impl<T> PlacesReply<T> {
    pub fn new(status: PlacesStatus, payload: T) -> Self {
        Self { status, payload }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PredictionRequest {
    pub input: String,
    pub types: Vec<String>,
    pub session_token: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetailsRequest {
    pub place_id: String,
    pub fields: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkerAnimation {
    Drop,
    Bounce,
}

#[derive(Clone, Debug)]
pub struct MapOptions {
    pub center: LatLng,
    pub zoom: u8,
    pub map_type_control: bool,
    pub street_view_control: bool,
    pub fullscreen_control: bool,
    pub zoom_control: bool,
}

#[derive(Clone, Debug)]
pub struct MarkerOptions {
    pub position: LatLng,
    pub title: String,
    pub animation: Option<MarkerAnimation>,
}

#[async_trait]
pub trait MapsLoader: Send + Sync {
    async fn load(&self) -> AppResult<Arc<dyn MapsModule>>;
}

pub trait MapsModule: Send + Sync {
    fn version(&self) -> Option<String>;
    fn has_places(&self) -> bool;
    fn autocomplete_service(&self) -> AppResult<Arc<dyn AutocompleteService>>;
    fn details_service(&self) -> AppResult<Arc<dyn DetailsService>>;
    fn create_map(&self, element_id: &str, options: &MapOptions)
        -> AppResult<Arc<dyn MapSurface>>;
}

#[async_trait]
pub trait AutocompleteService: Send + Sync {
    async fn predictions(
        &self,
        request: &PredictionRequest,
    ) -> AppResult<PlacesReply<Vec<ProviderPrediction>>>;
}

#[async_trait]
pub trait DetailsService: Send + Sync {
    async fn details(&self, request: &DetailsRequest)
        -> AppResult<PlacesReply<Option<ProviderPlace>>>;
}

pub trait MapSurface: Send + Sync {
    fn element_id(&self) -> &str;
    fn center(&self) -> Option<LatLng>;
    fn zoom(&self) -> Option<u8>;
    fn set_center(&self, center: LatLng) -> AppResult<()>;
    fn set_zoom(&self, zoom: u8) -> AppResult<()>;
    fn add_marker(&self, options: &MarkerOptions) -> AppResult<Arc<dyn MarkerHandle>>;
    fn marker_count(&self) -> usize;
}

pub trait MarkerHandle: Send + Sync {
    fn position(&self) -> LatLng;
    fn title(&self) -> String;
    fn animation(&self) -> Option<MarkerAnimation>;
    fn set_animation(&self, animation: Option<MarkerAnimation>) -> AppResult<()>;
    fn is_attached(&self) -> bool;
    fn detach(&self) -> AppResult<()>;
}

pub struct HeadlessMap {
    element_id: String,
    viewport: Mutex<(LatLng, u8)>,
    markers: Mutex<Vec<Arc<HeadlessMarker>>>,
}

impl HeadlessMap {
    pub fn new(element_id: impl Into<String>, options: &MapOptions) -> Self {
        Self {
            element_id: element_id.into(),
            viewport: Mutex::new((options.center, options.zoom)),
            markers: Mutex::new(Vec::new()),
        }
    }

    pub fn live_markers(&self) -> Vec<Arc<HeadlessMarker>> {
        self.markers
            .lock()
            .iter()
            .filter(|marker| marker.is_attached())
            .cloned()
            .collect()
    }
}

impl MapSurface for HeadlessMap {
    fn element_id(&self) -> &str {
        &self.element_id
    }

    fn center(&self) -> Option<LatLng> {
        Some(self.viewport.lock().0)
    }

    fn zoom(&self) -> Option<u8> {
        Some(self.viewport.lock().1)
    }

    fn set_center(&self, center: LatLng) -> AppResult<()> {
        if !center.is_valid() {
            return Err(AppError::Provider(format!(
                "InvalidValueError: setCenter({}, {})",
                center.lat, center.lng
            )));
        }
        self.viewport.lock().0 = center;
        Ok(())
    }

    fn set_zoom(&self, zoom: u8) -> AppResult<()> {
        self.viewport.lock().1 = zoom.min(22);
        Ok(())
    }

    fn add_marker(&self, options: &MarkerOptions) -> AppResult<Arc<dyn MarkerHandle>> {
        let marker = Arc::new(HeadlessMarker {
            position: options.position,
            title: options.title.clone(),
            animation: Mutex::new(options.animation),
            attached: AtomicBool::new(true),
        });
        let mut markers = self.markers.lock();
        markers.retain(|existing| existing.is_attached());
        markers.push(Arc::clone(&marker));
        Ok(marker)
    }

    fn marker_count(&self) -> usize {
        self.markers
            .lock()
            .iter()
            .filter(|marker| marker.is_attached())
            .count()
    }
}

pub struct HeadlessMarker {
    position: LatLng,
    title: String,
    animation: Mutex<Option<MarkerAnimation>>,
    attached: AtomicBool,
}

impl MarkerHandle for HeadlessMarker {
    fn position(&self) -> LatLng {
        self.position
    }

    fn title(&self) -> String {
        self.title.clone()
    }

    fn animation(&self) -> Option<MarkerAnimation> {
        *self.animation.lock()
    }

    fn set_animation(&self, animation: Option<MarkerAnimation>) -> AppResult<()> {
        *self.animation.lock() = animation;
        Ok(())
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    fn detach(&self) -> AppResult<()> {
        self.attached.store(false, Ordering::SeqCst);
        Ok(())
    }
}
