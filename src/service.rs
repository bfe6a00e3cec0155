use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::geo::LatLng;
use crate::model::{Place, Prediction};
use crate::normalize::normalize_place;
use crate::places::HttpMapsLoader;
use crate::provider::{
    AutocompleteService, DetailsRequest, DetailsService, MapOptions, MapSurface, MapsLoader,
    MapsModule, MarkerAnimation, MarkerHandle, MarkerOptions, PlacesStatus, PredictionRequest,
};
use crate::search::{effective_query, SearchAggregator};
use crate::synthetic::SyntheticLoader;

const MAP_ZOOM: u8 = 13;
const VALIDATION_QUERY: &str = "malaysia";

pub const DETAIL_FIELDS: &[&str] = &[
    "name",
    "geometry",
    "formatted_address",
    "place_id",
    "types",
    "photos",
    "rating",
    "user_ratings_total",
    "vicinity",
];

type InitOutcome = Result<Arc<Handles>, ServiceError>;
type PendingInit = Shared<BoxFuture<'static, InitOutcome>>;

struct Handles {
    module: Arc<dyn MapsModule>,
    autocomplete: Arc<dyn AutocompleteService>,
    details: Arc<dyn DetailsService>,
}

enum Lifecycle {
    Uninitialized,
    Initializing(PendingInit),
    Ready(Arc<Handles>),
    Failed(ServiceError),
}

impl Lifecycle {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing(_) => "initializing",
            Self::Ready(_) => "ready",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub state: &'static str,
    pub initialized: bool,
    pub has_module: bool,
    pub has_capability: bool,
    pub has_autocomplete_service: bool,
    pub has_details_service: bool,
    pub is_ready: bool,
    pub corrupted: bool,
    pub last_error: Option<String>,
    pub validation_status: Option<String>,
    pub provider_version: Option<String>,
    pub module_loads: usize,
}

struct ServiceInner {
    loader: Arc<dyn MapsLoader>,
    aggregator: SearchAggregator,
    init_timeout: Duration,
    validation_timeout: Duration,
    lifecycle: Mutex<Lifecycle>,
    superseded: Mutex<Option<PendingInit>>,
    module_cache: Mutex<Option<Arc<dyn MapsModule>>>,
    corrupted: AtomicBool,
    generation: AtomicU64,
    module_loads: AtomicUsize,
    last_error: Mutex<Option<ServiceError>>,
    validation_status: Mutex<Option<String>>,
}

#[derive(Clone)]
pub struct ServiceClient {
    inner: Arc<ServiceInner>,
}

impl ServiceClient {
    pub fn new(config: &AppConfig) -> Self {
        let loader: Arc<dyn MapsLoader> = if config.google_maps_api_key.is_some() {
            Arc::new(HttpMapsLoader::new(config))
        } else {
            warn!("no maps API key configured; using synthetic places catalog");
            Arc::new(SyntheticLoader::default())
        };
        Self::with_loader(loader, config)
    }

    pub fn with_loader(loader: Arc<dyn MapsLoader>, config: &AppConfig) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                loader,
                aggregator: SearchAggregator::default(),
                init_timeout: config.init_timeout(),
                validation_timeout: config.validation_timeout(),
                lifecycle: Mutex::new(Lifecycle::Uninitialized),
                superseded: Mutex::new(None),
                module_cache: Mutex::new(None),
                corrupted: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                module_loads: AtomicUsize::new(0),
                last_error: Mutex::new(None),
                validation_status: Mutex::new(None),
            }),
        }
    }

    pub async fn initialize(&self) -> Result<(), ServiceError> {
        self.heal_if_corrupted();
        self.ensure_ready().await.map(|_| ())
    }

    // Never fails; problems yield an empty list.
    pub async fn search(&self, query: &str) -> Vec<Prediction> {
        let Some(query) = effective_query(query) else {
            return Vec::new();
        };
        self.heal_if_corrupted();

        let handles = match self.ensure_ready().await {
            Ok(handles) => handles,
            Err(err) => {
                warn!(?err, "maps service unavailable during search");
                return Vec::new();
            }
        };
        if !handles.module.has_places() {
            self.mark_corrupted();
            warn!("places capability vanished during search");
            return Vec::new();
        }

        let results = self
            .inner
            .aggregator
            .search(handles.autocomplete.as_ref(), query)
            .await;
        debug!(query, results = results.len(), "search completed");
        results
    }

    pub async fn get_details(&self, place_id: &str) -> Result<Place, ServiceError> {
        if place_id.trim().is_empty() {
            return Err(ServiceError::Unclassified(
                "place id is required for details lookup".into(),
            ));
        }
        self.heal_if_corrupted();
        let handles = self.ensure_ready().await?;

        let request = DetailsRequest {
            place_id: place_id.to_string(),
            fields: DETAIL_FIELDS.iter().map(|f| (*f).to_string()).collect(),
        };
        let reply = handles.details.details(&request).await.map_err(|err| {
            warn!(?err, place_id, "place details call failed");
            ServiceError::Unclassified("place details API call failed".into())
        })?;

        if !handles.module.has_places() {
            self.mark_corrupted();
            return Err(ServiceError::StateCorrupted);
        }

        match reply.status {
            PlacesStatus::Ok => {
                let place = reply.payload.map(|raw| normalize_place(&raw)).ok_or_else(|| {
                    ServiceError::Unclassified("place details returned no result".into())
                })?;
                if place.geometry.is_none() {
                    warn!(place_id, "place details missing geometry data");
                    return Err(ServiceError::Unclassified(
                        "place details missing geometry data".into(),
                    ));
                }
                Ok(place)
            }
            PlacesStatus::NotFound | PlacesStatus::ZeroResults => {
                warn!(place_id, "place not found");
                Err(ServiceError::NotFound)
            }
            PlacesStatus::RequestDenied => {
                warn!(place_id, "place details request denied");
                Err(ServiceError::RequestDenied)
            }
            other => Err(ServiceError::Unclassified(format!(
                "place details API error: {}",
                other.as_str()
            ))),
        }
    }

    pub async fn create_map(
        &self,
        element_id: &str,
        center: LatLng,
        zoom: Option<u8>,
    ) -> Result<Arc<dyn MapSurface>, ServiceError> {
        if !center.is_valid() {
            return Err(ServiceError::InvalidCoordinates);
        }
        self.heal_if_corrupted();
        let handles = self.ensure_ready().await?;
        let options = MapOptions {
            center,
            zoom: zoom.unwrap_or(MAP_ZOOM),
            map_type_control: true,
            street_view_control: true,
            fullscreen_control: true,
            zoom_control: true,
        };
        let map = handles
            .module
            .create_map(element_id, &options)
            .map_err(|err| ServiceError::Unclassified(err.to_string()))?;
        info!(element_id, "map created");
        Ok(map)
    }

    pub fn create_marker(
        &self,
        map: &Arc<dyn MapSurface>,
        position: LatLng,
        title: &str,
    ) -> Option<Arc<dyn MarkerHandle>> {
        if !position.is_valid() {
            warn!(
                lat = position.lat,
                lng = position.lng,
                "refusing to create marker at invalid position"
            );
            return None;
        }
        let options = MarkerOptions {
            position,
            title: if title.trim().is_empty() {
                "Location".to_string()
            } else {
                title.to_string()
            },
            animation: Some(MarkerAnimation::Drop),
        };
        match map.add_marker(&options) {
            Ok(marker) => {
                debug!(title = %options.title, "marker created");
                Some(marker)
            }
            Err(err) => {
                warn!(?err, "marker creation failed");
                None
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        if self.inner.corrupted.load(Ordering::SeqCst) {
            return false;
        }
        match &*self.inner.lifecycle.lock() {
            Lifecycle::Ready(handles) => handles.module.has_places(),
            _ => false,
        }
    }

    pub fn status(&self) -> ServiceStatus {
        let lifecycle = self.inner.lifecycle.lock();
        let module = self.inner.module_cache.lock().clone();
        let ready_handles = match &*lifecycle {
            Lifecycle::Ready(handles) => Some(Arc::clone(handles)),
            _ => None,
        };
        let corrupted = self.inner.corrupted.load(Ordering::SeqCst);
        let has_capability = module.as_ref().is_some_and(|m| m.has_places());
        let last_error = match &*lifecycle {
            Lifecycle::Failed(reason) => Some(reason.to_string()),
            _ => self.inner.last_error.lock().as_ref().map(ToString::to_string),
        };

        ServiceStatus {
            state: lifecycle.as_str(),
            initialized: ready_handles.is_some(),
            has_module: module.is_some(),
            has_capability,
            has_autocomplete_service: ready_handles.is_some(),
            has_details_service: ready_handles.is_some(),
            is_ready: !corrupted && ready_handles.is_some() && has_capability,
            corrupted,
            last_error,
            validation_status: self.inner.validation_status.lock().clone(),
            provider_version: module.and_then(|m| m.version()),
            module_loads: self.inner.module_loads.load(Ordering::SeqCst),
        }
    }

    pub fn last_error(&self) -> Option<ServiceError> {
        match &*self.inner.lifecycle.lock() {
            Lifecycle::Failed(reason) => Some(reason.clone()),
            _ => self.inner.last_error.lock().clone(),
        }
    }

    // Keeps the loaded module. An in-flight initialization settles before the next one starts.
    pub fn reset(&self) {
        info!("resetting maps service");
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Uninitialized);
            if let Lifecycle::Initializing(pending) = previous {
                *self.inner.superseded.lock() = Some(pending);
            }
        }
        *self.inner.last_error.lock() = None;
        self.inner.corrupted.store(false, Ordering::SeqCst);
    }

    // The next operation resets first.
    pub fn mark_corrupted(&self) {
        self.inner.corrupted.store(true, Ordering::SeqCst);
    }

    pub fn check_integrity(&self) -> Result<(), ServiceError> {
        if self.inner.corrupted.load(Ordering::SeqCst) {
            return Err(ServiceError::StateCorrupted);
        }
        if let Lifecycle::Ready(handles) = &*self.inner.lifecycle.lock() {
            if !handles.module.has_places() {
                return Err(ServiceError::StateCorrupted);
            }
        }
        Ok(())
    }

    fn heal_if_corrupted(&self) {
        if let Err(reason) = self.check_integrity() {
            warn!(%reason, "maps service state corrupted; resetting before use");
            *self.inner.module_cache.lock() = None;
            self.reset();
        }
    }

    async fn ensure_ready(&self) -> InitOutcome {
        let pending = {
            let mut lifecycle = self.inner.lifecycle.lock();
            match &*lifecycle {
                Lifecycle::Ready(handles) => return Ok(Arc::clone(handles)),
                Lifecycle::Initializing(pending) => {
                    debug!("waiting for in-flight maps initialization");
                    pending.clone()
                }
                Lifecycle::Uninitialized | Lifecycle::Failed(_) => {
                    let generation = self.inner.generation.load(Ordering::SeqCst);
                    let superseded = self.inner.superseded.lock().take();
                    let inner = Arc::clone(&self.inner);
                    let pending = async move {
                        if let Some(previous) = superseded {
                            debug!("waiting for superseded initialization to settle");
                            let _ = previous.await;
                        }
                        run_initialization(inner, generation).await
                    }
                    .boxed()
                    .shared();
                    *lifecycle = Lifecycle::Initializing(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }
}

async fn run_initialization(inner: Arc<ServiceInner>, generation: u64) -> InitOutcome {
    info!("starting maps service initialization");
    let outcome = initialize_handles(&inner, generation).await;

    if inner.generation.load(Ordering::SeqCst) != generation {
        debug!("initialization superseded by reset; leaving state untouched");
        return outcome;
    }

    let mut lifecycle = inner.lifecycle.lock();
    match &outcome {
        Ok(handles) => {
            *lifecycle = Lifecycle::Ready(Arc::clone(handles));
            *inner.last_error.lock() = None;
            info!(
                version = ?handles.module.version(),
                "maps service ready with places support"
            );
        }
        Err(reason) => {
            *lifecycle = Lifecycle::Failed(reason.clone());
            *inner.last_error.lock() = Some(reason.clone());
            warn!(%reason, kind = reason.as_str(), "maps service initialization failed");
        }
    }
    outcome
}

async fn initialize_handles(inner: &ServiceInner, generation: u64) -> InitOutcome {
    let cached = inner.module_cache.lock().clone();
    let module = match cached {
        Some(module) => {
            debug!("reusing loaded maps module");
            module
        }
        None => {
            let loaded = timeout(inner.init_timeout, inner.loader.load())
                .await
                .map_err(|_| ServiceError::InitializationTimeout)?
                .map_err(|err| ServiceError::from_app_error(&err))?;
            inner.module_loads.fetch_add(1, Ordering::SeqCst);
            if inner.generation.load(Ordering::SeqCst) == generation {
                *inner.module_cache.lock() = Some(Arc::clone(&loaded));
            } else {
                debug!("module loaded by a superseded initialization is not cached");
            }
            loaded
        }
    };

    if !module.has_places() {
        return Err(ServiceError::CapabilityNotEnabled);
    }

    let autocomplete = module
        .autocomplete_service()
        .map_err(|err| ServiceError::from_app_error(&err))?;
    let details = module
        .details_service()
        .map_err(|err| ServiceError::from_app_error(&err))?;

    let validation = validate_autocomplete(autocomplete.as_ref(), inner.validation_timeout).await;
    *inner.validation_status.lock() = Some(validation);

    Ok(Arc::new(Handles {
        module,
        autocomplete,
        details,
    }))
}

async fn validate_autocomplete(service: &dyn AutocompleteService, limit: Duration) -> String {
    let probe = PredictionRequest {
        input: VALIDATION_QUERY.to_string(),
        types: vec!["country".to_string()],
        session_token: None,
    };
    match timeout(limit, service.predictions(&probe)).await {
        Ok(Ok(reply)) => {
            match &reply.status {
                PlacesStatus::Ok | PlacesStatus::ZeroResults => {
                    debug!(status = reply.status.as_str(), "autocomplete validation passed");
                }
                PlacesStatus::RequestDenied => {
                    warn!("autocomplete validation denied; check that the Places API is enabled");
                }
                other => {
                    debug!(status = other.as_str(), "autocomplete validation inconclusive");
                }
            }
            reply.status.as_str().to_string()
        }
        Ok(Err(err)) => {
            warn!(?err, "autocomplete validation failed");
            "ERROR".to_string()
        }
        Err(_) => {
            warn!("autocomplete validation timed out");
            "TIMEOUT".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{SyntheticCatalog, SyntheticLoader};

    fn config() -> AppConfig {
        AppConfig {
            init_timeout_ms: 200,
            validation_timeout_ms: 100,
            ..AppConfig::default()
        }
    }

    fn client(loader: &SyntheticLoader) -> ServiceClient {
        ServiceClient::with_loader(Arc::new(loader.clone()), &config())
    }

    #[tokio::test]
    async fn concurrent_initialization_loads_once() {
        let loader = SyntheticLoader::new(SyntheticCatalog::default());
        loader.set_load_delay(Duration::from_millis(20));
        let client = client(&loader);

        let (a, b, c) = tokio::join!(client.initialize(), client.initialize(), client.search("klcc"));
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert!(!c.is_empty());
        assert_eq!(loader.load_calls(), 1);
        assert!(client.is_ready());
        assert_eq!(client.status().state, "ready");
        assert_eq!(client.status().validation_status.as_deref(), Some("OK"));
    }

    #[tokio::test]
    async fn slow_loader_times_out_and_retries_from_scratch() {
        let loader = SyntheticLoader::new(SyntheticCatalog::default());
        loader.set_load_delay(Duration::from_secs(5));
        let client = client(&loader);

        let err = client.initialize().await.unwrap_err();
        assert_eq!(err, ServiceError::InitializationTimeout);
        let status = client.status();
        assert_eq!(status.state, "failed");
        assert!(status.last_error.is_some());

        loader.set_load_delay(Duration::ZERO);
        client.initialize().await.unwrap();
        assert!(client.is_ready());
        assert_eq!(loader.load_calls(), 2);
    }

    #[tokio::test]
    async fn missing_places_capability_fails_initialization() {
        let loader = SyntheticLoader::new(SyntheticCatalog::default());
        loader.set_places_enabled(false);
        let client = client(&loader);

        assert_eq!(
            client.initialize().await.unwrap_err(),
            ServiceError::CapabilityNotEnabled
        );
        assert!(client.search("klcc").await.is_empty());
        assert!(!client.is_ready());
    }

    #[tokio::test]
    async fn loader_errors_are_classified() {
        let loader = SyntheticLoader::new(SyntheticCatalog::default());
        loader.fail_next_load("ApiTargetBlockedMapError");
        let client = client(&loader);
        assert_eq!(
            client.initialize().await.unwrap_err(),
            ServiceError::AccessBlocked
        );
        client.initialize().await.unwrap();
    }

    #[tokio::test]
    async fn denied_validation_does_not_fail_initialization() {
        let loader = SyntheticLoader::new(SyntheticCatalog::default());
        loader.set_autocomplete_status(Some(PlacesStatus::RequestDenied));
        let client = client(&loader);
        client.initialize().await.unwrap();
        assert_eq!(
            client.status().validation_status.as_deref(),
            Some("REQUEST_DENIED")
        );
        assert!(client.search("klcc").await.is_empty());
    }

    #[tokio::test]
    async fn corruption_triggers_reset_and_fresh_initialization() {
        let loader = SyntheticLoader::new(SyntheticCatalog::default());
        let client = client(&loader);
        client.initialize().await.unwrap();

        client.mark_corrupted();
        assert!(!client.is_ready());
        assert_eq!(client.check_integrity(), Err(ServiceError::StateCorrupted));

        let results = client.search("petronas").await;
        assert!(!results.is_empty());
        assert!(client.is_ready());
        assert!(!client.status().corrupted);
        assert_eq!(loader.load_calls(), 2);
    }

    #[tokio::test]
    async fn capability_loss_is_detected_as_corruption() {
        let loader = SyntheticLoader::new(SyntheticCatalog::default());
        let client = client(&loader);
        client.initialize().await.unwrap();

        loader.set_places_enabled(false);
        assert_eq!(client.check_integrity(), Err(ServiceError::StateCorrupted));
        assert!(!client.is_ready());
        loader.set_places_enabled(true);
        assert!(!client.search("petronas").await.is_empty());
    }

    #[tokio::test]
    async fn reset_keeps_loaded_module() {
        let loader = SyntheticLoader::new(SyntheticCatalog::default());
        let client = client(&loader);
        client.initialize().await.unwrap();
        client.reset();
        assert_eq!(client.status().state, "uninitialized");
        assert!(client.status().has_module);

        client.initialize().await.unwrap();
        assert_eq!(loader.load_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_mid_initialization_waits_before_loading_again() {
        let loader = SyntheticLoader::new(SyntheticCatalog::default());
        loader.set_load_delay(Duration::from_millis(200));
        let client = ServiceClient::with_loader(Arc::new(loader.clone()), &AppConfig::default());

        let first = tokio::spawn({
            let client = client.clone();
            async move { client.initialize().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.reset();
        let second = tokio::spawn({
            let client = client.clone();
            async move { client.initialize().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(loader.load_calls(), 1);
        assert_eq!(client.status().state, "initializing");

        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());
        assert_eq!(loader.load_calls(), 2);
        assert!(client.is_ready());
    }

    #[tokio::test]
    async fn details_errors_are_classified() {
        let loader = SyntheticLoader::new(SyntheticCatalog::default());
        let client = client(&loader);

        assert_eq!(
            client.get_details("missing").await.unwrap_err(),
            ServiceError::NotFound
        );

        loader.set_details_status(Some(PlacesStatus::RequestDenied));
        assert_eq!(
            client.get_details("ChIJ-petronas").await.unwrap_err(),
            ServiceError::RequestDenied
        );

        loader.set_details_status(Some(PlacesStatus::OverQueryLimit));
        assert!(matches!(
            client.get_details("ChIJ-petronas").await.unwrap_err(),
            ServiceError::Unclassified(_)
        ));

        loader.set_details_status(None);
        let place = client.get_details("ChIJ-petronas").await.unwrap();
        assert_eq!(place.geometry.unwrap().location, LatLng::new(3.1579, 101.7116));
    }

    #[tokio::test]
    async fn marker_creation_rejects_invalid_positions() {
        let loader = SyntheticLoader::new(SyntheticCatalog::default());
        let client = client(&loader);
        let map = client
            .create_map("google-map", LatLng::new(3.139, 101.686), None)
            .await
            .unwrap();
        assert_eq!(map.zoom(), Some(13));

        assert!(client
            .create_marker(&map, LatLng::new(91.0, 0.0), "bad")
            .is_none());
        assert_eq!(map.marker_count(), 0);

        let marker = client
            .create_marker(&map, LatLng::new(3.1579, 101.7116), "")
            .unwrap();
        assert_eq!(marker.title(), "Location");
        assert_eq!(map.marker_count(), 1);

        assert_eq!(
            client
                .create_map("google-map", LatLng::new(f64::NAN, 0.0), None)
                .await
                .err(),
            Some(ServiceError::InvalidCoordinates)
        );
    }
}
