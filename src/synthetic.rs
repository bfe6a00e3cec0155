use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, trace};

use crate::errors::{AppError, AppResult};
use crate::geo::LatLng;
use crate::provider::{
    AutocompleteService, DetailsRequest, DetailsService, HeadlessMap, MapOptions, MapSurface,
    MapsLoader, MapsModule, PhotoSource, PlacesReply, PlacesStatus, PredictionRequest,
    ProviderPhoto, ProviderPlace, ProviderPrediction, ProviderValue, RawBounds, RawGeometry,
    RawLatLng,
};

const VIEWPORT_SPAN: f64 = 0.005;

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub place_id: String,
    pub name: String,
    pub address: String,
    pub location: Option<LatLng>,
    pub types: Vec<String>,
    pub rating: Option<f64>,
    pub rating_count: Option<u32>,
}

impl CatalogEntry {
    fn new(
        place_id: &str,
        name: &str,
        address: &str,
        location: Option<(f64, f64)>,
        types: &[&str],
    ) -> Self {
        Self {
            place_id: place_id.to_string(),
            name: name.to_string(),
            address: address.to_string(),
            location: location.map(|(lat, lng)| LatLng::new(lat, lng)),
            types: types.iter().map(|t| (*t).to_string()).collect(),
            rating: None,
            rating_count: None,
        }
    }

    fn rated(mut self, rating: f64, count: u32) -> Self {
        self.rating = Some(rating);
        self.rating_count = Some(count);
        self
    }

    fn matches(&self, needle: &str, types: &[String]) -> bool {
        let type_match = types.is_empty() || self.types.iter().any(|t| types.contains(t));
        type_match
            && (self.name.to_lowercase().contains(needle)
                || self.address.to_lowercase().contains(needle))
    }

    fn to_prediction(&self) -> ProviderPrediction {
        ProviderPrediction {
            place_id: self.place_id.clone(),
            description: format!("{}, {}", self.name, self.address),
            main_text: Some(self.name.clone()),
            secondary_text: Some(self.address.clone()),
            types: self.types.clone(),
        }
    }

    fn to_place(&self) -> ProviderPlace {
        let geometry = self.location.map(|at| RawGeometry {
            location: Some(RawLatLng::lazy(at.lat, at.lng)),
            viewport: Some(RawBounds::Corners {
                northeast: RawLatLng::lazy(at.lat + VIEWPORT_SPAN, at.lng + VIEWPORT_SPAN),
                southwest: RawLatLng::lazy(at.lat - VIEWPORT_SPAN, at.lng - VIEWPORT_SPAN),
            }),
            bounds: None,
        });
        let photos = vec![ProviderPhoto {
            width: Some(1024),
            height: Some(768),
            html_attributions: vec![format!("<a>{}</a>", self.name)],
            source: Some(Arc::new(SyntheticPhoto {
                reference: self.place_id.clone(),
            })),
        }];
        let mut extra = BTreeMap::new();
        extra.insert(
            "url".to_string(),
            ProviderValue::Plain(json!(format!(
                "https://maps.example.invalid/?cid={}",
                self.place_id
            ))),
        );
        extra.insert("utc_offset".to_string(), ProviderValue::Plain(json!(480)));

        ProviderPlace {
            place_id: Some(self.place_id.clone()),
            name: Some(self.name.clone()),
            description: None,
            formatted_address: Some(self.address.clone()),
            types: self.types.clone(),
            rating: self.rating,
            user_ratings_total: self.rating_count,
            geometry,
            photos,
            extra,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticCatalog {
    entries: Vec<CatalogEntry>,
}

impl SyntheticCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, place_id: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| entry.place_id == place_id)
    }

    fn search(&self, input: &str, types: &[String]) -> Vec<ProviderPrediction> {
        let needle = input.trim().to_lowercase();
        self.entries
            .iter()
            .filter(|entry| entry.matches(&needle, types))
            .map(CatalogEntry::to_prediction)
            .collect()
    }
}

impl Default for SyntheticCatalog {
    fn default() -> Self {
        let poi = &["tourist_attraction", "point_of_interest", "establishment"];
        Self::new(vec![
            CatalogEntry::new(
                "ChIJ-petronas",
                "Petronas Twin Towers",
                "Kuala Lumpur City Centre (KLCC), 50088 Kuala Lumpur, Malaysia",
                Some((3.1579, 101.7116)),
                poi,
            )
            .rated(4.6, 98_412),
            CatalogEntry::new(
                "ChIJ-kltower",
                "KL Tower",
                "Jalan Puncak, 50250 Kuala Lumpur, Malaysia",
                Some((3.1528, 101.7038)),
                poi,
            )
            .rated(4.5, 51_203),
            CatalogEntry::new(
                "ChIJ-batucaves",
                "Batu Caves",
                "Gombak, 68100 Batu Caves, Selangor, Malaysia",
                Some((3.2379, 101.6840)),
                poi,
            )
            .rated(4.5, 72_950),
            CatalogEntry::new(
                "ChIJ-merdeka",
                "Merdeka Square",
                "Jalan Raja, 50050 Kuala Lumpur, Malaysia",
                Some((3.1478, 101.6953)),
                poi,
            ),
            CatalogEntry::new(
                "ChIJ-pavilion",
                "Pavilion Kuala Lumpur",
                "168 Jalan Bukit Bintang, 55100 Kuala Lumpur, Malaysia",
                Some((3.1490, 101.7134)),
                &["shopping_mall", "point_of_interest", "establishment"],
            )
            .rated(4.6, 88_030),
            CatalogEntry::new(
                "ChIJ-bukitbintang",
                "Bukit Bintang",
                "Kuala Lumpur, Federal Territory of Kuala Lumpur, Malaysia",
                Some((3.1466, 101.7110)),
                &["sublocality", "political", "geocode"],
            ),
            CatalogEntry::new(
                "ChIJ-kualalumpur",
                "Kuala Lumpur",
                "Federal Territory of Kuala Lumpur, Malaysia",
                Some((3.1390, 101.6869)),
                &["locality", "political", "geocode"],
            ),
            CatalogEntry::new(
                "ChIJ-malaysia",
                "Malaysia",
                "Malaysia",
                Some((4.2105, 101.9758)),
                &["country", "political", "geocode"],
            ),
            CatalogEntry::new(
                "ChIJ-unmapped",
                "Unmapped Kiosk",
                "Somewhere in Kuala Lumpur, Malaysia",
                None,
                &["store", "establishment"],
            ),
        ])
    }
}

struct SyntheticPhoto {
    reference: String,
}

impl PhotoSource for SyntheticPhoto {
    fn url(&self, max_width: Option<u32>) -> String {
        format!(
            "https://photos.example.invalid/{}?maxwidth={}",
            self.reference,
            max_width.unwrap_or(400)
        )
    }
}

struct SyntheticState {
    catalog: SyntheticCatalog,
    places_enabled: AtomicBool,
    load_delay: Mutex<Duration>,
    pending_load_failure: Mutex<Option<String>>,
    autocomplete_status: Mutex<Option<PlacesStatus>>,
    details_status: Mutex<Option<PlacesStatus>>,
    load_calls: AtomicUsize,
    autocomplete_calls: AtomicUsize,
    details_calls: AtomicUsize,
    maps: Mutex<Vec<Arc<HeadlessMap>>>,
}

#[derive(Clone)]
pub struct SyntheticLoader {
    state: Arc<SyntheticState>,
}

impl Default for SyntheticLoader {
    fn default() -> Self {
        Self::new(SyntheticCatalog::default())
    }
}

impl SyntheticLoader {
    pub fn new(catalog: SyntheticCatalog) -> Self {
        Self {
            state: Arc::new(SyntheticState {
                catalog,
                places_enabled: AtomicBool::new(true),
                load_delay: Mutex::new(Duration::ZERO),
                pending_load_failure: Mutex::new(None),
                autocomplete_status: Mutex::new(None),
                details_status: Mutex::new(None),
                load_calls: AtomicUsize::new(0),
                autocomplete_calls: AtomicUsize::new(0),
                details_calls: AtomicUsize::new(0),
                maps: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn set_load_delay(&self, delay: Duration) {
        *self.state.load_delay.lock() = delay;
    }

    pub fn set_places_enabled(&self, enabled: bool) {
        self.state.places_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_next_load(&self, message: &str) {
        *self.state.pending_load_failure.lock() = Some(message.to_string());
    }

    pub fn set_autocomplete_status(&self, status: Option<PlacesStatus>) {
        *self.state.autocomplete_status.lock() = status;
    }

    pub fn set_details_status(&self, status: Option<PlacesStatus>) {
        *self.state.details_status.lock() = status;
    }

    pub fn load_calls(&self) -> usize {
        self.state.load_calls.load(Ordering::SeqCst)
    }

    pub fn autocomplete_calls(&self) -> usize {
        self.state.autocomplete_calls.load(Ordering::SeqCst)
    }

    pub fn details_calls(&self) -> usize {
        self.state.details_calls.load(Ordering::SeqCst)
    }

    pub fn last_map(&self) -> Option<Arc<HeadlessMap>> {
        self.state.maps.lock().last().cloned()
    }
}

#[async_trait]
impl MapsLoader for SyntheticLoader {
    async fn load(&self) -> AppResult<Arc<dyn MapsModule>> {
        self.state.load_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.load_delay.lock();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        if let Some(message) = self.state.pending_load_failure.lock().take() {
            return Err(AppError::Provider(message));
        }
        debug!("synthetic maps module loaded");
        Ok(Arc::new(SyntheticModule {
            state: Arc::clone(&self.state),
        }))
    }
}

struct SyntheticModule {
    state: Arc<SyntheticState>,
}

impl MapsModule for SyntheticModule {
    fn version(&self) -> Option<String> {
        Some("synthetic".to_string())
    }

    fn has_places(&self) -> bool {
        self.state.places_enabled.load(Ordering::SeqCst)
    }

    fn autocomplete_service(&self) -> AppResult<Arc<dyn AutocompleteService>> {
        Ok(Arc::new(SyntheticPlaces {
            state: Arc::clone(&self.state),
        }))
    }

    fn details_service(&self) -> AppResult<Arc<dyn DetailsService>> {
        Ok(Arc::new(SyntheticPlaces {
            state: Arc::clone(&self.state),
        }))
    }

    fn create_map(&self, element_id: &str, options: &MapOptions) -> AppResult<Arc<dyn MapSurface>> {
        let map = Arc::new(HeadlessMap::new(element_id, options));
        self.state.maps.lock().push(Arc::clone(&map));
        Ok(map)
    }
}

struct SyntheticPlaces {
    state: Arc<SyntheticState>,
}

#[async_trait]
impl AutocompleteService for SyntheticPlaces {
    async fn predictions(
        &self,
        request: &PredictionRequest,
    ) -> AppResult<PlacesReply<Vec<ProviderPrediction>>> {
        self.state.autocomplete_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.state.autocomplete_status.lock().clone() {
            return Ok(PlacesReply::new(status, Vec::new()));
        }
        let found = self.state.catalog.search(&request.input, &request.types);
        trace!(input = %request.input, found = found.len(), "synthetic autocomplete");
        let status = if found.is_empty() {
            PlacesStatus::ZeroResults
        } else {
            PlacesStatus::Ok
        };
        Ok(PlacesReply::new(status, found))
    }
}

#[async_trait]
impl DetailsService for SyntheticPlaces {
    async fn details(
        &self,
        request: &DetailsRequest,
    ) -> AppResult<PlacesReply<Option<ProviderPlace>>> {
        self.state.details_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.state.details_status.lock().clone() {
            return Ok(PlacesReply::new(status, None));
        }
        Ok(match self.state.catalog.get(&request.place_id) {
            Some(entry) => PlacesReply::new(PlacesStatus::Ok, Some(entry.to_place())),
            None => PlacesReply::new(PlacesStatus::NotFound, None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn catalog_search_respects_types() {
        let loader = SyntheticLoader::default();
        let module = loader.load().await.unwrap();
        let autocomplete = module.autocomplete_service().unwrap();

        let reply = autocomplete
            .predictions(&PredictionRequest {
                input: "malaysia".into(),
                types: vec!["country".into()],
                session_token: None,
            })
            .await
            .unwrap();
        assert_eq!(reply.status, PlacesStatus::Ok);
        assert_eq!(reply.payload.len(), 1);
        assert_eq!(reply.payload[0].place_id, "ChIJ-malaysia");

        let reply = autocomplete
            .predictions(&PredictionRequest {
                input: "nowhere at all".into(),
                types: Vec::new(),
                session_token: None,
            })
            .await
            .unwrap();
        assert_eq!(reply.status, PlacesStatus::ZeroResults);
        assert_eq!(loader.autocomplete_calls(), 2);
    }

    #[tokio::test]
    async fn details_carry_live_provider_shapes() {
        let loader = SyntheticLoader::default();
        let module = loader.load().await.unwrap();
        let reply = module
            .details_service()
            .unwrap()
            .details(&DetailsRequest {
                place_id: "ChIJ-petronas".into(),
                fields: Vec::new(),
            })
            .await
            .unwrap();
        let place = reply.payload.unwrap();
        let photo = &place.photos[0];
        assert!(photo.source.as_ref().unwrap().url(Some(200)).contains("maxwidth=200"));
        let location = place.geometry.unwrap().location.unwrap();
        assert_eq!(location.lat.resolve(), 3.1579);
    }

    #[tokio::test]
    async fn scripted_load_failure_applies_once() {
        let loader = SyntheticLoader::default();
        loader.fail_next_load("boom");
        assert!(loader.load().await.is_err());
        assert!(loader.load().await.is_ok());
        assert_eq!(loader.load_calls(), 2);
    }
}
