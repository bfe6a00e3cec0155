use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::provider::{
    AutocompleteService, DetailsRequest, DetailsService, HeadlessMap, MapOptions, MapSurface,
    MapsLoader, MapsModule, PhotoSource, PlacesReply, PlacesStatus, PredictionRequest,
    ProviderPhoto, ProviderPlace, ProviderPrediction, ProviderValue, RawBounds, RawGeometry,
    RawLatLng,
};

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 250;
const DEFAULT_QPS: u32 = 10;

pub struct HttpMapsLoader {
    base_url: String,
    api_key: Option<SecretString>,
    libraries: Vec<String>,
    timeout: Duration,
}

impl HttpMapsLoader {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            base_url: config.places_api_base.trim_end_matches('/').to_string(),
            api_key: config.google_maps_api_key.clone(),
            libraries: config.maps_libraries.clone(),
            timeout: Duration::from_secs(config.http_timeout_secs),
        }
    }
}

#[async_trait]
impl MapsLoader for HttpMapsLoader {
    async fn load(&self) -> AppResult<Arc<dyn MapsModule>> {
        let api_key = self.api_key.clone().ok_or_else(|| {
            AppError::Provider("RequestDeniedMapError: no maps API key configured".into())
        })?;
        let http = reqwest::Client::builder().timeout(self.timeout).build()?;
        let has_places = self.libraries.iter().any(|lib| lib == "places");
        debug!(base = %self.base_url, has_places, "http maps module ready");
        Ok(Arc::new(HttpMapsModule {
            places: Arc::new(HttpPlacesClient::new(
                http,
                self.base_url.clone(),
                api_key,
                StdRng::from_entropy(),
            )),
            has_places,
        }))
    }
}

struct HttpMapsModule {
    places: Arc<HttpPlacesClient>,
    has_places: bool,
}

impl MapsModule for HttpMapsModule {
    fn version(&self) -> Option<String> {
        Some("places-web-service".to_string())
    }

    fn has_places(&self) -> bool {
        self.has_places
    }

    fn autocomplete_service(&self) -> AppResult<Arc<dyn AutocompleteService>> {
        Ok(self.places.clone())
    }

    fn details_service(&self) -> AppResult<Arc<dyn DetailsService>> {
        Ok(self.places.clone())
    }

    fn create_map(&self, element_id: &str, options: &MapOptions) -> AppResult<Arc<dyn MapSurface>> {
        Ok(Arc::new(HeadlessMap::new(element_id, options)))
    }
}

struct RateLimiter {
    interval: Duration,
    last_tick: AsyncMutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(qps: u32) -> Self {
        let interval_ms = (1000_f64 / qps.max(1) as f64).ceil() as u64;
        Self {
            interval: Duration::from_millis(interval_ms),
            last_tick: AsyncMutex::new(None),
        }
    }

    async fn wait(&self) {
        let interval = self.interval;
        let mut last = self.last_tick.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < interval {
                sleep(interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

pub struct HttpPlacesClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    rate_limiter: RateLimiter,
    jitter_rng: Mutex<StdRng>,
}

impl HttpPlacesClient {
    pub fn new(http: reqwest::Client, base_url: String, api_key: SecretString, rng: StdRng) -> Self {
        Self {
            http,
            base_url,
            api_key,
            rate_limiter: RateLimiter::new(DEFAULT_QPS),
            jitter_rng: Mutex::new(rng),
        }
    }

    async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> AppResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}/{}", self.base_url, path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.rate_limiter.wait().await;
            let outcome = self
                .http
                .get(&url)
                .query(query)
                .query(&[("key", self.api_key.expose_secret())])
                .send()
                .await
                .and_then(|response| response.error_for_status());
            match outcome {
                Ok(response) => return Ok(response.json::<T>().await?),
                Err(err) if attempt < MAX_ATTEMPTS && is_transient(&err) => {
                    let delay = self.backoff_delay(attempt);
                    warn!(?err, attempt, "places request failed; retrying after {:?}", delay);
                    sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = (attempt - 1).min(6);
        let base = Duration::from_millis(BASE_BACKOFF_MS * (1 << exponent));
        let jitter_ms = self.jitter_rng.lock().gen_range(0..BASE_BACKOFF_MS);
        base + Duration::from_millis(jitter_ms)
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout()
        || err.is_connect()
        || err.status().is_some_and(|status| status.is_server_error())
}

#[derive(Deserialize)]
struct AutocompleteResponse {
    #[serde(default)]
    predictions: Vec<WirePrediction>,
    status: String,
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct WirePrediction {
    place_id: String,
    #[serde(default)]
    description: String,
    structured_formatting: Option<WireFormatting>,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Deserialize)]
struct WireFormatting {
    main_text: Option<String>,
    secondary_text: Option<String>,
}

#[derive(Deserialize)]
struct DetailsResponse {
    result: Option<WirePlace>,
    status: String,
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct WirePlace {
    place_id: Option<String>,
    name: Option<String>,
    formatted_address: Option<String>,
    #[serde(default)]
    types: Vec<String>,
    rating: Option<f64>,
    user_ratings_total: Option<u32>,
    geometry: Option<WireGeometry>,
    #[serde(default)]
    photos: Vec<WirePhoto>,
    #[serde(flatten)]
    other: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct WireGeometry {
    location: Option<WireLatLng>,
    viewport: Option<WireBounds>,
    bounds: Option<WireBounds>,
}

#[derive(Deserialize, Clone, Copy)]
struct WireLatLng {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
struct WireBounds {
    northeast: WireLatLng,
    southwest: WireLatLng,
}

#[derive(Deserialize)]
struct WirePhoto {
    photo_reference: String,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    html_attributions: Vec<String>,
}

impl From<WireBounds> for RawBounds {
    fn from(bounds: WireBounds) -> Self {
        RawBounds::Corners {
            northeast: RawLatLng::plain(bounds.northeast.lat, bounds.northeast.lng),
            southwest: RawLatLng::plain(bounds.southwest.lat, bounds.southwest.lng),
        }
    }
}

struct RemotePhoto {
    base_url: String,
    reference: String,
}

impl PhotoSource for RemotePhoto {
    fn url(&self, max_width: Option<u32>) -> String {
        format!(
            "{}/photo?maxwidth={}&photo_reference={}",
            self.base_url,
            max_width.unwrap_or(400),
            self.reference
        )
    }
}

#[async_trait]
impl AutocompleteService for HttpPlacesClient {
    async fn predictions(
        &self,
        request: &PredictionRequest,
    ) -> AppResult<PlacesReply<Vec<ProviderPrediction>>> {
        let mut query = vec![("input", request.input.clone())];
        if !request.types.is_empty() {
            query.push(("types", request.types.join("|")));
        }
        if let Some(token) = &request.session_token {
            query.push(("sessiontoken", token.clone()));
        }

        let parsed: AutocompleteResponse = self.get_json("autocomplete/json", &query).await?;
        if let Some(message) = &parsed.error_message {
            warn!(status = %parsed.status, message, "autocomplete error message");
        }
        trace!(count = parsed.predictions.len(), "autocomplete response");

        let predictions = parsed
            .predictions
            .into_iter()
            .map(|wire| {
                let (main_text, secondary_text) = wire
                    .structured_formatting
                    .map(|f| (f.main_text, f.secondary_text))
                    .unwrap_or_default();
                ProviderPrediction {
                    place_id: wire.place_id,
                    description: wire.description,
                    main_text,
                    secondary_text,
                    types: wire.types,
                }
            })
            .collect();
        Ok(PlacesReply::new(PlacesStatus::parse(&parsed.status), predictions))
    }
}

#[async_trait]
impl DetailsService for HttpPlacesClient {
    async fn details(
        &self,
        request: &DetailsRequest,
    ) -> AppResult<PlacesReply<Option<ProviderPlace>>> {
        let mut query = vec![("place_id", request.place_id.clone())];
        if !request.fields.is_empty() {
            query.push(("fields", request.fields.join(",")));
        }

        let parsed: DetailsResponse = self.get_json("details/json", &query).await?;
        if let Some(message) = &parsed.error_message {
            warn!(status = %parsed.status, message, "place details error message");
        }
        let place = parsed.result.map(|wire| self.to_provider_place(wire));
        Ok(PlacesReply::new(PlacesStatus::parse(&parsed.status), place))
    }
}

impl HttpPlacesClient {
    fn to_provider_place(&self, wire: WirePlace) -> ProviderPlace {
        let geometry = wire.geometry.map(|g| RawGeometry {
            location: g.location.map(|at| RawLatLng::plain(at.lat, at.lng)),
            viewport: g.viewport.map(RawBounds::from),
            bounds: g.bounds.map(RawBounds::from),
        });
        let photos = wire
            .photos
            .into_iter()
            .map(|photo| ProviderPhoto {
                width: photo.width,
                height: photo.height,
                html_attributions: photo.html_attributions,
                source: Some(Arc::new(RemotePhoto {
                    base_url: self.base_url.clone(),
                    reference: photo.photo_reference,
                }) as Arc<dyn PhotoSource>),
            })
            .collect();
        let description = wire
            .other
            .get("vicinity")
            .and_then(Value::as_str)
            .map(str::to_string);
        let extra = wire
            .other
            .into_iter()
            .map(|(key, value)| (key, ProviderValue::Plain(value)))
            .collect();

        ProviderPlace {
            place_id: wire.place_id,
            name: wire.name,
            description,
            formatted_address: wire.formatted_address,
            types: wire.types,
            rating: wire.rating,
            user_ratings_total: wire.user_ratings_total,
            geometry,
            photos,
            extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use serde_json::json;

    use super::*;

    fn client(server: &Server) -> HttpPlacesClient {
        let base = server.url_str("/place");
        HttpPlacesClient::new(
            reqwest::Client::new(),
            base.trim_end_matches('/').to_string(),
            SecretString::from("test-key".to_string()),
            StdRng::seed_from_u64(7),
        )
    }

    #[tokio::test]
    async fn autocomplete_sends_types_and_parses_predictions() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/place/autocomplete/json"),
                request::query(url_decoded(contains(("input", "klcc")))),
                request::query(url_decoded(contains(("types", "establishment|geocode")))),
                request::query(url_decoded(contains(("key", "test-key")))),
            ])
            .respond_with(json_encoded(json!({
                "status": "OK",
                "predictions": [{
                    "place_id": "abc",
                    "description": "Petronas Twin Towers, Kuala Lumpur",
                    "structured_formatting": {
                        "main_text": "Petronas Twin Towers",
                        "secondary_text": "Kuala Lumpur"
                    },
                    "types": ["tourist_attraction"]
                }]
            }))),
        );

        let reply = client(&server)
            .predictions(&PredictionRequest {
                input: "klcc".into(),
                types: vec!["establishment".into(), "geocode".into()],
                session_token: Some("token".into()),
            })
            .await
            .unwrap();
        assert_eq!(reply.status, PlacesStatus::Ok);
        assert_eq!(reply.payload[0].main_text.as_deref(), Some("Petronas Twin Towers"));
    }

    #[tokio::test]
    async fn details_parse_geometry_photos_and_extras() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/place/details/json"),
                request::query(url_decoded(contains(("place_id", "abc")))),
            ])
            .respond_with(json_encoded(json!({
                "status": "OK",
                "result": {
                    "place_id": "abc",
                    "name": "Petronas Twin Towers",
                    "formatted_address": "KLCC, Kuala Lumpur",
                    "vicinity": "Kuala Lumpur City Centre",
                    "geometry": {
                        "location": {"lat": 3.1579, "lng": 101.7116},
                        "viewport": {
                            "northeast": {"lat": 3.16, "lng": 101.72},
                            "southwest": {"lat": 3.15, "lng": 101.70}
                        }
                    },
                    "photos": [{
                        "photo_reference": "ref1",
                        "width": 800,
                        "height": 600,
                        "html_attributions": ["someone"]
                    }],
                    "utc_offset": 480
                }
            }))),
        );

        let reply = client(&server)
            .details(&DetailsRequest {
                place_id: "abc".into(),
                fields: vec!["name".into(), "geometry".into()],
            })
            .await
            .unwrap();
        let place = reply.payload.unwrap();
        assert_eq!(place.description.as_deref(), Some("Kuala Lumpur City Centre"));
        let location = place.geometry.unwrap().location.unwrap();
        assert_eq!(location.lng.resolve(), 101.7116);
        let url = place.photos[0].source.as_ref().unwrap().url(Some(250));
        assert!(url.contains("maxwidth=250"));
        assert!(url.contains("photo_reference=ref1"));
        assert!(place.extra.contains_key("utc_offset"));
    }

    #[tokio::test]
    async fn body_status_is_passed_through() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/place/details/json")).respond_with(
                json_encoded(json!({"status": "REQUEST_DENIED", "error_message": "bad key"})),
            ),
        );
        let reply = client(&server)
            .details(&DetailsRequest {
                place_id: "abc".into(),
                fields: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(reply.status, PlacesStatus::RequestDenied);
        assert!(reply.payload.is_none());
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/place/autocomplete/json"))
                .times(2)
                .respond_with(httptest::cycle![
                    status_code(503),
                    json_encoded(json!({"status": "ZERO_RESULTS", "predictions": []})),
                ]),
        );
        let reply = client(&server)
            .predictions(&PredictionRequest {
                input: "zz".into(),
                types: Vec::new(),
                session_token: None,
            })
            .await
            .unwrap();
        assert_eq!(reply.status, PlacesStatus::ZeroResults);
    }

    #[tokio::test]
    async fn loader_without_key_is_denied() {
        let loader = HttpMapsLoader::new(&AppConfig::default());
        let err = loader.load().await.err().unwrap();
        assert!(err.to_string().contains("RequestDeniedMapError"));
    }
}
