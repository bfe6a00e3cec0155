use std::time::Duration;

use chrono::NaiveDateTime;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::model::Place;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteRequest {
    pub place_id: String,
    pub place_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place_address: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub place_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl FavoriteRequest {
    pub fn from_place(place: &Place, notes: Option<String>) -> AppResult<Self> {
        let location = place
            .geometry
            .as_ref()
            .map(|geometry| geometry.location)
            .filter(|location| location.is_valid())
            .ok_or_else(|| AppError::Config("place has no valid location to save".into()))?;
        if place.id.is_empty() {
            return Err(AppError::Config("place id is required".into()));
        }

        Ok(Self {
            place_id: place.id.clone(),
            place_name: place.display_name().to_string(),
            place_address: Some(place.address.clone()).filter(|a| !a.is_empty()),
            latitude: location.lat,
            longitude: location.lng,
            place_types: place.types.clone(),
            rating: place.rating,
            photo_reference: place.photos.first().map(|photo| photo.id.clone()),
            notes: notes.filter(|n| !n.trim().is_empty()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    pub id: i64,
    pub place_id: String,
    pub place_name: String,
    pub place_address: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub place_types: Option<String>,
    pub rating: Option<f64>,
    pub photo_reference: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl Favorite {
    pub fn types(&self) -> Vec<String> {
        self.place_types
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    success: bool,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckResponse {
    is_favorite: bool,
}

#[derive(Clone)]
pub struct FavoritesClient {
    http: Client,
    base: Url,
}

impl FavoritesClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        Self::with_client(http, &config.favorites_api_base)
    }

    pub fn with_client(http: Client, base_url: &str) -> AppResult<Self> {
        let base = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|err| AppError::Config(format!("invalid favorites API base url: {err}")))?;
        if base.cannot_be_a_base() {
            return Err(AppError::Config(format!(
                "favorites API base url cannot carry paths: {base_url}"
            )));
        }
        Ok(Self { http, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("favorites").extend(segments);
        }
        url
    }

    pub async fn list(&self) -> AppResult<Vec<Favorite>> {
        let favorites: Vec<Favorite> = self
            .http
            .get(self.endpoint(&[]))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(count = favorites.len(), "favorites fetched");
        Ok(favorites)
    }

    pub async fn add(&self, request: &FavoriteRequest) -> AppResult<Favorite> {
        let response = self.http.post(self.endpoint(&[])).json(request).send().await?;
        let status = response.status();
        let envelope: Envelope<Favorite> = response.json().await?;
        if !status.is_success() || !envelope.success {
            return Err(AppError::Provider(envelope.message.unwrap_or_else(|| {
                format!("favorites API rejected request with status {status}")
            })));
        }
        let favorite = envelope
            .data
            .ok_or_else(|| AppError::Provider("favorites API returned no data".into()))?;
        info!(place_id = %favorite.place_id, "favorite added");
        Ok(favorite)
    }

    pub async fn add_place(&self, place: &Place, notes: Option<String>) -> AppResult<Favorite> {
        self.add(&FavoriteRequest::from_place(place, notes)?).await
    }

    pub async fn get(&self, place_id: &str) -> AppResult<Option<Favorite>> {
        let envelope: Envelope<Favorite> = self
            .http
            .get(self.endpoint(&[place_id]))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(envelope.data)
    }

    pub async fn remove(&self, place_id: &str) -> AppResult<()> {
        let response = self.http.delete(self.endpoint(&[place_id])).send().await?;
        let status = response.status();
        let envelope: Envelope<serde_json::Value> = response.json().await?;
        if !status.is_success() || !envelope.success {
            return Err(AppError::Provider(envelope.message.unwrap_or_else(|| {
                format!("favorites API rejected removal with status {status}")
            })));
        }
        info!(place_id, "favorite removed");
        Ok(())
    }

    pub async fn is_favorite(&self, place_id: &str) -> AppResult<bool> {
        let check: CheckResponse = self
            .http
            .get(self.endpoint(&[place_id, "check"]))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(check.is_favorite)
    }
}
