use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::geo::LatLng;
use crate::model::Place;
use crate::provider::{MapSurface, MarkerAnimation, MarkerHandle};
use crate::service::ServiceClient;
use crate::store::{ErrorBanner, ErrorDomain, PlacesStore};

pub const MAP_ELEMENT_ID: &str = "google-map";

#[derive(Debug, Clone, Copy)]
struct ViewSettings {
    default_center: LatLng,
    default_zoom: u8,
    focus_zoom: u8,
    highlight: Duration,
}

#[derive(Default)]
struct ViewState {
    map: Option<Arc<dyn MapSurface>>,
    markers: Vec<Arc<dyn MarkerHandle>>,
    last_processed_id: Option<String>,
}

#[derive(Clone)]
pub struct MapView {
    service: ServiceClient,
    store: PlacesStore,
    element_id: String,
    settings: ViewSettings,
    state: Arc<Mutex<ViewState>>,
}

impl MapView {
    pub fn new(service: ServiceClient, store: PlacesStore, config: &AppConfig) -> Self {
        Self {
            service,
            store,
            element_id: MAP_ELEMENT_ID.to_string(),
            settings: ViewSettings {
                default_center: config.default_center,
                default_zoom: config.default_zoom,
                focus_zoom: config.focus_zoom,
                highlight: config.marker_highlight(),
            },
            state: Arc::new(Mutex::new(ViewState::default())),
        }
    }

    pub async fn mount(&self) -> Result<Arc<dyn MapSurface>, ServiceError> {
        if let Some(map) = self.map() {
            return Ok(map);
        }
        let map = self
            .service
            .create_map(
                &self.element_id,
                self.settings.default_center,
                Some(self.settings.default_zoom),
            )
            .await
            .map_err(|err| {
                warn!(?err, "map initialization failed");
                self.store.report_service_error(ErrorDomain::Map, &err);
                err
            })?;
        self.attach(Arc::clone(&map));
        Ok(map)
    }

    pub fn attach(&self, map: Arc<dyn MapSurface>) {
        debug!(element_id = map.element_id(), "map surface attached");
        self.state.lock().map = Some(map);
    }

    pub fn map(&self) -> Option<Arc<dyn MapSurface>> {
        self.state.lock().map.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().map.is_some() && self.service.is_ready()
    }

    pub fn error(&self) -> Option<ErrorBanner> {
        self.store.error(ErrorDomain::Map)
    }

    pub fn marker_count(&self) -> usize {
        self.state.lock().markers.len()
    }

    // Re-delivery of the last processed place is ignored, even if it failed validation.
    // Places with neither id nor name are never remembered.
    pub fn sync_selection(&self, place: Option<&Place>) {
        let Some(place) = place else {
            return;
        };
        let Some(map) = self.map() else {
            debug!("selection changed before the map was mounted");
            return;
        };

        let identity = place.identity();
        if !identity.is_empty() {
            let mut state = self.state.lock();
            if state.last_processed_id.as_deref() == Some(identity) {
                trace!(%identity, "selection already processed");
                return;
            }
            state.last_processed_id = Some(identity.to_string());
        }

        self.clear_markers();

        let Some(location) = place
            .geometry
            .as_ref()
            .map(|geometry| geometry.location)
            .filter(LatLng::is_valid)
        else {
            warn!(place_id = %place.id, "selected place has invalid coordinates");
            self.store
                .report_service_error(ErrorDomain::Map, &ServiceError::InvalidCoordinates);
            return;
        };

        let marker = self
            .service
            .create_marker(&map, location, place.display_name());
        if let Some(marker) = &marker {
            self.state.lock().markers.push(Arc::clone(marker));
        }

        if let Err(err) = map
            .set_center(location)
            .and_then(|_| map.set_zoom(self.settings.focus_zoom))
        {
            warn!(?err, "recenter failed; falling back to default view");
            if let Err(err) = map
                .set_center(self.settings.default_center)
                .and_then(|_| map.set_zoom(self.settings.default_zoom))
            {
                warn!(?err, "fallback recenter failed");
            }
        }

        if let Some(marker) = marker {
            self.highlight(marker);
        }
        debug!(place_id = %place.id, "map synchronized with selection");
    }

    // The reset timer is detached and fires even if the selection has moved on.
    fn highlight(&self, marker: Arc<dyn MarkerHandle>) {
        if let Err(err) = marker.set_animation(Some(MarkerAnimation::Bounce)) {
            debug!(?err, "marker highlight failed");
            return;
        }
        let delay = self.settings.highlight;
        tokio::spawn(async move {
            sleep(delay).await;
            if let Err(err) = marker.set_animation(None) {
                debug!(?err, "clearing marker highlight failed");
            }
        });
    }

    pub fn add_marker(&self, position: LatLng, title: &str) -> Option<Arc<dyn MarkerHandle>> {
        let map = self.map()?;
        let marker = self.service.create_marker(&map, position, title)?;
        self.state.lock().markers.push(Arc::clone(&marker));
        Some(marker)
    }

    pub fn clear_markers(&self) {
        let markers = std::mem::take(&mut self.state.lock().markers);
        for marker in markers {
            if let Err(err) = marker.detach() {
                warn!(?err, "failed to remove marker");
            }
        }
    }

    pub fn center_map(&self, position: LatLng, zoom: Option<u8>) {
        if !position.is_valid() {
            warn!(
                lat = position.lat,
                lng = position.lng,
                "ignoring recenter to invalid coordinates"
            );
            return;
        }
        let Some(map) = self.map() else {
            return;
        };
        if let Err(err) = map.set_center(position) {
            warn!(?err, "recenter failed");
            return;
        }
        if let Some(zoom) = zoom {
            if let Err(err) = map.set_zoom(zoom) {
                warn!(?err, "zoom change failed");
            }
        }
    }

    pub fn teardown(&self) {
        self.clear_markers();
        let mut state = self.state.lock();
        state.last_processed_id = None;
        state.map = None;
        debug!("map view torn down");
    }

    pub fn follow(&self, mut selected: watch::Receiver<Option<Place>>) -> JoinHandle<()> {
        let view = self.clone();
        tokio::spawn(async move {
            loop {
                let current = selected.borrow_and_update().clone();
                view.sync_selection(current.as_ref());
                if selected.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}
