pub mod config;
pub mod debounce;
pub mod diagnostics;
pub mod errors;
pub mod favorites;
pub mod geo;
pub mod map_view;
pub mod model;
pub mod normalize;
pub mod places;
pub mod provider;
pub mod search;
pub mod selection;
pub mod service;
pub mod store;
pub mod synthetic;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::config::AppConfig;
pub use crate::debounce::Debouncer;
pub use crate::diagnostics::AppHealth;
pub use crate::errors::{AppError, AppResult, ServiceError};
pub use crate::favorites::{Favorite, FavoriteRequest, FavoritesClient};
pub use crate::geo::{is_valid_coordinates, Geometry, LatLng};
pub use crate::map_view::MapView;
pub use crate::model::{PhotoRef, Place, Prediction};
pub use crate::provider::MapsLoader;
pub use crate::selection::{Selection, SelectionRequest, SelectionWorkflow};
pub use crate::service::{ServiceClient, ServiceStatus};
pub use crate::store::{ErrorDomain, PlacesStore, SearchHistoryEntry};

use crate::search::effective_query;

pub struct PlacesApp {
    config: AppConfig,
    service: ServiceClient,
    store: PlacesStore,
    workflow: SelectionWorkflow,
    map_view: MapView,
    favorites: FavoritesClient,
    debouncer: Debouncer,
    follower: Mutex<Option<JoinHandle<()>>>,
}

impl PlacesApp {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        init_tracing();
        let service = ServiceClient::new(&config);
        Self::assemble(config, service)
    }

    pub fn with_loader(config: AppConfig, loader: Arc<dyn MapsLoader>) -> AppResult<Self> {
        init_tracing();
        let service = ServiceClient::with_loader(loader, &config);
        Self::assemble(config, service)
    }

    fn assemble(config: AppConfig, service: ServiceClient) -> AppResult<Self> {
        let store = PlacesStore::new(config.search_history_limit);
        let workflow = SelectionWorkflow::new(service.clone(), store.clone(), &config);
        let map_view = MapView::new(service.clone(), store.clone(), &config);
        let favorites = FavoritesClient::new(&config)?;
        let debouncer = Debouncer::new(config.search_debounce());
        Ok(Self {
            config,
            service,
            store,
            workflow,
            map_view,
            favorites,
            debouncer,
            follower: Mutex::new(None),
        })
    }

    pub async fn start(&self) -> Result<(), ServiceError> {
        self.map_view.mount().await?;
        let mut follower = self.follower.lock();
        if follower.is_none() {
            *follower = Some(self.map_view.follow(self.store.subscribe_selected()));
        }
        info!(config = ?self.config.public_profile(), "places app started");
        Ok(())
    }

    pub fn search_input(&self, query: &str) {
        if effective_query(query).is_none() {
            self.debouncer.cancel();
            self.store.clear_suggestions();
            self.store.set_search_loading(false);
            return;
        }
        let service = self.service.clone();
        let store = self.store.clone();
        let query = query.to_string();
        self.debouncer
            .call(async move {
                run_search(&service, &store, &query).await;
            });
    }

    pub async fn search_now(&self, query: &str) -> Vec<Prediction> {
        run_search(&self.service, &self.store, query).await
    }

    pub fn select(&self, target: Selection, query: &str) -> JoinHandle<Option<Place>> {
        self.workflow.dispatch(SelectionRequest::new(target, query))
    }

    pub async fn select_now(&self, target: Selection, query: &str) -> Option<Place> {
        self.workflow.run(SelectionRequest::new(target, query)).await
    }

    pub fn clear_selection(&self) {
        self.store.set_selected(None);
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn service(&self) -> &ServiceClient {
        &self.service
    }

    pub fn store(&self) -> &PlacesStore {
        &self.store
    }

    pub fn map_view(&self) -> &MapView {
        &self.map_view
    }

    pub fn favorites(&self) -> &FavoritesClient {
        &self.favorites
    }

    pub fn health(&self) -> AppHealth {
        AppHealth::new(
            self.service.status(),
            self.config.public_profile(),
            self.store.snapshot(),
            self.map_view.is_ready(),
            self.map_view.marker_count(),
        )
    }

    pub fn shutdown(&self) {
        self.debouncer.cancel();
        if let Some(follower) = self.follower.lock().take() {
            follower.abort();
        }
        self.map_view.teardown();
        debug!("places app shut down");
    }
}

async fn run_search(service: &ServiceClient, store: &PlacesStore, query: &str) -> Vec<Prediction> {
    if effective_query(query).is_none() {
        store.clear_suggestions();
        return Vec::new();
    }
    store.set_search_loading(true);
    let results = service.search(query).await;
    if results.is_empty() {
        if let Some(err) = service.last_error() {
            warn!(?err, query, "search ran against an unavailable maps service");
            store.report_service_error(ErrorDomain::Search, &err);
        }
    } else {
        store.dismiss(ErrorDomain::Search);
    }
    store.set_suggestions(results.clone());
    store.set_search_loading(false);
    results
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,seeplace=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}
