use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::model::{Place, Prediction};
use crate::normalize::renormalize;
use crate::service::ServiceClient;
use crate::store::{ErrorDomain, PlacesStore};

pub const NO_LOCATION_MESSAGE: &str = "Selected place has no location data";

#[derive(Debug, Clone)]
pub enum Selection {
    Place(Place),
    Prediction(Prediction),
}

#[derive(Debug, Clone)]
pub struct SelectionRequest {
    pub target: Selection,
    pub query: String,
}

impl SelectionRequest {
    pub fn new(target: Selection, query: impl Into<String>) -> Self {
        Self {
            target,
            query: query.into(),
        }
    }
}

#[derive(Clone)]
pub struct SelectionWorkflow {
    service: ServiceClient,
    store: PlacesStore,
    settle: Duration,
}

struct MapLoadingGuard<'a>(&'a PlacesStore);

impl<'a> MapLoadingGuard<'a> {
    fn engage(store: &'a PlacesStore) -> Self {
        store.set_map_loading(true);
        Self(store)
    }
}

impl Drop for MapLoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.set_map_loading(false);
    }
}

impl SelectionWorkflow {
    pub fn new(service: ServiceClient, store: PlacesStore, config: &AppConfig) -> Self {
        Self {
            service,
            store,
            settle: config.selection_settle(),
        }
    }

    pub fn dispatch(&self, request: SelectionRequest) -> JoinHandle<Option<Place>> {
        let workflow = self.clone();
        tokio::spawn(async move { workflow.run(request).await })
    }

    pub async fn run(&self, request: SelectionRequest) -> Option<Place> {
        let _loading = MapLoadingGuard::engage(&self.store);

        let mut place = match request.target {
            Selection::Place(place) => renormalize(&place),
            Selection::Prediction(prediction) => Place::from(&prediction),
        };

        if !place.has_location() && !place.id.is_empty() {
            match self.service.get_details(&place.id).await {
                Ok(details) => {
                    debug!(place_id = %place.id, "selection enriched with details");
                    place = merge_details(place, details);
                }
                Err(err) => {
                    warn!(
                        ?err,
                        place_id = %place.id,
                        "detail lookup failed; continuing with original selection"
                    );
                }
            }
        }

        let place = renormalize(&place);
        if !place.has_location() {
            warn!(place_id = %place.id, "selected place has no geometry");
            self.store.set_error(ErrorDomain::Map, NO_LOCATION_MESSAGE);
            return None;
        }

        let query = request.query.trim();
        if !query.is_empty() {
            self.store.push_history(query, &place);
        }
        self.store.set_selected(Some(place.clone()));
        info!(place_id = %place.id, name = %place.name, "place selected");

        sleep(self.settle).await;
        Some(place)
    }
}

// Detail fields win. The original keeps its description and fills whatever the detail left empty.
pub fn merge_details(original: Place, details: Place) -> Place {
    let description = original
        .description
        .clone()
        .or_else(|| Some(details.address.clone()).filter(|a| !a.is_empty()));
    let mut extra = original.extra;
    extra.extend(details.extra);

    Place {
        id: if details.id.is_empty() {
            original.id
        } else {
            details.id
        },
        name: if details.name.is_empty() {
            original.name
        } else {
            details.name
        },
        address: if details.address.is_empty() {
            original.address
        } else {
            details.address
        },
        description,
        types: if details.types.is_empty() {
            original.types
        } else {
            details.types
        },
        rating: details.rating.or(original.rating),
        rating_count: details.rating_count.or(original.rating_count),
        geometry: details.geometry.or(original.geometry),
        photos: if details.photos.is_empty() {
            original.photos
        } else {
            details.photos
        },
        extra,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::geo::{Geometry, LatLng};
    use crate::provider::PlacesStatus;
    use crate::synthetic::SyntheticLoader;

    fn workflow(loader: &SyntheticLoader) -> (SelectionWorkflow, PlacesStore) {
        let config = AppConfig {
            selection_settle_ms: 5,
            ..AppConfig::default()
        };
        let service = ServiceClient::with_loader(Arc::new(loader.clone()), &config);
        let store = PlacesStore::new(config.search_history_limit);
        (
            SelectionWorkflow::new(service, store.clone(), &config),
            store,
        )
    }

    fn petronas_prediction() -> Prediction {
        Prediction {
            id: "ChIJ-petronas".into(),
            primary_text: "Petronas Twin Towers".into(),
            secondary_text: "Kuala Lumpur".into(),
            description: "Petronas Twin Towers, Kuala Lumpur".into(),
            types: vec!["tourist_attraction".into()],
        }
    }

    #[tokio::test]
    async fn prediction_is_resolved_through_details() {
        let loader = SyntheticLoader::default();
        let (workflow, store) = workflow(&loader);

        let place = workflow
            .run(SelectionRequest::new(
                Selection::Prediction(petronas_prediction()),
                "petronas",
            ))
            .await
            .unwrap();

        assert_eq!(
            place.description.as_deref(),
            Some("Petronas Twin Towers, Kuala Lumpur")
        );
        assert_eq!(
            place.geometry.as_ref().unwrap().location,
            LatLng::new(3.1579, 101.7116)
        );
        assert_eq!(store.selected().unwrap().id, "ChIJ-petronas");
        assert_eq!(store.history()[0].query, "petronas");
        assert!(!store.is_map_loading());
        assert_eq!(loader.details_calls(), 1);
    }

    #[tokio::test]
    async fn denied_details_leave_state_untouched() {
        let loader = SyntheticLoader::default();
        loader.set_details_status(Some(PlacesStatus::RequestDenied));
        let (workflow, store) = workflow(&loader);

        let outcome = workflow
            .run(SelectionRequest::new(
                Selection::Prediction(petronas_prediction()),
                "petronas",
            ))
            .await;

        assert!(outcome.is_none());
        assert!(store.selected().is_none());
        assert!(store.history().is_empty());
        assert_eq!(
            store.error(ErrorDomain::Map).unwrap().message,
            NO_LOCATION_MESSAGE
        );
        assert!(!store.is_map_loading());
    }

    #[tokio::test]
    async fn located_place_skips_details_and_blank_query_skips_history() {
        let loader = SyntheticLoader::default();
        let (workflow, store) = workflow(&loader);
        let mut place = Place::from(&petronas_prediction());
        place.geometry = Some(Geometry {
            location: LatLng::new(3.1579, 101.7116),
            viewport: None,
            bounds: None,
        });

        let handle = workflow.dispatch(SelectionRequest::new(Selection::Place(place), "   "));
        let selected = handle.await.unwrap().unwrap();

        assert_eq!(selected.id, "ChIJ-petronas");
        assert_eq!(loader.details_calls(), 0);
        assert!(store.history().is_empty());
        assert!(store.selected().is_some());
    }

    #[tokio::test]
    async fn out_of_range_location_is_rejected_without_state_changes() {
        let loader = SyntheticLoader::default();
        let (workflow, store) = workflow(&loader);
        let mut place = Place::from(&petronas_prediction());
        place.id = String::new();
        place.geometry = Some(Geometry {
            location: LatLng::new(95.0, 101.7116),
            viewport: None,
            bounds: None,
        });

        let outcome = workflow
            .run(SelectionRequest::new(Selection::Place(place), "bad query"))
            .await;

        assert!(outcome.is_none());
        assert!(store.selected().is_none());
        assert!(store.history().is_empty());
        assert_eq!(
            store.error(ErrorDomain::Map).unwrap().message,
            NO_LOCATION_MESSAGE
        );
        assert_eq!(loader.details_calls(), 0);
    }

    #[tokio::test]
    async fn invalid_location_falls_back_to_details() {
        let loader = SyntheticLoader::default();
        let (workflow, store) = workflow(&loader);
        let mut place = Place::from(&petronas_prediction());
        place.geometry = Some(Geometry {
            location: LatLng::new(f64::NAN, 101.7116),
            viewport: None,
            bounds: None,
        });

        let selected = workflow
            .run(SelectionRequest::new(Selection::Place(place), "petronas"))
            .await
            .unwrap();

        assert_eq!(
            selected.geometry.unwrap().location,
            LatLng::new(3.1579, 101.7116)
        );
        assert_eq!(loader.details_calls(), 1);
        assert_eq!(store.history().len(), 1);
    }

    #[test]
    fn merge_prefers_details_but_keeps_original_identity_text() {
        let original = Place {
            id: "abc".into(),
            name: "Original".into(),
            address: "Somewhere".into(),
            description: None,
            types: vec!["establishment".into()],
            rating: Some(4.0),
            rating_count: None,
            geometry: None,
            photos: Vec::new(),
            extra: BTreeMap::from([("source".to_string(), serde_json::json!("search"))]),
        };
        let details = Place {
            id: "abc".into(),
            name: String::new(),
            address: "1 Jalan Ampang".into(),
            description: None,
            types: Vec::new(),
            rating: None,
            rating_count: Some(12),
            geometry: Some(Geometry {
                location: LatLng::new(3.0, 101.0),
                viewport: None,
                bounds: None,
            }),
            photos: Vec::new(),
            extra: BTreeMap::new(),
        };

        let merged = merge_details(original, details);
        assert_eq!(merged.name, "Original");
        assert_eq!(merged.address, "1 Jalan Ampang");
        assert_eq!(merged.description.as_deref(), Some("1 Jalan Ampang"));
        assert_eq!(merged.rating, Some(4.0));
        assert_eq!(merged.rating_count, Some(12));
        assert_eq!(merged.types, vec!["establishment"]);
        assert!(merged.extra.contains_key("source"));
        assert!(merged.has_location());
    }
}
