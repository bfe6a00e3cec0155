use std::collections::HashSet;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use tracing::{debug, warn};

use crate::normalize::normalize_prediction;
use crate::model::Prediction;
use crate::provider::{AutocompleteService, PlacesStatus, PredictionRequest, ProviderPrediction};

pub const MIN_QUERY_LEN: usize = 2;
pub const SUFFICIENT_RESULTS: usize = 8;
pub const MAX_RESULTS: usize = 10;

const PRIMARY_TYPES: &[&str] = &["establishment", "geocode"];
const SUPPLEMENTARY_TYPES: &[&str] = &["locality", "sublocality", "neighborhood"];

#[derive(Debug, Clone)]
pub struct SearchAggregator {
    primary_types: Vec<String>,
    supplementary_types: Vec<String>,
    sufficient: usize,
    cap: usize,
}

impl Default for SearchAggregator {
    fn default() -> Self {
        Self {
            primary_types: PRIMARY_TYPES.iter().map(|t| (*t).to_string()).collect(),
            supplementary_types: SUPPLEMENTARY_TYPES.iter().map(|t| (*t).to_string()).collect(),
            sufficient: SUFFICIENT_RESULTS,
            cap: MAX_RESULTS,
        }
    }
}

impl SearchAggregator {
    pub async fn search(&self, service: &dyn AutocompleteService, query: &str) -> Vec<Prediction> {
        let Some(query) = effective_query(query) else {
            debug!("query too short; returning empty results");
            return Vec::new();
        };

        let primary = self.query(service, query, &self.primary_types).await;
        if primary.is_empty() {
            return Vec::new();
        }

        let merged = if primary.len() < self.sufficient {
            debug!(
                primary = primary.len(),
                "primary results below threshold; running supplementary query"
            );
            let supplementary = self.query(service, query, &self.supplementary_types).await;
            merge_predictions(primary, supplementary, self.cap)
        } else {
            merge_predictions(primary, Vec::new(), self.cap)
        };

        merged.iter().map(normalize_prediction).collect()
    }

    async fn query(
        &self,
        service: &dyn AutocompleteService,
        query: &str,
        types: &[String],
    ) -> Vec<ProviderPrediction> {
        let request = PredictionRequest {
            input: query.to_string(),
            types: types.to_vec(),
            session_token: Some(session_token()),
        };
        match service.predictions(&request).await {
            Ok(reply) if reply.status == PlacesStatus::Ok => reply.payload,
            Ok(reply) if reply.status == PlacesStatus::ZeroResults => Vec::new(),
            Ok(reply) => {
                warn!(status = reply.status.as_str(), ?types, "autocomplete returned error status");
                Vec::new()
            }
            Err(err) => {
                warn!(?err, ?types, "autocomplete request failed");
                Vec::new()
            }
        }
    }
}

pub fn effective_query(query: &str) -> Option<&str> {
    let trimmed = query.trim();
    (trimmed.chars().count() >= MIN_QUERY_LEN).then_some(trimmed)
}

pub fn merge_predictions(
    primary: Vec<ProviderPrediction>,
    supplementary: Vec<ProviderPrediction>,
    cap: usize,
) -> Vec<ProviderPrediction> {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(cap.min(primary.len() + supplementary.len()));
    for prediction in primary.into_iter().chain(supplementary) {
        if merged.len() >= cap {
            break;
        }
        if seen.insert(prediction.place_id.clone()) {
            merged.push(prediction);
        }
    }
    merged
}

fn session_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::errors::{AppError, AppResult};
    use crate::provider::PlacesReply;

    fn predictions(prefix: &str, count: usize) -> Vec<ProviderPrediction> {
        (0..count)
            .map(|i| ProviderPrediction {
                place_id: format!("{prefix}{i}"),
                description: format!("{prefix} place {i}"),
                main_text: Some(format!("{prefix} {i}")),
                secondary_text: Some("Kuala Lumpur".into()),
                types: vec!["establishment".into()],
            })
            .collect()
    }

    struct ScriptedAutocomplete {
        replies: Mutex<Vec<AppResult<PlacesReply<Vec<ProviderPrediction>>>>>,
        requests: Arc<Mutex<Vec<PredictionRequest>>>,
    }

    impl ScriptedAutocomplete {
        fn new(mut replies: Vec<AppResult<PlacesReply<Vec<ProviderPrediction>>>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl AutocompleteService for ScriptedAutocomplete {
        async fn predictions(
            &self,
            request: &PredictionRequest,
        ) -> AppResult<PlacesReply<Vec<ProviderPrediction>>> {
            self.requests.lock().push(request.clone());
            self.replies
                .lock()
                .pop()
                .unwrap_or_else(|| Ok(PlacesReply::new(PlacesStatus::ZeroResults, Vec::new())))
        }
    }

    fn ok(list: Vec<ProviderPrediction>) -> AppResult<PlacesReply<Vec<ProviderPrediction>>> {
        Ok(PlacesReply::new(PlacesStatus::Ok, list))
    }

    #[test]
    fn merges_with_overlap_in_primary_order() {
        let primary = predictions("p", 5);
        let mut supplementary = predictions("s", 4);
        supplementary.insert(1, primary[3].clone());
        supplementary.push(primary[0].clone());
        assert_eq!(supplementary.len(), 6);

        let merged = merge_predictions(primary.clone(), supplementary, MAX_RESULTS);
        assert_eq!(merged.len(), 9);
        let ids: Vec<_> = merged.iter().map(|p| p.place_id.as_str()).collect();
        assert_eq!(&ids[..5], &["p0", "p1", "p2", "p3", "p4"]);
        assert_eq!(&ids[5..], &["s0", "s1", "s2", "s3"]);
    }

    #[test]
    fn merge_caps_combined_results() {
        let merged = merge_predictions(predictions("p", 7), predictions("s", 7), MAX_RESULTS);
        assert_eq!(merged.len(), MAX_RESULTS);
        assert_eq!(merged[6].place_id, "p6");
        assert_eq!(merged[9].place_id, "s2");
    }

    #[tokio::test]
    async fn short_queries_skip_the_provider() {
        let service = ScriptedAutocomplete::new(vec![ok(predictions("p", 3))]);
        let results = SearchAggregator::default().search(&service, "  a ").await;
        assert!(results.is_empty());
        assert!(service.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn sparse_primary_triggers_supplementary_query() {
        let service = ScriptedAutocomplete::new(vec![
            ok(predictions("p", 3)),
            ok(predictions("s", 2)),
        ]);
        let results = SearchAggregator::default()
            .search(&service, "  klcc  ")
            .await;
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].primary_text, "p 0");

        let requests = service.requests.lock();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].input, "klcc");
        assert_eq!(requests[0].types, vec!["establishment", "geocode"]);
        assert_eq!(
            requests[1].types,
            vec!["locality", "sublocality", "neighborhood"]
        );
        assert_ne!(requests[0].session_token, requests[1].session_token);
    }

    #[tokio::test]
    async fn sufficient_primary_is_capped_without_supplementary() {
        let service = ScriptedAutocomplete::new(vec![ok(predictions("p", 12))]);
        let results = SearchAggregator::default().search(&service, "mall").await;
        assert_eq!(results.len(), MAX_RESULTS);
        assert_eq!(service.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn empty_primary_returns_nothing() {
        let service = ScriptedAutocomplete::new(vec![Ok(PlacesReply::new(
            PlacesStatus::ZeroResults,
            Vec::new(),
        ))]);
        let results = SearchAggregator::default().search(&service, "zzzz").await;
        assert!(results.is_empty());
        assert_eq!(service.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn provider_errors_degrade_per_query() {
        let service = ScriptedAutocomplete::new(vec![
            ok(predictions("p", 2)),
            Err(AppError::Provider("network down".into())),
        ]);
        let results = SearchAggregator::default().search(&service, "klcc").await;
        assert_eq!(results.len(), 2);

        let service = ScriptedAutocomplete::new(vec![Ok(PlacesReply::new(
            PlacesStatus::RequestDenied,
            predictions("p", 2),
        ))]);
        assert!(SearchAggregator::default()
            .search(&service, "klcc")
            .await
            .is_empty());
    }
}
