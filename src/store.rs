use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::errors::ServiceError;
use crate::model::{Place, Prediction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDomain {
    Search,
    Map,
    Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryHint {
    Retry,
    Reload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBanner {
    pub domain: ErrorDomain,
    pub message: String,
    pub retry_hint: RetryHint,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHistoryEntry {
    pub id: String,
    pub query: String,
    pub place: Place,
    pub selected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    pub suggestions: usize,
    pub history: usize,
    pub has_selection: bool,
    pub search_loading: bool,
    pub map_loading: bool,
    pub errors: Vec<ErrorBanner>,
}

#[derive(Default)]
struct StoreState {
    suggestions: Vec<Prediction>,
    history: VecDeque<SearchHistoryEntry>,
    search_loading: bool,
    map_loading: bool,
    errors: BTreeMap<ErrorDomain, ErrorBanner>,
}

#[derive(Clone)]
pub struct PlacesStore {
    state: Arc<Mutex<StoreState>>,
    selected: Arc<watch::Sender<Option<Place>>>,
    history_limit: usize,
}

impl PlacesStore {
    pub fn new(history_limit: usize) -> Self {
        let (selected, _) = watch::channel(None);
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            selected: Arc::new(selected),
            history_limit: history_limit.max(1),
        }
    }

    pub fn subscribe_selected(&self) -> watch::Receiver<Option<Place>> {
        self.selected.subscribe()
    }

    pub fn selected(&self) -> Option<Place> {
        self.selected.borrow().clone()
    }

    // Clearing the selection also clears the suggestion list.
    pub fn set_selected(&self, place: Option<Place>) {
        if place.is_none() {
            self.state.lock().suggestions.clear();
        }
        self.selected.send_replace(place);
    }

    pub fn suggestions(&self) -> Vec<Prediction> {
        self.state.lock().suggestions.clone()
    }

    pub fn set_suggestions(&self, suggestions: Vec<Prediction>) {
        self.state.lock().suggestions = suggestions;
    }

    pub fn clear_suggestions(&self) {
        self.state.lock().suggestions.clear();
    }

    // Newest first, at most one entry per place.
    pub fn history(&self) -> Vec<SearchHistoryEntry> {
        self.state.lock().history.iter().cloned().collect()
    }

    pub fn push_history(&self, query: &str, place: &Place) {
        let entry = SearchHistoryEntry {
            id: history_id(),
            query: query.to_string(),
            place: place.clone(),
            selected_at: Utc::now(),
        };
        let mut state = self.state.lock();
        state
            .history
            .retain(|existing| existing.place.id != entry.place.id);
        state.history.push_front(entry);
        state.history.truncate(self.history_limit);
        debug!(query, place_id = %place.id, size = state.history.len(), "history updated");
    }

    pub fn clear_history(&self) {
        self.state.lock().history.clear();
    }

    pub fn set_search_loading(&self, loading: bool) {
        self.state.lock().search_loading = loading;
    }

    pub fn is_search_loading(&self) -> bool {
        self.state.lock().search_loading
    }

    pub fn set_map_loading(&self, loading: bool) {
        self.state.lock().map_loading = loading;
    }

    pub fn is_map_loading(&self) -> bool {
        self.state.lock().map_loading
    }

    pub fn set_error(&self, domain: ErrorDomain, message: impl Into<String>) {
        self.raise(domain, message.into(), RetryHint::Retry);
    }

    pub fn report_service_error(&self, domain: ErrorDomain, err: &ServiceError) {
        let hint = match (domain, err) {
            (
                ErrorDomain::Map,
                ServiceError::InitializationTimeout
                | ServiceError::CapabilityNotEnabled
                | ServiceError::AuthorizationDenied
                | ServiceError::AccessBlocked,
            ) => RetryHint::Reload,
            _ => RetryHint::Retry,
        };
        self.raise(domain, err.user_message(), hint);
    }

    fn raise(&self, domain: ErrorDomain, message: String, retry_hint: RetryHint) {
        debug!(?domain, %message, "error banner raised");
        self.state.lock().errors.insert(
            domain,
            ErrorBanner {
                domain,
                message,
                retry_hint,
                raised_at: Utc::now(),
            },
        );
    }

    pub fn error(&self, domain: ErrorDomain) -> Option<ErrorBanner> {
        self.state.lock().errors.get(&domain).cloned()
    }

    pub fn dismiss(&self, domain: ErrorDomain) {
        self.state.lock().errors.remove(&domain);
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let has_selection = self.selected.borrow().is_some();
        let state = self.state.lock();
        StoreSnapshot {
            suggestions: state.suggestions.len(),
            history: state.history.len(),
            has_selection,
            search_loading: state.search_loading,
            map_loading: state.map_loading,
            errors: state.errors.values().cloned().collect(),
        }
    }
}

fn history_id() -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("{}-{}", Utc::now().timestamp_millis(), suffix.to_lowercase())
}
