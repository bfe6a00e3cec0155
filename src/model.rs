use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::geo::Geometry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    #[serde(rename = "place_id")]
    pub id: String,
    pub name: String,
    #[serde(rename = "formatted_address")]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(
        rename = "user_ratings_total",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub rating_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub photos: Vec<PhotoRef>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Place {
    // The id, or the name for id-less places.
    pub fn identity(&self) -> &str {
        if self.id.is_empty() {
            &self.name
        } else {
            &self.id
        }
    }

    pub fn has_location(&self) -> bool {
        self.geometry.is_some()
    }

    pub fn display_name(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else if let Some(description) = self.description.as_deref() {
            description
        } else {
            "Selected Place"
        }
    }
}

impl From<&Prediction> for Place {
    fn from(prediction: &Prediction) -> Self {
        Self {
            id: prediction.id.clone(),
            name: prediction.primary_text.clone(),
            address: prediction.secondary_text.clone(),
            description: Some(prediction.description.clone()).filter(|d| !d.is_empty()),
            types: prediction.types.clone(),
            rating: None,
            rating_count: None,
            geometry: None,
            photos: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRef {
    pub id: String,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "html_attributions", default)]
    pub attributions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(rename = "place_id")]
    pub id: String,
    pub primary_text: String,
    pub secondary_text: String,
    pub description: String,
    #[serde(default)]
    pub types: Vec<String>,
}
