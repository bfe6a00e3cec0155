use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::geo::{Bounds, Geometry, LatLng};
use crate::model::{PhotoRef, Place, Prediction};
use crate::provider::{
    ProviderPhoto, ProviderPlace, ProviderPrediction, ProviderValue, RawBounds, RawGeometry,
    RawLatLng,
};

pub const MAX_PHOTOS: usize = 3;
const DEFAULT_PHOTO_WIDTH: u32 = 400;
const DEFAULT_PHOTO_HEIGHT: u32 = 300;

const RESERVED_FIELDS: &[&str] = &[
    "place_id",
    "name",
    "description",
    "formatted_address",
    "types",
    "rating",
    "user_ratings_total",
    "photos",
    "geometry",
];

pub fn normalize_place(place: &ProviderPlace) -> Place {
    let id = place.place_id.clone().unwrap_or_default();
    let geometry = place
        .geometry
        .as_ref()
        .and_then(|geometry| normalize_geometry(geometry, &id));

    Place {
        name: place.name.clone().unwrap_or_default(),
        address: place.formatted_address.clone().unwrap_or_default(),
        description: place.description.clone().filter(|d| !d.is_empty()),
        types: place.types.clone(),
        rating: place.rating.filter(|rating| rating.is_finite()),
        rating_count: place.user_ratings_total,
        geometry,
        photos: normalize_photos(&place.photos, &id),
        extra: normalize_extra(&id, &place.extra),
        id,
    }
}

pub fn normalize_prediction(prediction: &ProviderPrediction) -> Prediction {
    let primary_text = prediction
        .main_text
        .clone()
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| prediction.description.clone());
    Prediction {
        id: prediction.place_id.clone(),
        primary_text,
        secondary_text: prediction.secondary_text.clone().unwrap_or_default(),
        description: prediction.description.clone(),
        types: prediction.types.clone(),
    }
}

pub fn renormalize(place: &Place) -> Place {
    normalize_place(&ProviderPlace::from(place))
}

fn normalize_geometry(geometry: &RawGeometry, place_id: &str) -> Option<Geometry> {
    let location = resolve_lat_lng(geometry.location.as_ref()?);
    if !location.is_valid() {
        warn!(
            place_id,
            lat = location.lat,
            lng = location.lng,
            "dropping geometry with unusable location"
        );
        return None;
    }

    Some(Geometry {
        location,
        viewport: geometry
            .viewport
            .as_ref()
            .and_then(|bounds| normalize_bounds(bounds, place_id, "viewport")),
        bounds: geometry
            .bounds
            .as_ref()
            .and_then(|bounds| normalize_bounds(bounds, place_id, "bounds")),
    })
}

fn resolve_lat_lng(raw: &RawLatLng) -> LatLng {
    LatLng::new(raw.lat.resolve(), raw.lng.resolve())
}

fn normalize_bounds(raw: &RawBounds, place_id: &str, field: &str) -> Option<Bounds> {
    let bounds = match raw {
        RawBounds::Corners {
            northeast,
            southwest,
        } => Bounds {
            northeast: resolve_lat_lng(northeast),
            southwest: resolve_lat_lng(southwest),
        },
        RawBounds::Cardinal {
            north,
            east,
            south,
            west,
        } => Bounds {
            northeast: LatLng::new(*north, *east),
            southwest: LatLng::new(*south, *west),
        },
    };
    let finite = [bounds.northeast, bounds.southwest]
        .iter()
        .all(|corner| corner.lat.is_finite() && corner.lng.is_finite());
    if !finite {
        warn!(place_id, field, "could not serialize bounds; omitting");
        return None;
    }
    Some(bounds)
}

fn normalize_photos(photos: &[ProviderPhoto], place_id: &str) -> Vec<PhotoRef> {
    let owner = if place_id.is_empty() {
        "unknown"
    } else {
        place_id
    };
    photos
        .iter()
        .take(MAX_PHOTOS)
        .enumerate()
        .map(|(index, photo)| PhotoRef {
            id: format!("photo_{owner}_{index}"),
            width: photo.width.filter(|w| *w > 0).unwrap_or(DEFAULT_PHOTO_WIDTH),
            height: photo.height.filter(|h| *h > 0).unwrap_or(DEFAULT_PHOTO_HEIGHT),
            attributions: photo.html_attributions.clone(),
        })
        .collect()
}

fn normalize_extra(place_id: &str, extra: &BTreeMap<String, ProviderValue>) -> BTreeMap<String, Value> {
    let mut copied = BTreeMap::new();
    for (key, value) in extra {
        if RESERVED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        match value {
            ProviderValue::Plain(Value::Null) => {}
            ProviderValue::Plain(plain) => {
                copied.insert(key.clone(), plain.clone());
            }
            ProviderValue::Date(date) => {
                copied.insert(key.clone(), Value::String(date.to_rfc3339()));
            }
            ProviderValue::Callable(_) => {
                warn!(place_id, field = %key, "skipping function property");
            }
            ProviderValue::Opaque { type_name } => {
                warn!(
                    place_id,
                    field = %key,
                    type_name = %type_name,
                    "skipping non-serializable object"
                );
            }
        }
    }
    copied
}

impl From<&Place> for ProviderPlace {
    fn from(place: &Place) -> Self {
        let geometry = place.geometry.as_ref().map(|geometry| RawGeometry {
            location: Some(RawLatLng::from(geometry.location)),
            viewport: geometry.viewport.map(bounds_to_raw),
            bounds: geometry.bounds.map(bounds_to_raw),
        });
        Self {
            place_id: Some(place.id.clone()).filter(|id| !id.is_empty()),
            name: Some(place.name.clone()),
            description: place.description.clone(),
            formatted_address: Some(place.address.clone()).filter(|a| !a.is_empty()),
            types: place.types.clone(),
            rating: place.rating,
            user_ratings_total: place.rating_count,
            geometry,
            photos: place
                .photos
                .iter()
                .map(|photo| ProviderPhoto {
                    width: Some(photo.width),
                    height: Some(photo.height),
                    html_attributions: photo.attributions.clone(),
                    source: None,
                })
                .collect(),
            extra: place
                .extra
                .iter()
                .map(|(key, value)| (key.clone(), ProviderValue::Plain(value.clone())))
                .collect(),
        }
    }
}

fn bounds_to_raw(bounds: Bounds) -> RawBounds {
    RawBounds::Corners {
        northeast: RawLatLng::from(bounds.northeast),
        southwest: RawLatLng::from(bounds.southwest),
    }
}
