use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub northeast: LatLng,
    pub southwest: LatLng,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub location: LatLng,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Bounds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
}

// Numeric strings are rejected.
pub fn is_valid_coordinates(value: &Value) -> bool {
    let Some(fields) = value.as_object() else {
        return false;
    };
    match (
        fields.get("lat").and_then(Value::as_f64),
        fields.get("lng").and_then(Value::as_f64),
    ) {
        (Some(lat), Some(lng)) => LatLng::new(lat, lng).is_valid(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_in_range_coordinates() {
        assert!(LatLng::new(3.1579, 101.7116).is_valid());
        assert!(is_valid_coordinates(&json!({ "lat": 3.1579, "lng": 101.7116 })));
        assert!(LatLng::new(-90.0, 180.0).is_valid());
    }

    #[test]
    fn rejects_malformed_coordinates() {
        assert!(!is_valid_coordinates(&json!({ "lat": "3.1", "lng": 101 })));
        assert!(!is_valid_coordinates(&json!({ "lat": 91, "lng": 0 })));
        assert!(!is_valid_coordinates(&json!({ "lat": 3.1 })));
        assert!(!is_valid_coordinates(&json!([3.1, 101.7])));
        assert!(!LatLng::new(f64::NAN, 0.0).is_valid());
        assert!(!LatLng::new(0.0, f64::INFINITY).is_valid());
        assert!(!LatLng::new(0.0, -180.5).is_valid());
    }
}
