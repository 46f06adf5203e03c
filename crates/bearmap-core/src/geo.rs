//! Coordinates, viewport bounds and great-circle distance.

use serde::{Deserialize, Serialize};

use crate::record::RecordError;

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Latitude/longitude in degrees. Only finiteness is checked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn validate(&self) -> Result<(), RecordError> {
        if self.lat.is_finite() && self.lng.is_finite() {
            Ok(())
        } else {
            Err(RecordError::NonFiniteCoordinate {
                lat: self.lat,
                lng: self.lng,
            })
        }
    }

    /// Haversine distance to `other`, in metres.
    pub fn distance_to(&self, other: &LatLng) -> f64 {
        let phi1 = self.lat.to_radians();
        let phi2 = other.lat.to_radians();
        let d_phi = (other.lat - self.lat).to_radians();
        let d_lambda = (other.lng - self.lng).to_radians();

        let a = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }
}

/// Inclusive lat/lng rectangle, as reported by the map viewport.
///
/// Edges are finite and ordered; deserialization goes through [`BoundingBox::new`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BoundingBoxRepr")]
pub struct BoundingBox {
    min_lat: f64,
    max_lat: f64,
    min_lng: f64,
    max_lng: f64,
}

#[derive(Deserialize)]
struct BoundingBoxRepr {
    min_lat: f64,
    max_lat: f64,
    min_lng: f64,
    max_lng: f64,
}

impl TryFrom<BoundingBoxRepr> for BoundingBox {
    type Error = RecordError;

    fn try_from(repr: BoundingBoxRepr) -> Result<Self, Self::Error> {
        Self::new(repr.min_lat, repr.max_lat, repr.min_lng, repr.max_lng)
    }
}

impl BoundingBox {
    pub fn new(min_lat: f64, max_lat: f64, min_lng: f64, max_lng: f64) -> Result<Self, RecordError> {
        let all = [min_lat, max_lat, min_lng, max_lng];
        if all.iter().any(|v| !v.is_finite()) {
            return Err(RecordError::InvalidBounds(format!(
                "non-finite edge in {all:?}"
            )));
        }
        if min_lat > max_lat || min_lng > max_lng {
            return Err(RecordError::InvalidBounds(format!(
                "min exceeds max in {all:?}"
            )));
        }
        Ok(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    /// Box spanning two opposite corners, in either order.
    pub fn from_corners(a: LatLng, b: LatLng) -> Result<Self, RecordError> {
        Self::new(
            a.lat.min(b.lat),
            a.lat.max(b.lat),
            a.lng.min(b.lng),
            a.lng.max(b.lng),
        )
    }

    pub fn min_lat(&self) -> f64 {
        self.min_lat
    }

    pub fn max_lat(&self) -> f64 {
        self.max_lat
    }

    pub fn min_lng(&self) -> f64 {
        self.min_lng
    }

    pub fn max_lng(&self) -> f64 {
        self.max_lng
    }

    pub fn contains(&self, point: &LatLng) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lng..=self.max_lng).contains(&point.lng)
    }
}
