use serde::{Deserialize, Serialize};

use crate::error::{MlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Validating constructor for callers checking input at their boundary.
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        let p = Self { lat, lng };
        p.validate()?;
        Ok(p)
    }

    pub fn validate(&self) -> Result<()> {
        if (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng) {
            Ok(())
        } else {
            Err(MlError::InvalidCoordinate {
                lat: self.lat,
                lng: self.lng,
            })
        }
    }
}

/// Which computation path produced a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    Model,
    Heuristic,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Point estimate with a confidence-scaled interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub estimate: f64,
    pub confidence: f64,
    pub interval: ConfidenceInterval,
    pub source: PredictionSource,
    pub model_version: String,
}

impl Prediction {
    /// Builds the interval `estimate ± estimate·(1-confidence)·k`, with the
    /// lower bound clamped to `floor`.
    pub fn new(
        estimate: f64,
        confidence: f64,
        k: f64,
        floor: f64,
        source: PredictionSource,
        model_version: String,
    ) -> Self {
        let confidence = confidence.clamp(0.0, 1.0);
        let margin = estimate * (1.0 - confidence) * k;
        Self {
            estimate,
            confidence,
            interval: ConfidenceInterval {
                lower: (estimate - margin).max(floor),
                upper: estimate + margin,
            },
            source,
            model_version,
        }
    }
}

/// Day 5 and 6 (Saturday, Sunday) with Monday = 0.
pub fn is_weekend(day_of_week: u8) -> bool {
    day_of_week >= 5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_margin() {
        let p = Prediction::new(10.0, 0.9, 1.2, 0.0, PredictionSource::Heuristic, "v".into());
        assert!((p.interval.lower - 8.8).abs() < 1e-9);
        assert!((p.interval.upper - 11.2).abs() < 1e-9);
    }

    #[test]
    fn test_interval_lower_floor() {
        let p = Prediction::new(2.0, 0.0, 1.5, 1.0, PredictionSource::Model, "v".into());
        assert_eq!(p.interval.lower, 1.0);
        assert_eq!(p.interval.upper, 5.0);
    }

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(19.07, 72.87).is_ok());
        assert!(matches!(GeoPoint::new(91.0, 0.0), Err(MlError::InvalidCoordinate { .. })));
        assert!(GeoPoint::new(0.0, -181.0).is_err());
    }
}
