use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::bias::SharedBias;
use crate::config::{ArtifactPaths, CourierConfig, ModelVersions};
use crate::model::{load_artifact, Regressor, Strategy, TorchRegressor};
use crate::route::haversine_km;
use crate::types::{is_weekend, GeoPoint, Prediction, PredictionSource};

const DEFAULT_DISTANCE_KM: f64 = 5.0;
const MODEL_FLOOR_MINS: f64 = 1.0;
const HEURISTIC_FLOOR_MINS: f64 = 2.0;
const INTERVAL_K: f64 = 1.5;

// Training-time normalisation for [distance_km, hour, day_of_week, traffic_factor]
const NORM_MEAN: [f64; 4] = [8.5, 12.0, 3.0, 1.2];
const NORM_STD: [f64; 4] = [5.0, 6.9, 2.0, 0.4];

/// Discrete traffic regimes keyed on hour and weekday/weekend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficBand {
    MorningRush,
    EveningRush,
    LunchHour,
    LateNight,
    WeekendPeak,
    WeekendQuiet,
    Normal,
}

impl TrafficBand {
    pub fn lookup(hour: u8, day_of_week: u8) -> Self {
        if is_weekend(day_of_week) {
            return match hour {
                10..=13 | 17..=20 => TrafficBand::WeekendPeak,
                _ => TrafficBand::WeekendQuiet,
            };
        }
        match hour {
            8..=10 => TrafficBand::MorningRush,
            17..=20 => TrafficBand::EveningRush,
            12..=14 => TrafficBand::LunchHour,
            22..=23 | 0..=5 => TrafficBand::LateNight,
            _ => TrafficBand::Normal,
        }
    }

    pub fn factor(&self) -> f64 {
        match self {
            TrafficBand::MorningRush => 1.8,
            TrafficBand::EveningRush => 1.7,
            TrafficBand::LunchHour => 1.3,
            TrafficBand::LateNight => 0.7,
            TrafficBand::WeekendPeak => 1.3,
            TrafficBand::WeekendQuiet => 0.9,
            TrafficBand::Normal => 1.0,
        }
    }
}

fn traffic_description(factor: f64) -> &'static str {
    if factor >= 1.6 {
        "Heavy traffic, expect delays"
    } else if factor >= 1.2 {
        "Moderate traffic"
    } else if factor <= 0.8 {
        "Light traffic, faster than usual"
    } else {
        "Normal traffic conditions"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtaRequest {
    pub distance_km: Option<f64>,
    pub hour_of_day: Option<u8>,
    pub day_of_week: Option<u8>,
    pub pickup: Option<GeoPoint>,
    pub dropoff: Option<GeoPoint>,
}

impl EtaRequest {
    pub fn with_distance(distance_km: f64, hour_of_day: u8, day_of_week: u8) -> Self {
        Self {
            distance_km: Some(distance_km),
            hour_of_day: Some(hour_of_day),
            day_of_week: Some(day_of_week),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtaForecast {
    #[serde(flatten)]
    pub prediction: Prediction,
    pub distance_km: f64,
    pub traffic_band: TrafficBand,
    pub traffic_factor: f64,
    pub traffic_description: String,
}

/// Estimates delivery duration in minutes.
pub struct EtaPredictor {
    strategy: Strategy<dyn Regressor>,
    average_speed_kmh: f64,
    version: String,
    bias: SharedBias,
}

impl EtaPredictor {
    pub fn from_config(artifacts: &ArtifactPaths, courier: &CourierConfig, versions: &ModelVersions) -> Self {
        // one time step of four features
        let model = load_artifact(artifacts.eta_model.as_deref(), "eta model", |p| {
            TorchRegressor::open(p, &[1, 1, 4])
        })
        .map(|m| Arc::new(m) as Arc<dyn Regressor>);
        Self::new(Strategy::from_handle(model), courier.average_speed_kmh, &versions.eta)
    }

    pub fn new(strategy: Strategy<dyn Regressor>, average_speed_kmh: f64, version: &str) -> Self {
        info!("eta predictor ready: trained={} version={}", strategy.is_trained(), version);
        Self {
            strategy,
            average_speed_kmh,
            version: version.to_string(),
            bias: SharedBias::default(),
        }
    }

    pub fn heuristic(average_speed_kmh: f64) -> Self {
        Self::new(Strategy::Heuristic, average_speed_kmh, "lstm-eta-v1")
    }

    pub fn predict(&self, req: &EtaRequest) -> EtaForecast {
        let now = chrono::Local::now();
        let hour = req.hour_of_day.unwrap_or(now.hour() as u8).min(23);
        let day = req
            .day_of_week
            .unwrap_or(now.weekday().num_days_from_monday() as u8)
            .min(6);
        let distance = resolve_distance(req);
        let band = TrafficBand::lookup(hour, day);
        let traffic = band.factor();

        let trained = match &self.strategy {
            Strategy::Trained(model) => match self.predict_trained(model.as_ref(), distance, hour, day, traffic) {
                Ok(mins) => Some(mins),
                Err(e) => {
                    warn!("eta model inference failed, using heuristic: {:#}", e);
                    None
                }
            },
            Strategy::Heuristic => None,
        };

        let prediction = match trained {
            Some(mins) => Prediction::new(
                mins,
                (0.80 + 0.01 * distance.min(15.0)).min(0.95),
                INTERVAL_K,
                1.0,
                PredictionSource::Model,
                format!("{}-model", self.version),
            ),
            None => {
                let mins = (distance / self.average_speed_kmh * 60.0 * traffic).max(HEURISTIC_FLOOR_MINS);
                Prediction::new(
                    mins,
                    (0.60 + 0.02 * distance.min(10.0)).min(0.85),
                    INTERVAL_K,
                    1.0,
                    PredictionSource::Heuristic,
                    "speed-based-heuristic".to_string(),
                )
            }
        };

        EtaForecast {
            prediction,
            distance_km: distance,
            traffic_band: band,
            traffic_factor: traffic,
            traffic_description: traffic_description(traffic).to_string(),
        }
    }

    pub fn predict_batch(&self, batch: &[EtaRequest]) -> Vec<EtaForecast> {
        batch.iter().map(|r| self.predict(r)).collect()
    }

    /// Feed back an observed delivery time; returns the correction now in effect.
    pub fn record_outcome(&self, predicted_mins: f64, actual_mins: f64) -> f64 {
        let correction = self.bias.record(predicted_mins, actual_mins);
        info!("eta bias correction updated: {:.2} min", correction);
        correction
    }

    pub fn bias_correction(&self) -> f64 {
        self.bias.correction()
    }

    pub fn observation_count(&self) -> u64 {
        self.bias.observed()
    }

    pub fn reset_bias(&self) {
        self.bias.reset();
    }

    pub fn is_trained(&self) -> bool {
        self.strategy.is_trained()
    }

    fn predict_trained(
        &self,
        model: &dyn Regressor,
        distance: f64,
        hour: u8,
        day: u8,
        traffic: f64,
    ) -> anyhow::Result<f64> {
        let x = normalise([distance, hour as f64, day as f64, traffic]);
        let raw = model.predict(&x)? as f64;
        Ok((raw + self.bias.correction()).max(MODEL_FLOOR_MINS))
    }
}

/// Supplied distance, else haversine between the coordinates, else 5 km.
fn resolve_distance(req: &EtaRequest) -> f64 {
    match (req.distance_km, req.pickup, req.dropoff) {
        (Some(d), _, _) if d.is_finite() && d > 0.0 => d,
        (_, Some(pickup), Some(dropoff)) => haversine_km(pickup, dropoff),
        _ => DEFAULT_DISTANCE_KM,
    }
}

fn normalise(raw: [f64; 4]) -> [f32; 4] {
    std::array::from_fn(|i| ((raw[i] - NORM_MEAN[i]) / NORM_STD[i]) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traffic_bands() {
        assert_eq!(TrafficBand::lookup(9, 1), TrafficBand::MorningRush);
        assert_eq!(TrafficBand::lookup(18, 3), TrafficBand::EveningRush);
        assert_eq!(TrafficBand::lookup(13, 2), TrafficBand::LunchHour);
        assert_eq!(TrafficBand::lookup(23, 0), TrafficBand::LateNight);
        assert_eq!(TrafficBand::lookup(3, 4), TrafficBand::LateNight);
        assert_eq!(TrafficBand::lookup(15, 4), TrafficBand::Normal);
        assert_eq!(TrafficBand::lookup(11, 6), TrafficBand::WeekendPeak);
        assert_eq!(TrafficBand::lookup(9, 5), TrafficBand::WeekendQuiet);
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(traffic_description(1.8), "Heavy traffic, expect delays");
        assert_eq!(traffic_description(1.3), "Moderate traffic");
        assert_eq!(traffic_description(0.7), "Light traffic, faster than usual");
        assert_eq!(traffic_description(1.0), "Normal traffic conditions");
    }

    #[test]
    fn test_resolve_distance() {
        let mut req = EtaRequest::default();
        assert_eq!(resolve_distance(&req), 5.0);

        req.pickup = Some(GeoPoint { lat: 19.0, lng: 72.8 });
        req.dropoff = Some(GeoPoint { lat: 19.1, lng: 72.8 });
        let d = resolve_distance(&req);
        assert!((d - 11.12).abs() < 0.05, "got {}", d);

        req.distance_km = Some(3.0);
        assert_eq!(resolve_distance(&req), 3.0);

        req.distance_km = Some(-1.0);
        assert!((resolve_distance(&req) - d).abs() < 1e-12);
    }

    #[test]
    fn test_normalise() {
        let x = normalise([8.5, 12.0, 3.0, 1.2]);
        assert_eq!(x, [0.0; 4]);
        let x = normalise([13.5, 18.9, 5.0, 1.6]);
        for v in x {
            assert!((v - 1.0).abs() < 1e-5);
        }
    }
}
