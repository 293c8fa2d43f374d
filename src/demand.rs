use chrono::Timelike;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::bias::SharedBias;
use crate::config::{ArtifactPaths, ModelVersions};
use crate::error::{MlError, Result};
use crate::model::{load_artifact, LabelEncoder, Regressor, Strategy, TorchRegressor};
use crate::types::{is_weekend, Prediction, PredictionSource};

const MIN_SURPLUS_KG: f64 = 0.5;
const INTERVAL_K: f64 = 1.2;
const CONFIDENCE_CAP: f64 = 0.96;
const NOISE_KG: f64 = 1.8;
const UNKNOWN_CLASS: &str = "Unknown";

// ---------- Categorical features ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    #[default]
    Normal,
    Wedding,
    Festival,
    Corporate,
    Birthday,
    CollegeEvent,
    HotelBuffet,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "normal",
            EventType::Wedding => "wedding",
            EventType::Festival => "festival",
            EventType::Corporate => "corporate",
            EventType::Birthday => "birthday",
            EventType::CollegeEvent => "college_event",
            EventType::HotelBuffet => "hotel_buffet",
        }
    }

    /// Class name used by the trained event encoder.
    fn encoder_class(&self) -> &'static str {
        match self {
            EventType::Normal => UNKNOWN_CLASS,
            EventType::Wedding => "Wedding",
            EventType::Festival => "Festival",
            EventType::Corporate => "Corporate",
            EventType::Birthday => "Birthday",
            EventType::CollegeEvent => "College Event",
            EventType::HotelBuffet => "Hotel Buffet",
        }
    }

    fn weight(&self) -> f64 {
        match self {
            EventType::Wedding => 2.6,
            EventType::Festival => 2.1,
            EventType::Corporate => 1.55,
            EventType::Birthday => 1.35,
            EventType::Normal | EventType::CollegeEvent | EventType::HotelBuffet => 1.0,
        }
    }
}

impl From<&str> for EventType {
    fn from(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "wedding" => EventType::Wedding,
            "festival" => EventType::Festival,
            "corporate" => EventType::Corporate,
            "birthday" => EventType::Birthday,
            "college_event" => EventType::CollegeEvent,
            "hotel_buffet" => EventType::HotelBuffet,
            _ => EventType::Normal,
        }
    }
}

impl From<String> for EventType {
    fn from(tag: String) -> Self {
        EventType::from(tag.as_str())
    }
}

impl From<EventType> for String {
    fn from(e: EventType) -> Self {
        e.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum Weather {
    #[default]
    Clear,
    Rain,
    Hot,
    Cold,
}

impl Weather {
    pub fn as_str(&self) -> &'static str {
        match self {
            Weather::Clear => "clear",
            Weather::Rain => "rain",
            Weather::Hot => "hot",
            Weather::Cold => "cold",
        }
    }

    fn weight(&self) -> f64 {
        match self {
            Weather::Clear => 1.0,
            Weather::Rain => 1.35,
            Weather::Hot => 0.88,
            Weather::Cold => 1.12,
        }
    }
}

impl From<&str> for Weather {
    fn from(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "rain" => Weather::Rain,
            "hot" => Weather::Hot,
            "cold" => Weather::Cold,
            _ => Weather::Clear,
        }
    }
}

impl From<String> for Weather {
    fn from(tag: String) -> Self {
        Weather::from(tag.as_str())
    }
}

impl From<Weather> for String {
    fn from(w: Weather) -> Self {
        w.as_str().to_string()
    }
}

/// Class name used by the trained cuisine encoder for a free-form tag.
fn cuisine_class(tag: &str) -> &'static str {
    match tag.trim().to_ascii_lowercase().as_str() {
        "north_indian" => "North Indian",
        "south_indian" => "South Indian",
        "chinese" => "Chinese",
        "continental" => "Continental",
        "multi_cuisine" => "Multi-cuisine",
        "punjabi" => "Punjabi",
        _ => UNKNOWN_CLASS,
    }
}

fn day_weight(day_of_week: u8) -> f64 {
    match day_of_week {
        0 => 0.78,
        1 => 0.82,
        2 => 0.88,
        3 => 0.93,
        4 => 1.10,
        5 => 1.32,
        6 => 1.22,
        _ => 1.0,
    }
}

// ---------- Request / response ----------

fn default_guest_count() -> u32 {
    100
}

fn default_base_surplus() -> f64 {
    15.0
}

fn default_cuisine() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    /// 0 = Monday .. 6 = Sunday
    pub day_of_week: u8,
    #[serde(default = "default_guest_count")]
    pub guest_count: u32,
    #[serde(default)]
    pub event_type: EventType,
    #[serde(default)]
    pub weather: Weather,
    #[serde(default = "default_base_surplus")]
    pub base_surplus_kg: f64,
    #[serde(default = "default_cuisine")]
    pub cuisine: String,
    /// Defaults to the current local hour when absent.
    #[serde(default)]
    pub hour_of_day: Option<u8>,
}

impl FeatureSet {
    pub fn new(day_of_week: u8, guest_count: u32, event_type: EventType, weather: Weather) -> Self {
        Self {
            day_of_week,
            guest_count,
            event_type,
            weather,
            base_surplus_kg: default_base_surplus(),
            cuisine: default_cuisine(),
            hour_of_day: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.day_of_week > 6 {
            return Err(MlError::InvalidFeature(format!("day_of_week {} not in 0..=6", self.day_of_week)));
        }
        if self.guest_count == 0 {
            return Err(MlError::InvalidFeature("guest_count must be positive".to_string()));
        }
        if !(self.base_surplus_kg.is_finite() && self.base_surplus_kg >= 0.0) {
            return Err(MlError::InvalidFeature(format!("base_surplus_kg {} must be >= 0", self.base_surplus_kg)));
        }
        if matches!(self.hour_of_day, Some(h) if h > 23) {
            return Err(MlError::InvalidFeature("hour_of_day not in 0..=23".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurplusForecast {
    #[serde(flatten)]
    pub prediction: Prediction,
    pub category_breakdown: BTreeMap<String, f64>,
    pub recommendation: String,
    pub feature_importance: BTreeMap<String, f64>,
}

// ---------- Static tables ----------

const FEATURE_IMPORTANCE: [(&str, f64); 7] = [
    ("guest_count", 0.28),
    ("day_of_week", 0.18),
    ("event_type", 0.22),
    ("weather", 0.12),
    ("base_surplus", 0.10),
    ("historical_mean", 0.06),
    ("month_seasonality", 0.04),
];

type Template = [(&'static str, f64); 5];

const TEMPLATE_DEFAULT: Template = [
    ("veg_curry", 0.35),
    ("rice", 0.22),
    ("bread", 0.13),
    ("snacks_sweets", 0.12),
    ("other", 0.18),
];
const TEMPLATE_BIRYANI: Template = [
    ("veg_curry", 0.15),
    ("rice", 0.50),
    ("bread", 0.05),
    ("snacks_sweets", 0.10),
    ("other", 0.20),
];
const TEMPLATE_THALI: Template = [
    ("veg_curry", 0.40),
    ("rice", 0.18),
    ("bread", 0.15),
    ("snacks_sweets", 0.15),
    ("other", 0.12),
];

fn template_for(cuisine: &str) -> &'static Template {
    let c = cuisine.to_lowercase();
    if c.contains("biryani") {
        &TEMPLATE_BIRYANI
    } else if c.contains("thali") {
        &TEMPLATE_THALI
    } else {
        &TEMPLATE_DEFAULT
    }
}

fn recommendation(kg: f64) -> &'static str {
    if kg > 80.0 {
        "Critical surplus: reduce prep by 25%, pre-alert 5+ NGOs, deploy 3 vans."
    } else if kg > 40.0 {
        "High surplus: reduce prep by 15%, pre-alert 2-3 NGOs, assign 2 drivers."
    } else if kg > 20.0 {
        "Moderate surplus: 1-2 NGOs can absorb it. Consider reducing batch cooking."
    } else {
        "Low surplus: a standard single-NGO pickup will suffice."
    }
}

// ---------- Predictor ----------

/// Estimates surplus food (kg) for a donor event.
pub struct DemandPredictor {
    strategy: Strategy<dyn Regressor>,
    event_encoder: Option<LabelEncoder>,
    cuisine_encoder: Option<LabelEncoder>,
    version: String,
    bias: SharedBias,
}

impl DemandPredictor {
    pub fn from_config(artifacts: &ArtifactPaths, versions: &ModelVersions) -> Self {
        let model = load_artifact(artifacts.surplus_model.as_deref(), "surplus model", |p| {
            TorchRegressor::open(p, &[1, 6])
        })
        .map(|m| Arc::new(m) as Arc<dyn Regressor>);
        let event_encoder = load_artifact(artifacts.event_encoder.as_deref(), "event encoder", LabelEncoder::open);
        let cuisine_encoder =
            load_artifact(artifacts.cuisine_encoder.as_deref(), "cuisine encoder", LabelEncoder::open);

        Self::new(Strategy::from_handle(model), event_encoder, cuisine_encoder, &versions.surplus)
    }

    pub fn new(
        strategy: Strategy<dyn Regressor>,
        event_encoder: Option<LabelEncoder>,
        cuisine_encoder: Option<LabelEncoder>,
        version: &str,
    ) -> Self {
        info!(
            "demand predictor ready: trained={} version={}",
            strategy.is_trained(),
            version
        );
        Self {
            strategy,
            event_encoder,
            cuisine_encoder,
            version: version.to_string(),
            bias: SharedBias::default(),
        }
    }

    pub fn heuristic(version: &str) -> Self {
        Self::new(Strategy::Heuristic, None, None, version)
    }

    pub fn predict(&self, features: &FeatureSet) -> SurplusForecast {
        let hour = features
            .hour_of_day
            .unwrap_or_else(|| chrono::Local::now().hour() as u8)
            .min(23);
        let mut rng = StdRng::seed_from_u64(seed_for(features));

        let trained = match &self.strategy {
            Strategy::Trained(model) => match self.predict_trained(model.as_ref(), features, hour) {
                Ok(kg) => Some(kg),
                Err(e) => {
                    warn!("surplus model inference failed, using heuristic: {:#}", e);
                    None
                }
            },
            Strategy::Heuristic => None,
        };

        let (kg, source, tag) = match trained {
            Some(kg) => (kg, PredictionSource::Model, "model"),
            None => (heuristic_kg(features, &mut rng), PredictionSource::Heuristic, "heuristic"),
        };

        let jitter = rng.gen_range(0.0..0.06);
        let confidence = (0.78 + 0.0003 * features.guest_count as f64 + jitter).min(CONFIDENCE_CAP);
        let prediction = Prediction::new(
            kg,
            confidence,
            INTERVAL_K,
            0.0,
            source,
            format!("{}-{}", self.version, tag),
        );

        let category_breakdown = template_for(&features.cuisine)
            .iter()
            .map(|(k, share)| (k.to_string(), kg * share))
            .collect();
        let feature_importance = FEATURE_IMPORTANCE.iter().map(|(k, v)| (k.to_string(), *v)).collect();

        SurplusForecast {
            prediction,
            category_breakdown,
            recommendation: recommendation(kg).to_string(),
            feature_importance,
        }
    }

    pub fn predict_batch(&self, batch: &[FeatureSet]) -> Vec<SurplusForecast> {
        batch.iter().map(|f| self.predict(f)).collect()
    }

    /// Feed back an observed outcome; returns the bias correction now in effect.
    pub fn record_outcome(&self, predicted_kg: f64, actual_kg: f64) -> f64 {
        let correction = self.bias.record(predicted_kg, actual_kg);
        info!("surplus bias correction updated: {:.2}", correction);
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

    /// `[event_code, guest_count, cuisine_code, day_of_week, hour_of_day, is_weekend]`
    pub fn encode(&self, features: &FeatureSet, hour: u8) -> [f32; 6] {
        let event = encode_class(self.event_encoder.as_ref(), features.event_type.encoder_class());
        let cuisine = encode_class(self.cuisine_encoder.as_ref(), cuisine_class(&features.cuisine));
        [
            event as f32,
            features.guest_count as f32,
            cuisine as f32,
            features.day_of_week as f32,
            hour as f32,
            if is_weekend(features.day_of_week) { 1.0 } else { 0.0 },
        ]
    }

    fn predict_trained(&self, model: &dyn Regressor, features: &FeatureSet, hour: u8) -> anyhow::Result<f64> {
        let x = self.encode(features, hour);
        let raw = model.predict(&x)? as f64;
        Ok((raw + self.bias.correction()).max(MIN_SURPLUS_KG))
    }
}

/// Unknown classes fall back to the encoder's "Unknown" class, then to 0.
fn encode_class(encoder: Option<&LabelEncoder>, class: &str) -> usize {
    encoder
        .and_then(|enc| enc.encode(class).or_else(|| enc.encode(UNKNOWN_CLASS)))
        .unwrap_or(0)
}

fn heuristic_kg(f: &FeatureSet, rng: &mut StdRng) -> f64 {
    let raw = f.base_surplus_kg.max(0.0)
        * day_weight(f.day_of_week)
        * f.event_type.weight()
        * f.weather.weight()
        * (f.guest_count as f64 / 100.0);
    let noise = rng.gen_range(-NOISE_KG..NOISE_KG);
    (raw + noise).max(MIN_SURPLUS_KG)
}

/// Stable seed from the categorical inputs.
fn seed_for(f: &FeatureSet) -> u64 {
    let key = format!(
        "{}{}{}{}",
        f.day_of_week,
        f.guest_count,
        f.event_type.as_str(),
        f.weather.as_str()
    );
    let digest = Sha256::digest(key.as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tags_map_to_canonical_bucket() {
        assert_eq!(EventType::from("gala dinner"), EventType::Normal);
        assert_eq!(EventType::from("Festival"), EventType::Festival);
        assert_eq!(Weather::from("snow"), Weather::Clear);
        assert_eq!(cuisine_class("fusion"), "Unknown");
    }

    #[test]
    fn test_feature_set_from_json_defaults() {
        let f: FeatureSet = serde_json::from_str(r#"{"day_of_week": 2, "event_type": "mystery"}"#).unwrap();
        assert_eq!(f.guest_count, 100);
        assert_eq!(f.event_type, EventType::Normal);
        assert_eq!(f.weather, Weather::Clear);
        assert_eq!(f.base_surplus_kg, 15.0);
        assert!(f.hour_of_day.is_none());
    }

    #[test]
    fn test_encoding_with_encoders() {
        let p = DemandPredictor::new(
            Strategy::Heuristic,
            Some(LabelEncoder::new(["Birthday", "Festival", "Unknown", "Wedding"])),
            Some(LabelEncoder::new(["Chinese", "Punjabi", "Unknown"])),
            "v",
        );
        let mut f = FeatureSet::new(6, 150, EventType::Festival, Weather::Rain);
        f.cuisine = "punjabi".to_string();
        assert_eq!(p.encode(&f, 20), [1.0, 150.0, 1.0, 6.0, 20.0, 1.0]);

        // College events are missing from this encoder: reserved Unknown class
        f.event_type = EventType::CollegeEvent;
        f.cuisine = "thai".to_string();
        assert_eq!(p.encode(&f, 9)[..3], [2.0, 150.0, 2.0]);
    }

    #[test]
    fn test_encoding_without_encoders_is_zero() {
        let p = DemandPredictor::heuristic("v");
        let f = FeatureSet::new(1, 80, EventType::Wedding, Weather::Clear);
        let x = p.encode(&f, 12);
        assert_eq!(x[0], 0.0);
        assert_eq!(x[2], 0.0);
        assert_eq!(x[5], 0.0);
    }

    #[test]
    fn test_templates_and_recommendations() {
        assert_eq!(template_for("Hyderabadi Biryani")[1], ("rice", 0.50));
        assert_eq!(template_for("veg thali")[0], ("veg_curry", 0.40));
        assert_eq!(template_for("unknown")[0], ("veg_curry", 0.35));
        assert!(recommendation(81.0).starts_with("Critical"));
        assert!(recommendation(41.0).starts_with("High"));
        assert!(recommendation(21.0).starts_with("Moderate"));
        assert!(recommendation(20.0).starts_with("Low"));
    }

    #[test]
    fn test_seed_is_stable() {
        let f = FeatureSet::new(5, 150, EventType::Festival, Weather::Rain);
        assert_eq!(seed_for(&f), seed_for(&f.clone()));
        let g = FeatureSet::new(5, 151, EventType::Festival, Weather::Rain);
        assert_ne!(seed_for(&f), seed_for(&g));
    }
}
