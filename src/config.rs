use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MlError, Result};

/// Number of (predicted, actual) pairs a bias tracker keeps.
pub const BIAS_WINDOW: usize = 10;
/// Observations required before a bias correction is applied.
pub const BIAS_MIN_SAMPLES: usize = 3;

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct MlConfig {
    pub artifacts: ArtifactPaths,
    pub courier: CourierConfig,
    pub routing: RoutingConfig,
    pub versions: ModelVersions,
    pub impact: ImpactFactors,
    pub food_safety: FoodSafetyConfig,
}

/// Locations of trained artifacts. A missing entry puts the matching engine
/// into heuristic mode for the lifetime of the process.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ArtifactPaths {
    pub surplus_model: Option<PathBuf>,
    pub event_encoder: Option<PathBuf>,
    pub cuisine_encoder: Option<PathBuf>,
    pub eta_model: Option<PathBuf>,
    pub image_model: Option<PathBuf>,
    pub image_labels: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CourierConfig {
    pub average_speed_kmh: f64,
    pub fuel_cost_per_km: f64,
    /// kg CO2 per km travelled
    pub co2_per_km: f64,
    pub rate_per_km: f64,
    pub base_fare: f64,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            average_speed_kmh: 25.0,
            fuel_cost_per_km: 3.5,
            co2_per_km: 0.12,
            rate_per_km: 12.0,
            base_fare: 30.0,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RoutingConfig {
    pub solver_name: String,
    /// Upper bound on full 2-opt sweeps. One sweep keeps latency predictable.
    pub two_opt_passes: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            solver_name: "nearest-neighbor-2opt".to_string(),
            two_opt_passes: 1,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ModelVersions {
    pub surplus: String,
    pub eta: String,
    pub classifier: String,
    pub image: String,
}

impl Default for ModelVersions {
    fn default() -> Self {
        Self {
            surplus: "xgboost-v2.1".to_string(),
            eta: "lstm-eta-v1".to_string(),
            classifier: "keyword-nlp-v2".to_string(),
            image: "vit-food-classification".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ImpactFactors {
    pub meals_per_kg: f64,
    pub co2_per_kg: f64,
    pub water_litres_per_kg: f64,
    pub value_per_kg: f64,
}

impl Default for ImpactFactors {
    fn default() -> Self {
        Self {
            meals_per_kg: 4.0,
            co2_per_kg: 2.5,
            water_litres_per_kg: 1000.0,
            value_per_kg: 100.0,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FoodSafetyConfig {
    pub cold_max_c: f64,
    pub hot_min_c: f64,
}

impl Default for FoodSafetyConfig {
    fn default() -> Self {
        Self {
            cold_max_c: 5.0,
            hot_min_c: 65.0,
        }
    }
}

impl MlConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| MlError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: MlConfig = serde_json::from_str(&data).map_err(|source| MlError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.courier;
        if !(c.average_speed_kmh.is_finite() && c.average_speed_kmh > 0.0) {
            return Err(MlError::InvalidConfig(format!(
                "courier.average_speed_kmh must be positive, got {}",
                c.average_speed_kmh
            )));
        }
        for (name, v) in [
            ("courier.fuel_cost_per_km", c.fuel_cost_per_km),
            ("courier.co2_per_km", c.co2_per_km),
            ("courier.rate_per_km", c.rate_per_km),
            ("courier.base_fare", c.base_fare),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(MlError::InvalidConfig(format!("{} must be >= 0, got {}", name, v)));
            }
        }
        if self.routing.two_opt_passes == 0 {
            return Err(MlError::InvalidConfig("routing.two_opt_passes must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_heuristic_only() {
        let cfg = MlConfig::default();
        assert!(cfg.artifacts.surplus_model.is_none());
        assert!(cfg.artifacts.eta_model.is_none());
        assert_eq!(cfg.courier.average_speed_kmh, 25.0);
        assert_eq!(cfg.routing.two_opt_passes, 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{ "courier": {{ "average_speed_kmh": 30.0 }}, "routing": {{ "two_opt_passes": 3 }} }}"#).unwrap();

        let cfg = MlConfig::load(f.path()).unwrap();
        assert_eq!(cfg.courier.average_speed_kmh, 30.0);
        assert_eq!(cfg.courier.fuel_cost_per_km, 3.5);
        assert_eq!(cfg.routing.two_opt_passes, 3);
        assert_eq!(cfg.versions.surplus, "xgboost-v2.1");
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let err = MlConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, MlError::ConfigRead { .. }));
    }

    #[test]
    fn test_bad_json_is_fatal() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{{ not json").unwrap();
        let err = MlConfig::load(f.path()).unwrap_err();
        assert!(matches!(err, MlError::ConfigParse { .. }));
    }

    #[test]
    fn test_zero_speed_rejected() {
        let mut cfg = MlConfig::default();
        cfg.courier.average_speed_kmh = 0.0;
        assert!(matches!(cfg.validate(), Err(MlError::InvalidConfig(_))));
    }
}
