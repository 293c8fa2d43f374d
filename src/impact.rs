use serde::{Deserialize, Serialize};

use crate::config::{FoodSafetyConfig, ImpactFactors};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoodCondition {
    Hot,
    Cold,
    Ambient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactSummary {
    pub food_kg: f64,
    pub meals: u64,
    pub co2_avoided_kg: f64,
    pub water_saved_litres: f64,
    pub value: f64,
}

/// Converts rescued food mass into impact figures and checks holding
/// temperatures.
#[derive(Debug, Clone, Default)]
pub struct ImpactEstimator {
    factors: ImpactFactors,
    safety: FoodSafetyConfig,
}

impl ImpactEstimator {
    pub fn new(factors: ImpactFactors, safety: FoodSafetyConfig) -> Self {
        Self { factors, safety }
    }

    pub fn estimate(&self, food_kg: f64) -> ImpactSummary {
        let kg = food_kg.max(0.0);
        ImpactSummary {
            food_kg: kg,
            meals: (kg * self.factors.meals_per_kg).floor() as u64,
            co2_avoided_kg: kg * self.factors.co2_per_kg,
            water_saved_litres: kg * self.factors.water_litres_per_kg,
            value: kg * self.factors.value_per_kg,
        }
    }

    /// True when cold food is too warm or hot food has cooled too far.
    pub fn temperature_alert(&self, condition: FoodCondition, celsius: f64) -> bool {
        match condition {
            FoodCondition::Cold => celsius > self.safety.cold_max_c,
            FoodCondition::Hot => celsius < self.safety.hot_min_c,
            FoodCondition::Ambient => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate() {
        let est = ImpactEstimator::default();
        let s = est.estimate(12.3);
        assert_eq!(s.meals, 49);
        assert!((s.co2_avoided_kg - 30.75).abs() < 1e-9);
        assert!((s.water_saved_litres - 12_300.0).abs() < 1e-6);
        assert!((s.value - 1230.0).abs() < 1e-6);
        assert_eq!(est.estimate(-4.0).meals, 0);
    }

    #[test]
    fn test_temperature_alert() {
        let est = ImpactEstimator::default();
        assert!(est.temperature_alert(FoodCondition::Cold, 7.5));
        assert!(!est.temperature_alert(FoodCondition::Cold, 4.0));
        assert!(est.temperature_alert(FoodCondition::Hot, 50.0));
        assert!(!est.temperature_alert(FoodCondition::Hot, 70.0));
        assert!(!est.temperature_alert(FoodCondition::Ambient, 30.0));
    }
}
