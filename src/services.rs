use tracing::info;

use crate::classifier::FoodClassifier;
use crate::config::MlConfig;
use crate::demand::DemandPredictor;
use crate::eta::EtaPredictor;
use crate::impact::ImpactEstimator;
use crate::route::RouteOptimizer;

/// The engines a host process builds once and shares by reference.
pub struct MlServices {
    pub demand: DemandPredictor,
    pub routes: RouteOptimizer,
    pub classifier: FoodClassifier,
    pub eta: EtaPredictor,
    pub impact: ImpactEstimator,
}

impl MlServices {
    pub fn from_config(cfg: &MlConfig) -> Self {
        let services = Self {
            demand: DemandPredictor::from_config(&cfg.artifacts, &cfg.versions),
            routes: RouteOptimizer::new(cfg.courier.clone(), cfg.routing.clone()),
            classifier: FoodClassifier::from_config(&cfg.artifacts, &cfg.versions),
            eta: EtaPredictor::from_config(&cfg.artifacts, &cfg.courier, &cfg.versions),
            impact: ImpactEstimator::new(cfg.impact.clone(), cfg.food_safety.clone()),
        };
        info!(
            "ml services ready: demand_trained={} eta_trained={} image_model={}",
            services.demand.is_trained(),
            services.eta.is_trained(),
            services.classifier.has_image_model()
        );
        services
    }
}
