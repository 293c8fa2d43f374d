//! Predictive and optimisation engines for a food rescue platform: surplus
//! forecasting, courier routing, food classification and delivery ETA.

pub mod bias;
pub mod classifier;
pub mod config;
pub mod demand;
pub mod error;
pub mod eta;
pub mod impact;
pub mod model;
pub mod route;
pub mod services;
pub mod types;

pub use classifier::{Classification, FoodCategory, FoodClassifier, ImageClassification};
pub use config::MlConfig;
pub use demand::{DemandPredictor, EventType, FeatureSet, SurplusForecast, Weather};
pub use error::MlError;
pub use eta::{EtaForecast, EtaPredictor, EtaRequest, TrafficBand};
pub use impact::{FoodCondition, ImpactEstimator, ImpactSummary};
pub use route::{haversine_km, Route, RouteLeg, RouteOptimizer, Site, Stop, StopRole};
pub use services::MlServices;
pub use types::{ConfidenceInterval, GeoPoint, Prediction, PredictionSource};
