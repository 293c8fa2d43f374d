use anyhow::{Context, Result};
use clap::Parser;
use food_rescue_ml::{EtaRequest, FeatureSet, GeoPoint, MlConfig, MlServices, Site};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Reads JSON-lines requests on stdin and answers each on stdout.
#[derive(Parser, Debug)]
#[command(name = "food_rescue_ml", version)]
struct Args {
    /// JSON config file; built-in defaults (heuristic mode) when omitted
    #[arg(long, env = "FOOD_RESCUE_CONFIG")]
    config: Option<PathBuf>,
}

// ---------- Request types ----------

#[derive(Deserialize, Debug)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    PredictSurplus(FeatureSet),
    RecordSurplusOutcome { predicted: f64, actual: f64 },
    OptimizeRoute {
        origin: GeoPoint,
        #[serde(default)]
        pickups: Vec<Site>,
        #[serde(default)]
        dropoffs: Vec<Site>,
    },
    ClassifyFood { description: String },
    ClassifyImage { path: PathBuf },
    PredictEta(EtaRequest),
    RecordEtaOutcome { predicted: f64, actual: f64 },
    EstimateImpact { food_kg: f64 },
}

fn handle(svc: &MlServices, req: Request) -> Result<Value> {
    let out = match req {
        Request::PredictSurplus(features) => {
            features.validate()?;
            serde_json::to_value(svc.demand.predict(&features))?
        }
        Request::RecordSurplusOutcome { predicted, actual } => {
            json!({ "bias_correction": svc.demand.record_outcome(predicted, actual) })
        }
        Request::OptimizeRoute { origin, pickups, dropoffs } => {
            origin.validate()?;
            for site in pickups.iter().chain(dropoffs.iter()) {
                site.location.validate()?;
            }
            serde_json::to_value(svc.routes.optimize(origin, &pickups, &dropoffs))?
        }
        Request::ClassifyFood { description } => serde_json::to_value(svc.classifier.classify(&description))?,
        Request::ClassifyImage { path } => serde_json::to_value(svc.classifier.classify_image(&path))?,
        Request::PredictEta(req) => {
            for p in req.pickup.iter().chain(req.dropoff.iter()) {
                p.validate()?;
            }
            let forecast = svc.eta.predict(&req);
            let payout = svc.routes.courier_payout(forecast.distance_km);
            let mut v = serde_json::to_value(forecast)?;
            v["courier_payout"] = json!(payout);
            v
        }
        Request::RecordEtaOutcome { predicted, actual } => {
            json!({ "bias_correction": svc.eta.record_outcome(predicted, actual) })
        }
        Request::EstimateImpact { food_kg } => serde_json::to_value(svc.impact.estimate(food_kg))?,
    };
    Ok(out)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("food_rescue_ml=info")),
        )
        .init();

    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => MlConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => MlConfig::default(),
    };
    let svc = MlServices::from_config(&cfg);

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<Request>(&line) {
            Ok(req) => {
                debug!("request: {:?}", req);
                handle(&svc, req).unwrap_or_else(|e| json!({ "error": e.to_string() }))
            }
            Err(e) => {
                warn!("bad request line: {}", e);
                json!({ "error": format!("bad request: {}", e) })
            }
        };
        writeln!(stdout, "{}", reply)?;
        stdout.flush()?;
    }
    Ok(())
}
