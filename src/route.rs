use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{CourierConfig, RoutingConfig};
use crate::types::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6371.0;
/// Reversals gaining less than this (km) are treated as no improvement.
const IMPROVEMENT_EPS_KM: f64 = 1e-9;

/// Great-circle distance in km between two points (haversine).
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let d_lat = lat2 - lat1;
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.).sin().powi(2);
    EARTH_RADIUS_KM * 2. * h.sqrt().min(1.0).asin()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopRole {
    Pickup,
    Dropoff,
}

/// A place to visit, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    #[serde(flatten)]
    pub location: GeoPoint,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub order_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub role: StopRole,
    #[serde(flatten)]
    pub site: Site,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteLeg {
    #[serde(flatten)]
    pub stop: Stop,
    pub distance_km: f64,
    pub duration_mins: f64,
    pub cumulative_km: f64,
    pub cumulative_mins: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub legs: Vec<RouteLeg>,
    pub total_distance_km: f64,
    pub total_time_mins: f64,
    pub fuel_cost: f64,
    pub co2_emission_kg: f64,
    pub solver: String,
}

/// Orders pickups and drop-offs for one courier: nearest-neighbour
/// construction with pickup precedence, then bounded 2-opt.
#[derive(Debug, Clone)]
pub struct RouteOptimizer {
    courier: CourierConfig,
    solver_name: String,
    max_passes: usize,
}

impl RouteOptimizer {
    pub fn new(courier: CourierConfig, routing: RoutingConfig) -> Self {
        Self {
            courier,
            solver_name: routing.solver_name,
            max_passes: routing.two_opt_passes.max(1),
        }
    }

    pub fn optimize(&self, origin: GeoPoint, pickups: &[Site], dropoffs: &[Site]) -> Route {
        let stops: Vec<Stop> = pickups
            .iter()
            .map(|s| Stop { role: StopRole::Pickup, site: s.clone() })
            .chain(dropoffs.iter().map(|s| Stop { role: StopRole::Dropoff, site: s.clone() }))
            .collect();

        let initial = construct(origin, &stops);
        let initial_km = tour_length(origin, &stops, &initial);
        let order = self.two_opt(origin, &stops, initial);
        let route = self.assemble(origin, &stops, &order);

        debug!(
            "route: pickups={} dropoffs={} nn_km={:.3} final_km={:.3}",
            pickups.len(),
            dropoffs.len(),
            initial_km,
            route.total_distance_km
        );
        route
    }

    /// Index of the candidate nearest to `origin`; first wins on ties.
    pub fn nearest(origin: GeoPoint, candidates: &[GeoPoint]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| haversine_km(origin, **a).total_cmp(&haversine_km(origin, **b)))
            .map(|(i, _)| i)
    }

    /// Courier payment for a delivery of `distance_km`.
    pub fn courier_payout(&self, distance_km: f64) -> f64 {
        distance_km.max(0.0) * self.courier.rate_per_km + self.courier.base_fare
    }

    /// Reverses sub-sequences while that strictly shortens the tour and keeps
    /// every pickup ahead of every drop-off. Stops after `max_passes` sweeps
    /// or the first sweep without improvement.
    fn two_opt(&self, origin: GeoPoint, stops: &[Stop], mut order: Vec<usize>) -> Vec<usize> {
        let n = order.len();
        if n < 2 {
            return order;
        }

        let point = |idx: usize| stops[idx].site.location;
        for pass in 0..self.max_passes {
            let mut improved = false;
            for i in 0..n - 1 {
                for j in i + 1..n {
                    let prev = if i == 0 { origin } else { point(order[i - 1]) };
                    let first = point(order[i]);
                    let last = point(order[j]);

                    // Distance is symmetric, so only the two boundary edges change.
                    let mut delta = haversine_km(prev, last) - haversine_km(prev, first);
                    if j + 1 < n {
                        let next = point(order[j + 1]);
                        delta += haversine_km(first, next) - haversine_km(last, next);
                    }
                    if delta >= -IMPROVEMENT_EPS_KM {
                        continue;
                    }

                    order[i..=j].reverse();
                    if respects_precedence(stops, &order) {
                        improved = true;
                    } else {
                        order[i..=j].reverse();
                    }
                }
            }
            debug!("2-opt pass {} improved={}", pass + 1, improved);
            if !improved {
                break;
            }
        }
        order
    }

    fn assemble(&self, origin: GeoPoint, stops: &[Stop], order: &[usize]) -> Route {
        let mut legs = Vec::with_capacity(order.len());
        let mut prev = origin;
        let (mut cum_km, mut cum_min) = (0.0, 0.0);

        for &idx in order {
            let stop = &stops[idx];
            let km = haversine_km(prev, stop.site.location);
            let mins = km / self.courier.average_speed_kmh * 60.0;
            cum_km += km;
            cum_min += mins;
            legs.push(RouteLeg {
                stop: stop.clone(),
                distance_km: km,
                duration_mins: mins,
                cumulative_km: cum_km,
                cumulative_mins: cum_min,
            });
            prev = stop.site.location;
        }

        Route {
            legs,
            total_distance_km: cum_km,
            total_time_mins: cum_min,
            fuel_cost: cum_km * self.courier.fuel_cost_per_km,
            co2_emission_kg: cum_km * self.courier.co2_per_km,
            solver: self.solver_name.clone(),
        }
    }
}

/// Nearest neighbour from `origin`, restricted to pickups while any remain.
fn construct(origin: GeoPoint, stops: &[Stop]) -> Vec<usize> {
    let mut remaining: Vec<usize> = (0..stops.len()).collect();
    let mut order = Vec::with_capacity(stops.len());
    let mut current = origin;

    while !remaining.is_empty() {
        let pickups_left = remaining.iter().any(|&i| stops[i].role == StopRole::Pickup);
        let mut best: Option<(usize, f64)> = None;
        for (pos, &idx) in remaining.iter().enumerate() {
            if pickups_left && stops[idx].role != StopRole::Pickup {
                continue;
            }
            let d = haversine_km(current, stops[idx].site.location);
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((pos, d));
            }
        }
        let Some((pos, _)) = best else { break };
        let idx = remaining.remove(pos);
        current = stops[idx].site.location;
        order.push(idx);
    }
    order
}

fn tour_length(origin: GeoPoint, stops: &[Stop], order: &[usize]) -> f64 {
    let mut prev = origin;
    let mut total = 0.0;
    for &idx in order {
        total += haversine_km(prev, stops[idx].site.location);
        prev = stops[idx].site.location;
    }
    total
}

fn respects_precedence(stops: &[Stop], order: &[usize]) -> bool {
    let mut seen_dropoff = false;
    for &idx in order {
        match stops[idx].role {
            StopRole::Dropoff => seen_dropoff = true,
            StopRole::Pickup if seen_dropoff => return false,
            StopRole::Pickup => {}
        }
    }
    true
}
