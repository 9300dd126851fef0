use std::collections::HashMap;

use crate::models::{ForecastRow, Priority, Recommendation};
use crate::settings::RecommendConfig;

#[derive(Debug, Clone)]
pub struct RecommendationEngine {
    coverage_sentinel: f64,
}

impl RecommendationEngine {
    pub fn new(config: &RecommendConfig) -> Self {
        Self {
            coverage_sentinel: config.coverage_sentinel,
        }
    }

    /// One recommendation per item in `forecasts`, most urgent first. Items
    /// missing from `current_stock` are treated as out of stock.
    pub fn recommend(
        &self,
        forecasts: &[ForecastRow],
        current_stock: &HashMap<String, i64>,
        safety_days: u32,
    ) -> Vec<Recommendation> {
        let mut order: Vec<&str> = Vec::new();
        let mut demand: HashMap<&str, (f64, usize)> = HashMap::new();

        for row in forecasts {
            let entry = demand.entry(row.item_id.as_str()).or_insert_with(|| {
                order.push(row.item_id.as_str());
                (0.0, 0)
            });
            entry.0 += row.ensemble_prediction;
            entry.1 += 1;
        }

        let mut recommendations: Vec<Recommendation> = order
            .into_iter()
            .map(|item| {
                let (total, days) = demand[item];
                let stock = current_stock.get(item).copied().unwrap_or(0);
                self.build(item, stock, total, days, safety_days)
            })
            .collect();

        // Stable, so equal priorities keep forecast order.
        recommendations.sort_by_key(|rec| rec.priority);
        recommendations
    }

    fn build(
        &self,
        item: &str,
        current_stock: i64,
        forecast_total_demand: f64,
        horizon_days: usize,
        safety_days: u32,
    ) -> Recommendation {
        let avg_daily_demand = if horizon_days == 0 {
            0.0
        } else {
            forecast_total_demand / horizon_days as f64
        };
        let safety_stock = avg_daily_demand * safety_days as f64;
        Recommendation {
            item_id: item.to_string(),
            current_stock,
            forecast_total_demand,
            avg_daily_demand,
            safety_stock,
            recommended_quantity: recommended_quantity(
                forecast_total_demand,
                safety_stock,
                current_stock,
            ),
            priority: classify_priority(current_stock, avg_daily_demand),
            coverage_days: coverage_days(current_stock, avg_daily_demand, self.coverage_sentinel),
        }
    }
}

pub fn recommended_quantity(forecast_total_demand: f64, safety_stock: f64, current_stock: i64) -> u64 {
    let shortfall = forecast_total_demand + safety_stock - current_stock as f64;
    shortfall.max(0.0).ceil() as u64
}

/// First match wins; both demand thresholds are strict.
pub fn classify_priority(current_stock: i64, avg_daily_demand: f64) -> Priority {
    let stock = current_stock as f64;
    match current_stock {
        s if s <= 0 => Priority::Critical,
        _ if stock < avg_daily_demand * 7.0 => Priority::High,
        _ if stock < avg_daily_demand * 30.0 => Priority::Medium,
        _ => Priority::Low,
    }
}

pub fn coverage_days(current_stock: i64, avg_daily_demand: f64, sentinel: f64) -> f64 {
    if avg_daily_demand <= 0.0 {
        return sentinel;
    }
    current_stock as f64 / avg_daily_demand
}
