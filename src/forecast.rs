//! Ensemble forecasting over a future horizon.
//!
//! Future lag and rolling features for the gradient-boosting model are frozen
//! at one estimate taken from the last known observations and held for the
//! whole horizon; they are not rebuilt from the model's own predictions. Long
//! horizons therefore flatten towards the recent level.

use chrono::{Duration, NaiveDate};
use tracing::{debug, warn};

use crate::gbm::GbmModel;
use crate::metrics::{mean, sample_std_dev};
use crate::models::{FeatureRow, ForecastRow, LagFeatures};
use crate::seasonal::SeasonalModel;
use crate::trainer::{ModelTrainer, TrainedGbm, TrainedSeasonal};

#[derive(Debug, Clone)]
pub struct TrainedPair {
    pub gbm: TrainedGbm,
    pub seasonal: TrainedSeasonal,
}

#[derive(Debug, Clone)]
pub struct Forecaster {
    trainer: ModelTrainer,
}

impl Forecaster {
    pub fn new(trainer: ModelTrainer) -> Self {
        Self { trainer }
    }

    /// Trains both models on `series`. `None` when either cannot be trained.
    pub fn train(&self, series: &[FeatureRow], item_id: &str) -> Option<TrainedPair> {
        let gbm = match self.trainer.train_gbm(item_id, series) {
            Ok(trained) => trained,
            Err(err) if err.is_insufficient_data() => {
                debug!(item = item_id, error = %err, "not enough history yet");
                return None;
            }
            Err(err) => {
                warn!(item = item_id, error = %err, "gradient-boosting model unavailable");
                return None;
            }
        };
        let seasonal = match self.trainer.train_seasonal(item_id, series) {
            Ok(trained) => trained,
            Err(err) => {
                warn!(item = item_id, error = %err, "seasonal model unavailable");
                return None;
            }
        };
        Some(TrainedPair { gbm, seasonal })
    }

    /// Trains both models and forecasts `horizon_days` past the last row.
    pub fn predict(
        &self,
        series: &[FeatureRow],
        item_id: &str,
        horizon_days: usize,
    ) -> Option<Vec<ForecastRow>> {
        let pair = self.train(series, item_id)?;
        project(&pair.gbm.model, &pair.seasonal.model, series, item_id, horizon_days)
    }
}

/// Forecasts with already fitted models, e.g. ones loaded from an artifact.
pub fn project(
    gbm: &GbmModel,
    seasonal: &SeasonalModel,
    series: &[FeatureRow],
    item_id: &str,
    horizon_days: usize,
) -> Option<Vec<ForecastRow>> {
    let last = series.last()?;
    let dates = future_dates(last.date, horizon_days);
    let lags = frozen_lags(series);
    let seasonal_predictions = seasonal.predict(&dates);

    let rows = dates
        .iter()
        .zip(seasonal_predictions)
        .map(|(&date, seasonal)| {
            let features = FeatureRow::new(date, 0.0, lags).features();
            let gbm_prediction = gbm.predict_one(&features);
            ForecastRow {
                item_id: item_id.to_string(),
                date,
                seasonal_prediction: seasonal.yhat,
                gbm_prediction,
                ensemble_prediction: ensemble(seasonal.yhat, gbm_prediction),
                lower_bound: seasonal.lower,
                upper_bound: seasonal.upper,
            }
        })
        .collect();
    Some(rows)
}

/// Equal-weight blend, floored at zero demand.
pub fn ensemble(seasonal_prediction: f64, gbm_prediction: f64) -> f64 {
    ((seasonal_prediction + gbm_prediction) / 2.0).max(0.0)
}

pub fn future_dates(last: NaiveDate, horizon_days: usize) -> Vec<NaiveDate> {
    (1..=horizon_days as i64)
        .map(|offset| last + Duration::days(offset))
        .collect()
}

/// Single-point covariates from the tail of the known history.
pub fn frozen_lags(series: &[FeatureRow]) -> LagFeatures {
    let quantities: Vec<f64> = series.iter().map(|row| row.quantity).collect();
    let tail = |w: usize| &quantities[quantities.len().saturating_sub(w)..];
    LagFeatures {
        lag_7: mean(tail(7)),
        lag_14: mean(tail(14)),
        lag_30: mean(tail(30)),
        rolling_mean_7: mean(tail(7)),
        rolling_mean_30: mean(tail(30)),
        rolling_std_7: sample_std_dev(tail(7)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::build_features;
    use crate::models::DailyPoint;
    use crate::settings::AppConfig;

    fn forecaster() -> Forecaster {
        let config = AppConfig::default();
        Forecaster::new(ModelTrainer::new(config.gbm, config.seasonal))
    }

    fn daily_series(values: &[f64]) -> Vec<FeatureRow> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let points: Vec<DailyPoint> = values
            .iter()
            .enumerate()
            .map(|(i, &quantity)| DailyPoint {
                date: start + Duration::days(i as i64),
                quantity,
            })
            .collect();
        build_features(&points)
    }

    #[test]
    fn ensemble_is_floored_at_zero() {
        assert_eq!(ensemble(-4.0, -2.0), 0.0);
        assert_eq!(ensemble(-4.0, 2.0), 0.0);
        assert_eq!(ensemble(4.0, 2.0), 3.0);
    }

    #[test]
    fn forecasts_are_never_negative() {
        // Steep decline drives the trend below zero past the horizon.
        let values: Vec<f64> = (0..60).map(|i| (60 - i) as f64).collect();
        let rows = forecaster().predict(&daily_series(&values), "Mask-Y", 90).unwrap();
        assert_eq!(rows.len(), 90);
        assert!(rows.iter().all(|row| row.ensemble_prediction >= 0.0));
    }

    #[test]
    fn forecast_dates_follow_the_last_observation() {
        let series = daily_series(&[10.0; 40]);
        let rows = forecaster().predict(&series, "Glove-X", 5).unwrap();
        let last = series.last().unwrap().date;
        assert_eq!(rows[0].date, last + Duration::days(1));
        assert_eq!(rows[4].date, last + Duration::days(5));
        assert!(rows.iter().all(|row| row.item_id == "Glove-X"));
        assert!(rows.iter().all(|row| (row.gbm_prediction - 10.0).abs() < 1e-9));
    }

    #[test]
    fn bounds_come_from_the_seasonal_model() {
        let values: Vec<f64> = (0..50).map(|i| 8.0 + (i % 4) as f64).collect();
        let rows = forecaster().predict(&daily_series(&values), "Boot", 10).unwrap();
        for row in &rows {
            assert!(row.lower_bound <= row.seasonal_prediction);
            assert!(row.upper_bound >= row.seasonal_prediction);
        }
    }

    #[test]
    fn short_history_yields_no_forecast() {
        assert!(forecaster().predict(&daily_series(&[3.0; 29]), "Boot", 7).is_none());
        assert!(forecaster().predict(&[], "Boot", 7).is_none());
    }

    #[test]
    fn frozen_lags_use_trailing_means() {
        let values: Vec<f64> = (1..=30).map(|v| v as f64).collect();
        let lags = frozen_lags(&daily_series(&values));
        assert_eq!(lags.lag_7, 27.0);
        assert_eq!(lags.lag_14, 23.5);
        assert_eq!(lags.lag_30, 15.5);
        assert_eq!(lags.rolling_mean_7, lags.lag_7);
    }
}
