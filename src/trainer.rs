//! Per-item training of the two demand models.
//!
//! The gradient-boosting model is scored on a chronological held-out tail.
//! The seasonal model is scored in-sample over its own training range, so
//! the two sets of metrics are not directly comparable.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ForecastError;
use crate::gbm::GbmModel;
use crate::metrics;
use crate::models::{FeatureImportance, FeatureRow, ModelMetrics, FEATURE_NAMES};
use crate::seasonal::SeasonalModel;
use crate::settings::{GbmConfig, SeasonalConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedGbm {
    pub item_id: String,
    pub model: GbmModel,
    pub metrics: ModelMetrics,
    /// Descending by importance.
    pub feature_ranking: Vec<FeatureImportance>,
    pub train_rows: usize,
    pub test_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedSeasonal {
    pub item_id: String,
    pub model: SeasonalModel,
    pub metrics: ModelMetrics,
}

#[derive(Debug, Clone)]
pub struct ModelTrainer {
    gbm: GbmConfig,
    seasonal: SeasonalConfig,
}

impl ModelTrainer {
    pub fn new(gbm: GbmConfig, seasonal: SeasonalConfig) -> Self {
        Self { gbm, seasonal }
    }

    pub fn train_gbm(&self, item_id: &str, series: &[FeatureRow]) -> Result<TrainedGbm, ForecastError> {
        require_history(item_id, series, self.gbm.min_history)?;

        let n = series.len();
        let test_rows = ((n as f64 * self.gbm.test_fraction).ceil() as usize).clamp(1, n - 1);
        let (train, test) = series.split_at(n - test_rows);

        let x_train: Vec<Vec<f64>> = train.iter().map(FeatureRow::features).collect();
        let y_train: Vec<f64> = train.iter().map(|row| row.quantity).collect();
        let model = GbmModel::fit(&x_train, &y_train, &self.gbm)?;

        let x_test: Vec<Vec<f64>> = test.iter().map(FeatureRow::features).collect();
        let y_test: Vec<f64> = test.iter().map(|row| row.quantity).collect();
        let predicted = model.predict(&x_test);
        let metrics = ModelMetrics {
            mae: metrics::mae(&y_test, &predicted),
            rmse: metrics::rmse(&y_test, &predicted),
            r2: Some(metrics::r2(&y_test, &predicted)),
        };

        let mut feature_ranking: Vec<FeatureImportance> = FEATURE_NAMES
            .iter()
            .zip(model.feature_importances())
            .map(|(name, importance)| FeatureImportance {
                feature: (*name).to_string(),
                importance: *importance,
            })
            .collect();
        feature_ranking.sort_by(|a, b| b.importance.total_cmp(&a.importance));

        debug!(
            item = item_id,
            train_rows = train.len(),
            test_rows,
            mae = metrics.mae,
            rmse = metrics.rmse,
            "gradient-boosting model trained"
        );

        Ok(TrainedGbm {
            item_id: item_id.to_string(),
            model,
            metrics,
            feature_ranking,
            train_rows: train.len(),
            test_rows,
        })
    }

    pub fn train_seasonal(
        &self,
        item_id: &str,
        series: &[FeatureRow],
    ) -> Result<TrainedSeasonal, ForecastError> {
        require_history(item_id, series, self.seasonal.min_history)?;

        let points: Vec<_> = series.iter().map(|row| (row.date, row.quantity)).collect();
        let model = SeasonalModel::fit(&points, &self.seasonal)?;

        let dates: Vec<_> = series.iter().map(|row| row.date).collect();
        let fitted: Vec<f64> = model.predict(&dates).iter().map(|p| p.yhat).collect();
        let actual: Vec<f64> = series.iter().map(|row| row.quantity).collect();
        let metrics = ModelMetrics {
            mae: metrics::mae(&actual, &fitted),
            rmse: metrics::rmse(&actual, &fitted),
            r2: None,
        };

        debug!(
            item = item_id,
            rows = series.len(),
            mae = metrics.mae,
            rmse = metrics.rmse,
            "seasonal model trained"
        );

        Ok(TrainedSeasonal {
            item_id: item_id.to_string(),
            model,
            metrics,
        })
    }
}

fn require_history(item_id: &str, series: &[FeatureRow], required: usize) -> Result<(), ForecastError> {
    let required = required.max(2);
    if series.len() < required {
        return Err(ForecastError::InsufficientData {
            item: item_id.to_string(),
            required,
            actual: series.len(),
        });
    }
    Ok(())
}
