//! Persisted per-item model bundles for scheduled retraining.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::forecast::TrainedPair;
use crate::gbm::GbmModel;
use crate::models::{FeatureImportance, ModelMetrics};
use crate::seasonal::SeasonalModel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub item_id: String,
    pub artifact_key: String,
    pub trained_at: DateTime<Utc>,
    pub gbm: GbmModel,
    pub seasonal: SeasonalModel,
    pub gbm_metrics: ModelMetrics,
    pub seasonal_metrics: ModelMetrics,
    pub feature_ranking: Vec<FeatureImportance>,
}

impl ModelArtifact {
    pub fn from_trained(pair: TrainedPair, trained_at: DateTime<Utc>) -> Self {
        let item_id = pair.gbm.item_id;
        Self {
            artifact_key: artifact_key(&item_id),
            item_id,
            trained_at,
            gbm: pair.gbm.model,
            seasonal: pair.seasonal.model,
            gbm_metrics: pair.gbm.metrics,
            seasonal_metrics: pair.seasonal.metrics,
            feature_ranking: pair.gbm.feature_ranking,
        }
    }
}

/// Storage key for an item: trimmed, with whitespace runs replaced by `_`.
pub fn artifact_key(item_id: &str) -> String {
    item_id.split_whitespace().collect::<Vec<_>>().join("_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::build_features;
    use crate::forecast::Forecaster;
    use crate::models::DailyPoint;
    use crate::settings::AppConfig;
    use crate::trainer::ModelTrainer;
    use chrono::{Duration, NaiveDate};

    #[test]
    fn keys_replace_whitespace() {
        assert_eq!(artifact_key("Luva  de Látex"), "Luva_de_Látex");
        assert_eq!(artifact_key(" Mask-Y\t"), "Mask-Y");
    }

    #[test]
    fn bundle_survives_json_and_forecasts_identically() {
        let config = AppConfig::default();
        let forecaster = Forecaster::new(ModelTrainer::new(config.gbm, config.seasonal));
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let points: Vec<DailyPoint> = (0..45)
            .map(|i| DailyPoint {
                date: start + Duration::days(i),
                quantity: 5.0 + (i % 4) as f64,
            })
            .collect();
        let series = build_features(&points);
        let pair = forecaster.train(&series, "Ear Plug").unwrap();
        let artifact = ModelArtifact::from_trained(pair, Utc::now());
        assert_eq!(artifact.artifact_key, "Ear_Plug");

        let json = serde_json::to_string(&artifact).unwrap();
        let restored: ModelArtifact = serde_json::from_str(&json).unwrap();
        let before =
            crate::forecast::project(&artifact.gbm, &artifact.seasonal, &series, "Ear Plug", 7).unwrap();
        let after =
            crate::forecast::project(&restored.gbm, &restored.seasonal, &series, "Ear Plug", 7).unwrap();
        for (a, b) in before.iter().zip(&after) {
            assert!((a.ensemble_prediction - b.ensemble_prediction).abs() < 1e-9);
        }
    }
}
