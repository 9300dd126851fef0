use std::path::Path;

use anyhow::Context;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::ForecastError;

/// Process-wide settings, built once in `main` and handed to each component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub prepare: PrepareConfig,
    pub gbm: GbmConfig,
    pub seasonal: SeasonalConfig,
    pub forecast: ForecastConfig,
    pub recommend: RecommendConfig,
    pub backtest: BacktestConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            prepare: PrepareConfig::default(),
            gbm: GbmConfig::default(),
            seasonal: SeasonalConfig::default(),
            forecast: ForecastConfig::default(),
            recommend: RecommendConfig::default(),
            backtest: BacktestConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepareConfig {
    /// Reindex each item to a complete calendar with zero-filled gaps before
    /// computing lags. Off by default, so lags are row offsets.
    pub fill_missing_days: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbmConfig {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Fraction of training rows drawn for each tree.
    pub subsample: f64,
    pub seed: u64,
    /// Trailing share of rows held out for evaluation.
    pub test_fraction: f64,
    pub min_history: usize,
}

impl Default for GbmConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 5,
            learning_rate: 0.1,
            min_samples_split: 2,
            min_samples_leaf: 1,
            subsample: 1.0,
            seed: 42,
            test_fraction: 0.2,
            min_history: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonalityMode {
    Additive,
    Multiplicative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeasonalConfig {
    pub yearly_seasonality: bool,
    pub yearly_order: usize,
    pub weekly_seasonality: bool,
    pub weekly_order: usize,
    pub mode: SeasonalityMode,
    pub n_changepoints: usize,
    pub changepoint_range: f64,
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    pub interval_width: f64,
    pub min_history: usize,
}

impl Default for SeasonalConfig {
    fn default() -> Self {
        Self {
            yearly_seasonality: true,
            yearly_order: 10,
            weekly_seasonality: true,
            weekly_order: 3,
            mode: SeasonalityMode::Multiplicative,
            n_changepoints: 25,
            changepoint_range: 0.8,
            changepoint_prior_scale: 0.05,
            seasonality_prior_scale: 10.0,
            interval_width: 0.8,
            min_history: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub horizon_days: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self { horizon_days: 30 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendConfig {
    pub safety_days: u32,
    /// Reported as `coverage_days` when there is no demand to deplete stock.
    pub coverage_sentinel: f64,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            safety_days: 7,
            coverage_sentinel: 999.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub train_window_days: usize,
    pub test_window_days: usize,
    pub max_iterations: usize,
    pub compare_min_history: usize,
    pub compare_test_fraction: f64,
    pub moving_average_window: usize,
    pub mape_epsilon: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            train_window_days: 180,
            test_window_days: 30,
            max_iterations: 10,
            compare_min_history: 90,
            compare_test_fraction: 0.2,
            moving_average_window: 7,
            mape_epsilon: 1e-10,
        }
    }
}

impl AppConfig {
    /// Layers built-in defaults, the optional TOML file at `path`, then
    /// `PPE__SECTION__KEY` environment variables. `DATABASE_URL` wins over
    /// the file when set.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("PPE").separator("__"))
            .set_override_option("database_url", std::env::var("DATABASE_URL").ok())?
            .build()
            .with_context(|| format!("failed to read configuration from {}", path.display()))?;

        let config: AppConfig = settings
            .try_deserialize()
            .context("configuration has an unexpected shape")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ForecastError> {
        let gbm = &self.gbm;
        if gbm.n_estimators == 0 {
            return Err(ForecastError::InvalidConfig(
                "gbm.n_estimators must be at least 1".to_string(),
            ));
        }
        if gbm.max_depth == 0 {
            return Err(ForecastError::InvalidConfig(
                "gbm.max_depth must be at least 1".to_string(),
            ));
        }
        if !(gbm.learning_rate > 0.0 && gbm.learning_rate <= 1.0) {
            return Err(ForecastError::InvalidConfig(format!(
                "gbm.learning_rate must be in (0, 1], got {}",
                gbm.learning_rate
            )));
        }
        if !(gbm.subsample > 0.0 && gbm.subsample <= 1.0) {
            return Err(ForecastError::InvalidConfig(format!(
                "gbm.subsample must be in (0, 1], got {}",
                gbm.subsample
            )));
        }
        if !(gbm.test_fraction > 0.0 && gbm.test_fraction < 1.0) {
            return Err(ForecastError::InvalidConfig(format!(
                "gbm.test_fraction must be in (0, 1), got {}",
                gbm.test_fraction
            )));
        }
        if !(self.backtest.compare_test_fraction > 0.0 && self.backtest.compare_test_fraction < 1.0)
        {
            return Err(ForecastError::InvalidConfig(format!(
                "backtest.compare_test_fraction must be in (0, 1), got {}",
                self.backtest.compare_test_fraction
            )));
        }
        if !(self.seasonal.interval_width > 0.0 && self.seasonal.interval_width < 1.0) {
            return Err(ForecastError::InvalidConfig(format!(
                "seasonal.interval_width must be in (0, 1), got {}",
                self.seasonal.interval_width
            )));
        }
        if !(self.seasonal.changepoint_range > 0.0 && self.seasonal.changepoint_range <= 1.0) {
            return Err(ForecastError::InvalidConfig(format!(
                "seasonal.changepoint_range must be in (0, 1], got {}",
                self.seasonal.changepoint_range
            )));
        }
        if self.backtest.test_window_days == 0 || self.backtest.max_iterations == 0 {
            return Err(ForecastError::InvalidConfig(
                "backtest windows and iteration cap must be positive".to_string(),
            ));
        }
        if self.backtest.compare_min_history < 2 {
            return Err(ForecastError::InvalidConfig(format!(
                "backtest.compare_min_history must be at least 2, got {}",
                self.backtest.compare_min_history
            )));
        }
        Ok(())
    }
}
