//! Reference forecasters the ensemble is compared against.

use augurs::ets::AutoETS;
use augurs::prelude::*;
use tracing::debug;

use crate::error::ForecastError;
use crate::metrics::mean;

/// Repeats the last observed value.
pub fn naive(history: &[f64], horizon: usize) -> Vec<f64> {
    let last = history.last().copied().unwrap_or(0.0);
    vec![last; horizon]
}

/// Holds the mean of the last `window` observations constant.
pub fn moving_average(history: &[f64], window: usize, horizon: usize) -> Vec<f64> {
    let start = history.len().saturating_sub(window.max(1));
    vec![mean(&history[start..]); horizon]
}

/// Exponential smoothing with additive error and trend, no seasonality.
pub fn exponential_smoothing(history: &[f64], horizon: usize) -> Result<Vec<f64>, ForecastError> {
    const MODEL: &str = "exponential smoothing";

    let model = AutoETS::new(1, "AAN")
        .map_err(|e| ForecastError::model_fit(MODEL, format!("init: {e}")))?;
    let fitted = model
        .fit(history)
        .map_err(|e| ForecastError::model_fit(MODEL, format!("fit: {e}")))?;
    let forecast = fitted
        .predict(horizon, 0.80)
        .map_err(|e| ForecastError::model_fit(MODEL, format!("predict: {e}")))?;

    if forecast.point.iter().any(|v| !v.is_finite()) {
        return Err(ForecastError::model_fit(MODEL, "non-finite forecast"));
    }
    debug!(history = history.len(), horizon, "exponential smoothing fitted");
    Ok(forecast.point)
}
