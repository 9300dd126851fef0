//! Decomposable time-series model: piecewise-linear trend with changepoints
//! plus Fourier yearly and weekly seasonality.
//!
//! In multiplicative mode the fit is `y = g(t) * (1 + s(t))`; in additive
//! mode it is `y = g(t) + s(t)`. Trend and seasonal coefficients are fitted
//! alternately by weighted ridge least squares, where the ridge penalties
//! play the role of the changepoint and seasonality priors. Daily
//! seasonality is never modelled since the series is one value per day.
//! Short histories get fewer yearly harmonics, in proportion to the share of
//! the year they span, so a few weeks of data cannot drive a high-order
//! curve far outside the observed range.
//!
//! The uncertainty band uses the in-sample residual spread and widens with
//! the square root of the distance past the last observation.

use chrono::{Datelike, NaiveDate};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ForecastError;
use crate::settings::{SeasonalConfig, SeasonalityMode};

const MODEL: &str = "seasonal";
const YEARLY_PERIOD: f64 = 365.25;
const WEEKLY_PERIOD: f64 = 7.0;
/// Assumed observation variance on the max-scaled series; turns prior scales
/// into ridge penalties.
const NOISE_VARIANCE: f64 = 0.05;
const UNPENALISED: f64 = 1e-8;
const ALTERNATIONS: usize = 10;
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct FourierTerm {
    period: f64,
    order: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalModel {
    start: NaiveDate,
    last: NaiveDate,
    span_days: f64,
    y_scale: f64,
    changepoints: Vec<f64>,
    trend_coef: Vec<f64>,
    terms: Vec<FourierTerm>,
    seasonal_coef: Vec<f64>,
    mode: SeasonalityMode,
    sigma: f64,
    n_obs: usize,
    z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeasonalPrediction {
    pub date: NaiveDate,
    pub yhat: f64,
    pub lower: f64,
    pub upper: f64,
}

impl SeasonalModel {
    /// Fits on `(date, quantity)` pairs in ascending date order.
    pub fn fit(points: &[(NaiveDate, f64)], config: &SeasonalConfig) -> Result<Self, ForecastError> {
        let n = points.len();
        if n < 2 {
            return Err(ForecastError::model_fit(MODEL, "need at least two observations"));
        }
        if points.iter().any(|(_, y)| !y.is_finite()) {
            return Err(ForecastError::model_fit(MODEL, "non-finite observation"));
        }
        let start = points[0].0;
        let last = points[n - 1].0;
        let span_days = (last - start).num_days() as f64;
        if span_days <= 0.0 {
            return Err(ForecastError::model_fit(MODEL, "observations span a single day"));
        }
        let y_scale = points.iter().map(|(_, y)| y.abs()).fold(0.0, f64::max);
        if y_scale == 0.0 {
            return Err(ForecastError::model_fit(MODEL, "all observations are zero"));
        }

        let t: Vec<f64> = points
            .iter()
            .map(|(date, _)| (*date - start).num_days() as f64 / span_days)
            .collect();
        let ys: Vec<f64> = points.iter().map(|(_, y)| y / y_scale).collect();
        let changepoints = place_changepoints(&t, config);

        let mut terms = Vec::new();
        if config.yearly_seasonality && config.yearly_order > 0 {
            terms.push(FourierTerm {
                period: YEARLY_PERIOD,
                order: fourier_order(config.yearly_order, YEARLY_PERIOD, span_days),
            });
        }
        if config.weekly_seasonality && config.weekly_order > 0 {
            terms.push(FourierTerm {
                period: WEEKLY_PERIOD,
                order: fourier_order(config.weekly_order, WEEKLY_PERIOD, span_days),
            });
        }

        let trend_x = trend_design(&t, &changepoints);
        let dates: Vec<NaiveDate> = points.iter().map(|(date, _)| *date).collect();
        let season_x = fourier_design(&dates, &terms);

        let cp_penalty = NOISE_VARIANCE / config.changepoint_prior_scale.powi(2);
        let mut trend_penalties = vec![UNPENALISED, UNPENALISED];
        trend_penalties.extend(std::iter::repeat(cp_penalty).take(changepoints.len()));
        let season_penalty = NOISE_VARIANCE / config.seasonality_prior_scale.powi(2);
        let season_penalties = vec![season_penalty; season_x.ncols()];

        let mut seasonal = DVector::<f64>::zeros(n);
        let mut trend = DVector::<f64>::zeros(n);
        let mut trend_coef = DVector::<f64>::zeros(trend_x.ncols());
        let mut seasonal_coef = DVector::<f64>::zeros(season_x.ncols());
        let mut target = DVector::<f64>::zeros(n);
        let mut weights = DVector::<f64>::from_element(n, 1.0);

        for _ in 0..ALTERNATIONS {
            for i in 0..n {
                match config.mode {
                    SeasonalityMode::Additive => {
                        target[i] = ys[i] - seasonal[i];
                        weights[i] = 1.0;
                    }
                    SeasonalityMode::Multiplicative => {
                        let factor = 1.0 + seasonal[i];
                        if factor.abs() < 1e-9 {
                            target[i] = 0.0;
                            weights[i] = 0.0;
                        } else {
                            target[i] = ys[i] / factor;
                            weights[i] = factor * factor;
                        }
                    }
                }
            }
            trend_coef = solve_ridge(&trend_x, &target, &weights, &trend_penalties)
                .map_err(|reason| ForecastError::model_fit(MODEL, format!("trend: {reason}")))?;
            trend = &trend_x * &trend_coef;

            if season_penalties.is_empty() {
                break;
            }
            for i in 0..n {
                match config.mode {
                    SeasonalityMode::Additive => {
                        target[i] = ys[i] - trend[i];
                        weights[i] = 1.0;
                    }
                    SeasonalityMode::Multiplicative => {
                        if trend[i].abs() < 1e-9 {
                            target[i] = 0.0;
                            weights[i] = 0.0;
                        } else {
                            target[i] = ys[i] / trend[i] - 1.0;
                            weights[i] = trend[i] * trend[i];
                        }
                    }
                }
            }
            seasonal_coef = solve_ridge(&season_x, &target, &weights, &season_penalties)
                .map_err(|reason| ForecastError::model_fit(MODEL, format!("seasonality: {reason}")))?;
            seasonal = &season_x * &seasonal_coef;
        }

        let residual_ss: f64 = (0..n)
            .map(|i| (ys[i] - combine(config.mode, trend[i], seasonal[i])).powi(2))
            .sum();
        let sigma = (residual_ss / n as f64).sqrt();
        if !sigma.is_finite() {
            return Err(ForecastError::model_fit(MODEL, "residuals diverged"));
        }

        debug!(
            observations = n,
            changepoints = changepoints.len(),
            sigma = sigma * y_scale,
            "seasonal model fitted"
        );

        Ok(Self {
            start,
            last,
            span_days,
            y_scale,
            changepoints,
            trend_coef: trend_coef.iter().copied().collect(),
            terms,
            seasonal_coef: seasonal_coef.iter().copied().collect(),
            mode: config.mode,
            sigma,
            n_obs: n,
            z: normal_quantile(0.5 + config.interval_width / 2.0),
        })
    }

    pub fn predict(&self, dates: &[NaiveDate]) -> Vec<SeasonalPrediction> {
        let t: Vec<f64> = dates
            .iter()
            .map(|date| (*date - self.start).num_days() as f64 / self.span_days)
            .collect();
        let trend = trend_design(&t, &self.changepoints)
            * DVector::from_column_slice(&self.trend_coef);
        let seasonal = fourier_design(dates, &self.terms)
            * DVector::from_column_slice(&self.seasonal_coef);

        dates
            .iter()
            .enumerate()
            .map(|(i, &date)| {
                let yhat = combine(self.mode, trend[i], seasonal[i]) * self.y_scale;
                let ahead = (date - self.last).num_days().max(0) as f64;
                let half_width =
                    self.z * self.sigma * self.y_scale * (1.0 + ahead / self.n_obs as f64).sqrt();
                SeasonalPrediction {
                    date,
                    yhat,
                    lower: yhat - half_width,
                    upper: yhat + half_width,
                }
            })
            .collect()
    }

    pub fn last_observed(&self) -> NaiveDate {
        self.last
    }
}

fn combine(mode: SeasonalityMode, trend: f64, seasonal: f64) -> f64 {
    match mode {
        SeasonalityMode::Additive => trend + seasonal,
        SeasonalityMode::Multiplicative => trend * (1.0 + seasonal),
    }
}

/// Evenly spaced over the first `changepoint_range` share of the history,
/// never on the first observation.
fn place_changepoints(t: &[f64], config: &SeasonalConfig) -> Vec<f64> {
    let history = ((t.len() as f64) * config.changepoint_range).floor() as usize;
    if history < 2 {
        return Vec::new();
    }
    let count = config.n_changepoints.min(history - 1);
    let mut changepoints: Vec<f64> = (1..=count)
        .map(|k| {
            let idx = (k as f64 * (history - 1) as f64 / count as f64).round() as usize;
            t[idx.min(history - 1)]
        })
        .collect();
    changepoints.dedup();
    changepoints
}

/// Columns: intercept, slope, then one hinge `max(0, t - c)` per changepoint.
fn trend_design(t: &[f64], changepoints: &[f64]) -> DMatrix<f64> {
    DMatrix::from_fn(t.len(), 2 + changepoints.len(), |i, j| match j {
        0 => 1.0,
        1 => t[i],
        _ => (t[i] - changepoints[j - 2]).max(0.0),
    })
}

/// A cosine and a sine column per harmonic of every term.
fn fourier_design(dates: &[NaiveDate], terms: &[FourierTerm]) -> DMatrix<f64> {
    let harmonics: Vec<(f64, f64)> = terms
        .iter()
        .flat_map(|term| (1..=term.order).map(move |k| (term.period, k as f64)))
        .collect();
    DMatrix::from_fn(dates.len(), 2 * harmonics.len(), |i, j| {
        let days = (dates[i].num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE) as f64;
        let (period, k) = harmonics[j / 2];
        let angle = 2.0 * std::f64::consts::PI * k * days / period;
        if j % 2 == 0 {
            angle.cos()
        } else {
            angle.sin()
        }
    })
}

/// Harmonics allowed for a term: the configured order scaled by the share of
/// one period the history spans, at least one.
fn fourier_order(configured: usize, period: f64, span_days: f64) -> usize {
    let supported = (configured as f64 * span_days / period).floor() as usize;
    configured.min(supported.max(1))
}

/// Solves `(XᵀWX + diag(penalties)) b = XᵀWy` by Cholesky decomposition.
fn solve_ridge(
    design: &DMatrix<f64>,
    target: &DVector<f64>,
    weights: &DVector<f64>,
    penalties: &[f64],
) -> Result<DVector<f64>, String> {
    let weighted = DMatrix::from_fn(design.nrows(), design.ncols(), |i, j| {
        design[(i, j)] * weights[i]
    });
    let mut gram = design.transpose() * &weighted;
    for (i, penalty) in penalties.iter().enumerate() {
        gram[(i, i)] += penalty;
    }
    let rhs = weighted.transpose() * target;

    let solution = gram
        .cholesky()
        .ok_or_else(|| "normal equations are not positive definite".to_string())?
        .solve(&rhs);
    if solution.iter().any(|v| !v.is_finite()) {
        return Err("solution is not finite".to_string());
    }
    Ok(solution)
}

/// Inverse standard normal CDF (Acklam's rational approximation).
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -normal_quantile(1.0 - p)
    }
}
