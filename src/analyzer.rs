//! Walk-forward backtesting, baseline comparison and the all-items report.
//!
//! Window sizes count rows of an item's series, which equal days only when
//! the series has no gaps. Forecasts are scored against the actual rows of
//! the test window by position.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{info, warn};

use crate::baselines;
use crate::error::ForecastError;
use crate::forecast::Forecaster;
use crate::metrics;
use crate::models::{
    BacktestIteration, BacktestResult, FeatureRow, Method, MethodComparison, MethodScore,
    MetricSummary, PerformanceReport,
};
use crate::settings::BacktestConfig;

/// Emitted after each item of a full report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportProgress<'a> {
    pub completed: usize,
    pub total: usize,
    pub item_id: &'a str,
    pub succeeded: bool,
}

#[derive(Debug, Clone)]
pub struct PerformanceAnalyzer {
    forecaster: Forecaster,
    config: BacktestConfig,
}

impl PerformanceAnalyzer {
    pub fn new(forecaster: Forecaster, config: BacktestConfig) -> Self {
        Self { forecaster, config }
    }

    /// Number of walk-forward iterations `history` rows allow.
    pub fn iteration_count(&self, history: usize, train_window: usize, test_window: usize) -> usize {
        if test_window == 0 || history < train_window + test_window {
            return 0;
        }
        ((history - train_window - test_window) / test_window + 1).min(self.config.max_iterations)
    }

    pub fn backtest(
        &self,
        series: &[FeatureRow],
        item_id: &str,
        train_window: usize,
        test_window: usize,
    ) -> Option<BacktestResult> {
        let n = series.len();
        let iterations = self.iteration_count(n, train_window, test_window);
        if iterations == 0 {
            warn!(
                item = item_id,
                rows = n,
                required = train_window + test_window,
                "not enough history to backtest"
            );
            return None;
        }

        let mut results = Vec::with_capacity(iterations);
        for step in (0..iterations).rev() {
            let test_end = n - step * test_window;
            let test_start = test_end - test_window;
            let train_start = test_start - train_window;
            let train = &series[train_start..test_start];
            let test = &series[test_start..test_end];

            let Some(forecast) = self.forecaster.predict(train, item_id, test_window) else {
                warn!(item = item_id, step, "backtest iteration skipped");
                continue;
            };
            let actual: Vec<f64> = test.iter().map(|row| row.quantity).collect();
            let predicted: Vec<f64> = forecast.iter().map(|row| row.ensemble_prediction).collect();

            results.push(BacktestIteration {
                train_start: train[0].date,
                train_end: train[train.len() - 1].date,
                test_start: test[0].date,
                test_end: test[test.len() - 1].date,
                mae: metrics::mae(&actual, &predicted),
                rmse: metrics::rmse(&actual, &predicted),
                mape: metrics::mape(&actual, &predicted, self.config.mape_epsilon),
            });
        }

        if results.is_empty() {
            warn!(item = item_id, "no backtest iteration produced a model");
            return None;
        }

        let summary = summarize(
            results.iter().map(|it| it.mae),
            results.iter().map(|it| it.rmse),
            results.iter().map(|it| it.mape),
        );
        Some(BacktestResult {
            item_id: item_id.to_string(),
            iterations: results,
            summary,
        })
    }

    pub fn compare(&self, series: &[FeatureRow], item_id: &str) -> Option<MethodComparison> {
        let n = series.len();
        let required = self.config.compare_min_history.max(2);
        if n < required {
            warn!(
                item = item_id,
                rows = n,
                required,
                "not enough history to compare methods"
            );
            return None;
        }

        let test_rows = ((n as f64 * self.config.compare_test_fraction).ceil() as usize).clamp(1, n - 1);
        let (train, test) = series.split_at(n - test_rows);
        let history: Vec<f64> = train.iter().map(|row| row.quantity).collect();
        let actual: Vec<f64> = test.iter().map(|row| row.quantity).collect();
        let horizon = actual.len();

        let ensemble: Result<Vec<f64>, ForecastError> = self
            .forecaster
            .predict(train, item_id, horizon)
            .map(|rows| rows.iter().map(|row| row.ensemble_prediction).collect())
            .ok_or_else(|| ForecastError::model_fit("ensemble", "models could not be trained"));
        let candidates = vec![
            (Method::Naive, Ok(baselines::naive(&history, horizon))),
            (
                Method::MovingAverage,
                Ok(baselines::moving_average(
                    &history,
                    self.config.moving_average_window,
                    horizon,
                )),
            ),
            (
                Method::ExponentialSmoothing,
                baselines::exponential_smoothing(&history, horizon),
            ),
            (Method::Ensemble, ensemble),
        ];
        let scores = rank_methods(item_id, &actual, candidates, self.config.mape_epsilon);

        Some(MethodComparison {
            item_id: item_id.to_string(),
            train_rows: train.len(),
            test_rows,
            scores,
        })
    }

    /// Backtests every item in `item_ids` order with the configured windows.
    /// Items that cannot be backtested are listed in `failed_items`.
    pub fn generate_report<F>(
        &self,
        series_by_item: &BTreeMap<String, Vec<FeatureRow>>,
        item_ids: &[String],
        mut progress: F,
    ) -> PerformanceReport
    where
        F: FnMut(ReportProgress<'_>),
    {
        let mut results = Vec::new();
        let mut failed_items = Vec::new();

        for (idx, item_id) in item_ids.iter().enumerate() {
            let outcome = series_by_item.get(item_id).and_then(|series| {
                self.backtest(
                    series,
                    item_id,
                    self.config.train_window_days,
                    self.config.test_window_days,
                )
            });
            let succeeded = outcome.is_some();
            match outcome {
                Some(result) => results.push(result),
                None => failed_items.push(item_id.clone()),
            }
            progress(ReportProgress {
                completed: idx + 1,
                total: item_ids.len(),
                item_id: item_id.as_str(),
                succeeded,
            });
        }

        let overall = overall_summary(&results);
        let best_item = extreme_by_mae(&results, |candidate, best| candidate < best);
        let worst_item = extreme_by_mae(&results, |candidate, best| candidate > best);

        info!(
            evaluated = results.len(),
            failed = failed_items.len(),
            "performance report complete"
        );

        PerformanceReport {
            generated_at: Utc::now(),
            items_evaluated: results.len(),
            failed_items,
            results,
            overall,
            best_item,
            worst_item,
        }
    }
}

/// Scores every method that produced a forecast, best MAE first. Methods
/// whose forecast failed are left out.
fn rank_methods(
    item_id: &str,
    actual: &[f64],
    candidates: Vec<(Method, Result<Vec<f64>, ForecastError>)>,
    mape_epsilon: f64,
) -> Vec<MethodScore> {
    let mut scores: Vec<MethodScore> = candidates
        .into_iter()
        .filter_map(|(method, predicted)| match predicted {
            Ok(predicted) => Some(MethodScore {
                method,
                mae: metrics::mae(actual, &predicted),
                rmse: metrics::rmse(actual, &predicted),
                mape: metrics::mape(actual, &predicted, mape_epsilon),
            }),
            Err(err) => {
                warn!(item = item_id, method = method.label(), error = %err, "method omitted from comparison");
                None
            }
        })
        .collect();
    scores.sort_by(|a, b| a.mae.total_cmp(&b.mae));
    scores
}

/// Mean and spread of the per-item mean metrics.
fn overall_summary(results: &[BacktestResult]) -> MetricSummary {
    summarize(
        results.iter().map(|r| r.summary.mean_mae),
        results.iter().map(|r| r.summary.mean_rmse),
        results.iter().map(|r| r.summary.mean_mape),
    )
}

fn summarize(
    mae: impl Iterator<Item = f64>,
    rmse: impl Iterator<Item = f64>,
    mape: impl Iterator<Item = f64>,
) -> MetricSummary {
    let mae: Vec<f64> = mae.collect();
    let rmse: Vec<f64> = rmse.collect();
    let mape: Vec<f64> = mape.collect();
    MetricSummary {
        mean_mae: metrics::mean(&mae),
        std_mae: metrics::std_dev(&mae),
        mean_rmse: metrics::mean(&rmse),
        std_rmse: metrics::std_dev(&rmse),
        mean_mape: metrics::mean(&mape),
        std_mape: metrics::std_dev(&mape),
    }
}

/// First item (in result order) whose mean MAE beats all earlier ones.
fn extreme_by_mae(results: &[BacktestResult], beats: impl Fn(f64, f64) -> bool) -> Option<String> {
    let mut best: Option<&BacktestResult> = None;
    for result in results {
        best = match best {
            Some(current) if !beats(result.summary.mean_mae, current.summary.mean_mae) => Some(current),
            _ => Some(result),
        };
    }
    best.map(|r| r.item_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::build_features;
    use crate::models::DailyPoint;
    use crate::settings::AppConfig;
    use crate::trainer::ModelTrainer;
    use chrono::{Duration, NaiveDate};

    fn analyzer() -> PerformanceAnalyzer {
        let mut config = AppConfig::default();
        // Smaller ensembles keep the walk-forward tests quick.
        config.gbm.n_estimators = 20;
        config.gbm.max_depth = 3;
        let forecaster = Forecaster::new(ModelTrainer::new(config.gbm, config.seasonal));
        PerformanceAnalyzer::new(forecaster, config.backtest)
    }

    fn daily_series(n: usize) -> Vec<FeatureRow> {
        scaled_series(n, 1.0)
    }

    fn scaled_series(n: usize, scale: f64) -> Vec<FeatureRow> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let points: Vec<DailyPoint> = (0..n)
            .map(|i| DailyPoint {
                date: start + Duration::days(i as i64),
                quantity: scale * (6.0 + (i % 7) as f64 + ((i * 3) % 4) as f64),
            })
            .collect();
        build_features(&points)
    }

    fn result_with(item: &str, mae: f64, rmse: f64, mape: f64) -> BacktestResult {
        BacktestResult {
            item_id: item.to_string(),
            iterations: Vec::new(),
            summary: MetricSummary {
                mean_mae: mae,
                mean_rmse: rmse,
                mean_mape: mape,
                ..MetricSummary::default()
            },
        }
    }

    #[test]
    fn iteration_count_is_capped() {
        let analyzer = analyzer();
        assert_eq!(analyzer.iteration_count(210, 180, 30), 1);
        assert_eq!(analyzer.iteration_count(239, 180, 30), 1);
        assert_eq!(analyzer.iteration_count(240, 180, 30), 2);
        assert_eq!(analyzer.iteration_count(500, 180, 30), 10);
        assert_eq!(analyzer.iteration_count(209, 180, 30), 0);
    }

    #[test]
    fn backtest_on_exact_history_runs_once() {
        let series = daily_series(210);
        let result = analyzer().backtest(&series, "Glove-X", 180, 30).unwrap();
        assert_eq!(result.iterations.len(), 1);
        let iteration = &result.iterations[0];
        assert_eq!(iteration.train_start, series[0].date);
        assert_eq!(iteration.test_end, series[209].date);
        assert_eq!(result.summary.std_mae, 0.0);
        assert_eq!(result.summary.mean_mae, iteration.mae);
    }

    #[test]
    fn backtest_on_long_history_runs_ten_chronological_windows() {
        let series = daily_series(500);
        let result = analyzer().backtest(&series, "Glove-X", 180, 30).unwrap();
        assert_eq!(result.iterations.len(), 10);
        assert!(result
            .iterations
            .windows(2)
            .all(|pair| pair[0].test_start < pair[1].test_start));
        assert_eq!(result.iterations[9].test_end, series[499].date);
    }

    #[test]
    fn backtest_without_enough_history_is_none() {
        assert!(analyzer().backtest(&daily_series(100), "Boot", 180, 30).is_none());
    }

    #[test]
    fn compare_requires_ninety_rows() {
        assert!(analyzer().compare(&daily_series(89), "Boot").is_none());
    }

    #[test]
    fn compare_ranks_methods_by_mae() {
        let comparison = analyzer().compare(&daily_series(120), "Boot").unwrap();
        assert_eq!(comparison.test_rows, 24);
        assert_eq!(comparison.train_rows, 96);
        assert!(comparison.scores.len() >= 3);
        assert!(comparison
            .scores
            .windows(2)
            .all(|pair| pair[0].mae <= pair[1].mae));
        assert!(comparison.scores.iter().any(|s| s.method == Method::Ensemble));
    }

    #[test]
    fn compare_never_splits_a_single_row() {
        let mut config = AppConfig::default();
        config.backtest.compare_min_history = 1;
        let forecaster = Forecaster::new(ModelTrainer::new(config.gbm, config.seasonal));
        let analyzer = PerformanceAnalyzer::new(forecaster, config.backtest);
        assert!(analyzer.compare(&daily_series(1), "Boot").is_none());
        assert!(analyzer.compare(&[], "Boot").is_none());
    }

    #[test]
    fn failed_method_is_left_out_of_the_ranking() {
        let actual = vec![10.0, 10.0, 10.0];
        let candidates = vec![
            (Method::Naive, Ok(vec![12.0, 12.0, 12.0])),
            (
                Method::ExponentialSmoothing,
                Err(ForecastError::model_fit("ets", "did not converge")),
            ),
            (Method::MovingAverage, Ok(vec![11.0, 11.0, 11.0])),
        ];
        let scores = rank_methods("Boot", &actual, candidates, 1e-10);
        let methods: Vec<Method> = scores.iter().map(|s| s.method).collect();
        assert_eq!(methods, vec![Method::MovingAverage, Method::Naive]);
        assert!((scores[0].mae - 1.0).abs() < 1e-12);
        assert!((scores[1].mae - 2.0).abs() < 1e-12);
        assert!((scores[1].mape - 20.0).abs() < 1e-9);
    }

    #[test]
    fn overall_summary_spans_items() {
        let results = vec![
            result_with("A", 1.0, 2.0, 10.0),
            result_with("B", 3.0, 6.0, 30.0),
        ];
        let overall = overall_summary(&results);
        assert!((overall.mean_mae - 2.0).abs() < 1e-12);
        assert!((overall.std_mae - 1.0).abs() < 1e-12);
        assert!((overall.mean_rmse - 4.0).abs() < 1e-12);
        assert!((overall.std_rmse - 2.0).abs() < 1e-12);
        assert!((overall.mean_mape - 20.0).abs() < 1e-12);
        assert!((overall.std_mape - 10.0).abs() < 1e-12);
    }

    #[test]
    fn report_overall_aggregates_every_successful_item() {
        let mut series_by_item = BTreeMap::new();
        series_by_item.insert("Boot".to_string(), daily_series(210));
        series_by_item.insert("Glove-X".to_string(), scaled_series(210, 3.0));
        let items: Vec<String> = series_by_item.keys().cloned().collect();

        let report = analyzer().generate_report(&series_by_item, &items, |_| {});

        assert_eq!(report.items_evaluated, 2);
        let maes: Vec<f64> = report.results.iter().map(|r| r.summary.mean_mae).collect();
        let mean = (maes[0] + maes[1]) / 2.0;
        let spread = (maes[0] - maes[1]).abs() / 2.0;
        assert!((report.overall.mean_mae - mean).abs() < 1e-9);
        assert!((report.overall.std_mae - spread).abs() < 1e-9);
    }

    #[test]
    fn report_continues_past_failures_and_reports_progress() {
        let mut series_by_item = BTreeMap::new();
        series_by_item.insert("Boot".to_string(), daily_series(210));
        series_by_item.insert("Mask-Y".to_string(), daily_series(50));
        let items = vec![
            "Mask-Y".to_string(),
            "Boot".to_string(),
            "Ghost".to_string(),
        ];

        let mut seen = Vec::new();
        let report = analyzer().generate_report(&series_by_item, &items, |progress| {
            seen.push((progress.completed, progress.item_id.to_string(), progress.succeeded));
        });

        assert_eq!(
            seen,
            vec![
                (1, "Mask-Y".to_string(), false),
                (2, "Boot".to_string(), true),
                (3, "Ghost".to_string(), false),
            ]
        );
        assert_eq!(report.items_evaluated, 1);
        assert_eq!(report.failed_items, vec!["Mask-Y".to_string(), "Ghost".to_string()]);
        assert_eq!(report.best_item.as_deref(), Some("Boot"));
        assert_eq!(report.worst_item.as_deref(), Some("Boot"));
    }

    #[test]
    fn best_and_worst_ties_resolve_to_first_item() {
        let make = |item: &str, mae: f64| result_with(item, mae, 0.0, 0.0);
        let results = vec![make("A", 2.0), make("B", 1.0), make("C", 1.0), make("D", 3.0), make("E", 3.0)];
        assert_eq!(extreme_by_mae(&results, |c, b| c < b).as_deref(), Some("B"));
        assert_eq!(extreme_by_mae(&results, |c, b| c > b).as_deref(), Some("D"));
    }
}
