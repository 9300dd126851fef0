use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Number of engineered features fed to the gradient-boosting model.
pub const FEATURE_COUNT: usize = 13;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "year",
    "month",
    "day",
    "day_of_week",
    "quarter",
    "week_of_year",
    "is_weekend",
    "lag_7",
    "lag_14",
    "lag_30",
    "rolling_mean_7",
    "rolling_mean_30",
    "rolling_std_7",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "INBOUND",
            Direction::Outbound => "OUTBOUND",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "INBOUND" => Some(Direction::Inbound),
            "OUTBOUND" => Some(Direction::Outbound),
            _ => None,
        }
    }
}

/// One stock movement as projected from the spreadsheet.
///
/// `date` is `None` when the source cell could not be parsed; such records
/// are dropped during preparation.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub item_id: String,
    pub date: Option<NaiveDate>,
    pub quantity: u32,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub quantity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalendarFeatures {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    /// Monday = 0 .. Sunday = 6.
    pub day_of_week: u32,
    pub quarter: u32,
    /// ISO 8601 week number.
    pub week_of_year: u32,
    pub is_weekend: bool,
}

impl CalendarFeatures {
    pub fn from_date(date: NaiveDate) -> Self {
        let day_of_week = date.weekday().num_days_from_monday();
        Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
            day_of_week,
            quarter: (date.month() - 1) / 3 + 1,
            week_of_year: date.iso_week().week(),
            is_weekend: matches!(date.weekday(), Weekday::Sat | Weekday::Sun),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LagFeatures {
    pub lag_7: f64,
    pub lag_14: f64,
    pub lag_30: f64,
    pub rolling_mean_7: f64,
    pub rolling_mean_30: f64,
    pub rolling_std_7: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub quantity: f64,
    #[serde(flatten)]
    pub calendar: CalendarFeatures,
    #[serde(flatten)]
    pub lags: LagFeatures,
}

impl FeatureRow {
    pub fn new(date: NaiveDate, quantity: f64, lags: LagFeatures) -> Self {
        Self {
            date,
            quantity,
            calendar: CalendarFeatures::from_date(date),
            lags,
        }
    }

    /// Feature vector in `FEATURE_NAMES` order.
    pub fn features(&self) -> Vec<f64> {
        let c = &self.calendar;
        let l = &self.lags;
        vec![
            c.year as f64,
            c.month as f64,
            c.day as f64,
            c.day_of_week as f64,
            c.quarter as f64,
            c.week_of_year as f64,
            if c.is_weekend { 1.0 } else { 0.0 },
            l.lag_7,
            l.lag_14,
            l.lag_30,
            l.rolling_mean_7,
            l.rolling_mean_30,
            l.rolling_std_7,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub mae: f64,
    pub rmse: f64,
    /// Only reported for the gradient-boosting model.
    pub r2: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRow {
    pub item_id: String,
    pub date: NaiveDate,
    #[serde(rename = "prophet_prediction")]
    pub seasonal_prediction: f64,
    pub gbm_prediction: f64,
    pub ensemble_prediction: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// Reorder urgency. Declaration order is urgency order, so the derived `Ord`
/// sorts `Critical` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn label(&self) -> &'static str {
        match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub item_id: String,
    pub current_stock: i64,
    pub forecast_total_demand: f64,
    pub avg_daily_demand: f64,
    pub safety_stock: f64,
    pub recommended_quantity: u64,
    pub priority: Priority,
    pub coverage_days: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestIteration {
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
    pub mae: f64,
    pub rmse: f64,
    pub mape: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean_mae: f64,
    pub std_mae: f64,
    pub mean_rmse: f64,
    pub std_rmse: f64,
    pub mean_mape: f64,
    pub std_mape: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub item_id: String,
    pub iterations: Vec<BacktestIteration>,
    #[serde(flatten)]
    pub summary: MetricSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Naive,
    MovingAverage,
    ExponentialSmoothing,
    Ensemble,
}

impl Method {
    pub fn label(&self) -> &'static str {
        match self {
            Method::Naive => "Naive",
            Method::MovingAverage => "Moving average (7)",
            Method::ExponentialSmoothing => "Exponential smoothing",
            Method::Ensemble => "Ensemble (GBM + seasonal)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodScore {
    pub method: Method,
    pub mae: f64,
    pub rmse: f64,
    pub mape: f64,
}

/// Methods ranked ascending by MAE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodComparison {
    pub item_id: String,
    pub train_rows: usize,
    pub test_rows: usize,
    pub scores: Vec<MethodScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub generated_at: DateTime<Utc>,
    pub items_evaluated: usize,
    pub failed_items: Vec<String>,
    pub results: Vec<BacktestResult>,
    pub overall: MetricSummary,
    pub best_item: Option<String>,
    pub worst_item: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calendar_features_follow_iso_week_and_weekend() {
        // 2024-01-06 is a Saturday in ISO week 1.
        let date = NaiveDate::from_ymd_opt(2024, 1, 6).unwrap();
        let calendar = CalendarFeatures::from_date(date);
        assert_eq!(calendar.day_of_week, 5);
        assert_eq!(calendar.week_of_year, 1);
        assert_eq!(calendar.quarter, 1);
        assert!(calendar.is_weekend);

        let monday = CalendarFeatures::from_date(NaiveDate::from_ymd_opt(2024, 11, 4).unwrap());
        assert_eq!(monday.day_of_week, 0);
        assert_eq!(monday.quarter, 4);
        assert!(!monday.is_weekend);
    }

    #[test]
    fn feature_vector_matches_feature_names() {
        let row = FeatureRow::new(
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            4.0,
            LagFeatures {
                lag_7: 1.0,
                lag_14: 2.0,
                lag_30: 3.0,
                rolling_mean_7: 4.0,
                rolling_mean_30: 5.0,
                rolling_std_7: 6.0,
            },
        );
        let features = row.features();
        assert_eq!(features.len(), FEATURE_NAMES.len());
        assert_eq!(features[0], 2024.0);
        assert_eq!(features[7], 1.0);
        assert_eq!(features[12], 6.0);
    }

    #[test]
    fn priority_orders_by_urgency() {
        let mut priorities = vec![Priority::Low, Priority::Critical, Priority::Medium, Priority::High];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![Priority::Critical, Priority::High, Priority::Medium, Priority::Low]
        );
    }
}
