//! Turns raw stock movements into per-item daily series with calendar and
//! autoregressive features.
//!
//! Lags are row offsets within an item's series. Without
//! `fill_missing_days` a day with no outbound movement has no row, so
//! `lag_7` can reach further back than seven calendar days.

use std::collections::BTreeMap;

use chrono::Duration;
use tracing::debug;

use crate::metrics::{mean, sample_std_dev};
use crate::models::{DailyPoint, Direction, FeatureRow, LagFeatures, TransactionRecord};
use crate::settings::PrepareConfig;

pub fn prepare(
    transactions: &[TransactionRecord],
    config: &PrepareConfig,
) -> BTreeMap<String, Vec<FeatureRow>> {
    aggregate_daily(transactions)
        .into_iter()
        .map(|(item, points)| {
            let points = if config.fill_missing_days {
                fill_calendar(&points)
            } else {
                points
            };
            let rows = build_features(&points);
            debug!(item = %item, rows = rows.len(), "prepared feature rows");
            (item, rows)
        })
        .collect()
}

/// Sums outbound quantities per (item, day). Records without a date or with
/// a zero quantity are dropped.
pub fn aggregate_daily(transactions: &[TransactionRecord]) -> BTreeMap<String, Vec<DailyPoint>> {
    let mut totals: BTreeMap<String, BTreeMap<chrono::NaiveDate, f64>> = BTreeMap::new();
    let mut dropped = 0usize;

    for record in transactions {
        if record.direction != Direction::Outbound {
            continue;
        }
        let Some(date) = record.date else {
            dropped += 1;
            continue;
        };
        if record.quantity == 0 {
            dropped += 1;
            continue;
        }
        *totals
            .entry(record.item_id.clone())
            .or_default()
            .entry(date)
            .or_insert(0.0) += record.quantity as f64;
    }

    if dropped > 0 {
        debug!(dropped, "dropped outbound records without a usable date or quantity");
    }

    totals
        .into_iter()
        .map(|(item, days)| {
            let points = days
                .into_iter()
                .map(|(date, quantity)| DailyPoint { date, quantity })
                .collect();
            (item, points)
        })
        .collect()
}

/// Reindexes an ascending series onto every calendar day between its first
/// and last point, with zero demand on the missing days.
pub fn fill_calendar(points: &[DailyPoint]) -> Vec<DailyPoint> {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return Vec::new();
    };
    let by_date: BTreeMap<_, _> = points.iter().map(|p| (p.date, p.quantity)).collect();
    let mut filled = Vec::new();
    let mut date = first.date;
    while date <= last.date {
        filled.push(DailyPoint {
            date,
            quantity: by_date.get(&date).copied().unwrap_or(0.0),
        });
        date += Duration::days(1);
    }
    filled
}

pub fn build_features(points: &[DailyPoint]) -> Vec<FeatureRow> {
    let quantities: Vec<f64> = points.iter().map(|p| p.quantity).collect();
    points
        .iter()
        .enumerate()
        .map(|(idx, point)| {
            let lags = LagFeatures {
                lag_7: lag(&quantities, idx, 7),
                lag_14: lag(&quantities, idx, 14),
                lag_30: lag(&quantities, idx, 30),
                rolling_mean_7: mean(trailing(&quantities, idx, 7)),
                rolling_mean_30: mean(trailing(&quantities, idx, 30)),
                rolling_std_7: sample_std_dev(trailing(&quantities, idx, 7)),
            };
            FeatureRow::new(point.date, point.quantity, lags)
        })
        .collect()
}

fn lag(values: &[f64], idx: usize, k: usize) -> f64 {
    if idx >= k {
        values[idx - k]
    } else {
        0.0
    }
}

/// Window of up to `w` values ending at (and including) `idx`.
fn trailing(values: &[f64], idx: usize, w: usize) -> &[f64] {
    let start = (idx + 1).saturating_sub(w);
    &values[start..=idx]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(day: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(day)
    }

    fn outbound(item: &str, day: i64, quantity: u32) -> TransactionRecord {
        TransactionRecord {
            item_id: item.to_string(),
            date: Some(date(day)),
            quantity,
            direction: Direction::Outbound,
        }
    }

    #[test]
    fn keeps_only_outbound_and_sums_per_day() {
        let mut inbound = outbound("Glove-X", 0, 50);
        inbound.direction = Direction::Inbound;
        let transactions = vec![
            outbound("Glove-X", 0, 3),
            outbound("Glove-X", 0, 4),
            inbound,
            outbound("Glove-X", 2, 1),
        ];
        let series = aggregate_daily(&transactions);
        let points = &series["Glove-X"];
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].quantity, 7.0);
        assert_eq!(points[1].date, date(2));
    }

    #[test]
    fn drops_undated_and_zero_quantity_records() {
        let mut undated = outbound("Mask-Y", 1, 5);
        undated.date = None;
        // A quantity of "abc" is coerced to 0 upstream and must not survive.
        let coerced = outbound("Mask-Y", 2, 0);
        let series = aggregate_daily(&[undated, coerced, outbound("Mask-Y", 3, 2)]);
        let points = &series["Mask-Y"];
        assert_eq!(points.len(), 1);
        assert!(points.iter().all(|p| p.quantity > 0.0));
    }

    #[test]
    fn lags_do_not_leak_across_items() {
        let mut transactions = Vec::new();
        for day in 0..10 {
            transactions.push(outbound("A", day, 100));
        }
        for day in 0..3 {
            transactions.push(outbound("B", day, 1));
        }
        let prepared = prepare(&transactions, &PrepareConfig::default());
        let b = &prepared["B"];
        assert!(b.iter().all(|row| row.lags.lag_7 == 0.0));
        assert!(b.iter().all(|row| row.lags.rolling_mean_7 == 1.0));
    }

    #[test]
    fn rolling_windows_include_current_row() {
        let points: Vec<DailyPoint> = (0..3)
            .map(|d| DailyPoint {
                date: date(d),
                quantity: (d + 1) as f64,
            })
            .collect();
        let rows = build_features(&points);
        assert_eq!(rows[0].lags.rolling_mean_7, 1.0);
        assert_eq!(rows[0].lags.rolling_std_7, 0.0);
        assert_eq!(rows[2].lags.rolling_mean_7, 2.0);
        assert!((rows[2].lags.rolling_std_7 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn lag_seven_is_a_row_offset_when_days_are_missing() {
        // Every other day has demand, so the row seven back is fourteen
        // calendar days earlier.
        let transactions: Vec<_> = (0..10).map(|i| outbound("Boot", i * 2, (i + 1) as u32)).collect();
        let rows = &prepare(&transactions, &PrepareConfig::default())["Boot"];
        let row = &rows[7];
        assert_eq!(row.date, date(14));
        assert_eq!(row.lags.lag_7, 1.0);
        assert_eq!(rows[6].lags.lag_7, 0.0);
    }

    #[test]
    fn calendar_fill_makes_lag_seven_a_calendar_lag() {
        let transactions: Vec<_> = (0..10).map(|i| outbound("Boot", i * 2, (i + 1) as u32)).collect();
        let config = PrepareConfig {
            fill_missing_days: true,
        };
        let rows = &prepare(&transactions, &config)["Boot"];
        assert_eq!(rows.len(), 19);
        let day_14 = rows.iter().find(|r| r.date == date(14)).unwrap();
        // Seven calendar days back is day 7, which had no movement.
        assert_eq!(day_14.lags.lag_7, 0.0);
        let day_16 = rows.iter().find(|r| r.date == date(16)).unwrap();
        assert_eq!(day_16.lags.lag_7, 0.0);
        let day_8 = rows.iter().find(|r| r.date == date(8)).unwrap();
        // Day 1 is a gap day filled with zero demand.
        assert_eq!(day_8.lags.lag_7, 0.0);
        let day_7 = rows.iter().find(|r| r.date == date(7)).unwrap();
        assert_eq!(day_7.quantity, 0.0);
        assert_eq!(day_7.lags.lag_7, 1.0);
    }

    #[test]
    fn lag_thirty_needs_thirty_prior_rows() {
        let points: Vec<DailyPoint> = (0..31)
            .map(|d| DailyPoint {
                date: date(d),
                quantity: d as f64 + 1.0,
            })
            .collect();
        let rows = build_features(&points);
        assert_eq!(rows[29].lags.lag_30, 0.0);
        assert_eq!(rows[30].lags.lag_30, 1.0);
        assert_eq!(rows[30].lags.lag_14, 17.0);
    }
}
