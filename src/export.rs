//! File exports for purchasing and review.
//!
//! The recommendation CSV carries one column per recommendation field, with
//! fractional quantities rounded to two decimals for spreadsheet use.

use std::io::Write;

use anyhow::Context;
use serde::Serialize;

use crate::models::{PerformanceReport, Recommendation};

#[derive(Serialize)]
struct RecommendationCsvRow<'a> {
    item_id: &'a str,
    current_stock: i64,
    forecast_total_demand: f64,
    avg_daily_demand: f64,
    safety_stock: f64,
    recommended_quantity: u64,
    priority: &'static str,
    coverage_days: f64,
}

pub fn recommendations_csv<W: Write>(writer: W, recommendations: &[Recommendation]) -> anyhow::Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for rec in recommendations {
        csv_writer
            .serialize(RecommendationCsvRow {
                item_id: &rec.item_id,
                current_stock: rec.current_stock,
                forecast_total_demand: round2(rec.forecast_total_demand),
                avg_daily_demand: round2(rec.avg_daily_demand),
                safety_stock: round2(rec.safety_stock),
                recommended_quantity: rec.recommended_quantity,
                priority: rec.priority.label(),
                coverage_days: round2(rec.coverage_days),
            })
            .with_context(|| format!("failed to write recommendation for {}", rec.item_id))?;
    }
    csv_writer.flush().context("failed to flush recommendations")?;
    Ok(())
}

pub fn report_json<W: Write>(writer: W, report: &PerformanceReport) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(writer, report).context("failed to write report JSON")?;
    Ok(())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricSummary, Priority};
    use chrono::Utc;

    #[test]
    fn writes_one_csv_row_per_recommendation() {
        let recs = vec![Recommendation {
            item_id: "Glove-X".to_string(),
            current_stock: 5,
            forecast_total_demand: 20.0,
            avg_daily_demand: 2.0 / 3.0,
            safety_stock: 14.0,
            recommended_quantity: 29,
            priority: Priority::High,
            coverage_days: 999.0,
        }];
        let mut buffer = Vec::new();
        recommendations_csv(&mut buffer, &recs).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("item_id,current_stock,forecast_total_demand,avg_daily_demand,safety_stock,recommended_quantity,priority,coverage_days")
        );
        assert_eq!(lines.next(), Some("Glove-X,5,20.0,0.67,14.0,29,HIGH,999.0"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn report_json_keeps_field_names() {
        let report = PerformanceReport {
            generated_at: Utc::now(),
            items_evaluated: 0,
            failed_items: vec!["Boot".to_string()],
            results: Vec::new(),
            overall: MetricSummary::default(),
            best_item: None,
            worst_item: None,
        };
        let mut buffer = Vec::new();
        report_json(&mut buffer, &report).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(value["failed_items"][0], "Boot");
        assert_eq!(value["overall"]["mean_mae"], 0.0);
        assert!(value["best_item"].is_null());
    }
}
