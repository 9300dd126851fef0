use std::fmt::Write;

use crate::models::{MethodComparison, PerformanceReport, Recommendation};

/// `coverage_sentinel` marks items with no forecast demand.
pub fn render_markdown(
    report: &PerformanceReport,
    recommendations: &[Recommendation],
    coverage_sentinel: f64,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# PPE Demand Forecast Report");
    let _ = writeln!(
        output,
        "Generated {} across {} items ({} could not be evaluated)",
        report.generated_at.format("%Y-%m-%d %H:%M UTC"),
        report.items_evaluated + report.failed_items.len(),
        report.failed_items.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overall Accuracy");

    if report.results.is_empty() {
        let _ = writeln!(output, "No item had enough history to backtest.");
    } else {
        let overall = &report.overall;
        let _ = writeln!(
            output,
            "- MAE {:.2} (sd {:.2})",
            overall.mean_mae, overall.std_mae
        );
        let _ = writeln!(
            output,
            "- RMSE {:.2} (sd {:.2})",
            overall.mean_rmse, overall.std_rmse
        );
        let _ = writeln!(
            output,
            "- MAPE {:.1}% (sd {:.1})",
            overall.mean_mape, overall.std_mape
        );
        if let Some(best) = &report.best_item {
            let _ = writeln!(output, "- Most predictable: {best}");
        }
        if let Some(worst) = &report.worst_item {
            let _ = writeln!(output, "- Least predictable: {worst}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Per-Item Backtests");

    if report.results.is_empty() {
        let _ = writeln!(output, "No backtests recorded.");
    } else {
        for result in report.results.iter() {
            let _ = writeln!(
                output,
                "- {}: MAE {:.2}, RMSE {:.2}, MAPE {:.1}% over {} windows",
                result.item_id,
                result.summary.mean_mae,
                result.summary.mean_rmse,
                result.summary.mean_mape,
                result.iterations.len()
            );
        }
    }

    if !report.failed_items.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Not Enough History");
        for item in report.failed_items.iter() {
            let _ = writeln!(output, "- {item}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Purchase Recommendations");

    if recommendations.is_empty() {
        let _ = writeln!(output, "No recommendations for this run.");
    } else {
        for rec in recommendations.iter().take(10) {
            let _ = writeln!(
                output,
                "- [{}] {}: buy {} (stock {}, {} days of cover)",
                rec.priority,
                rec.item_id,
                rec.recommended_quantity,
                rec.current_stock,
                format_coverage(rec.coverage_days, coverage_sentinel)
            );
        }
    }

    output
}

pub fn render_comparison(comparison: &MethodComparison) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "Method comparison for {} ({} train / {} test rows)",
        comparison.item_id, comparison.train_rows, comparison.test_rows
    );
    for (rank, score) in comparison.scores.iter().enumerate() {
        let _ = writeln!(
            output,
            "{}. {:<28} MAE {:>8.2}  RMSE {:>8.2}  MAPE {:>7.1}%",
            rank + 1,
            score.method.label(),
            score.mae,
            score.rmse,
            score.mape
        );
    }
    output
}

fn format_coverage(days: f64, sentinel: f64) -> String {
    if days >= sentinel {
        "unlimited".to_string()
    } else {
        format!("{days:.1}")
    }
}
