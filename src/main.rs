use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod analyzer;
mod artifact;
mod baselines;
mod db;
mod error;
mod export;
mod features;
mod forecast;
mod gbm;
mod ingest;
mod metrics;
mod models;
mod recommend;
mod report;
mod seasonal;
mod settings;
mod trainer;

use analyzer::PerformanceAnalyzer;
use artifact::ModelArtifact;
use forecast::Forecaster;
use models::{FeatureRow, ForecastRow};
use recommend::RecommendationEngine;
use settings::AppConfig;
use trainer::ModelTrainer;

#[derive(Parser)]
#[command(name = "ppe-forecast")]
#[command(about = "Demand forecasting and purchase recommendations for PPE stock", long_about = None)]
struct Cli {
    /// Configuration file (TOML); missing files fall back to defaults
    #[arg(short, long, default_value = "ppe_forecast.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a realistic seed history
    Seed,
    /// Import stock movements exported from the spreadsheet
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Import current stock levels (item_name,quantity)
    Stock {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Forecast demand for one item
    Forecast {
        #[arg(long)]
        item: String,
        #[arg(long)]
        horizon: Option<usize>,
        /// Use the stored model bundle instead of retraining
        #[arg(long)]
        saved: bool,
    },
    /// Recommend purchase quantities for every item
    Recommend {
        #[arg(long)]
        horizon: Option<usize>,
        #[arg(long)]
        safety_days: Option<u32>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Walk-forward backtest for one item
    Backtest {
        #[arg(long)]
        item: String,
        #[arg(long)]
        train_window: Option<usize>,
        #[arg(long)]
        test_window: Option<usize>,
    },
    /// Compare the ensemble against baseline methods for one item
    Compare {
        #[arg(long)]
        item: String,
    },
    /// Backtest every item and write a performance report
    Report {
        #[arg(long, default_value = "report.json")]
        out: PathBuf,
        #[arg(long)]
        markdown: Option<PathBuf>,
    },
    /// Train and store model bundles
    Train {
        #[arg(long)]
        item: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;
    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    let forecaster = Forecaster::new(ModelTrainer::new(
        config.gbm.clone(),
        config.seasonal.clone(),
    ));

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let summary = db::import_csv(&pool, &csv).await?;
            println!(
                "Inserted {} movements from {} ({} duplicates, {} skipped).",
                summary.inserted,
                csv.display(),
                summary.duplicates,
                summary.skipped
            );
        }
        Commands::Stock { csv } => {
            let updated = db::import_stock_csv(&pool, &csv).await?;
            println!("Updated stock for {updated} items.");
        }
        Commands::Forecast {
            item,
            horizon,
            saved,
        } => {
            let series_by_item = load_series(&pool, &config).await?;
            let Some(series) = series_by_item.get(&item) else {
                println!("No outbound history for {item}.");
                return Ok(());
            };
            let horizon = horizon.unwrap_or(config.forecast.horizon_days);
            let rows = if saved {
                match db::load_artifact(&pool, &item).await? {
                    Some(bundle) => {
                        info!(item = %item, trained_at = %bundle.trained_at, "using stored models");
                        if let Some(latest) = series.last() {
                            if latest.date > bundle.seasonal.last_observed() {
                                warn!(
                                    item = %item,
                                    trained_through = %bundle.seasonal.last_observed(),
                                    latest = %latest.date,
                                    "stored models predate the newest movements"
                                );
                            }
                        }
                        forecast::project(&bundle.gbm, &bundle.seasonal, series, &item, horizon)
                    }
                    None => {
                        println!("No stored models for {item}; run `train` first.");
                        return Ok(());
                    }
                }
            } else {
                forecaster.predict(series, &item, horizon)
            };

            match rows {
                Some(rows) => print_forecast(&rows),
                None => println!(
                    "Cannot forecast {item} yet: {} days of history, at least {} needed.",
                    series.len(),
                    config.gbm.min_history.max(config.seasonal.min_history)
                ),
            }
        }
        Commands::Recommend {
            horizon,
            safety_days,
            out,
        } => {
            let series_by_item = load_series(&pool, &config).await?;
            let stock = db::fetch_stock(&pool).await?;
            let horizon = horizon.unwrap_or(config.forecast.horizon_days);
            let safety_days = safety_days.unwrap_or(config.recommend.safety_days);

            let forecasts = forecast_all(&forecaster, &series_by_item, horizon);
            let engine = RecommendationEngine::new(&config.recommend);
            let recommendations = engine.recommend(&forecasts, &stock, safety_days);

            if recommendations.is_empty() {
                println!("No item has enough history to recommend purchases.");
                return Ok(());
            }

            println!("Purchase recommendations ({horizon}-day horizon, {safety_days} safety days):");
            for rec in recommendations.iter() {
                println!(
                    "- [{}] {}: buy {} (stock {}, demand {:.1}, cover {:.1} days)",
                    rec.priority,
                    rec.item_id,
                    rec.recommended_quantity,
                    rec.current_stock,
                    rec.forecast_total_demand,
                    rec.coverage_days
                );
            }

            if let Some(out) = out {
                let file = std::fs::File::create(&out)
                    .with_context(|| format!("failed to create {}", out.display()))?;
                export::recommendations_csv(file, &recommendations)?;
                println!("Recommendations written to {}.", out.display());
            }
        }
        Commands::Backtest {
            item,
            train_window,
            test_window,
        } => {
            let series_by_item = load_series(&pool, &config).await?;
            let analyzer = PerformanceAnalyzer::new(forecaster, config.backtest.clone());
            let train_window = train_window.unwrap_or(config.backtest.train_window_days);
            let test_window = test_window.unwrap_or(config.backtest.test_window_days);
            let result = series_by_item
                .get(&item)
                .and_then(|series| analyzer.backtest(series, &item, train_window, test_window));

            match result {
                Some(result) => {
                    println!("Backtest for {} ({} windows):", item, result.iterations.len());
                    for it in result.iterations.iter() {
                        println!(
                            "- test {} .. {}: MAE {:.2}, RMSE {:.2}, MAPE {:.1}%",
                            it.test_start, it.test_end, it.mae, it.rmse, it.mape
                        );
                    }
                    println!(
                        "Mean MAE {:.2} (sd {:.2}), RMSE {:.2}, MAPE {:.1}%",
                        result.summary.mean_mae,
                        result.summary.std_mae,
                        result.summary.mean_rmse,
                        result.summary.mean_mape
                    );
                }
                None => println!(
                    "Cannot backtest {item}: needs {} days of history.",
                    train_window + test_window
                ),
            }
        }
        Commands::Compare { item } => {
            let series_by_item = load_series(&pool, &config).await?;
            let analyzer = PerformanceAnalyzer::new(forecaster, config.backtest.clone());
            match series_by_item
                .get(&item)
                .and_then(|series| analyzer.compare(series, &item))
            {
                Some(comparison) => print!("{}", report::render_comparison(&comparison)),
                None => println!(
                    "Cannot compare methods for {item}: needs {} days of history.",
                    config.backtest.compare_min_history
                ),
            }
        }
        Commands::Report { out, markdown } => {
            let series_by_item = load_series(&pool, &config).await?;
            let stock = db::fetch_stock(&pool).await?;
            let item_ids: Vec<String> = series_by_item.keys().cloned().collect();
            let analyzer = PerformanceAnalyzer::new(forecaster.clone(), config.backtest.clone());

            let performance = analyzer.generate_report(&series_by_item, &item_ids, |progress| {
                info!(
                    item = progress.item_id,
                    done = progress.completed,
                    total = progress.total,
                    ok = progress.succeeded,
                    "backtest finished"
                );
            });

            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            export::report_json(file, &performance)?;
            println!("Report written to {}.", out.display());

            if let Some(markdown) = markdown {
                let forecasts = forecast_all(&forecaster, &series_by_item, config.forecast.horizon_days);
                let recommendations = RecommendationEngine::new(&config.recommend).recommend(
                    &forecasts,
                    &stock,
                    config.recommend.safety_days,
                );
                let text = report::render_markdown(
                    &performance,
                    &recommendations,
                    config.recommend.coverage_sentinel,
                );
                std::fs::write(&markdown, text)?;
                println!("Summary written to {}.", markdown.display());
            }
        }
        Commands::Train { item } => {
            let series_by_item = load_series(&pool, &config).await?;
            let mut trained = 0usize;
            for (item_id, series) in series_by_item.iter() {
                if item.as_ref().is_some_and(|wanted| wanted != item_id) {
                    continue;
                }
                let Some(pair) = forecaster.train(series, item_id) else {
                    continue;
                };
                let bundle = ModelArtifact::from_trained(pair, Utc::now());
                db::save_artifact(&pool, &bundle).await?;
                println!(
                    "- {}: {} trees (depth {}), GBM MAE {:.2}, seasonal MAE {:.2} (in-sample)",
                    item_id,
                    bundle.gbm.n_trees(),
                    bundle.gbm.max_tree_depth(),
                    bundle.gbm_metrics.mae,
                    bundle.seasonal_metrics.mae
                );
                trained += 1;
            }
            println!("Stored models for {trained} items.");
        }
    }

    Ok(())
}

async fn load_series(
    pool: &PgPool,
    config: &AppConfig,
) -> anyhow::Result<BTreeMap<String, Vec<FeatureRow>>> {
    let transactions = db::fetch_transactions(pool).await?;
    let series = features::prepare(&transactions, &config.prepare);
    info!(items = series.len(), "prepared demand series");
    Ok(series)
}

fn forecast_all(
    forecaster: &Forecaster,
    series_by_item: &BTreeMap<String, Vec<FeatureRow>>,
    horizon: usize,
) -> Vec<ForecastRow> {
    let mut rows = Vec::new();
    for (item_id, series) in series_by_item.iter() {
        match forecaster.predict(series, item_id, horizon) {
            Some(forecast) => rows.extend(forecast),
            None => warn!(item = %item_id, "skipped: cannot forecast this item yet"),
        }
    }
    rows
}

fn print_forecast(rows: &[ForecastRow]) {
    println!(
        "{:<12} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "date", "seasonal", "gbm", "ensemble", "lower", "upper"
    );
    for row in rows {
        println!(
            "{:<12} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>10.2}",
            row.date.to_string(),
            row.seasonal_prediction,
            row.gbm_prediction,
            row.ensemble_prediction,
            row.lower_bound,
            row.upper_bound
        );
    }
}
