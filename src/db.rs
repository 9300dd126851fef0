use std::collections::HashMap;

use anyhow::Context;
use chrono::{Duration, NaiveDate};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::artifact::{artifact_key, ModelArtifact};
use crate::ingest::{self, SheetRow};
use crate::models::{Direction, TransactionRecord};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let items: [(&str, f64, i64); 3] = [
        ("Luva Nitrílica", 14.0, 120),
        ("Máscara PFF2", 9.0, 15),
        ("Óculos de Proteção", 3.0, 0),
    ];
    let start = NaiveDate::from_ymd_opt(2025, 1, 1).context("invalid date")?;

    for (item, base, stock) in items {
        for day in 0..240i64 {
            let quantity = seed_quantity(base, day);
            if quantity <= 0 {
                continue;
            }
            insert_transaction(
                pool,
                &format!("seed-{}-{day}", artifact_key(item)),
                item,
                quantity,
                Direction::Outbound,
                Some(start + Duration::days(day)),
                0.0,
                "Almoxarifado",
            )
            .await?;
        }

        insert_transaction(
            pool,
            &format!("seed-{}-restock", artifact_key(item)),
            item,
            (base * 200.0) as i64,
            Direction::Inbound,
            Some(start),
            0.0,
            "Compras",
        )
        .await?;
        upsert_stock(pool, item, stock).await?;
    }

    Ok(())
}

/// Weekday demand with a slow upward drift; weekends are quiet.
fn seed_quantity(base: f64, day: i64) -> i64 {
    if day % 7 >= 5 {
        (base * 0.3).round() as i64
    } else {
        (base + (day as f64 / 60.0) + ((day * 5) % 4) as f64).round() as i64
    }
}

#[allow(clippy::too_many_arguments)]
async fn insert_transaction(
    pool: &PgPool,
    source_key: &str,
    item_name: &str,
    quantity: i64,
    direction: Direction,
    occurred_on: Option<NaiveDate>,
    unit_value: f64,
    requester: &str,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO ppe_forecast.transactions
        (id, source_key, item_name, quantity, direction, occurred_on, unit_value, requester)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(source_key)
    .bind(item_name)
    .bind(quantity)
    .bind(direction.as_str())
    .bind(occurred_on)
    .bind(unit_value)
    .bind(requester)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

async fn upsert_stock(pool: &PgPool, item_name: &str, quantity: i64) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ppe_forecast.stock_levels (item_name, quantity, updated_at)
        VALUES ($1, $2, now())
        ON CONFLICT (item_name) DO UPDATE
        SET quantity = EXCLUDED.quantity, updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(item_name)
    .bind(quantity)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_transactions(pool: &PgPool) -> anyhow::Result<Vec<TransactionRecord>> {
    let rows = sqlx::query(
        "SELECT item_name, quantity, direction, occurred_on \
         FROM ppe_forecast.transactions \
         ORDER BY occurred_on NULLS LAST, imported_at",
    )
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let direction: String = row.try_get("direction")?;
        let Some(direction) = Direction::from_db(&direction) else {
            warn!(direction = %direction, "skipping transaction with unknown direction");
            continue;
        };
        let quantity: i64 = row.try_get("quantity")?;
        records.push(TransactionRecord {
            item_id: row.try_get("item_name")?,
            date: row.try_get("occurred_on")?,
            quantity: u32::try_from(quantity).unwrap_or(0),
            direction,
        });
    }

    debug!(records = records.len(), "loaded transactions");
    Ok(records)
}

pub async fn fetch_stock(pool: &PgPool) -> anyhow::Result<HashMap<String, i64>> {
    let rows = sqlx::query("SELECT item_name, quantity FROM ppe_forecast.stock_levels")
        .fetch_all(pool)
        .await?;

    let mut stock = HashMap::with_capacity(rows.len());
    for row in rows {
        stock.insert(row.try_get("item_name")?, row.try_get("quantity")?);
    }
    Ok(stock)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<ImportSummary> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut summary = ImportSummary::default();

    for (line, result) in reader.deserialize::<SheetRow>().enumerate() {
        let row = result.with_context(|| format!("malformed row {}", line + 2))?;
        let Some(projected) = ingest::project(&row) else {
            warn!(row = line + 2, "skipping row without item name or known direction");
            summary.skipped += 1;
            continue;
        };

        let source_key = if projected.source_key.is_empty() {
            format!("import-{}", Uuid::new_v4())
        } else {
            projected.source_key.clone()
        };

        let result = sqlx::query(
            r#"
            INSERT INTO ppe_forecast.transactions
            (id, source_key, item_name, quantity, direction, occurred_on,
             unit_value, requester, ca_code, image_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(source_key)
        .bind(&projected.record.item_id)
        .bind(i64::from(projected.record.quantity))
        .bind(projected.record.direction.as_str())
        .bind(projected.record.date)
        .bind(projected.unit_value)
        .bind(&projected.requester)
        .bind(&projected.ca_code)
        .bind(&projected.image_url)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            summary.inserted += 1;
        } else {
            summary.duplicates += 1;
        }
    }

    Ok(summary)
}

pub async fn import_stock_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct StockRow {
        #[serde(alias = "EPI_Name", alias = "epi_name")]
        item_name: String,
        quantity: i64,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut updated = 0usize;

    for result in reader.deserialize::<StockRow>() {
        let row = result?;
        upsert_stock(pool, row.item_name.trim(), row.quantity).await?;
        updated += 1;
    }

    Ok(updated)
}

/// Replaces any earlier bundle for the same item.
pub async fn save_artifact(pool: &PgPool, artifact: &ModelArtifact) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ppe_forecast.model_artifacts (artifact_key, item_name, payload, trained_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (artifact_key) DO UPDATE
        SET item_name = EXCLUDED.item_name,
            payload = EXCLUDED.payload,
            trained_at = EXCLUDED.trained_at
        "#,
    )
    .bind(&artifact.artifact_key)
    .bind(&artifact.item_id)
    .bind(Json(artifact))
    .bind(artifact.trained_at)
    .execute(pool)
    .await
    .with_context(|| format!("failed to save model artifact for {}", artifact.item_id))?;
    Ok(())
}

pub async fn load_artifact(pool: &PgPool, item_id: &str) -> anyhow::Result<Option<ModelArtifact>> {
    let row = sqlx::query("SELECT payload FROM ppe_forecast.model_artifacts WHERE artifact_key = $1")
        .bind(artifact_key(item_id))
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let Json(artifact): Json<ModelArtifact> = row
                .try_get("payload")
                .with_context(|| format!("stored artifact for {item_id} is unreadable"))?;
            Ok(Some(artifact))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_demand_drifts_up_on_weekdays_and_drops_on_weekends() {
        assert_eq!(seed_quantity(14.0, 0), 14);
        assert_eq!(seed_quantity(14.0, 5), 4);
        assert_eq!(seed_quantity(14.0, 6), 4);
        assert_eq!(seed_quantity(14.0, 120), 16);
        assert_eq!(seed_quantity(3.0, 12), 1);
    }
}
