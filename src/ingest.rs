//! Projection of spreadsheet-exported movement rows into transaction records.
//!
//! The sheet is hand-maintained: directions are free text in Portuguese,
//! dates are usually day-first, and money uses the Brazilian decimal comma.
//! Bad cells are coerced to safe defaults instead of failing the row.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;

use crate::models::{Direction, TransactionRecord};

/// One exported sheet row. Headers match the sheet or their English names.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SheetRow {
    #[serde(alias = "ID", default)]
    pub id: String,
    #[serde(alias = "EPI_Name", alias = "epi_name", alias = "nome_epi")]
    pub item_name: String,
    #[serde(alias = "Quantity", alias = "quantidade", default)]
    pub quantity: String,
    #[serde(alias = "Transaction_Type", alias = "tipo", default)]
    pub transaction_type: String,
    #[serde(alias = "Date", alias = "data", default)]
    pub date: String,
    #[serde(alias = "Value", alias = "valor", default)]
    pub value: String,
    #[serde(alias = "Requester", alias = "requisitante", default)]
    pub requester: String,
    #[serde(alias = "CA", alias = "ca", default)]
    pub ca_code: String,
    #[serde(alias = "Image_URL", alias = "image", default)]
    pub image_url: String,
}

/// A projected row plus the sheet columns the forecasting core ignores.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetTransaction {
    pub source_key: String,
    pub record: TransactionRecord,
    pub unit_value: f64,
    pub requester: String,
    pub ca_code: String,
    pub image_url: String,
}

/// `None` when the item name is blank or the direction is unrecognised.
pub fn project(row: &SheetRow) -> Option<SheetTransaction> {
    let item_id = row.item_name.trim();
    if item_id.is_empty() {
        return None;
    }
    let direction = parse_direction(&row.transaction_type)?;
    let record = TransactionRecord {
        item_id: item_id.to_string(),
        date: parse_date(&row.date),
        quantity: parse_quantity(&row.quantity),
        direction,
    };
    let id = row.id.trim();
    Some(SheetTransaction {
        source_key: if id.is_empty() {
            String::new()
        } else {
            format!("sheet-{id}")
        },
        record,
        unit_value: parse_brl(&row.value),
        requester: row.requester.trim().to_string(),
        ca_code: row.ca_code.trim().to_string(),
        image_url: row.image_url.trim().to_string(),
    })
}

pub fn parse_direction(raw: &str) -> Option<Direction> {
    match fold_accents(&raw.trim().to_lowercase()).as_str() {
        "entrada" | "entradas" | "in" | "inbound" => Some(Direction::Inbound),
        "saida" | "saidas" | "out" | "outbound" => Some(Direction::Outbound),
        _ => None,
    }
}

/// Day-first formats win over ISO ones for ambiguous values.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    // Two-digit years first: `%Y` would read "24" as the year 24.
    const DATE_FORMATS: [&str; 4] = ["%d/%m/%y", "%d/%m/%Y", "%d-%m-%Y", "%Y-%m-%d"];
    const DATETIME_FORMATS: [&str; 3] = ["%d/%m/%Y %H:%M:%S", "%d/%m/%Y %H:%M", "%Y-%m-%d %H:%M:%S"];

    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Unparseable or negative quantities become 0 and are filtered downstream.
pub fn parse_quantity(raw: &str) -> u32 {
    let value = raw.trim();
    if let Ok(parsed) = value.parse::<i64>() {
        return u32::try_from(parsed).unwrap_or(0);
    }
    match value.replace(',', ".").parse::<f64>() {
        Ok(parsed) if parsed.is_finite() && parsed > 0.0 && parsed <= u32::MAX as f64 => {
            parsed.round() as u32
        }
        _ => 0,
    }
}

/// Parses `R$ 1.234,56` style amounts; anything unreadable is 0.0.
pub fn parse_brl(raw: &str) -> f64 {
    let cleaned: String = raw
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return 0.0;
    }
    let normalized = if cleaned.contains(',') {
        cleaned.replace('.', "").replace(',', ".")
    } else {
        cleaned
    };
    normalized
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

fn fold_accents(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' => 'a',
            'é' | 'ê' => 'e',
            'í' => 'i',
            'ó' | 'ô' | 'õ' => 'o',
            'ú' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(quantity: &str, kind: &str, date: &str) -> SheetRow {
        SheetRow {
            id: "17".to_string(),
            item_name: " Glove-X ".to_string(),
            quantity: quantity.to_string(),
            transaction_type: kind.to_string(),
            date: date.to_string(),
            value: "R$ 1.234,56".to_string(),
            ..SheetRow::default()
        }
    }

    #[test]
    fn directions_ignore_case_whitespace_and_accents() {
        assert_eq!(parse_direction("Entrada"), Some(Direction::Inbound));
        assert_eq!(parse_direction("  SAÍDA "), Some(Direction::Outbound));
        assert_eq!(parse_direction("saida"), Some(Direction::Outbound));
        assert_eq!(parse_direction("Saídas"), Some(Direction::Outbound));
        assert_eq!(parse_direction("transfer"), None);
    }

    #[test]
    fn dates_prefer_day_first() {
        assert_eq!(parse_date("03/04/2024"), NaiveDate::from_ymd_opt(2024, 4, 3));
        assert_eq!(parse_date("03/04/24"), NaiveDate::from_ymd_opt(2024, 4, 3));
        assert_eq!(parse_date("2024-04-03"), NaiveDate::from_ymd_opt(2024, 4, 3));
        assert_eq!(parse_date("03/04/2024 14:30:00"), NaiveDate::from_ymd_opt(2024, 4, 3));
        assert_eq!(parse_date("31/02/2024"), None);
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn quantities_coerce_to_zero() {
        assert_eq!(parse_quantity("abc"), 0);
        assert_eq!(parse_quantity("-3"), 0);
        assert_eq!(parse_quantity(" 12 "), 12);
        assert_eq!(parse_quantity("12.0"), 12);
        assert_eq!(parse_quantity(""), 0);
    }

    #[test]
    fn brazilian_currency() {
        assert!((parse_brl("R$ 1.234,56") - 1234.56).abs() < 1e-9);
        assert!((parse_brl("12,5") - 12.5).abs() < 1e-9);
        assert_eq!(parse_brl("12"), 12.0);
        assert_eq!(parse_brl("grátis"), 0.0);
    }

    #[test]
    fn projects_a_sheet_row() {
        let projected = project(&row("4", "Saída", "05/01/2024")).unwrap();
        assert_eq!(projected.source_key, "sheet-17");
        assert_eq!(projected.record.item_id, "Glove-X");
        assert_eq!(projected.record.quantity, 4);
        assert_eq!(projected.record.direction, Direction::Outbound);
        assert_eq!(projected.record.date, NaiveDate::from_ymd_opt(2024, 1, 5));
        assert!((projected.unit_value - 1234.56).abs() < 1e-9);
    }

    #[test]
    fn bad_quantity_survives_projection_as_zero() {
        let projected = project(&row("abc", "saída", "05/01/2024")).unwrap();
        assert_eq!(projected.record.quantity, 0);
    }

    #[test]
    fn unknown_direction_or_blank_item_is_skipped() {
        assert!(project(&row("4", "ajuste", "05/01/2024")).is_none());
        let mut blank = row("4", "saída", "05/01/2024");
        blank.item_name = "  ".to_string();
        assert!(project(&blank).is_none());
    }
}
