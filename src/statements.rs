// src/statements.rs - Statement rows, sorting and CSV export
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const CSV_HEADER: &str = "Date,Description,Amount";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementRow {
    pub date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
}

impl StatementRow {
    pub fn new(date: NaiveDate, description: &str, amount: Decimal) -> Self {
        StatementRow {
            date,
            description: description.to_string(),
            amount,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Date,
    Description,
    Amount,
}

/// Stable sort by `key`, ascending or descending.
pub fn sort_rows(rows: &mut [StatementRow], key: SortKey, ascending: bool) {
    rows.sort_by(|a, b| {
        let ordering = match key {
            SortKey::Date => a.date.cmp(&b.date),
            SortKey::Description => a.description.cmp(&b.description),
            SortKey::Amount => a.amount.cmp(&b.amount),
        };
        if ascending {
            ordering
        } else {
            ordering.reverse()
        }
    });
}

/// Header line plus one comma-joined line per row. Fields are not quoted,
/// so a description containing a comma shifts the columns.
pub fn to_csv(rows: &[StatementRow]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(CSV_HEADER.to_string());
    for row in rows {
        lines.push(format!(
            "{},{},{}",
            row.date.format("%Y-%m-%d"),
            row.description,
            row.amount.normalize()
        ));
    }
    lines.join("\n")
}

/// Rows shown on the statements page of the demo account
pub fn demo_rows() -> Vec<StatementRow> {
    let row = |y, m, d, description: &str, amount: i64| {
        NaiveDate::from_ymd_opt(y, m, d).map(|date| StatementRow::new(date, description, Decimal::from(amount)))
    };
    [
        row(2025, 7, 28, "UPI: Coffee shop", -180),
        row(2025, 7, 29, "UPI: Food delivery", -620),
        row(2025, 8, 1, "Salary credit", 85000),
        row(2025, 8, 3, "Electricity bill", -2140),
        row(2025, 8, 5, "Movie tickets", -780),
    ]
    .into_iter()
    .flatten()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_csv_export_exact_output() {
        let rows = vec![
            StatementRow::new(date("2025-08-01"), "Salary credit", dec!(85000)),
            StatementRow::new(date("2025-08-03"), "Electricity bill", dec!(-2140)),
        ];
        assert_eq!(
            to_csv(&rows),
            "Date,Description,Amount\n2025-08-01,Salary credit,85000\n2025-08-03,Electricity bill,-2140"
        );
    }

    #[test]
    fn test_empty_export_is_header_only() {
        assert_eq!(to_csv(&[]), CSV_HEADER);
    }

    #[test]
    fn test_embedded_comma_is_not_quoted() {
        let rows = vec![StatementRow::new(date("2025-08-05"), "Tickets, 2x", dec!(-780.50))];
        assert_eq!(to_csv(&rows), "Date,Description,Amount\n2025-08-05,Tickets, 2x,-780.5");
    }

    #[test]
    fn test_sorting() {
        let mut rows = demo_rows();
        assert_eq!(rows.len(), 5);

        sort_rows(&mut rows, SortKey::Date, false);
        assert_eq!(rows[0].description, "Movie tickets");

        sort_rows(&mut rows, SortKey::Amount, true);
        assert_eq!(rows[0].amount, dec!(-2140));
        assert_eq!(rows[4].amount, dec!(85000));

        sort_rows(&mut rows, SortKey::Description, true);
        assert_eq!(rows[0].description, "Electricity bill");
    }
}
