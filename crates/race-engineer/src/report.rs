//! Plain-text tables for analysis results.

use std::fmt;

use crate::analysis::{DeltaRow, LapRow, StintRow};

/// A right-aligned text table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Create a table with the given column headers.
    #[must_use]
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| (*h).to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row. Missing cells render empty, extra cells are ignored.
    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    /// Number of data rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no data rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let widths: Vec<usize> = (0..self.headers.len())
            .map(|i| {
                self.rows
                    .iter()
                    .map(|r| cell(r, i).chars().count())
                    .chain(std::iter::once(self.headers[i].chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        write_line(f, self.headers.iter().map(String::as_str), &widths)?;
        for row in &self.rows {
            f.write_str("\n")?;
            write_line(f, (0..widths.len()).map(|i| cell(row, i)), &widths)?;
        }
        Ok(())
    }
}

fn cell(row: &[String], i: usize) -> &str {
    row.get(i).map_or("", String::as_str)
}

fn write_line<'a>(
    f: &mut fmt::Formatter<'_>,
    cells: impl Iterator<Item = &'a str>,
    widths: &[usize],
) -> fmt::Result {
    let text = cells
        .zip(widths.iter().copied())
        .map(|(c, w)| format!("{c:>w$}"))
        .collect::<Vec<_>>()
        .join("  ");
    f.write_str(&text)
}

/// Format an optional number with `precision` decimals; missing is `-`.
#[must_use]
pub fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

/// Lap summary table.
#[must_use]
pub fn lap_table(rows: &[LapRow]) -> Table {
    let mut table = Table::new(&["Lap", "LapTime_s", "S1_s", "S2_s", "S3_s", "Compound", "Stint"]);
    for r in rows {
        table.push_row(vec![
            r.lap_number.to_string(),
            format!("{:.3}", r.lap_time_s),
            fmt_opt(r.s1_s, 3),
            fmt_opt(r.s2_s, 3),
            fmt_opt(r.s3_s, 3),
            r.compound.map_or_else(|| "?".to_string(), |c| c.to_string()),
            r.stint.map_or_else(|| "-".to_string(), |s| s.to_string()),
        ]);
    }
    table
}

/// Stint summary table.
#[must_use]
pub fn stint_table(rows: &[StintRow]) -> Table {
    let mut table = Table::new(&["Stint", "Compound", "Laps", "AvgLapTime_s", "BestLap_s"]);
    for r in rows {
        table.push_row(vec![
            r.stint.map_or_else(|| "-".to_string(), |s| s.to_string()),
            r.compound.map_or_else(|| "?".to_string(), |c| c.to_string()),
            r.laps.to_string(),
            format!("{:.3}", r.avg_lap_time_s),
            format!("{:.3}", r.best_lap_s),
        ]);
    }
    table
}

/// Lap delta table.
#[must_use]
pub fn delta_table(rows: &[DeltaRow]) -> Table {
    let mut table = Table::new(&["Lap", "Delta_s"]);
    for r in rows {
        table.push_row(vec![r.lap_number.to_string(), format!("{:+.3}", r.delta_s)]);
    }
    table
}
