use std::fmt::Write;

use crate::database::Process;

pub(crate) const COLUMNS: [&str; 8] = [
    "ID", "USER", "HOST", "DB", "COMMAND", "TIME", "STATE", "INFO",
];
const PADDING: usize = 4;

/// Cell values in `COLUMNS` order; absent fields are empty strings.
pub(crate) fn cells(process: &Process) -> [String; 8] {
    [
        process.id.to_string(),
        process.user.clone(),
        process.host.clone(),
        process.database.clone().unwrap_or_default(),
        process.command.clone(),
        process.elapsed_seconds.to_string(),
        process.state.clone().unwrap_or_default(),
        process.info.clone().unwrap_or_default(),
    ]
}

/// Renders the listing with a 1-based `NO.` column; every other column is
/// left-aligned to its widest cell (header included) plus padding.
pub(crate) fn render(processes: &[Process]) -> String {
    let rows: Vec<[String; 8]> = processes.iter().map(cells).collect();
    let mut widths = COLUMNS.map(|c| c.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::from("NO.\t");
    for (column, width) in COLUMNS.iter().zip(widths) {
        let _ = write!(out, "{:<w$}", column, w = width + PADDING);
    }
    out.push('\n');
    for (n, row) in rows.iter().enumerate() {
        let _ = write!(out, "{}.\t", n + 1);
        for (cell, width) in row.iter().zip(widths) {
            let _ = write!(out, "{:<w$}", cell, w = width + PADDING);
        }
        out.push('\n');
    }
    out
}
