//! Table and summary rendering for terminal output.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use prodflow::{ExclusionReason, ResolutionSummary};
use serde::Serialize;

/// Print a table with a highlighted header row.
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        table.add_row(row);
    }

    println!("{}", table);
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn reason_color(reason: ExclusionReason) -> Color {
    match reason {
        ExclusionReason::CatalogQueryFailed => Color::Red,
        ExclusionReason::InProgress | ExclusionReason::LimitReached => Color::Yellow,
        ExclusionReason::DuplicateOutput => Color::Green,
        ExclusionReason::IncompleteInputs | ExclusionReason::RunQuality => Color::Grey,
    }
}

/// Candidates, matches and per-reason exclusions, then failed runs.
pub fn print_summary(summary: &ResolutionSummary) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Outcome").fg(Color::Cyan),
        Cell::new("Count").fg(Color::Cyan),
    ]);
    table.add_row(vec![Cell::new("candidates"), Cell::new(summary.candidates)]);
    table.add_row(vec![
        Cell::new("matched").fg(Color::Green),
        Cell::new(summary.matched),
    ]);
    for (reason, count) in &summary.excluded {
        table.add_row(vec![
            Cell::new(reason.as_str()).fg(reason_color(*reason)),
            Cell::new(count),
        ]);
    }
    println!("{}", table);

    if !summary.is_complete() {
        println!();
        println!("Runs that could not be looked up (results are partial):");
        let rows = summary
            .failures
            .iter()
            .map(|f| {
                vec![
                    f.run.to_string(),
                    if f.timed_out { "timeout" } else { "error" }.to_string(),
                    f.message.clone(),
                ]
            })
            .collect();
        print_table(&["Run", "Kind", "Message"], rows);
    }
}
