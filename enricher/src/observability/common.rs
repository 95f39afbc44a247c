//! Plain-text rendering for run counters.

/// Two-column `name | value` table under a title line, for log output.
pub fn format_counter_table(title: &str, rows: &[(&str, String)]) -> String {
    let name_width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    let value_width = rows
        .iter()
        .map(|(_, value)| value.chars().count())
        .max()
        .unwrap_or(0);
    let width = (name_width + value_width + 3).max(title.len());
    let value_width = width - name_width - 3;

    let mut output = format!("| {:<width$} |\n|-{}-|\n", title, "-".repeat(width));
    for (name, value) in rows {
        output.push_str(&format!("| {name:<name_width$} | {value:>value_width$} |\n"));
    }
    output
}

/// "Xm Ys" from a minute up, "Ys" below.
pub fn format_elapsed_secs(secs: u64) -> String {
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}
