use schemashift_config::Environment;
use schemashift_db::MigrationStatus;

const WIDTH: usize = 78;

/// Print the migration status box for one environment.
pub fn print_status(env: &Environment, database: &str, status: &MigrationStatus) {
    for line in render_status(env, database, status) {
        println!("{line}");
    }
}

pub fn render_status(env: &Environment, database: &str, status: &MigrationStatus) -> Vec<String> {
    let inner = WIDTH - 4; // "│ " + " │"

    let title = format!("schemashift v{}", env!("CARGO_PKG_VERSION"));
    let title_dashes = WIDTH - 2 - title.chars().count() - 5; // 2 for ╭╮, 5 for "─── " + " "
    let top = format!("╭─── {title} {}╮", "─".repeat(title_dashes));
    let bottom = format!("╰{}╯", "─".repeat(WIDTH - 2));
    let row = |text: &str| format!("│ {:<inner$} │", fit(text, inner));

    let summary = if status.is_up_to_date() {
        "up to date".to_string()
    } else {
        format!("{} pending", status.pending.len())
    };

    let mut lines = vec![
        top,
        row(""),
        row(&format!("Environment  {env}")),
        row(&format!("Database     {database}")),
        row(&format!("Applied      {}", status.applied.len())),
        row(&format!("Status       {summary}")),
        row(&"─".repeat(inner)),
    ];

    for applied in &status.applied {
        let marker = if status.orphaned.contains(&applied.id) {
            "[?]"
        } else {
            "[x]"
        };
        lines.push(row(&format!(
            "{marker} {}  {}",
            applied.id,
            applied.applied_at.format("%Y-%m-%d %H:%M:%S")
        )));
    }
    for pending in &status.pending {
        lines.push(row(&format!("[ ] {pending}")));
    }
    if status.applied.is_empty() && status.pending.is_empty() {
        lines.push(row("no migrations"));
    }

    lines.push(row(""));
    lines.push(bottom);
    lines
}

fn fit(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width - 1).collect();
    cut.push('…');
    cut
}
