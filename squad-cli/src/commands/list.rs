//! `squad list`: recorded instances, as a table or JSON.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use squad_core::storage::load_instances_at;
use squad_core::{InstanceSnapshot, Status};

use super::display_path;

/// Arguments for `squad list`.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "title")]
    title: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "branch")]
    branch: String,
    #[tabled(rename = "program")]
    program: String,
    #[tabled(rename = "repository")]
    repository: String,
    #[tabled(rename = "updated")]
    updated: String,
}

impl ListArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let snapshots =
            load_instances_at(&home).context("failed to load ~/.squad/instances.yaml")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&snapshots)
                    .context("failed to serialize instance list")?
            );
            return Ok(());
        }

        if snapshots.is_empty() {
            println!("No instances. Create one with 'squad new <title>'.");
            return Ok(());
        }

        let now = Utc::now();
        let rows: Vec<InstanceRow> = snapshots.iter().map(|s| row(s, now)).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn row(snapshot: &InstanceSnapshot, now: DateTime<Utc>) -> InstanceRow {
    InstanceRow {
        title: snapshot.title.clone(),
        status: status_label(snapshot.status),
        branch: snapshot.branch.clone(),
        program: snapshot.program.clone(),
        repository: display_path(&snapshot.base_path),
        updated: format_age(now, snapshot.updated_at),
    }
}

fn status_label(status: Status) -> String {
    let label = status.to_string();
    match status {
        Status::Running => label.green().to_string(),
        Status::Ready => label.yellow().to_string(),
        Status::Paused => label.bright_black().to_string(),
        Status::NotStarted | Status::Killed => label,
    }
}

fn format_age(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn ages_use_the_largest_whole_unit() {
        let now = Utc::now();
        assert_eq!(format_age(now, now), "0s ago");
        assert_eq!(format_age(now, now - Duration::seconds(90)), "1m ago");
        assert_eq!(format_age(now, now - Duration::hours(5)), "5h ago");
        assert_eq!(format_age(now, now - Duration::days(3)), "3d ago");
        assert_eq!(format_age(now, now + Duration::seconds(5)), "0s ago");
    }
}
