use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use provisionkit::{ResourceAddress, ResourceRecord, StateSnapshot};
use std::path::PathBuf;

use crate::Context;
use crate::config::{DEFAULT_STATE_FILE, Stack};
use crate::state::StateStore;
use crate::ui;

/// State location without requiring a readable stack file
fn state_path(ctx: &Context) -> PathBuf {
    if let Some(path) = &ctx.state {
        return path.clone();
    }
    match Stack::load(&ctx.file) {
        Ok(stack) => stack.state_path(None),
        Err(e) => {
            log::debug!("No usable stack file ({e:#}), using {DEFAULT_STATE_FILE}");
            PathBuf::from(DEFAULT_STATE_FILE)
        }
    }
}

pub fn run(ctx: &Context, address: Option<&str>) -> Result<()> {
    let store = StateStore::new(state_path(ctx));
    let state = store.load()?;

    match address {
        Some(address) => {
            let address = ResourceAddress::parse(address)
                .with_context(|| format!("Invalid address '{address}'"))?;
            let Some(record) = state.get(&address) else {
                bail!("{address} is not in state {}", store.path().display());
            };
            show_record(&address, record);
        }
        None => show_all(&store, &state),
    }
    Ok(())
}

fn show_all(store: &StateStore, state: &StateSnapshot) {
    ui::header(&format!("State ({})", store.path().display()));
    ui::kv("serial", &state.serial.to_string());
    ui::kv(
        "last updated",
        &state
            .last_updated
            .map_or_else(|| "never".to_string(), |t| t.to_rfc3339()),
    );

    if state.is_empty() {
        println!();
        ui::info("No resources recorded");
        return;
    }

    println!();
    for (address, record) in &state.resources {
        println!(
            "  {:<11} {:<48} {}",
            ui::state_label(record.status),
            address.to_string(),
            ui::truncate_id(&record.id, 60).dimmed()
        );
    }
}

fn show_record(address: &ResourceAddress, record: &ResourceRecord) {
    ui::header(&address.to_string());
    ui::kv("id", &record.id);
    ui::kv("status", &ui::state_label(record.status).to_string());
    ui::kv("updated", &record.updated_at.to_rfc3339());
    if !record.depends_on.is_empty() {
        let deps: Vec<String> = record.depends_on.iter().map(ToString::to_string).collect();
        ui::kv("depends on", &deps.join(", "));
    }

    ui::section("Configuration");
    let text = serde_json::to_string_pretty(&record.config).unwrap_or_default();
    for line in text.lines() {
        println!("  {line}");
    }
}
