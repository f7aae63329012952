//! Terminal progress for apply and destroy runs
//!
//! One bar per ready set. Per-resource outcomes are printed above the bar
//! so they stay in the scrollback after the bar clears.

use crate::ui;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use provisionkit::{ApplyResult, Operation, ProgressCallback, ResourceAddress};
use std::sync::Mutex;

pub struct CliProgress {
    bar: Mutex<Option<ProgressBar>>,
    total_batches: usize,
    quiet: bool,
}

impl CliProgress {
    pub fn new(total_batches: usize, quiet: bool) -> Self {
        Self {
            bar: Mutex::new(None),
            total_batches,
            quiet,
        }
    }

    fn current(&self) -> Option<ProgressBar> {
        match self.bar.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, bar: Option<ProgressBar>) -> Option<ProgressBar> {
        let mut guard = match self.bar.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, bar)
    }

    fn println(&self, line: String) {
        match self.current() {
            Some(bar) if !bar.is_hidden() => bar.println(line),
            _ => println!("{line}"),
        }
    }
}

fn batch_bar(len: u64, quiet: bool) -> ProgressBar {
    if quiet || !console::user_attended() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .map(|style| style.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    pb
}

impl ProgressCallback for CliProgress {
    fn on_batch_start(&self, index: usize, count: usize) {
        if !self.quiet {
            let total = self.total_batches.max(index + 1);
            ui::step(index + 1, total, &format!("{count} resource(s)"));
        }
        if let Some(old) = self.replace(Some(batch_bar(count as u64, self.quiet))) {
            old.finish_and_clear();
        }
    }

    fn on_resource_start(&self, address: &ResourceAddress, operation: Operation) {
        log::info!("{} {}", operation.verb(), address);
        if let Some(bar) = self.current() {
            bar.set_message(format!("{} {}", operation.verb(), address));
        }
    }

    fn on_resource_complete(&self, address: &ResourceAddress, result: &ApplyResult) {
        if !self.quiet || !result.is_success() {
            self.println(format!("  {} {}: {}", "→".cyan(), address, ui::result_line(result)));
        }
        if let Some(bar) = self.current() {
            bar.inc(1);
        }
    }

    fn on_batch_complete(&self, _index: usize) {
        if let Some(bar) = self.replace(None) {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_progress_uses_hidden_bar() {
        let progress = CliProgress::new(2, true);
        progress.on_batch_start(0, 3);
        assert!(progress.current().unwrap().is_hidden());
        progress.on_batch_complete(0);
        assert!(progress.current().is_none());
    }
}
