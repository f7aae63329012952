use colored::{ColoredString, Colorize};
use provisionkit::{Action, ApplyResult, ProvisioningState};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", format!("[{}/{}]", num, total).blue().bold(), msg);
}

/// Plan symbol colored the way terraform users expect
pub fn action_symbol(action: &Action) -> ColoredString {
    match action {
        Action::NoOp => action.symbol().dimmed(),
        Action::Create => action.symbol().green().bold(),
        Action::Update { .. } => action.symbol().yellow().bold(),
        Action::Replace { .. } => action.symbol().magenta().bold(),
        Action::Delete => action.symbol().red().bold(),
    }
}

pub fn state_label(state: ProvisioningState) -> ColoredString {
    let label = state.to_string();
    match state {
        ProvisioningState::Ready => label.green(),
        ProvisioningState::Failed => label.red(),
        ProvisioningState::Skipped => label.yellow(),
        ProvisioningState::InProgress => label.cyan(),
        ProvisioningState::Planned | ProvisioningState::Unplanned => label.dimmed(),
    }
}

/// One-word outcome plus detail, for per-resource lines
pub fn result_line(result: &ApplyResult) -> String {
    match result {
        ApplyResult::NoChange => "unchanged".dimmed().to_string(),
        ApplyResult::Created { id } => {
            format!("{} {}", "created".green(), truncate_id(id, 60).dimmed())
        }
        ApplyResult::Updated => "updated".yellow().to_string(),
        ApplyResult::Replaced { id } => {
            format!("{} {}", "replaced".magenta(), truncate_id(id, 60).dimmed())
        }
        ApplyResult::Deleted => "deleted".red().to_string(),
        ApplyResult::Failed { error } => format!("{} {}", "failed:".red().bold(), error),
        ApplyResult::Skipped { reason } => format!("{} {}", "skipped:".yellow(), reason),
    }
}

/// Shorten a long resource id for display, keeping the end
pub fn truncate_id(id: &str, max_len: usize) -> String {
    let count = id.chars().count();
    if count <= max_len {
        id.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let tail: String = id.chars().skip(count - (max_len - 3)).collect();
        format!("...{tail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_id_short() {
        assert_eq!(truncate_id("short", 20), "short");
        assert_eq!(truncate_id("exact", 5), "exact");
    }

    #[test]
    fn test_truncate_id_long() {
        let id = "/subscriptions/0000/resourceGroups/rg/providers/Microsoft.Web/sites/la-main";
        assert_eq!(truncate_id(id, 15), "...ites/la-main");
    }

    #[test]
    fn test_truncate_id_edge_cases() {
        assert_eq!(truncate_id("test", 3), "...");
        assert_eq!(truncate_id("", 10), "");
    }

    #[test]
    fn test_result_line_mentions_error() {
        colored::control::set_override(false);
        let line = result_line(&ApplyResult::Failed {
            error: "quota exceeded".into(),
        });
        assert_eq!(line, "failed: quota exceeded");
    }
}
