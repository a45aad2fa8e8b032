//! Human-readable rendering of engine results.

use colored::{ColoredString, Colorize};
use color_eyre::eyre::Result;
use serde::Serialize;
use tk_core::cache::{CleanupOutcome, CleanupReport, StoredDocument};
use tk_core::engine::RecoveryAction;
use tk_protocol::document_models::DocumentNode;
use tk_protocol::ipc::{EventType, SseMessageRecord};
use tk_protocol::pipeline_models::DisplayStatus;
use tk_protocol::process_models::{AgentState, ProjectStatus};

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn paint(status: DisplayStatus) -> ColoredString {
    let label = match status {
        DisplayStatus::Pending => "pending",
        DisplayStatus::Processing => "processing",
        DisplayStatus::AwaitingReview => "awaiting review",
        DisplayStatus::Completed => "completed",
        DisplayStatus::Failed => "failed",
    };
    match status {
        DisplayStatus::Pending => label.dimmed(),
        DisplayStatus::Processing => label.cyan(),
        DisplayStatus::AwaitingReview => label.yellow().bold(),
        DisplayStatus::Completed => label.green().bold(),
        DisplayStatus::Failed => label.red().bold(),
    }
}

pub(crate) fn print_status(status: &ProjectStatus) {
    let state = &status.state;
    println!(
        "{} {} [{}] {}%",
        state.project_id.bold(),
        state.current_state,
        paint(status.display_status),
        state.progress
    );
    println!("  {}", state.message);
    if let Some(error) = &state.error {
        println!("  {} {}", "error:".red(), error);
    }
    match status.next_step {
        Some(step) if status.requires_input => println!("  next: {step} (waiting for input)"),
        Some(step) => println!("  next: {step}"),
        None => {}
    }
    if !status.documents.is_empty() {
        let variants: Vec<_> = status.documents.iter().map(|d| d.variant.as_str()).collect();
        println!("  documents: {}", variants.join(", "));
    }
}

pub(crate) fn print_history(history: &[AgentState]) {
    for state in history {
        let line = format!(
            "{} {:<16} {:>3}%  {}",
            state.updated_at.format("%H:%M:%S"),
            state.current_state.as_str(),
            state.progress,
            state.message
        );
        if state.is_failed() {
            println!("{}", line.red());
        } else {
            println!("{line}");
        }
    }
}

fn print_node(node: &DocumentNode, depth: usize) {
    let indent = "  ".repeat(depth);
    if node.is_heading() {
        let level = node.level.unwrap_or(0);
        let text = format!("{} {}", "#".repeat(usize::from(level.max(1))), node.text);
        let text = if node.attrs.contains_key("generated") {
            text.italic()
        } else {
            text.bold()
        };
        println!("{indent}{text}");
    } else if !node.text.is_empty() {
        println!("{indent}{}", node.text.dimmed());
    }
    for child in &node.children {
        print_node(child, depth + 1);
    }
}

pub(crate) fn print_document(stored: &StoredDocument) {
    println!(
        "{} revision {} ({})",
        stored.variant.as_str().bold(),
        stored.revision,
        stored.produced_at.to_rfc3339()
    );
    if let Some(title) = &stored.document.title {
        println!("{}", title.underline());
    }
    for node in &stored.document.nodes {
        print_node(node, 0);
    }
}

pub(crate) fn print_cleanup(report: &CleanupReport) {
    for key in &report.keys {
        match &key.outcome {
            CleanupOutcome::Deleted => println!("{} {}", "deleted".green(), key.key),
            CleanupOutcome::Absent => println!("{} {}", "absent ".dimmed(), key.key),
            CleanupOutcome::Failed(reason) => {
                println!("{} {} ({})", "failed ".red(), key.key, reason)
            }
        }
    }
}

pub(crate) fn print_recovery(actions: &[(String, RecoveryAction)]) {
    for (project_id, action) in actions {
        match action {
            RecoveryAction::Failed { state } => {
                println!("{} {} interrupted while {}", "failed".red(), project_id, state)
            }
            RecoveryAction::Requeued { step } => {
                println!("{} {} {}", "requeued".yellow(), project_id, step)
            }
            RecoveryAction::Untouched => {}
        }
    }
}

pub(crate) fn print_event(record: &SseMessageRecord) {
    let time = record.timestamp.format("%H:%M:%S");
    match record.event_type {
        EventType::StateUpdate => {
            match serde_json::from_value::<AgentState>(record.event_data.clone()) {
                Ok(state) => println!(
                    "{time} {} {:>3}%  {}",
                    state.current_state.as_str().cyan(),
                    state.progress,
                    state.message
                ),
                Err(_) => println!("{time} state {}", record.event_data),
            }
        }
        EventType::Progress => println!("{time} progress {}", record.event_data),
        EventType::Error => println!("{time} {} {}", "error".red(), record.event_data),
    }
}
