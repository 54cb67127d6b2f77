//! Prompt and change-request text assembly.

use gaffer_core::feedback::{FeedbackBatch, FeedbackKind};
use gaffer_core::item::WorkItem;

use crate::agent::{DECISION_POINT_MARKER, DecisionPoint};

/// Marker embedded in change-request bodies next to the continuation
/// token. The in-memory session store does not survive restarts; the body
/// keeps a recoverable copy.
pub const SESSION_MARKER: &str = "gaffer-session";

pub fn implement_prompt(item: &WorkItem, tasklist: Option<&str>) -> String {
    let mut prompt = format!(
        "You are implementing issue #{}: {}\n\n{}\n",
        item.id.0, item.title, item.body
    );
    if let Some(doc) = tasklist {
        prompt.push_str("\n## Repository task list\n\n");
        prompt.push_str(doc);
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "\nImplement the change described above. Keep the diff focused, run the \
         project's checks when available, and commit your work with clear messages. \
         When you settle a notable design choice, print a line in the form \
         `{DECISION_POINT_MARKER} <description> | <chosen> | <rejected>`.\n"
    ));
    prompt
}

/// Renders the batch oldest entry first, each with its author and, for
/// inline comments, the file anchor reviewers saw.
pub fn review_prompt(batch: &FeedbackBatch) -> String {
    let mut prompt = format!(
        "Reviewers left {} feedback item(s) on change request #{}. Address each one:\n\n",
        batch.len(),
        batch.request.0
    );
    for entry in batch.entries() {
        let line = match &entry.kind {
            FeedbackKind::Discussion => format!("- {}: {}\n", entry.author, entry.body),
            FeedbackKind::Inline { path, line: Some(line) } => {
                format!("- {} ({}:{}): {}\n", entry.author, path, line, entry.body)
            }
            FeedbackKind::Inline { path, line: None } => {
                format!("- {} ({}): {}\n", entry.author, path, entry.body)
            }
        };
        prompt.push_str(&line);
    }
    prompt.push_str(
        "\nApply the requested changes, rerun the project's checks when available, \
         and commit your work.\n",
    );
    prompt
}

pub fn change_request_title(item: &WorkItem) -> String {
    format!("{} (#{})", item.title, item.id.0)
}

pub fn change_request_body(
    item: &WorkItem,
    decisions: &[DecisionPoint],
    session: Option<&str>,
) -> String {
    let mut body = format!("Automated change for #{}.\n", item.id.0);
    if !decisions.is_empty() {
        body.push_str("\n## Decision points\n\n");
        for decision in decisions {
            body.push_str(&format!(
                "- **{}**: chose {} over {}\n",
                decision.description, decision.chosen, decision.rejected
            ));
        }
    }
    if let Some(token) = session {
        body.push_str(&format!("\n<!-- {SESSION_MARKER}: {token} -->\n"));
    }
    body
}
