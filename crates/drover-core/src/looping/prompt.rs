//! Prompt rendering for one iteration.

use super::tasks::WorkItem;
use crate::engine::COMPLETION_MARKER;

/// Build the prompt that hands `item` to the engine.
///
/// `task_file` names where the engine records progress; `preamble`, when
/// present, is placed before everything else.
pub fn render(item: &WorkItem, task_file: &str, preamble: Option<&str>) -> String {
    let mut out = String::new();

    if let Some(preamble) = preamble.map(str::trim).filter(|p| !p.is_empty()) {
        out.push_str(preamble);
        out.push_str("\n\n");
    }

    out.push_str(&format!("# Task {}: {}\n\n", item.id, item.title.trim()));

    if !item.description.trim().is_empty() {
        out.push_str("## Description\n\n");
        out.push_str(item.description.trim());
        out.push_str("\n\n");
    }

    if !item.acceptance.is_empty() {
        out.push_str("## Acceptance criteria\n\n");
        for check in &item.acceptance {
            out.push_str(&format!("- {check}\n"));
        }
        out.push('\n');
    }

    out.push_str("## Instructions\n\n");
    out.push_str("Work on this task only. Verify every acceptance criterion before you stop.\n");
    out.push_str(&format!(
        "When the task is finished, set `done = true` on task `{}` in `{task_file}`.\n",
        item.id
    ));
    out.push_str(&format!(
        "If, after that, no task in `{task_file}` is still pending, print {COMPLETION_MARKER} \
         on its own line. Never print it while any task remains.\n"
    ));

    out
}
