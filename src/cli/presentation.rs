//! CLI presentation: text and json formatters per command.

use crate::collective::Invite;
use crate::heads::HeadEntry;
use crate::reconcile::{Action, SyncState};
use crate::registry::Membership;
use crate::snapshot::AuthorOutcome;
use crate::sync::{ScanOutcome, SyncReport};
use crate::types::{Capability, FileId};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde_json::json;
use std::path::Path;

/// One row of `foldsync folder list`.
#[derive(Debug, Clone)]
pub struct FolderRow {
    pub name: String,
    pub path: Option<String>,
    pub collective: Option<Capability>,
    /// This participant created the collective and may invite others.
    pub admin: bool,
}

fn to_json(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

fn section_title(title: &str) -> String {
    format!("{}", title.bold().underline())
}

fn state_cell(state: SyncState) -> String {
    match state {
        SyncState::InSync => format!("{}", state.green()),
        SyncState::LocalAhead | SyncState::RemoteAhead => format!("{}", state.yellow()),
        SyncState::Diverged => format!("{}", state.red()),
    }
}

pub fn format_identity_text(name: &str, public_key: &str, path: &Path) -> String {
    format!(
        "Participant: {}\nPublic key:  {}\nIdentity:    {}",
        name,
        public_key,
        path.display()
    )
}

pub fn format_folder_list_text(rows: &[FolderRow]) -> String {
    if rows.is_empty() {
        return "No folders configured.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Folder", "Path", "Collective", "Role"]);
    for row in rows {
        let role = match (&row.collective, row.admin) {
            (None, _) => "-",
            (Some(_), true) => "admin",
            (Some(_), false) => "member",
        };
        table.add_row(vec![
            row.name.clone(),
            row.path.clone().unwrap_or_else(|| "-".to_string()),
            row.collective
                .as_ref()
                .map(|c| c.short())
                .unwrap_or_else(|| "-".to_string()),
            role.to_string(),
        ]);
    }
    format!("{}\n{}", section_title("Folders"), table)
}

pub fn format_folder_list_json(rows: &[FolderRow]) -> String {
    let folders: Vec<_> = rows
        .iter()
        .map(|row| {
            json!({
                "name": row.name,
                "path": row.path,
                "collective": row.collective,
                "admin": row.admin,
            })
        })
        .collect();
    to_json(&json!({ "folders": folders, "total": rows.len() }))
}

pub fn format_membership(folder: &str, membership: &Membership) -> String {
    let role = if membership.is_admin() { "administrator" } else { "member" };
    format!(
        "{} {} as {}\nCollective: {}",
        "joined".green(),
        folder,
        role,
        membership.collective
    )
}

/// The invite code goes on its own last line so it can be piped.
pub fn format_invite(folder: &str, nickname: &str, invite: &Invite) -> String {
    format!(
        "Invited {} to {}. Send this code privately; it grants write access to {}'s entries:\n{}",
        nickname, folder, nickname, invite
    )
}

pub fn format_leave(folder: &str, membership: &Membership) -> String {
    let mut output = format!("Left collective {} for {}", membership.collective.short(), folder);
    if membership.is_admin() {
        output.push_str("\nThe collective's write capability was discarded; nobody can invite new members.");
    }
    output
}

pub fn format_author_outcome(file: &FileId, outcome: &AuthorOutcome) -> String {
    match outcome {
        AuthorOutcome::Created { head, .. } => format!("{} {} -> {}", "created".green(), file, head),
        AuthorOutcome::Unchanged { head } => format!("{} {} at {}", "unchanged".dimmed(), file, head.short()),
    }
}

pub fn format_scan_result(outcomes: &[ScanOutcome]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["File", "Result", "Head"]);
    let mut created = 0;
    let mut failed = 0;
    for outcome in outcomes {
        match &outcome.result {
            Ok(result) => {
                if result.is_created() {
                    created += 1;
                }
                let label = if result.is_created() { "created" } else { "unchanged" };
                table.add_row(vec![
                    outcome.file.to_string(),
                    label.to_string(),
                    result.head().short(),
                ]);
            }
            Err(e) => {
                failed += 1;
                table.add_row(vec![outcome.file.to_string(), "error".to_string(), e.to_string()]);
            }
        }
    }
    format!(
        "{}\n{}\n\n{} file(s), {} new snapshot(s), {} failure(s)",
        section_title("Scan"),
        table,
        outcomes.len(),
        created,
        failed
    )
}

pub fn format_sync_report_text(report: &SyncReport) -> String {
    let mut output = section_title("Synchronization pass");
    if report.outcomes.is_empty() && report.peer_failures.is_empty() {
        output.push_str("\nNo peers to reconcile with.");
        return output;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Peer", "File", "State", "Action"]);
    for outcome in &report.outcomes {
        let (state, action) = match &outcome.result {
            Ok(decision) => {
                let action = match &decision.action {
                    Action::Nothing => "-".to_string(),
                    Action::Adopt(head) => format!("adopted {}", head.short()),
                    Action::Conflict { local, remote } => {
                        format!("conflict {} / {}", local.short(), remote.short())
                    }
                };
                (state_cell(decision.state), action)
            }
            Err(e) => (format!("{}", "error".red()), e.to_string()),
        };
        table.add_row(vec![outcome.peer.clone(), outcome.file.to_string(), state, action]);
    }
    output.push('\n');
    output.push_str(&table.to_string());

    for (peer, error) in &report.peer_failures {
        output.push_str(&format!("\n{} {}: {}", "unreachable".red(), peer, error));
    }

    output.push_str(&format!(
        "\n\n{} adopted, {} conflict(s), {} failure(s)",
        report.adopted().count(),
        report.conflicts().count(),
        report.failures().count() + report.peer_failures.len()
    ));
    output
}

pub fn format_sync_report_json(report: &SyncReport) -> String {
    let outcomes: Vec<_> = report
        .outcomes
        .iter()
        .map(|outcome| match &outcome.result {
            Ok(decision) => json!({
                "peer": outcome.peer,
                "file": outcome.file.as_str(),
                "state": decision.state,
                "action": decision.action,
            }),
            Err(e) => json!({
                "peer": outcome.peer,
                "file": outcome.file.as_str(),
                "error": e.to_string(),
            }),
        })
        .collect();
    let peer_failures: Vec<_> = report
        .peer_failures
        .iter()
        .map(|(peer, e)| json!({ "peer": peer, "error": e.to_string() }))
        .collect();
    to_json(&json!({
        "outcomes": outcomes,
        "peer_failures": peer_failures,
        "clean": report.is_clean(),
    }))
}

pub fn format_heads_text(participant: &str, heads: &[(FileId, HeadEntry)]) -> String {
    if heads.is_empty() {
        return format!("No heads recorded for {}.", participant);
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["File", "Snapshot", "Content"]);
    for (file, entry) in heads {
        table.add_row(vec![
            file.to_string(),
            entry.snapshot.short(),
            entry.content.short(),
        ]);
    }
    format!("{}\n{}", section_title(&format!("Heads of {}", participant)), table)
}

pub fn format_heads_json(participant: &str, heads: &[(FileId, HeadEntry)]) -> String {
    let files: Vec<_> = heads
        .iter()
        .map(|(file, entry)| {
            json!({
                "file": file.as_str(),
                "snapshot": entry.snapshot,
                "content": entry.content,
                "content_address": entry.content_address,
            })
        })
        .collect();
    to_json(&json!({ "participant": participant, "heads": files }))
}
