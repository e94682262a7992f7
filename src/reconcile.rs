//! Reconciler
//!
//! Classifies a (local head, remote head) pair for one file and decides what
//! to do about it. Fast-forward is the only automatic action; divergence is
//! reported with both heads and never resolved here.

use crate::dag::AncestryWalker;
use crate::error::SyncError;
use crate::types::Capability;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Relationship between the local and a remote head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    InSync,
    LocalAhead,
    RemoteAhead,
    Diverged,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SyncState::InSync => "in-sync",
            SyncState::LocalAhead => "local-ahead",
            SyncState::RemoteAhead => "remote-ahead",
            SyncState::Diverged => "diverged",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Nothing,
    /// Fetch the remote content and make the remote head the local head.
    Adopt(Capability),
    /// Leave local content alone and surface both heads.
    Conflict {
        local: Capability,
        remote: Capability,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub state: SyncState,
    pub action: Action,
}

impl Decision {
    fn new(state: SyncState, action: Action) -> Self {
        Self { state, action }
    }
}

/// Decide what to do for one file given both heads.
///
/// Total over every combination of present and absent heads. Both absent is
/// in-sync: neither side knows the file.
pub async fn reconcile(
    walker: &AncestryWalker,
    local: Option<&Capability>,
    remote: Option<&Capability>,
) -> Result<Decision, SyncError> {
    let (local, remote) = match (local, remote) {
        (None, None) => return Ok(Decision::new(SyncState::InSync, Action::Nothing)),
        (None, Some(remote)) => {
            return Ok(Decision::new(
                SyncState::RemoteAhead,
                Action::Adopt(remote.clone()),
            ))
        }
        (Some(_), None) => return Ok(Decision::new(SyncState::LocalAhead, Action::Nothing)),
        (Some(local), Some(remote)) => (local, remote),
    };

    if local == remote {
        return Ok(Decision::new(SyncState::InSync, Action::Nothing));
    }

    if walker.is_ancestor(local, remote).await? {
        return Ok(Decision::new(
            SyncState::RemoteAhead,
            Action::Adopt(remote.clone()),
        ));
    }
    if walker.is_ancestor(remote, local).await? {
        return Ok(Decision::new(SyncState::LocalAhead, Action::Nothing));
    }

    Ok(Decision::new(
        SyncState::Diverged,
        Action::Conflict {
            local: local.clone(),
            remote: remote.clone(),
        },
    ))
}
