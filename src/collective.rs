//! Collective View
//!
//! Per-folder mapping from participant to that participant's head for each
//! file. In the grid it is two levels of mutable directories:
//!
//! ```text
//! collective: <participant> -> dirnode(personal directory, read-only cap)
//! personal:   <file>        -> dirnode(head snapshot)
//! ```
//!
//! Entry names are escaped with [`crate::path::escape_entry_name`]. The
//! collective directory is written only by the participant that created it,
//! when it invites someone. Each personal directory is written only by its
//! owner, one file link at a time, so publishing a head never rewrites
//! anybody else's entries. Links are last-write-wins; concurrent updates are
//! sorted out by the reconciler on the next pass.
//!
//! Peers find each other through the collective's read capability, which
//! travels inside an [`Invite`] together with the invitee's personal write
//! capability.

use crate::error::SyncError;
use crate::path::{escape_entry_name, unescape_entry_name};
use crate::registry::Membership;
use crate::store::{LinkTarget, LinkedDirectory, ObjectStore, TIMESTAMP_ENTRY};
use crate::types::{Capability, FileId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Separates the two capabilities of an invite code.
const INVITE_SEPARATOR: char = '+';

/// Read and write access to one folder's collective view.
#[async_trait]
pub trait CollectiveView: Send + Sync {
    /// Names of every participant with an entry.
    async fn participants(&self) -> Result<Vec<String>, SyncError>;

    /// Every file head published by `participant`.
    async fn read_heads(&self, participant: &str) -> Result<BTreeMap<FileId, Capability>, SyncError>;

    async fn read_head(&self, participant: &str, file: &FileId) -> Result<Option<Capability>, SyncError> {
        Ok(self.read_heads(participant).await?.remove(file))
    }

    /// Publish `head` as the local participant's head for `file`. Unconditional.
    async fn publish_head(&self, file: &FileId, head: &Capability) -> Result<(), SyncError>;
}

/// Collective view stored in the grid, reached through this participant's
/// membership.
pub struct GridCollective {
    store: Arc<dyn ObjectStore>,
    folder: String,
    membership: Membership,
}

impl GridCollective {
    pub fn new(store: Arc<dyn ObjectStore>, folder: &str, membership: Membership) -> Self {
        Self {
            store,
            folder: folder.to_string(),
            membership,
        }
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Entries of a directory, without the store's timestamp.
    async fn entries(&self, capability: &Capability) -> Result<LinkedDirectory, SyncError> {
        let mut entries = self.store.get_directory(capability).await?;
        entries.remove(TIMESTAMP_ENTRY);
        Ok(entries)
    }
}

#[async_trait]
impl CollectiveView for GridCollective {
    async fn participants(&self) -> Result<Vec<String>, SyncError> {
        let root = self.entries(&self.membership.collective).await?;
        let mut names = Vec::with_capacity(root.len());
        for entry in root.keys() {
            names.push(unescape_entry_name(entry)?);
        }
        Ok(names)
    }

    async fn read_heads(&self, participant: &str) -> Result<BTreeMap<FileId, Capability>, SyncError> {
        let root = self.entries(&self.membership.collective).await?;
        let personal = match root.get(&escape_entry_name(participant)) {
            Some(LinkTarget::Directory(dir)) => self.entries(dir).await?,
            Some(_) => {
                return Err(SyncError::InvalidSnapshot(format!(
                    "collective entry for {} is not a directory",
                    participant
                )))
            }
            None => LinkedDirectory::new(),
        };

        let mut heads = BTreeMap::new();
        for (entry, target) in personal {
            let name = unescape_entry_name(&entry)?;
            let file = match FileId::new(&name) {
                Ok(file) => file,
                Err(e) => {
                    warn!(participant, entry = %entry, error = %e, "Skipping unusable collective entry");
                    continue;
                }
            };
            match target {
                LinkTarget::Directory(head) => {
                    heads.insert(file, head);
                }
                other => warn!(participant, file = %file, target = ?other, "Collective entry is not a snapshot"),
            }
        }
        debug!(folder = %self.folder, participant, files = heads.len(), "Read collective heads");
        Ok(heads)
    }

    async fn publish_head(&self, file: &FileId, head: &Capability) -> Result<(), SyncError> {
        self.store
            .set_link(
                &self.membership.personal,
                &escape_entry_name(file.as_str()),
                head,
            )
            .await?;
        info!(folder = %self.folder, file = %file, head = %head, "Published head");
        Ok(())
    }
}

/// What an invitee needs to join a collective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invite {
    /// Read capability of the collective directory.
    pub collective: Capability,
    /// Write capability of the personal directory made for the invitee.
    pub personal: Capability,
}

impl Invite {
    /// Parse an invite code produced by [`Invite`]'s `Display`.
    pub fn parse(code: &str) -> Result<Self, SyncError> {
        let (collective, personal) = code
            .trim()
            .split_once(INVITE_SEPARATOR)
            .ok_or_else(|| SyncError::InvalidInvite("expected <collective>+<personal>".to_string()))?;
        let invite = Invite {
            collective: Capability::new(collective),
            personal: Capability::new(personal),
        };
        if !invite.collective.is_directory() {
            return Err(SyncError::InvalidInvite(format!(
                "{} is not a directory capability",
                invite.collective
            )));
        }
        if !invite.personal.is_writable() {
            return Err(SyncError::InvalidInvite(format!(
                "{} is not a directory write capability",
                invite.personal
            )));
        }
        Ok(invite)
    }
}

impl fmt::Display for Invite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.collective, INVITE_SEPARATOR, self.personal)
    }
}

/// Create a collective whose first member and administrator is `participant`.
pub async fn create(store: &dyn ObjectStore, participant: &str) -> Result<Membership, SyncError> {
    let collective = store.create_mutable_directory().await?;
    let personal = store.create_mutable_directory().await?;
    store
        .set_link(&collective.write, &escape_entry_name(participant), &personal.read)
        .await?;
    info!(participant, collective = %collective.read, "Created collective");
    Ok(Membership {
        collective: collective.read,
        personal: personal.write,
        admin: Some(collective.write),
    })
}

/// Add `nickname` to the collective administered through `membership`.
///
/// Makes the invitee's personal directory and links it into the collective;
/// the returned invite carries its write capability and is a secret.
pub async fn invite(
    store: &dyn ObjectStore,
    membership: &Membership,
    nickname: &str,
) -> Result<Invite, SyncError> {
    let admin = membership
        .admin
        .as_ref()
        .ok_or_else(|| SyncError::NotAdministrator(membership.collective.to_string()))?;
    let entry = escape_entry_name(nickname);
    if store.get_directory(&membership.collective).await?.contains_key(&entry) {
        return Err(SyncError::InvalidInvite(format!("{} is already a member", nickname)));
    }

    let personal = store.create_mutable_directory().await?;
    store.set_link(admin, &entry, &personal.read).await?;
    info!(nickname, collective = %membership.collective, "Invited participant");
    Ok(Invite {
        collective: membership.collective.clone(),
        personal: personal.write,
    })
}

/// Accept `invite` as `participant`. The collective must already list the
/// participant, which the inviter did when making the invite.
pub async fn join(
    store: &dyn ObjectStore,
    invite: &Invite,
    participant: &str,
) -> Result<Membership, SyncError> {
    let root = store.get_directory(&invite.collective).await?;
    if !root.contains_key(&escape_entry_name(participant)) {
        return Err(SyncError::InvalidInvite(format!(
            "collective {} has no entry for {}",
            invite.collective, participant
        )));
    }
    info!(participant, collective = %invite.collective, "Joined collective");
    Ok(Membership {
        collective: invite.collective.clone(),
        personal: invite.personal.clone(),
        admin: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryGrid;

    async fn pair(grid: &Arc<MemoryGrid>) -> (GridCollective, GridCollective) {
        let alice = create(&**grid, "alice").await.unwrap();
        let code = invite(&**grid, &alice, "bob").await.unwrap().to_string();
        let bob = join(&**grid, &Invite::parse(&code).unwrap(), "bob")
            .await
            .unwrap();
        (
            GridCollective::new(grid.clone(), "docs", alice),
            GridCollective::new(grid.clone(), "docs", bob),
        )
    }

    #[tokio::test]
    async fn test_new_collective_lists_its_creator() {
        let grid = Arc::new(MemoryGrid::new());
        let membership = create(&*grid, "alice").await.unwrap();
        assert!(membership.is_admin());

        let view = GridCollective::new(grid, "docs", membership);
        assert_eq!(view.participants().await.unwrap(), vec!["alice"]);
        assert!(view.read_heads("alice").await.unwrap().is_empty());
        assert!(view.read_heads("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_and_read_back() {
        let grid = Arc::new(MemoryGrid::new());
        let (alice, bob) = pair(&grid).await;
        let notes = FileId::new("notes/todo.txt").unwrap();
        let head1 = Capability::new("URI:DIR2-CHK:h1");
        let head2 = Capability::new("URI:DIR2-CHK:h2");

        alice.publish_head(&notes, &head1).await.unwrap();
        bob.publish_head(&notes, &head2).await.unwrap();

        for view in [&alice, &bob] {
            assert_eq!(view.participants().await.unwrap(), vec!["alice", "bob"]);
            assert_eq!(view.read_head("alice", &notes).await.unwrap(), Some(head1.clone()));
            assert_eq!(view.read_head("bob", &notes).await.unwrap(), Some(head2.clone()));
        }

        // Last write wins.
        alice.publish_head(&notes, &head2).await.unwrap();
        assert_eq!(bob.read_head("alice", &notes).await.unwrap(), Some(head2));
    }

    #[tokio::test]
    async fn test_interleaved_publishers_keep_each_others_entries() {
        let grid = Arc::new(MemoryGrid::new());
        let (alice, bob) = pair(&grid).await;
        let a = FileId::new("a.txt").unwrap();
        let b = FileId::new("b.txt").unwrap();
        let head = Capability::new("URI:DIR2-CHK:h");

        let (first, second) = tokio::join!(alice.publish_head(&a, &head), bob.publish_head(&b, &head));
        first.unwrap();
        second.unwrap();

        let fresh = GridCollective::new(grid.clone(), "docs", alice.membership().clone());
        assert_eq!(fresh.participants().await.unwrap(), vec!["alice", "bob"]);
        assert_eq!(fresh.read_head("alice", &a).await.unwrap(), Some(head.clone()));
        assert_eq!(fresh.read_head("bob", &b).await.unwrap(), Some(head));
        assert_eq!(fresh.read_head("alice", &b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reserved_and_odd_names_survive() {
        let grid = Arc::new(MemoryGrid::new());
        let membership = create(&*grid, "carol@home").await.unwrap();
        let view = GridCollective::new(grid, "docs", membership);
        let head = Capability::new("URI:DIR2-CHK:h");

        for name in ["timestamp", "version", "a@b/c.txt"] {
            view.publish_head(&FileId::new(name).unwrap(), &head)
                .await
                .unwrap();
        }

        let heads = view.read_heads("carol@home").await.unwrap();
        let names: Vec<&str> = heads.keys().map(FileId::as_str).collect();
        assert_eq!(names, vec!["a@b/c.txt", "timestamp", "version"]);
        assert_eq!(view.participants().await.unwrap(), vec!["carol@home"]);
    }

    #[tokio::test]
    async fn test_only_the_creator_invites() {
        let grid = Arc::new(MemoryGrid::new());
        let (alice, bob) = pair(&grid).await;

        assert!(matches!(
            invite(&*grid, bob.membership(), "carol").await,
            Err(SyncError::NotAdministrator(_))
        ));
        assert!(matches!(
            invite(&*grid, alice.membership(), "bob").await,
            Err(SyncError::InvalidInvite(_))
        ));
    }

    #[tokio::test]
    async fn test_join_checks_the_invite() {
        let grid = Arc::new(MemoryGrid::new());
        let alice = create(&*grid, "alice").await.unwrap();
        let code = invite(&*grid, &alice, "bob").await.unwrap();

        assert!(matches!(
            join(&*grid, &code, "mallory").await,
            Err(SyncError::InvalidInvite(_))
        ));
        assert!(Invite::parse("no separator").is_err());
        assert!(Invite::parse(&format!("{}+{}", code.collective, code.collective)).is_err());
        assert_eq!(Invite::parse(&code.to_string()).unwrap(), code);
    }
}
