//! Diff engine: classifies local/remote key pairs into sync actions.

use std::collections::BTreeMap;

use crate::error::SyncResult;
use crate::hash;
use crate::types::{LocalEntry, RemoteEntry, SyncAction, SyncDirection, SyncPlan};

/// Classifies a single key pair given an already-computed local hash.
///
/// Pure function over its inputs. `local_hash` is only consulted when both
/// sides carry equal timestamps; pass `None` to fall back to timestamps
/// alone (e.g. when the remote entry has no hash tag worth comparing).
///
/// # Panics
///
/// Panics if both entries are `None`; a key only enters a plan because at
/// least one side has it.
pub fn classify_pair(
    local: Option<&LocalEntry>,
    remote: Option<&RemoteEntry>,
    local_hash: Option<&str>,
    direction: SyncDirection,
) -> SyncAction {
    match (local, remote) {
        (Some(local), None) => match direction {
            SyncDirection::Push => SyncAction::Upload(local.clone()),
            SyncDirection::Pull => SyncAction::Skip(local.key.clone()),
        },
        (None, Some(remote)) => match direction {
            SyncDirection::Pull => SyncAction::Download(remote.clone()),
            SyncDirection::Push => SyncAction::Skip(remote.key.clone()),
        },
        (Some(local), Some(remote)) => {
            if local.last_modified > remote.last_modified {
                return match direction {
                    SyncDirection::Push => SyncAction::Upload(local.clone()),
                    SyncDirection::Pull => SyncAction::Skip(local.key.clone()),
                };
            }
            if remote.last_modified > local.last_modified {
                return match direction {
                    SyncDirection::Pull => SyncAction::Download(remote.clone()),
                    SyncDirection::Push => SyncAction::Skip(local.key.clone()),
                };
            }
            // Equal timestamps: the hash tag decides. Identical content, or
            // no tag to compare against, is a no-op.
            match (remote.hash_tag.as_deref(), local_hash) {
                (Some(tag), Some(fresh)) if tag != fresh => match direction {
                    SyncDirection::Push => SyncAction::Upload(local.clone()),
                    SyncDirection::Pull => SyncAction::Download(remote.clone()),
                },
                _ => SyncAction::Skip(local.key.clone()),
            }
        }
        (None, None) => unreachable!("classify_pair called without either entry"),
    }
}

/// Builds a plan covering the key union of both inventories exactly once.
///
/// O(n) over per-side key maps after construction; local files are hashed
/// only for keys whose timestamps tie against a remote entry that carries a
/// hash tag.
pub async fn plan_tree(
    locals: Vec<LocalEntry>,
    remotes: Vec<RemoteEntry>,
    direction: SyncDirection,
) -> SyncResult<SyncPlan> {
    let local_map: BTreeMap<String, LocalEntry> =
        locals.into_iter().map(|e| (e.key.clone(), e)).collect();
    let remote_map: BTreeMap<String, RemoteEntry> =
        remotes.into_iter().map(|e| (e.key.clone(), e)).collect();

    let mut keys: Vec<&String> = local_map.keys().collect();
    for key in remote_map.keys() {
        if !local_map.contains_key(key) {
            keys.push(key);
        }
    }
    keys.sort_unstable();

    let mut actions = Vec::with_capacity(keys.len());
    for key in keys {
        let local = local_map.get(key);
        let remote = remote_map.get(key);

        let needs_hash = matches!((local, remote), (Some(l), Some(r))
            if l.last_modified == r.last_modified && r.hash_tag.is_some());
        let fresh_hash = match (needs_hash, local) {
            (true, Some(l)) => Some(hash::hash_file(&l.path).await?),
            _ => None,
        };

        actions.push(classify_pair(local, remote, fresh_hash.as_deref(), direction));
    }

    Ok(SyncPlan { actions })
}
