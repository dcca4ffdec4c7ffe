//! Collaborator registry and the reconciliation rules that drive it.
//!
//! ## Merge rules
//!
//! | Event      | Effect on the registry                                   |
//! |------------|----------------------------------------------------------|
//! | `presence` | discarded and rebuilt from the active-user list          |
//! | `join`     | upsert without cursor; ignored unless name + color given |
//! | `leave`    | remove if present (idempotent)                           |
//! | `cursor`   | update cursor + last-seen of a *known* user only         |
//! | `edit`     | none; edits are forwarded, not merged                    |
//!
//! Events are applied strictly in arrival order. `last_seen` is
//! last-write-wins: the newest event overwrites it even if its timestamp
//! is older than the stored one.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::{
    CollaborationEvent, CursorPosition, EventKind, EventPayload, PresenceData,
};

/// A remote (or local) participant as last reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub user_id: String,
    pub name: String,
    /// Server-assigned display color, e.g. `#f00`.
    pub color: String,
    pub cursor: Option<CursorPosition>,
    pub last_seen: DateTime<Utc>,
}

/// Mapping from user id to collaborator.
///
/// Every key equals its value's `user_id`; entries can only be inserted
/// through reconciliation, which preserves that.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct CollaboratorRegistry {
    users: HashMap<String, Collaborator>,
}

impl CollaboratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a full presence list.
    ///
    /// Entries without `last_seen` take `fallback_seen`, which `apply`
    /// sets to the frame's server timestamp or, failing that, its receipt time. Duplicate ids keep
    /// the last entry in list order.
    pub fn from_presence(data: &PresenceData, fallback_seen: DateTime<Utc>) -> Self {
        let users = data
            .active_users
            .iter()
            .map(|entry| {
                let collaborator = Collaborator {
                    user_id: entry.user_id.clone(),
                    name: entry.name.clone(),
                    color: entry.color.clone(),
                    cursor: entry.cursor.clone(),
                    last_seen: entry.last_seen.unwrap_or(fallback_seen),
                };
                (entry.user_id.clone(), collaborator)
            })
            .collect();
        Self { users }
    }

    /// Apply one event, returning the replacement registry.
    pub fn apply(&self, event: &CollaborationEvent) -> Self {
        apply(event, self)
    }

    pub fn get(&self, user_id: &str) -> Option<&Collaborator> {
        self.users.get(user_id)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Iterate in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Collaborator> {
        self.users.values()
    }

    /// Collaborators ordered by name, then id, for display.
    pub fn sorted(&self) -> Vec<&Collaborator> {
        let mut list: Vec<&Collaborator> = self.users.values().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.user_id.cmp(&b.user_id)));
        list
    }

    /// Everyone except the given user, ordered as in [`sorted`](Self::sorted).
    pub fn others(&self, current_user_id: &str) -> Vec<&Collaborator> {
        self.sorted()
            .into_iter()
            .filter(|c| c.user_id != current_user_id)
            .collect()
    }
}

/// Reconcile one event against the prior registry.
///
/// Pure: the prior registry is left untouched and the result is the full
/// replacement. Events that cannot be applied safely (a `join` missing
/// name or color, a `cursor` for an unknown user) yield an unchanged copy.
pub fn apply(event: &CollaborationEvent, registry: &CollaboratorRegistry) -> CollaboratorRegistry {
    match (&event.kind, &event.payload) {
        (EventKind::Presence, EventPayload::Presence(data)) => {
            CollaboratorRegistry::from_presence(data, event.seen_at())
        }

        (EventKind::Join, _) => {
            let (Some(name), Some(color)) = (&event.name, &event.color) else {
                return registry.clone();
            };
            let mut next = registry.clone();
            next.users.insert(
                event.user_id.clone(),
                Collaborator {
                    user_id: event.user_id.clone(),
                    name: name.clone(),
                    color: color.clone(),
                    cursor: None,
                    last_seen: event.seen_at(),
                },
            );
            next
        }

        (EventKind::Leave, _) => {
            let mut next = registry.clone();
            next.users.remove(&event.user_id);
            next
        }

        (EventKind::Cursor, EventPayload::Cursor(position)) => {
            let mut next = registry.clone();
            if let Some(collaborator) = next.users.get_mut(&event.user_id) {
                collaborator.cursor = Some(position.clone());
                collaborator.last_seen = event.seen_at();
            }
            next
        }

        // Edits, and any kind/payload pair the decoder would never produce.
        _ => registry.clone(),
    }
}
