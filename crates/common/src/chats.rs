//! Recipient partition: every recipient sits in exactly one delivery bucket.

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

use crate::{Error, Result, types::RecipientId};

/// Delivery state of one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChatState {
    Pending,
    Success,
    Failed,
}

impl ChatState {
    pub const ALL: &'static [ChatState] = &[Self::Pending, Self::Success, Self::Failed];
}

impl fmt::Display for ChatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Three disjoint buckets of recipients.
///
/// The set never holds duplicates and a recipient only ever moves between
/// buckets; it is never dropped. Callers must not rely on the order in which
/// [`ChatSet::pop_pending`] hands out recipients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSet {
    pending: BTreeSet<RecipientId>,
    success: BTreeSet<RecipientId>,
    failed: BTreeSet<RecipientId>,
}

impl ChatSet {
    /// Build a set where every (deduplicated) recipient is pending.
    pub fn from_recipients(ids: impl IntoIterator<Item = RecipientId>) -> Self {
        Self {
            pending: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    fn bucket(&self, state: ChatState) -> &BTreeSet<RecipientId> {
        match state {
            ChatState::Pending => &self.pending,
            ChatState::Success => &self.success,
            ChatState::Failed => &self.failed,
        }
    }

    fn bucket_mut(&mut self, state: ChatState) -> &mut BTreeSet<RecipientId> {
        match state {
            ChatState::Pending => &mut self.pending,
            ChatState::Success => &mut self.success,
            ChatState::Failed => &mut self.failed,
        }
    }

    /// Union of the given buckets. An empty slice selects every bucket.
    pub fn get(&self, states: &[ChatState]) -> BTreeSet<RecipientId> {
        let states = if states.is_empty() {
            ChatState::ALL
        } else {
            states
        };
        states
            .iter()
            .flat_map(|state| self.bucket(*state).iter().copied())
            .collect()
    }

    /// Bucket currently holding `id`, if any.
    pub fn state_of(&self, id: RecipientId) -> Option<ChatState> {
        ChatState::ALL
            .iter()
            .copied()
            .find(|state| self.bucket(*state).contains(&id))
    }

    pub fn contains(&self, id: RecipientId) -> bool {
        self.state_of(id).is_some()
    }

    /// Remove and return one pending recipient.
    pub fn pop_pending(&mut self) -> Option<RecipientId> {
        self.pending.pop_first()
    }

    /// Move `id` from `from` to `to`.
    pub fn transition(&mut self, id: RecipientId, from: ChatState, to: ChatState) -> Result<()> {
        if !self.bucket_mut(from).remove(&id) {
            return Err(Error::invalid_state(id, from));
        }
        self.bucket_mut(to).insert(id);
        Ok(())
    }

    /// Put `id` into `state` if it is not tracked anywhere yet.
    ///
    /// Used by the send loop to record the outcome of a recipient it popped.
    pub fn insert(&mut self, id: RecipientId, state: ChatState) -> bool {
        if self.contains(id) {
            return false;
        }
        self.bucket_mut(state).insert(id)
    }

    /// Add recipients that are not yet tracked in any bucket.
    ///
    /// Returns only the newly added ids, so an empty result means nothing
    /// changed.
    pub fn add(
        &mut self,
        ids: impl IntoIterator<Item = RecipientId>,
        state: ChatState,
    ) -> BTreeSet<RecipientId> {
        let mut added = BTreeSet::new();
        for id in ids {
            if self.contains(id) {
                continue;
            }
            self.bucket_mut(state).insert(id);
            added.insert(id);
        }
        added
    }

    pub fn count(&self, state: ChatState) -> usize {
        self.bucket(state).len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len() + self.success.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
