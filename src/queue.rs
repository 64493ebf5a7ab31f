use std::{collections::BTreeMap, time::Instant};

use parse_display::Display;
use serde::{Deserialize, Serialize};
use slabmap::SlabMap;

use crate::{
    item::{Item, ItemId, position_of},
    utils::timer::TimeoutError,
};


/// Kind of change a [`PendingMutation`] applies to the confirmed list.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    /// Append a new item.
    Add,
    /// Remove the item with the same id.
    Remove,
    /// Replace the payload of the item with the same id.
    Update,
}

/// Links a submitted mutation to its resolution.
///
/// Ids are handed out in submission order and never reused by the same queue.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("#{0}")]
pub struct CorrelationId(u64);

impl CorrelationId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// A mutation shown optimistically while its operation is in flight.
#[derive(Clone, Debug)]
pub struct PendingMutation<T> {
    pub correlation_id: CorrelationId,
    pub kind: MutationKind,
    pub item: Item<T>,
    pub submitted_at: Instant,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum ConflictReason {
    #[display("is already confirmed")]
    Confirmed,
    #[display("has a pending {0}")]
    Pending(MutationKind),
    #[display("is not found")]
    NotFound,
}

/// The item id cannot be used for the requested mutation.
///
/// The caller must pick another id, or wait for the pending mutation to settle, before retrying.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
#[display("item {id} {reason}")]
pub struct ConflictError {
    pub id: ItemId,
    pub reason: ConflictReason,
}
impl std::error::Error for ConflictError {}

/// `resolve` was called for an unknown or already resolved correlation id.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[display("mutation {correlation_id} is unknown or already resolved")]
pub struct InvalidOperation {
    pub correlation_id: CorrelationId,
}
impl std::error::Error for InvalidOperation {}

/// The asynchronous operation backing a mutation failed.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
#[display("operation failed: {message}")]
pub struct OperationFailure {
    message: String,
}
impl OperationFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
    pub fn message(&self) -> &str {
        &self.message
    }
}
impl std::error::Error for OperationFailure {}

impl From<TimeoutError> for OperationFailure {
    fn from(e: TimeoutError) -> Self {
        Self::new(e.to_string())
    }
}

/// How an operation settled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The server confirmed the mutation. For `Add` the item may carry a new id.
    Success(Item<T>),
    Failure(OperationFailure),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
    pub fn confirmed(&self) -> Option<&Item<T>> {
        match self {
            Self::Success(item) => Some(item),
            Self::Failure(_) => None,
        }
    }
    pub fn failure(&self) -> Option<&OperationFailure> {
        match self {
            Self::Success(_) => None,
            Self::Failure(e) => Some(e),
        }
    }
}
impl<T> From<Result<Item<T>, OperationFailure>> for Outcome<T> {
    fn from(value: Result<Item<T>, OperationFailure>) -> Self {
        match value {
            Ok(item) => Self::Success(item),
            Err(e) => Self::Failure(e),
        }
    }
}

/// A pending mutation removed from the queue together with its outcome.
#[derive(Clone, Debug)]
pub struct Settlement<T> {
    pub mutation: PendingMutation<T>,
    pub outcome: Outcome<T>,
}

/// In-flight optimistic mutations, kept in submission order.
pub struct MutationQueue<T> {
    entries: SlabMap<PendingMutation<T>>,
    order: BTreeMap<CorrelationId, usize>,
    next_id: u64,
}

impl<T> MutationQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: SlabMap::new(),
            order: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Records a mutation as pending and returns its correlation id.
    ///
    /// An `Add` must use an id that is neither confirmed in `base` nor used by another pending mutation.
    /// A `Remove` or `Update` must target a confirmed id that no other pending mutation targets.
    pub fn enqueue(
        &mut self,
        kind: MutationKind,
        item: Item<T>,
        base: &[Item<T>],
    ) -> Result<CorrelationId, ConflictError> {
        self.check(kind, item.id, base)?;
        let correlation_id = CorrelationId(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .expect("correlation id overflow");
        let key = self.entries.insert(PendingMutation {
            correlation_id,
            kind,
            item,
            submitted_at: Instant::now(),
        });
        self.order.insert(correlation_id, key);
        Ok(correlation_id)
    }

    /// Checks that `id` can be used for a new mutation of `kind`.
    pub(crate) fn check(
        &self,
        kind: MutationKind,
        id: ItemId,
        base: &[Item<T>],
    ) -> Result<(), ConflictError> {
        let reason = if let Some(p) = self.pending_for(id) {
            ConflictReason::Pending(p.kind)
        } else {
            let confirmed = position_of(base, id).is_some();
            match kind {
                MutationKind::Add if confirmed => ConflictReason::Confirmed,
                MutationKind::Remove | MutationKind::Update if !confirmed => {
                    ConflictReason::NotFound
                }
                _ => return Ok(()),
            }
        };
        Err(ConflictError { id, reason })
    }

    /// Removes the pending mutation and pairs it with its outcome.
    ///
    /// Each correlation id can be resolved exactly once.
    pub fn resolve(
        &mut self,
        correlation_id: CorrelationId,
        outcome: Outcome<T>,
    ) -> Result<Settlement<T>, InvalidOperation> {
        let invalid = InvalidOperation { correlation_id };
        let key = self.order.remove(&correlation_id).ok_or(invalid)?;
        let mutation = self.entries.remove(key).ok_or(invalid)?;
        Ok(Settlement { mutation, outcome })
    }

    pub fn get(&self, correlation_id: CorrelationId) -> Option<&PendingMutation<T>> {
        self.order
            .get(&correlation_id)
            .and_then(|&key| self.entries.get(key))
    }

    /// Returns the pending mutation targeting `id`, if any.
    pub fn pending_for(&self, id: ItemId) -> Option<&PendingMutation<T>> {
        self.iter().find(|p| p.item.id == id)
    }

    /// Iterates pending mutations in submission order.
    pub fn iter(&self) -> impl Iterator<Item = &PendingMutation<T>> {
        self.order.values().map(|&key| &self.entries[key])
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
impl<T> Default for MutationQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
