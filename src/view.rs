//! Derivation of the visible list from the confirmed list and the pending mutations.
//!
//! The functions here are pure: they never touch the queue and can be called at any time.
//! Rollback needs no undo step, since a discarded mutation simply stops contributing to the next build.

use std::collections::HashSet;

use crate::{
    item::{Item, position_of},
    queue::{MutationKind, PendingMutation},
};


/// An item of the visible list, with the kind of the mutation still awaiting confirmation for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewEntry<T> {
    pub item: Item<T>,
    pub pending: Option<MutationKind>,
}

impl<T> ViewEntry<T> {
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Builds the visible list.
///
/// Starts from `base` in stored order, applies every pending `Add` (appended) and `Update`
/// (replaced in place) in submission order, then drops every item whose id has a pending `Remove`.
pub fn build<'a, T: Clone + 'a>(
    base: &[Item<T>],
    pending: impl IntoIterator<Item = &'a PendingMutation<T>>,
) -> Vec<Item<T>> {
    build_entries(base, pending)
        .into_iter()
        .map(|e| e.item)
        .collect()
}

/// Same as [`build`], but keeps track of which entries are not yet confirmed.
pub fn build_entries<'a, T: Clone + 'a>(
    base: &[Item<T>],
    pending: impl IntoIterator<Item = &'a PendingMutation<T>>,
) -> Vec<ViewEntry<T>> {
    let mut entries: Vec<_> = base
        .iter()
        .map(|item| ViewEntry {
            item: item.clone(),
            pending: None,
        })
        .collect();
    let mut removes = HashSet::new();
    for p in pending {
        match p.kind {
            MutationKind::Add => entries.push(ViewEntry {
                item: p.item.clone(),
                pending: Some(MutationKind::Add),
            }),
            MutationKind::Update => {
                if let Some(index) = entries.iter().position(|e| e.item.id == p.item.id) {
                    entries[index] = ViewEntry {
                        item: p.item.clone(),
                        pending: Some(MutationKind::Update),
                    };
                }
            }
            MutationKind::Remove => {
                removes.insert(p.item.id);
            }
        }
    }
    if !removes.is_empty() {
        entries.retain(|e| !removes.contains(&e.item.id));
    }
    tracing::trace!(len = entries.len(), "view rebuilt");
    entries
}

/// Applies a confirmed mutation to the confirmed list.
///
/// The id of a confirmed `Add` must not be in `base`. A confirmed `Update` keeps the id of `target`.
pub(crate) fn commit<T>(
    base: &mut Vec<Item<T>>,
    kind: MutationKind,
    target: &Item<T>,
    confirmed: Item<T>,
) {
    match kind {
        MutationKind::Add => {
            debug_assert!(position_of(base, confirmed.id).is_none());
            base.push(confirmed)
        }
        MutationKind::Update => {
            if let Some(index) = position_of(base, target.id) {
                base[index] = confirmed.with_id(target.id);
            }
        }
        MutationKind::Remove => base.retain(|item| item.id != target.id),
    }
}
