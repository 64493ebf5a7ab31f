use std::{
    cell::RefCell,
    future::Future,
    rc::{Rc, Weak},
};

use derive_ex::derive_ex;
use futures::task::{LocalSpawn, LocalSpawnExt};
use parse_display::Display;
use serde::{Deserialize, Serialize};
use slabmap::SlabMap;
use tracing::{debug, warn};

use crate::{
    Subscription,
    item::{Item, ItemId, position_of},
    queue::{
        ConflictError, ConflictReason, CorrelationId, MutationKind, MutationQueue,
        OperationFailure, Outcome, PendingMutation, Settlement,
    },
    view::{self, ViewEntry},
};

#[cfg(test)]
mod tests;

/// What happens to the confirmed list when a `Remove` operation fails.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Serialize, Deserialize)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RemoveFailurePolicy {
    /// The item reappears in the visible list.
    #[default]
    Rollback,
    /// The item is dropped from the confirmed list anyway.
    KeepRemoved,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerOptions {
    pub remove_failure: RemoveFailurePolicy,
}

/// Owns a confirmed list and shows mutations on it before they are confirmed.
///
/// `Reconciler` is a handle; clones share the same list. Every mutation is submitted together with
/// the asynchronous operation that persists it. The mutation is visible through [`observe`](Self::observe)
/// as soon as [`submit`](Self::submit) returns. When the operation succeeds the confirmed item is folded
/// into the confirmed list. When it fails the mutation is dropped, which rolls the visible list back.
///
/// Operations run on the [`LocalSpawn`] given at construction, so everything stays on one thread.
#[derive_ex(Clone, bound())]
pub struct Reconciler<T: 'static>(Rc<ReconcilerNode<T>>);

impl<T: Clone + 'static> Reconciler<T> {
    pub fn new(
        base: impl IntoIterator<Item = Item<T>>,
        spawner: impl LocalSpawn + 'static,
    ) -> Self {
        Self::with_options(base, spawner, ReconcilerOptions::default())
    }

    pub fn with_options(
        base: impl IntoIterator<Item = Item<T>>,
        spawner: impl LocalSpawn + 'static,
        options: ReconcilerOptions,
    ) -> Self {
        let mut items: Vec<Item<T>> = Vec::new();
        for item in base {
            if position_of(&items, item.id).is_some() {
                warn!(id = %item.id, "duplicate id in initial list ignored");
                continue;
            }
            items.push(item);
        }
        Self(Rc::new(ReconcilerNode {
            state: RefCell::new(ReconcilerState {
                base: items,
                queue: MutationQueue::new(),
            }),
            listeners: RefCell::new(Listeners {
                changed: SlabMap::new(),
                settled: SlabMap::new(),
            }),
            spawner: Rc::new(spawner),
            options,
        }))
    }

    /// Shows `item` as mutated right away and starts `operation` in the background.
    ///
    /// The returned future must resolve to the confirmed item, or fail.
    /// For `Add` the confirmed item may carry a server-assigned id that replaces the id of `item`.
    /// If that id is confirmed or used by another pending mutation, the `Add` settles as a failure.
    /// For `Update` the confirmed item keeps the id of `item`.
    ///
    /// Fails without side effects if the id of `item` cannot be used for `kind`.
    pub fn submit<Fut>(
        &self,
        kind: MutationKind,
        item: Item<T>,
        operation: impl FnOnce() -> Fut,
    ) -> Result<CorrelationId, ConflictError>
    where
        Fut: Future<Output = Result<Item<T>, OperationFailure>> + 'static,
    {
        let id = item.id;
        let correlation_id = {
            let s = &mut *self.0.state.borrow_mut();
            s.queue.enqueue(kind, item, &s.base)?
        };
        debug!(%correlation_id, %kind, %id, "mutation submitted");
        self.0.notify_changed();

        let fut = operation();
        let node = Rc::downgrade(&self.0);
        let task = async move {
            let outcome = Outcome::from(fut.await);
            if let Some(node) = Weak::upgrade(&node) {
                node.settle(correlation_id, outcome);
            }
        };
        if let Err(e) = self.0.spawner.spawn_local(task) {
            self.0.settle(
                correlation_id,
                Outcome::Failure(OperationFailure::new(e.to_string())),
            );
        }
        Ok(correlation_id)
    }

    pub fn add<Fut>(
        &self,
        item: Item<T>,
        operation: impl FnOnce() -> Fut,
    ) -> Result<CorrelationId, ConflictError>
    where
        Fut: Future<Output = Result<Item<T>, OperationFailure>> + 'static,
    {
        self.submit(MutationKind::Add, item, operation)
    }

    /// Removes the confirmed item with `id`. `operation` receives the item being removed.
    pub fn remove<Fut>(
        &self,
        id: ItemId,
        operation: impl FnOnce(Item<T>) -> Fut,
    ) -> Result<CorrelationId, ConflictError>
    where
        Fut: Future<Output = Result<Item<T>, OperationFailure>> + 'static,
    {
        let item = {
            let s = self.0.state.borrow();
            match position_of(&s.base, id) {
                Some(index) => s.base[index].clone(),
                None => {
                    let reason = s
                        .queue
                        .pending_for(id)
                        .map_or(ConflictReason::NotFound, |p| ConflictReason::Pending(p.kind));
                    return Err(ConflictError { id, reason });
                }
            }
        };
        let arg = item.clone();
        self.submit(MutationKind::Remove, item, move || operation(arg))
    }

    pub fn update<Fut>(
        &self,
        item: Item<T>,
        operation: impl FnOnce() -> Fut,
    ) -> Result<CorrelationId, ConflictError>
    where
        Fut: Future<Output = Result<Item<T>, OperationFailure>> + 'static,
    {
        self.submit(MutationKind::Update, item, operation)
    }

    /// Returns the visible list: the confirmed list with every pending mutation applied.
    pub fn observe(&self) -> Vec<Item<T>> {
        self.0.observe()
    }

    /// Returns the visible list, marking the entries that are not confirmed yet.
    pub fn observe_entries(&self) -> Vec<ViewEntry<T>> {
        let s = self.0.state.borrow();
        view::build_entries(&s.base, s.queue.iter())
    }

    /// Returns the confirmed list.
    pub fn base(&self) -> Vec<Item<T>> {
        self.0.state.borrow().base.clone()
    }

    /// Returns the pending mutations in submission order.
    pub fn pending(&self) -> Vec<PendingMutation<T>> {
        self.0.state.borrow().queue.iter().cloned().collect()
    }

    pub fn pending_len(&self) -> usize {
        self.0.state.borrow().queue.len()
    }

    /// Returns `true` while at least one operation has not settled.
    pub fn is_pending(&self) -> bool {
        !self.0.state.borrow().queue.is_empty()
    }

    /// Calls `f` with the visible list every time a mutation is submitted or settles.
    pub fn subscribe(&self, f: impl Fn(&[Item<T>]) + 'static) -> Subscription {
        let key = self.0.listeners.borrow_mut().changed.insert(Rc::new(f));
        Subscription::from_weak_fn(Rc::downgrade(&self.0), move |node| {
            node.listeners.borrow_mut().changed.remove(key);
        })
    }

    /// Calls `f` with every settled mutation and its outcome.
    ///
    /// Failed operations are rolled back silently; this is the place to report them.
    pub fn on_settled(&self, f: impl Fn(&Settlement<T>) + 'static) -> Subscription {
        let key = self.0.listeners.borrow_mut().settled.insert(Rc::new(f));
        Subscription::from_weak_fn(Rc::downgrade(&self.0), move |node| {
            node.listeners.borrow_mut().settled.remove(key);
        })
    }
}
impl<T: std::fmt::Debug> std::fmt::Debug for Reconciler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.state.try_borrow() {
            Ok(s) => f
                .debug_struct("Reconciler")
                .field("base", &s.base)
                .field("pending", &s.queue.len())
                .finish(),
            Err(_) => write!(f, "<borrowed>"),
        }
    }
}
impl<T> Serialize for Reconciler<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        match self.0.state.try_borrow() {
            Ok(s) => s.base.serialize(serializer),
            Err(_) => Err(serde::ser::Error::custom("borrowed")),
        }
    }
}

type ChangeListener<T> = Rc<dyn Fn(&[Item<T>])>;
type SettleListener<T> = Rc<dyn Fn(&Settlement<T>)>;

struct Listeners<T: 'static> {
    changed: SlabMap<ChangeListener<T>>,
    settled: SlabMap<SettleListener<T>>,
}

struct ReconcilerState<T> {
    base: Vec<Item<T>>,
    queue: MutationQueue<T>,
}
impl<T: Clone> ReconcilerState<T> {
    /// Turns a confirmed `Add` into a failure if the server-assigned id is already in use,
    /// either by a confirmed item or by another pending mutation.
    fn reject_id_clash(&self, settlement: &mut Settlement<T>) {
        let clash = match &settlement.outcome {
            Outcome::Success(confirmed) if settlement.mutation.kind == MutationKind::Add => self
                .queue
                .check(MutationKind::Add, confirmed.id, &self.base)
                .err(),
            _ => None,
        };
        if let Some(e) = clash {
            settlement.outcome = Outcome::Failure(OperationFailure::new(e.to_string()));
        }
    }

    fn apply(&mut self, settlement: &Settlement<T>, options: ReconcilerOptions) {
        let m = &settlement.mutation;
        match &settlement.outcome {
            Outcome::Success(confirmed) => {
                view::commit(&mut self.base, m.kind, &m.item, confirmed.clone())
            }
            Outcome::Failure(_) => {
                if m.kind == MutationKind::Remove
                    && options.remove_failure == RemoveFailurePolicy::KeepRemoved
                {
                    view::commit(&mut self.base, m.kind, &m.item, m.item.clone())
                }
            }
        }
    }
}

struct ReconcilerNode<T: 'static> {
    state: RefCell<ReconcilerState<T>>,
    listeners: RefCell<Listeners<T>>,
    spawner: Rc<dyn LocalSpawn>,
    options: ReconcilerOptions,
}
impl<T: Clone + 'static> ReconcilerNode<T> {
    fn observe(&self) -> Vec<Item<T>> {
        let s = self.state.borrow();
        view::build(&s.base, s.queue.iter())
    }

    fn settle(&self, correlation_id: CorrelationId, outcome: Outcome<T>) {
        let settlement = {
            let s = &mut *self.state.borrow_mut();
            let mut settlement = match s.queue.resolve(correlation_id, outcome) {
                Ok(settlement) => settlement,
                Err(e) => panic!("{e}"),
            };
            s.reject_id_clash(&mut settlement);
            s.apply(&settlement, self.options);
            settlement
        };
        let kind = settlement.mutation.kind;
        let id = settlement.mutation.item.id;
        match &settlement.outcome {
            Outcome::Success(item) => debug!(
                %correlation_id,
                %kind,
                %id,
                confirmed_id = %item.id,
                "mutation committed"
            ),
            Outcome::Failure(e) => {
                warn!(%correlation_id, %kind, %id, error = %e, "mutation rolled back");
            }
        }
        let listeners: Vec<_> = self.listeners.borrow().settled.values().cloned().collect();
        for f in listeners {
            f(&settlement);
        }
        self.notify_changed();
    }

    fn notify_changed(&self) {
        let listeners: Vec<_> = self.listeners.borrow().changed.values().cloned().collect();
        if listeners.is_empty() {
            return;
        }
        let items = self.observe();
        for f in listeners {
            f(&items);
        }
    }
}
