//! Optimistic list mutations with automatic rollback.
//!
//! A [`Reconciler`] owns a list of confirmed [`Item`]s. Mutations are submitted together with the
//! asynchronous operation that persists them, and are visible immediately. When an operation
//! succeeds, its confirmed item is folded into the confirmed list. When it fails, the pending
//! mutation is discarded and the visible list goes back to what it was.
//!
//! ```
//! use futures::{executor::LocalPool, future::ready};
//! use optilist::{Item, Reconciler};
//!
//! let mut pool = LocalPool::new();
//! let todos = Reconciler::new([Item::new(1, "A")], pool.spawner());
//!
//! todos.add(Item::new(1000, "B"), || ready(Ok(Item::new(2, "B")))).unwrap();
//! assert_eq!(todos.observe(), [Item::new(1, "A"), Item::new(1000, "B")]);
//!
//! pool.run_until_stalled();
//! assert_eq!(todos.observe(), [Item::new(1, "A"), Item::new(2, "B")]);
//! ```
//!
//! Everything runs on one thread. The visible list is recomputed from the confirmed list and the
//! pending mutations every time it is observed; see [`view`].

pub mod backend;
mod item;
mod queue;
mod reconciler;
mod subscription;
pub mod utils;
pub mod view;

pub use item::*;
pub use queue::*;
pub use reconciler::*;
pub use subscription::*;
pub use view::ViewEntry;
