use parse_display::Display;
use serde::{Deserialize, Serialize};


/// Identifier of an [`Item`], unique within a confirmed list.
#[derive(
    Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[display("{0}")]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl From<u64> for ItemId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// An element of a list, addressed by its [`ItemId`].
///
/// The id is either generated by the caller before the item is confirmed,
/// or assigned by the server when the item is confirmed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item<T> {
    pub id: ItemId,
    pub payload: T,
}

impl<T> Item<T> {
    pub fn new(id: u64, payload: T) -> Self {
        Self {
            id: ItemId(id),
            payload,
        }
    }

    /// Returns the same payload under another id.
    pub fn with_id(self, id: ItemId) -> Self {
        Self {
            id,
            payload: self.payload,
        }
    }
}

pub(crate) fn position_of<T>(items: &[Item<T>], id: ItemId) -> Option<usize> {
    items.iter().position(|item| item.id == id)
}
