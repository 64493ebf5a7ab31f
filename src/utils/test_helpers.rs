use std::future::Future;

use futures::channel::oneshot;

use crate::{Item, OperationFailure};

pub type Reply<T> = oneshot::Sender<Result<Item<T>, OperationFailure>>;

/// Returns an operation that settles when the test sends to the returned sender.
pub fn reply<T: 'static>() -> (
    Reply<T>,
    impl Future<Output = Result<Item<T>, OperationFailure>> + 'static,
) {
    let (tx, rx) = oneshot::channel();
    let fut = async move {
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(OperationFailure::new("reply dropped")),
        }
    };
    (tx, fut)
}

pub fn todo(id: u64, text: &'static str) -> Item<&'static str> {
    Item::new(id, text)
}

pub fn failure() -> Result<Item<&'static str>, OperationFailure> {
    Err(OperationFailure::new("server connection error"))
}
