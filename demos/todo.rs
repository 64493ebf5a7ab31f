use futures::executor::LocalPool;
use optilist::{
    Item, ItemId, Outcome, Reconciler,
    backend::{MockBackend, MockBackendConfig},
};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "debug".into()))
        .init();

    let mut pool = LocalPool::new();
    let server = MockBackend::new(MockBackendConfig {
        delay_ms: 300,
        failure_rate: 0.3,
        first_id: 4,
        seed: 1,
        ..MockBackendConfig::default()
    });
    let todos = Reconciler::new(
        [
            Item::new(1, "Learn React 19"),
            Item::new(2, "Create presentation"),
            Item::new(3, "Explain new features to colleagues"),
        ],
        pool.spawner(),
    );

    let _changes = todos.subscribe(|items| {
        let texts: Vec<_> = items.iter().map(|item| item.payload).collect();
        println!("{texts:?}");
    });
    let _errors = todos.on_settled(|s| {
        if let Outcome::Failure(e) = &s.outcome {
            println!("could not {} \"{}\": {e}", s.mutation.kind, s.mutation.item.payload);
        }
    });

    for (id, text) in [(1000, "Write slides"), (1001, "Book a room")] {
        let item = Item::new(id, text);
        todos.add(item.clone(), || server.save(item)).unwrap();
    }
    todos.remove(ItemId(2), |item| server.delete(item)).unwrap();

    pool.run(); // prints the list after every change
}
