//! Receivers used by integration tests.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use bidirpc::{MethodTable, Service};
use tokio::sync::Notify;

/// `Echo.Say` returns its argument; `Echo.Fail` always errors.
pub struct Echo;

impl Service for Echo {
    const NAME: &'static str = "Echo";

    fn methods(table: &mut MethodTable<Self>) {
        table
            .method("Say", |_: Arc<Self>, text: String| async move { Ok::<_, String>(text) })
            .method("Fail", |_: Arc<Self>, text: String| async move {
                Err::<String, _>(format!("refused: {text}"))
            });
    }
}

/// `Counter.Next` returns a per-receiver sequence starting at 1.
#[derive(Default)]
pub struct Counter {
    next: AtomicU64,
}

impl Service for Counter {
    const NAME: &'static str = "Counter";

    fn methods(table: &mut MethodTable<Self>) {
        table.method("Next", |this: Arc<Self>, (): ()| async move {
            Ok::<_, String>(this.next.fetch_add(1, Ordering::SeqCst) + 1)
        });
    }
}

/// `Stall.Wait` never replies until `release` is notified.
#[derive(Default)]
pub struct Stall {
    /// Wakes every stalled call.
    pub release: Arc<Notify>,
}

impl Service for Stall {
    const NAME: &'static str = "Stall";

    fn methods(table: &mut MethodTable<Self>) {
        table.method("Wait", |this: Arc<Self>, value: u32| async move {
            this.release.notified().await;
            Ok::<_, String>(value)
        });
    }
}
