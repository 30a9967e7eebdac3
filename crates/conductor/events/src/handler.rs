//! Event handlers
//!
//! A handler is any `Send + Sync` value implementing [`EventHandler`] for one
//! event family. Closures are adapted with [`handler_fn`].

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

/// Subscriber for events of type `E`.
///
/// A returned error is counted against the emission but never stops delivery
/// to other handlers.
#[async_trait]
pub trait EventHandler<E>: Send + Sync {
    async fn handle(&self, event: &E) -> anyhow::Result<()>;
}

/// Shared handle used for registration and removal.
pub type SharedHandler<E> = Arc<dyn EventHandler<E>>;

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<E, F> {
    f: F,
    _event: PhantomData<fn(E)>,
}

#[async_trait]
impl<E, F, Fut> EventHandler<E> for FnHandler<E, F>
where
    E: Clone + Send + Sync + 'static,
    F: Fn(E) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, event: &E) -> anyhow::Result<()> {
        (self.f)(event.clone()).await
    }
}

/// Wrap an async closure as a shared handler.
///
/// ```ignore
/// let handler = handler_fn(|event: StepEvent| async move {
///     println!("{}", event.step_id);
///     anyhow::Ok(())
/// });
/// registry.on_step(handler.clone());
/// ```
pub fn handler_fn<E, F, Fut>(f: F) -> SharedHandler<E>
where
    E: Clone + Send + Sync + 'static,
    F: Fn(E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _event: PhantomData,
    })
}

/// Handler identity: two handles are the same handler when they point at
/// the same allocation.
pub(crate) fn same_handler<E>(a: &SharedHandler<E>, b: &SharedHandler<E>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
