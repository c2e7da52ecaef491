use futures_util::future::select_all;
use std::sync::Arc;
use tokio::sync::watch;

/// Cancellation handle passed down to every funding and action call.
/// Cancelling a context also cancels all contexts derived from it with [`Context::child`].
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled_tx: watch::Sender<bool>,
    parent: Option<Context>,
}

impl Context {
    pub fn new() -> Context {
        let (cancelled_tx, _) = watch::channel(false);
        Context { inner: Arc::new(Inner { cancelled_tx, parent: None }) }
    }

    pub fn child(&self) -> Context {
        let (cancelled_tx, _) = watch::channel(false);
        Context { inner: Arc::new(Inner { cancelled_tx, parent: Some(self.clone()) }) }
    }

    pub fn cancel(&self) {
        self.inner.cancelled_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled_tx.borrow() || self.inner.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// Resolves once this context or any of its ancestors is cancelled.
    pub async fn cancelled(&self) {
        let mut receivers = Vec::new();
        let mut current = Some(self);
        while let Some(ctx) = current {
            receivers.push(ctx.inner.cancelled_tx.subscribe());
            current = ctx.inner.parent.as_ref();
        }
        let waits = receivers.iter_mut().map(|rx| {
            Box::pin(async move {
                let _ = rx.wait_for(|cancelled| *cancelled).await;
            })
        });
        select_all(waits).await;
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
