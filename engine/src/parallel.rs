use futures_util::Stream;
use log::trace;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use wallet_storage_signal::context::Context;

/// Results of [`map_parallel`] in completion order. Dropping it aborts all outstanding work.
pub struct ParallelResults<O> {
    rx: mpsc::Receiver<O>,
    driver: JoinHandle<()>,
}

impl<O> ParallelResults<O> {
    pub async fn next(&mut self) -> Option<O> {
        self.rx.recv().await
    }

    pub async fn collect(mut self) -> Vec<O> {
        let mut outputs = Vec::new();
        while let Some(output) = self.rx.recv().await {
            outputs.push(output);
        }
        outputs
    }
}

impl<O> Stream for ParallelResults<O> {
    type Item = O;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<O>> {
        self.rx.poll_recv(cx)
    }
}

impl<O> Drop for ParallelResults<O> {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Runs `f` on every input in its own task and yields outputs as they complete, holding at most
/// `buffer` unconsumed outputs. The stream ends once every task finished or `ctx` is cancelled.
/// Must be called from within a tokio runtime.
pub fn map_parallel<I, F, Fut, O>(ctx: &Context, inputs: I, buffer: usize, f: F) -> ParallelResults<O>
where
    I: IntoIterator + Send + 'static,
    I::IntoIter: Send,
    I::Item: Send + 'static,
    F: Fn(Context, I::Item) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
    O: Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let ctx = ctx.clone();
    let f = Arc::new(f);
    let driver = tokio::spawn(async move {
        let mut tasks = JoinSet::new();
        for input in inputs {
            if ctx.is_cancelled() || tx.is_closed() {
                break;
            }
            let (tx, ctx, f) = (tx.clone(), ctx.clone(), f.clone());
            tasks.spawn(async move {
                let output = tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return,
                    output = (*f)(ctx.clone(), input) => output,
                };
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => {}
                    _ = tx.send(output) => {}
                }
            });
        }
        drop(tx);
        trace!("Spawned {} parallel tasks", tasks.len());
        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    tasks.abort_all();
                    break;
                }
                joined = tasks.join_next() => {
                    if joined.is_none() {
                        break;
                    }
                }
            }
        }
    });
    ParallelResults { rx, driver }
}
