//! Order-preserving stage pool.

use super::pool::StageHandle;
use super::runner::StageRunner;
use super::StageDescriptor;
use crate::context::{Admit, ItemContext, ItemRuntime};
use crate::queue::BoundedQueue;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, trace};

type Slot<U> = (u64, Option<ItemContext<U>>, OwnedSemaphorePermit);

/// Runs a stage concurrently while emitting items in input order.
///
/// A dispatcher numbers items as they are dequeued and runs each one in
/// its own task, gated by a semaphore of `concurrency` permits. An emitter
/// buffers finished items by sequence number and writes them to the
/// output strictly in order; a failed item leaves an empty slot that is
/// skipped. A permit is returned only when its slot is emitted, so at most
/// `concurrency` items are in the transform or waiting for emission.
#[derive(Debug, Clone, Copy)]
pub struct OrderedStagePool;

impl OrderedStagePool {
    /// Starts the dispatcher and emitter for `descriptor`.
    pub fn launch<I, T, U>(
        descriptor: &StageDescriptor<T, U>,
        input: Arc<BoundedQueue<I>>,
        output: Arc<BoundedQueue<ItemContext<U>>>,
        runtime: Arc<ItemRuntime>,
    ) -> StageHandle
    where
        I: Admit<T>,
        T: Send + 'static,
        U: Send + 'static,
    {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let runner = StageRunner::new(
            descriptor.name(),
            descriptor.transform().clone(),
            runtime,
            in_flight.clone(),
        );
        let total = u32::try_from(descriptor.concurrency()).unwrap_or(u32::MAX);
        let permits = Arc::new(Semaphore::new(total as usize));
        let (slots_tx, slots_rx) = mpsc::unbounded_channel::<Slot<U>>();

        let dispatcher = tokio::spawn(dispatch(runner.clone(), input, permits.clone(), slots_tx));
        let emitter = tokio::spawn(emit(runner.stage().to_string(), output.clone(), slots_rx));

        info!(
            stage = %descriptor.name(),
            concurrency = descriptor.concurrency(),
            capacity = descriptor.capacity(),
            "Ordered stage started"
        );

        let stage = descriptor.name().to_string();
        let supervisor = tokio::spawn(async move {
            for (task, handle) in [("dispatcher", dispatcher), ("emitter", emitter)] {
                if let Err(err) = handle.await {
                    error!(stage = %stage, task, error = %err, "Ordered stage task failed");
                }
            }
            // Every permit is back once the last item task has finished.
            if permits.acquire_many(total).await.is_err() {
                error!(stage = %stage, "Ordered stage permits closed");
            }
            output.complete();
            debug!(stage = %stage, "Stage output completed");
        });

        StageHandle::new(descriptor.name(), descriptor.concurrency(), in_flight, supervisor)
    }
}

async fn dispatch<I, T, U>(
    runner: StageRunner<T, U>,
    input: Arc<BoundedQueue<I>>,
    permits: Arc<Semaphore>,
    slots: mpsc::UnboundedSender<Slot<U>>,
) where
    I: Admit<T>,
    T: Send + 'static,
    U: Send + 'static,
{
    let cancel = runner.runtime().cancel_token().clone();
    let mut sequence = 0_u64;

    loop {
        let permit = tokio::select! {
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            () = cancel.cancelled() => break,
        };

        let next = match input.dequeue().await {
            Ok(Some(next)) => next,
            Ok(None) => {
                debug!(stage = %runner.stage(), dispatched = sequence, "Input ended, dispatcher exiting");
                break;
            }
            Err(err) => {
                debug!(stage = %runner.stage(), error = %err, "Dispatcher stopped");
                break;
            }
        };

        let item = next.admit(runner.runtime());
        let runner = runner.clone();
        let slots = slots.clone();
        let seq = sequence;
        sequence += 1;

        tokio::spawn(async move {
            let processed = runner.process(item).await;
            // The emitter only goes away on cancellation; the item is
            // released when the rejected slot is dropped.
            let _ = slots.send((seq, processed, permit));
        });
    }
}

async fn emit<U: Send + 'static>(
    stage: String,
    output: Arc<BoundedQueue<ItemContext<U>>>,
    mut slots: mpsc::UnboundedReceiver<Slot<U>>,
) {
    let mut pending: BTreeMap<u64, (Option<ItemContext<U>>, OwnedSemaphorePermit)> = BTreeMap::new();
    let mut next = 0_u64;

    while let Some((seq, item, permit)) = slots.recv().await {
        pending.insert(seq, (item, permit));

        while let Some((item, permit)) = pending.remove(&next) {
            next += 1;
            match item {
                Some(item) => {
                    if let Err(err) = output.enqueue(item).await {
                        debug!(stage = %stage, error = %err, buffered = pending.len(), "Output rejected item, emitter exiting");
                        return;
                    }
                }
                None => trace!(stage = %stage, seq = next - 1, "Skipping failed slot"),
            }
            drop(permit);
        }
    }

    debug!(stage = %stage, emitted = next, "All slots emitted");
}
