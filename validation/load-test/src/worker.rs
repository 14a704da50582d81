//! Request workers.

use crate::client::{Outcome, TileClient};
use crate::generator::TileGenerator;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Requests left in a run, shared by all workers.
#[derive(Debug)]
pub struct RequestBudget {
    remaining: AtomicU64,
}

impl RequestBudget {
    pub fn new(total: u64) -> Self {
        Self {
            remaining: AtomicU64::new(total),
        }
    }

    /// Take one request from the budget. False once it is spent.
    pub fn try_claim(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Acquire)
    }
}

/// One execution unit of the pool: generate, request, emit, repeat.
pub struct Worker {
    id: usize,
    client: TileClient,
    generator: TileGenerator,
    results: mpsc::Sender<Outcome>,
    cancel: CancellationToken,
    budget: Option<Arc<RequestBudget>>,
}

impl Worker {
    pub fn new(
        id: usize,
        client: TileClient,
        generator: TileGenerator,
        results: mpsc::Sender<Outcome>,
        cancel: CancellationToken,
        budget: Option<Arc<RequestBudget>>,
    ) -> Self {
        Self {
            id,
            client,
            generator,
            results,
            cancel,
            budget,
        }
    }

    /// Run until cancelled, out of budget, or the results channel closes.
    ///
    /// A request still in flight when the token fires is abandoned and emits
    /// nothing. Returns the number of outcomes delivered.
    pub async fn run(mut self) -> u64 {
        let mut delivered = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if let Some(budget) = &self.budget {
                if !budget.try_claim() {
                    break;
                }
            }

            let tile = self.generator.next_tile();
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                outcome = self.client.execute(tile) => outcome,
            };

            // Blocks while the channel is full
            if self.results.send(outcome).await.is_err() {
                break;
            }
            delivered += 1;
        }

        debug!(worker = self.id, delivered, "Worker exiting");
        delivered
    }
}
