//! Watches settlement-chain events and turns them into an ordered
//! transaction feed.
//!
//! Registry events (`TokenRegistered`, `TokenMapped`) are persisted into
//! every registry the ingestor was given: in a process hosting both an
//! aggregator and a validator, both stores learn the mapping. Operation
//! events of each mapped token flow into one bounded queue; order is
//! preserved per token, which is all the state machine needs since
//! operations on distinct `(account, token)` pairs commute.

use std::sync::Arc;

use backon::{ExponentialBuilder, Retryable};
use futures::StreamExt;
use rollup_interface::events::TokenEvent;
use rollup_interface::services::SettlementService;
use rollup_interface::Transaction;
use rollup_state::TokenRegistry;
use tokio::sync::mpsc;

use crate::SharedStore;

/// Queue depth between the ingestor and the aggregator.
pub const TRANSACTION_QUEUE_CAPACITY: usize = 16;

const MAX_RESUBSCRIBE_ATTEMPTS: usize = 5;

/// The event-side half of the node.
pub struct EventIngestor<S> {
    settlement: Arc<S>,
    registries: Vec<TokenRegistry<SharedStore>>,
    queue: mpsc::Sender<Transaction>,
}

impl<S: SettlementService> EventIngestor<S> {
    /// Creates the ingestor and the receiving end of its transaction
    /// queue.
    pub fn new(
        settlement: Arc<S>,
        registries: Vec<TokenRegistry<SharedStore>>,
    ) -> (Self, mpsc::Receiver<Transaction>) {
        let (queue, receiver) = mpsc::channel(TRANSACTION_QUEUE_CAPACITY);
        (
            Self {
                settlement,
                registries,
                queue,
            },
            receiver,
        )
    }

    /// Runs until a subscription is permanently lost.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut registered = self.settlement.subscribe_token_registered().await?;
        let mut mapped = self.settlement.subscribe_token_mapped().await?;
        tracing::info!("Watching token registry");

        loop {
            tokio::select! {
                event = registered.next() => {
                    let Some(event) = event else {
                        anyhow::bail!("token-registered subscription ended");
                    };
                    tracing::info!(
                        token = ?event.token_address,
                        index = %event.token_index,
                        "Token registered"
                    );
                    for registry in &self.registries {
                        registry.register(event.token_address, event.token_index)?;
                    }
                }
                event = mapped.next() => {
                    let Some(event) = event else {
                        anyhow::bail!("token-mapped subscription ended");
                    };
                    tracing::info!(
                        mainchain = ?event.mainchain_token,
                        sidechain = ?event.sidechain_token,
                        "Token mapped"
                    );
                    for registry in &self.registries {
                        registry.map_sidechain(event.mainchain_token, event.sidechain_token)?;
                    }
                    self.spawn_token_watcher(event.sidechain_token);
                }
            }
        }
    }

    fn spawn_token_watcher(&self, sidechain_token: ethers_core::types::Address) {
        let settlement = self.settlement.clone();
        let queue = self.queue.clone();
        tokio::spawn(async move {
            if let Err(error) = watch_token(settlement, queue, sidechain_token).await {
                tracing::error!(token = ?sidechain_token, %error, "Token watcher terminated");
            }
        });
    }
}

/// Forwards one token's operation events into the queue, resubscribing
/// with backoff when the subscription drops on a transient failure.
async fn watch_token<S: SettlementService>(
    settlement: Arc<S>,
    queue: mpsc::Sender<Transaction>,
    sidechain_token: ethers_core::types::Address,
) -> anyhow::Result<()> {
    tracing::info!(token = ?sidechain_token, "Watching token");
    let mut attempts = 0;
    loop {
        let mut events = (|| async { settlement.subscribe_token_events(sidechain_token).await })
            .retry(&ExponentialBuilder::default())
            .when(|e| e.is_transient())
            .await?;

        while let Some(event) = events.next().await {
            log_token_event(&event);
            if queue.send(Transaction::from(event)).await.is_err() {
                // The aggregator went away; nothing left to feed.
                anyhow::bail!("transaction queue closed");
            }
        }

        attempts += 1;
        if attempts >= MAX_RESUBSCRIBE_ATTEMPTS {
            anyhow::bail!("token subscription kept dropping");
        }
        tracing::warn!(token = ?sidechain_token, attempts, "Token subscription ended, resubscribing");
    }
}

fn log_token_event(event: &TokenEvent) {
    match event {
        TokenEvent::Deposit { account, amount, .. } => {
            tracing::info!(account = ?account, amount = %amount, "Caught deposit");
        }
        TokenEvent::Withdraw { account, amount, nonce, .. } => {
            tracing::info!(account = ?account, amount = %amount, nonce = %nonce, "Caught withdraw");
        }
        TokenEvent::Transfer { sender, recipient, amount, nonce, .. } => {
            tracing::info!(
                sender = ?sender,
                recipient = ?recipient,
                amount = %amount,
                nonce = %nonce,
                "Caught transfer"
            );
        }
    }
}
