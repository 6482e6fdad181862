//! The clearing node orchestrator.
//!
//! Opens storage, seeds the asset registry, warms the signer caches and wires
//! the RPC dispatcher and the channel reconciler behind one command loop. The
//! HTTP API runs in a background task and talks to the loop over a channel.

use anyhow::Result;
use clearnode_core::Notifier;
use clearnode_crypto::KeyPair;
use clearnode_ledger::{AssetRegistry, SessionKeyRegistry};
use clearnode_settlement::{ChannelReconciler, CustodyEvent, Reconciled};
use clearnode_store::{Store, StoreOptions};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::commands::{EventResponse, NodeCommand};
use crate::config::ClearnodeConfig;
use crate::notify::{BroadcastNotifier, Notification};
use crate::rpc::RpcDispatcher;
use crate::state::NodeState;

const NOTIFICATION_CAPACITY: usize = 1024;

/// Services shared by the command loop and its blocking workers.
pub struct Services {
    pub store: Arc<Store>,
    pub rpc: RpcDispatcher,
    pub reconciler: ChannelReconciler,
    pub notifier: BroadcastNotifier,
}

impl Services {
    /// Build the services over an open store and register the configured assets.
    pub fn build(config: &ClearnodeConfig, store: Arc<Store>, broker: Arc<KeyPair>) -> Result<Self> {
        let assets = Arc::new(AssetRegistry::new());
        let session_keys = Arc::new(SessionKeyRegistry::new());

        let tx = store.begin();
        for seed in &config.assets {
            let asset = assets.register(&tx, seed.to_asset()?)?;
            tracing::info!(
                symbol = %asset.symbol,
                chain_id = asset.chain_id,
                token = %asset.token,
                "asset registered"
            );
        }
        session_keys.load(&tx)?;
        tx.commit()?;

        let notifier = BroadcastNotifier::new(NOTIFICATION_CAPACITY);
        let shared: Arc<dyn Notifier> = Arc::new(notifier.clone());
        let reconciler = ChannelReconciler::new(
            broker.address(),
            assets.clone(),
            session_keys.clone(),
            shared.clone(),
        );
        let rpc = RpcDispatcher::new(store.clone(), broker, assets, session_keys, shared);

        Ok(Self {
            store,
            rpc,
            reconciler,
            notifier,
        })
    }

    /// Apply one custody event and describe the outcome.
    pub fn apply_event(&self, event: &CustodyEvent) -> Result<EventResponse, String> {
        match self.reconciler.handle(&self.store, event) {
            Ok(Reconciled::Applied(channel)) => Ok(EventResponse {
                applied: true,
                reason: None,
                channel: Some(channel),
            }),
            Ok(Reconciled::Ignored(reason)) => Ok(EventResponse {
                applied: false,
                reason: Some(reason.to_string()),
                channel: None,
            }),
            Err(e) => {
                tracing::error!(
                    event = event.name(),
                    channel_id = %event.channel_id(),
                    error = %e,
                    "custody event failed"
                );
                Err(e.to_string())
            }
        }
    }
}

/// The clearing node.
pub struct ClearnodeNode {
    config: ClearnodeConfig,
    broker: Arc<KeyPair>,
    services: Option<Arc<Services>>,
    node_state: Option<Arc<NodeState>>,
    command_rx: Option<mpsc::Receiver<NodeCommand>>,
}

impl ClearnodeNode {
    /// Create a node, loading the broker key from config or generating an ephemeral one.
    pub fn new(config: ClearnodeConfig) -> Result<Self> {
        let broker = match config.broker.load_keypair()? {
            Some(keypair) => keypair,
            None => {
                tracing::warn!("no broker key configured, generating an ephemeral key");
                KeyPair::generate()
            }
        };
        tracing::info!(broker = %broker.address(), "clearing node created");

        Ok(Self {
            config,
            broker: Arc::new(broker),
            services: None,
            node_state: None,
            command_rx: None,
        })
    }

    /// Open storage, build services and start the HTTP API.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!("starting clearing node");

        let options = StoreOptions {
            lock_timeout_ms: self.config.storage.lock_timeout_ms,
        };
        let store = Arc::new(Store::open_with(&self.config.storage.data_dir, &options)?);
        tracing::info!(path = %self.config.storage.data_dir.display(), "storage initialized");

        let services = Arc::new(Services::build(&self.config, store, self.broker.clone())?);
        tokio::spawn(log_notifications(services.notifier.subscribe()));

        let (command_tx, command_rx) = mpsc::channel::<NodeCommand>(256);
        let node_state = Arc::new(NodeState::new(self.broker.address(), command_tx));

        let api_addr: SocketAddr = self.config.api_addr().parse()?;
        let api_state = node_state.clone();
        tokio::spawn(async move {
            if let Err(e) = crate::api::start_api_server(api_addr, api_state).await {
                tracing::error!(error = %e, "HTTP API server error");
            }
        });

        self.services = Some(services);
        self.node_state = Some(node_state);
        self.command_rx = Some(command_rx);
        Ok(())
    }

    /// Run the command loop.
    ///
    /// RPC requests run concurrently on blocking workers; row locks in the
    /// store serialize conflicting writes. Custody events are applied one at
    /// a time in arrival order.
    pub async fn run(&mut self) -> Result<()> {
        let mut command_rx = self
            .command_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("node not started"))?;
        let services = self
            .services
            .clone()
            .ok_or_else(|| anyhow::anyhow!("node not started"))?;

        tracing::info!("entering main event loop");

        while let Some(cmd) = command_rx.recv().await {
            Self::handle_command(&services, cmd).await;
        }
        tracing::info!("API command channel closed");
        Ok(())
    }

    async fn handle_command(services: &Arc<Services>, cmd: NodeCommand) {
        match cmd {
            NodeCommand::Rpc { request, reply } => {
                let services = services.clone();
                tokio::task::spawn_blocking(move || {
                    let response = services.rpc.handle(request);
                    if reply.send(response).is_err() {
                        tracing::debug!("rpc caller went away before the reply");
                    }
                });
            }
            NodeCommand::Custody { event, reply } => {
                let worker = services.clone();
                let result = tokio::task::spawn_blocking(move || worker.apply_event(&event))
                    .await
                    .unwrap_or_else(|e| Err(format!("event worker panicked: {}", e)));
                let _ = reply.send(result);
            }
        }
    }

    /// Gracefully shut down the node.
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("shutting down clearing node");
        self.node_state = None;
        self.command_rx = None;
        // Dropping the last handle closes the database.
        self.services = None;
        Ok(())
    }
}

async fn log_notifications(mut rx: broadcast::Receiver<Notification>) {
    loop {
        match rx.recv().await {
            Ok(Notification::ChannelUpdated { channel }) => {
                tracing::debug!(channel_id = %channel.channel_id, status = %channel.status, "channel updated");
            }
            Ok(Notification::BalanceUpdated { wallet }) => {
                tracing::debug!(wallet = %wallet, "balance updated");
            }
            Ok(Notification::AppSessionUpdated { session }) => {
                tracing::debug!(
                    session_id = %session.session_id,
                    version = session.version,
                    "app session updated"
                );
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(missed = n, "notification receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
