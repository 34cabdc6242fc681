//! The node: owns the managers and fans connection events out to listeners.

use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::NodeConfig;
use super::load::NetworkLoadService;
use super::state::NodeState;
use crate::adapters::NoOpBanList;
use crate::authorization::{AuthorizationService, HashCashProofOfWorkService, ProofOfWorkService};
use crate::connection::{Connection, ConnectionContext, ConnectionDirection};
use crate::domain::{
    Address, Capability, CloseReason, ConnectionError, NetworkEnvelope, NetworkId, NetworkLoad,
    NetworkMessage,
};
use crate::inbound::InboundConnectionsManager;
use crate::outbound::{OutboundConnectionManager, OutboundConnectionMultiplexer};
use crate::ports::{BanList, ConnectionHandler, NodeListener};

/// How long shutdown waits for connection tasks to report closure.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

/// Everything that exists only while the node runs.
struct NodeRuntime {
    capability: Capability,
    inbound: Arc<InboundConnectionsManager>,
    outbound: Arc<OutboundConnectionManager>,
    multiplexer: OutboundConnectionMultiplexer,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    load_task: Mutex<Option<JoinHandle<()>>>,
}

struct NodeInner {
    config: NodeConfig,
    network_id: NetworkId,
    state: RwLock<NodeState>,
    authorization_service: Arc<AuthorizationService>,
    ban_list: Arc<dyn BanList>,
    load_service: NetworkLoadService,
    listeners: RwLock<Vec<Arc<dyn NodeListener>>>,
    runtime: RwLock<Option<Arc<NodeRuntime>>>,
}

/// A peer-to-peer endpoint for one local capability.
///
/// Cheap to clone; all clones share the same node.
///
/// # Lifecycle
///
/// ```text
/// New ──initialize()──► Starting ──► Running ──shutdown()──► Stopping ──► Terminated
/// ```
///
/// # Example
///
/// ```rust,ignore
/// let node = Node::new(NodeConfig::for_testing());
/// node.add_listener(Arc::new(MyListener));
/// node.initialize().await?;
/// node.send(message, &peer_capability).await?;
/// node.shutdown().await;
/// ```
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Node with no bans and SHA-256 hashcash.
    pub fn new(config: NodeConfig) -> Self {
        Self::with_services(
            config,
            Arc::new(NoOpBanList),
            Arc::new(HashCashProofOfWorkService::new()),
        )
    }

    pub fn with_ban_list(config: NodeConfig, ban_list: Arc<dyn BanList>) -> Self {
        Self::with_services(
            config,
            ban_list,
            Arc::new(HashCashProofOfWorkService::new()),
        )
    }

    pub fn with_services(
        config: NodeConfig,
        ban_list: Arc<dyn BanList>,
        proof_of_work_service: Arc<dyn ProofOfWorkService>,
    ) -> Self {
        let authorization_service = Arc::new(AuthorizationService::new(
            proof_of_work_service,
            config.authorization.clone(),
        ));
        Self {
            inner: Arc::new(NodeInner {
                network_id: config.network_id(),
                state: RwLock::new(NodeState::New),
                authorization_service,
                ban_list,
                load_service: NetworkLoadService::new(config.difficulty_adjustment_factor),
                listeners: RwLock::new(Vec::new()),
                runtime: RwLock::new(None),
                config,
            }),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn network_id(&self) -> &NetworkId {
        &self.inner.network_id
    }

    pub fn state(&self) -> NodeState {
        *self.inner.state.read()
    }

    pub fn authorization_service(&self) -> &Arc<AuthorizationService> {
        &self.inner.authorization_service
    }

    /// Advertised capability; known while the listener is bound.
    pub fn my_capability(&self) -> Option<Capability> {
        self.inner
            .runtime()
            .map(|runtime| runtime.capability.clone())
    }

    pub fn network_load(&self) -> NetworkLoad {
        self.inner.load_service.current()
    }

    // -------------------------------------------------------------------------
    // Listeners
    // -------------------------------------------------------------------------

    pub fn add_listener(&self, listener: Arc<dyn NodeListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Remove by identity. Returns `false` if `listener` was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn NodeListener>) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Bind the listener, start accepting and release outbound attempts.
    ///
    /// Calling it on a running node is a no-op; a stopped node cannot be
    /// restarted.
    pub async fn initialize(&self) -> Result<(), ConnectionError> {
        {
            let mut state = self.inner.state.write();
            match *state {
                NodeState::New => *state = NodeState::Starting,
                NodeState::Starting | NodeState::Running => return Ok(()),
                NodeState::Stopping | NodeState::Terminated => {
                    return Err(ConnectionError::NotRunning)
                }
            }
        }
        self.inner.notify_state(NodeState::Starting);

        match self.start().await {
            Ok(runtime) => {
                info!(
                    network = %self.inner.network_id,
                    capability = %runtime.capability,
                    "Node running"
                );
                *self.inner.runtime.write() = Some(runtime);
                self.inner.set_state(NodeState::Running);
                self.dial_configured_peers();
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Node failed to start");
                self.inner.set_state(NodeState::Terminated);
                Err(e)
            }
        }
    }

    async fn start(&self) -> Result<Arc<NodeRuntime>, ConnectionError> {
        let config = &self.inner.config;
        let listen = config.listen_address();
        let listener = TcpListener::bind((listen.host(), listen.port())).await?;
        let capability = config.capability(listener.local_addr()?.port());

        let inner: Weak<NodeInner> = Arc::downgrade(&self.inner);
        let handler: Weak<dyn ConnectionHandler> = inner;
        let context = ConnectionContext {
            my_capability: capability.clone(),
            network_load: Arc::clone(self.inner.load_service.snapshot()),
            authorization_service: Arc::clone(&self.inner.authorization_service),
            ban_list: Arc::clone(&self.inner.ban_list),
            handler,
            envelope_config: config.envelope,
            connect_timeout: config.connect_timeout(),
            handshake_timeout: config.handshake_timeout(),
        };

        let inbound = Arc::new(InboundConnectionsManager::from_listener(
            listener,
            context.clone(),
        )?);
        let accept_task = inbound.register_op_accept();

        let outbound = Arc::new(OutboundConnectionManager::new(context));
        let multiplexer = OutboundConnectionMultiplexer::new(
            Arc::clone(&outbound),
            tokio::runtime::Handle::current(),
        );
        multiplexer.signal_server_ready();

        let load_task = config
            .load_update_interval()
            .map(|interval| spawn_load_updates(Arc::downgrade(&self.inner), interval));

        Ok(Arc::new(NodeRuntime {
            capability,
            inbound,
            outbound,
            multiplexer,
            accept_task: Mutex::new(Some(accept_task)),
            load_task: Mutex::new(load_task),
        }))
    }

    fn dial_configured_peers(&self) {
        let peers = match self.inner.config.peer_addresses() {
            Ok(peers) => peers,
            Err(e) => {
                warn!(error = %e, "Skipping configured peers");
                return;
            }
        };
        for address in peers {
            let node = self.clone();
            tokio::spawn(async move {
                let capability = Capability::clear(address);
                if let Err(e) = node.get_or_create_connection(&capability).await {
                    warn!(peer = %capability.address(), error = %e, "Configured peer unreachable");
                }
            });
        }
    }

    /// Stop accepting, close every connection and release the listening
    /// port. Idempotent.
    ///
    /// Handshakes still in flight are aborted; every connection that was
    /// established is reported to the listeners before `on_shutdown`.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.write();
            match *state {
                NodeState::Stopping | NodeState::Terminated => return,
                _ => *state = NodeState::Stopping,
            }
        }
        self.inner.notify_state(NodeState::Stopping);
        info!(network = %self.inner.network_id, "Node shutting down");

        if let Some(runtime) = self.inner.runtime() {
            runtime.stop_tasks().await;
            runtime.inbound.close().await;
            runtime.multiplexer.shutdown();

            if tokio::time::timeout(SHUTDOWN_GRACE, runtime.drain())
                .await
                .is_err()
            {
                let stragglers = runtime.tracked_connections();
                warn!(count = stragglers.len(), "Connections did not close in time, aborting");
                for connection in stragglers {
                    connection.abort(CloseReason::Shutdown);
                }
            }
        }
        // Drops the listener once the last in-flight caller lets go
        self.inner.runtime.write().take();

        self.inner.set_state(NodeState::Terminated);
        for listener in self.inner.listeners() {
            listener.on_shutdown();
        }
    }

    // -------------------------------------------------------------------------
    // Connections
    // -------------------------------------------------------------------------

    /// Open connection to `capability`'s address in either direction, or a
    /// new outbound one.
    pub async fn get_or_create_connection(
        &self,
        capability: &Capability,
    ) -> Result<Connection, ConnectionError> {
        let runtime = self.inner.running_runtime()?;
        if let Some(existing) = self.find_connection(capability.address()) {
            return Ok(existing);
        }
        runtime.multiplexer.get_connection(capability).await
    }

    /// Send `message` to `capability`, connecting first if needed.
    pub async fn send(
        &self,
        message: NetworkMessage,
        capability: &Capability,
    ) -> Result<(), ConnectionError> {
        let connection = self.get_or_create_connection(capability).await?;
        connection.send(message).await
    }

    /// Open connection whose peer advertises `address`.
    pub fn find_connection(&self, address: &Address) -> Option<Connection> {
        let runtime = self.inner.runtime()?;
        runtime.outbound.get_connection(address).or_else(|| {
            runtime
                .inbound
                .connections()
                .into_iter()
                .find(|c| c.peer_address() == address)
        })
    }

    /// Every open connection, inbound first.
    pub fn all_connections(&self) -> Vec<Connection> {
        self.inner.all_connections()
    }

    pub async fn close_connection(&self, connection: &Connection, reason: CloseReason) {
        connection.close(reason).await;
    }

    /// Recompute our load from current traffic. Runs periodically when
    /// `load_update_interval_secs` is set.
    pub fn update_network_load(&self) -> NetworkLoad {
        self.inner.update_network_load()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("network_id", &self.inner.network_id)
            .field("state", &self.state())
            .field("capability", &self.my_capability())
            .finish_non_exhaustive()
    }
}

impl NodeRuntime {
    async fn stop_tasks(&self) {
        let tasks: Vec<_> = [self.accept_task.lock().take(), self.load_task.lock().take()]
            .into_iter()
            .flatten()
            .collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    fn tracked_connections(&self) -> Vec<Connection> {
        let mut connections = self.inbound.tracked_connections();
        connections.extend(self.outbound.tracked_connections());
        connections
    }

    fn is_idle(&self) -> bool {
        self.inbound.is_idle() && self.outbound.is_idle()
    }

    /// Close everything tracked until nothing is left. Connections stay
    /// tracked until their listeners have been told.
    async fn drain(&self) {
        let mut closing = HashSet::new();
        loop {
            for connection in self.tracked_connections() {
                if closing.insert(connection.id()) {
                    connection.close(CloseReason::Shutdown).await;
                }
            }
            if self.is_idle() {
                return;
            }
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }
    }
}

fn spawn_load_updates(node: Weak<NodeInner>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match node.upgrade() {
                Some(node) => {
                    node.update_network_load();
                }
                None => break,
            }
        }
    })
}

impl NodeInner {
    fn runtime(&self) -> Option<Arc<NodeRuntime>> {
        self.runtime.read().clone()
    }

    fn running_runtime(&self) -> Result<Arc<NodeRuntime>, ConnectionError> {
        if !self.state.read().is_running() {
            return Err(ConnectionError::NotRunning);
        }
        self.runtime().ok_or(ConnectionError::NotRunning)
    }

    fn listeners(&self) -> Vec<Arc<dyn NodeListener>> {
        self.listeners.read().clone()
    }

    fn set_state(&self, state: NodeState) {
        *self.state.write() = state;
        self.notify_state(state);
    }

    fn notify_state(&self, state: NodeState) {
        debug!(state = %state, "Node state changed");
        for listener in self.listeners() {
            listener.on_state_change(state);
        }
    }

    fn all_connections(&self) -> Vec<Connection> {
        match self.runtime() {
            Some(runtime) => {
                let mut connections = runtime.inbound.connections();
                connections.extend(runtime.outbound.all_outbound_connections());
                connections
            }
            None => Vec::new(),
        }
    }

    fn update_network_load(&self) -> NetworkLoad {
        self.load_service.update(&self.all_connections())
    }
}

impl ConnectionHandler for NodeInner {
    fn handle_new_connection(&self, connection: &Connection) {
        debug!(
            connection = %connection.id(),
            peer = %connection.peer_address(),
            direction = ?connection.direction(),
            "Connection registered"
        );
        for listener in self.listeners() {
            listener.on_connection(connection);
        }
    }

    fn is_message_authorized(&self, envelope: &NetworkEnvelope, connection: &Connection) -> bool {
        let mut loads = vec![connection.my_network_load()];
        loads.extend(self.load_service.acceptable_loads());
        self.authorization_service.verify_with_loads(
            &envelope.message,
            &envelope.authorization_token,
            &loads,
            connection.my_address(),
        )
    }

    fn handle_network_message(&self, message: NetworkMessage, connection: &Connection) {
        for listener in self.listeners() {
            listener.on_message(&message, connection, &self.network_id);
        }
    }

    fn is_accepting(&self) -> bool {
        matches!(*self.state.read(), NodeState::Starting | NodeState::Running)
    }

    fn handle_connection_closed(&self, connection: &Connection, reason: CloseReason) {
        info!(
            connection = %connection.id(),
            peer = %connection.peer_address(),
            reason = %reason,
            "Connection closed"
        );
        for listener in self.listeners() {
            listener.on_disconnect(connection, &reason);
        }
        if let Some(runtime) = self.runtime() {
            match connection.direction() {
                ConnectionDirection::Inbound => {
                    runtime.inbound.forget(connection.id());
                }
                ConnectionDirection::Outbound => {
                    runtime.outbound.remove_connection(connection.id());
                }
            }
        }
    }
}
