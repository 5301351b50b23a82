//! The node pool: every worker node the control plane knows about.
//!
//! Discovery registers nodes, undiscovery deregisters them. Registration
//! probes the worker once and retains the node as `Unhealthy` on failure so
//! later sync passes can recover it; deregistration closes the handle and
//! reconciles the store so orphaned sandboxes die.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::node::NodeMetadata;
use crate::node::client::{GrpcWorker, WorkerApi};
use crate::node::handle::NodeHandle;
use crate::node::sync::run_node_sync;
use crate::store::SandboxStorage;

/// What discovery knows about a worker before the first probe.
#[derive(Debug, Clone)]
pub struct NodeDiscovery {
    pub node_id: String,
    pub address: String,
    pub cluster_id: Uuid,
}

pub struct NodePool {
    nodes: DashMap<String, Arc<NodeHandle>>,
    sync_tasks: DashMap<String, JoinHandle<()>>,
    store: Arc<dyn SandboxStorage>,
    sync_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl NodePool {
    pub fn new(
        store: Arc<dyn SandboxStorage>,
        sync_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            nodes: DashMap::new(),
            sync_tasks: DashMap::new(),
            store,
            sync_interval,
            shutdown,
        })
    }

    /// Register a discovered worker, dialing its gRPC endpoint.
    pub async fn register_discovered(&self, discovery: NodeDiscovery) -> Result<Arc<NodeHandle>> {
        let meta = Arc::new(RwLock::new(NodeMetadata::default()));
        let worker = Arc::new(GrpcWorker::connect_lazy(&discovery.address, Arc::clone(&meta))?);
        let handle = NodeHandle::new(
            discovery.node_id,
            discovery.cluster_id,
            worker as Arc<dyn WorkerApi>,
            meta,
        );
        self.register(handle).await
    }

    /// Register a prepared handle. The initial `service_info` probe fills in
    /// status and metrics; a probe failure keeps the node, unhealthy.
    pub async fn register(&self, handle: Arc<NodeHandle>) -> Result<Arc<NodeHandle>> {
        let node_id = handle.node_id().to_string();
        if self.nodes.contains_key(&node_id) {
            return Err(Error::AlreadyExists(format!("node {node_id}")));
        }

        match handle.worker().service_info().await {
            Ok(info) => {
                handle.apply_service_info(info);
                info!(node_id = %node_id, status = %handle.status(), "node registered");
            }
            Err(err) => {
                handle.mark_unhealthy();
                warn!(node_id = %node_id, error = %err, "node registered unhealthy");
            }
        }

        self.nodes.insert(node_id.clone(), Arc::clone(&handle));

        let task = tokio::spawn(run_node_sync(
            Arc::clone(&handle),
            Arc::clone(&self.store),
            self.sync_interval,
            self.shutdown.clone(),
        ));
        self.sync_tasks.insert(node_id, task);

        Ok(handle)
    }

    /// Remove a node: close the handle, stop its sync loop, and reconcile the
    /// store with an empty report so its sandboxes are killed.
    pub async fn deregister(&self, node_id: &str) -> Result<()> {
        let (_, handle) = self
            .nodes
            .remove(node_id)
            .ok_or_else(|| Error::not_found(format!("node {node_id}")))?;

        if let Some((_, task)) = self.sync_tasks.remove(node_id) {
            task.abort();
        }
        handle.close();

        self.store.sync(Vec::new(), node_id).await?;
        info!(node_id = %node_id, "node deregistered");
        Ok(())
    }

    pub fn get(&self, node_id: &str) -> Result<Arc<NodeHandle>> {
        self.nodes
            .get(node_id)
            .map(|n| Arc::clone(n.value()))
            .ok_or_else(|| Error::not_found(format!("node {node_id}")))
    }

    pub fn nodes(&self) -> Vec<Arc<NodeHandle>> {
        self.nodes.iter().map(|n| Arc::clone(n.value())).collect()
    }

    pub fn cluster_nodes(&self, cluster_id: Uuid) -> Vec<Arc<NodeHandle>> {
        self.nodes
            .iter()
            .filter(|n| n.cluster_id() == cluster_id)
            .map(|n| Arc::clone(n.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Close every handle; used by the process shutdown sequence.
    pub fn close_all(&self) {
        for task in self.sync_tasks.iter() {
            task.abort();
        }
        self.sync_tasks.clear();
        for node in self.nodes.iter() {
            node.close();
        }
    }
}
