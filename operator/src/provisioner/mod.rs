//! The Provisioner Framework: a composable abstraction for declaring,
//! ordering, and concurrently driving idempotent provisioning units that
//! deploy Helm applications onto a declared remote cluster.

pub mod aggregate;
pub mod application;
pub mod cd;
pub mod manifest;
pub mod remote;

use crate::util::Error;
use argus_types::ApplicationBundleSpec;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::Client;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use remote::RemoteCluster;

/// Shared, read-only state threaded through a provisioner graph for the
/// duration of one reconcile. Built once by the top-level reconciler and
/// handed down to every node.
#[derive(Clone)]
pub struct ProvisionContext {
    pub client: Client,
    /// Namespace the owning resource's children live in.
    pub namespace: String,
    /// Label set the owning resource's provisioners tag their
    /// `ResourceIdentifier`s with (project/control-plane/cluster ownership
    /// chain).
    pub labels: BTreeMap<String, String>,
    /// The application-bundle catalog pinned by the owning resource's
    /// `BundleRef`, already fetched from the API server.
    pub bundle: ApplicationBundleSpec,
    /// Injected "now" so bundle/auto-upgrade selection stays pure and
    /// testable rather than reading the wall clock mid-graph.
    pub now: DateTime<Utc>,
    /// CD backend driver this graph's `application` provisioners submit
    /// through.
    pub cd: Arc<dyn cd::CdDriver>,
}

impl ProvisionContext {
    /// Resolves a logical application name (`cilium`, `cert-manager`, ...)
    /// against the pinned bundle, selecting the newest non-preview,
    /// non-expired version. Mirrors the selection auto-upgrade uses to pick
    /// a newer bundle: see `application::select_current`.
    pub fn resolve_application(
        &self,
        name: &str,
    ) -> Result<&argus_types::BundleApplicationVersion, Error> {
        application::select_current(&self.bundle, name, self.now).ok_or_else(|| {
            Error::InvalidVersion {
                name: name.to_string(),
                version: "current".to_string(),
            }
        })
    }
}

/// The provisioner contract (C1). `provision`/`deprovision` are idempotent
/// and retry-safe: they return `Ok(())` on completion, `Err(Error::Yield)`
/// when work has been accepted but is not finished, or any other `Err` on
/// permanent failure.
///
/// `on_remote`/`background_delete` are option-propagation hooks called
/// while the graph is still being built (never after it is shared across
/// tasks); re-applying either to an already-set node is required to be a
/// no-op so composers can propagate freely without tracking what has
/// already been pushed down.
#[async_trait]
pub trait Provisioner: Send + Sync {
    fn name(&self) -> &str;

    async fn provision(&self, ctx: &ProvisionContext) -> Result<(), Error>;

    async fn deprovision(&self, ctx: &ProvisionContext) -> Result<(), Error>;

    /// Binds this provisioner (and, for aggregators, every child) to a
    /// target cluster other than the management cluster.
    fn on_remote(&mut self, _remote: RemoteCluster) {}

    /// Marks this provisioner's (and every child's) deprovision as
    /// fire-and-forget rather than gating.
    fn background_delete(&mut self) {}
}

/// Nodes are kept behind `Arc` rather than `Box` so the concurrent
/// aggregator can hand each child to its own spawned task. Mutation via
/// `on_remote`/`background_delete` is only valid while a node is still
/// uniquely owned, i.e. during graph construction before it is shared.
pub type BoxedProvisioner = Arc<dyn Provisioner>;
