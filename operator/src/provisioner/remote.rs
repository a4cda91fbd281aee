//! Remote-cluster registry (C3): a named handle resolving to a client
//! config for a target cluster, with reference-counted registration
//! lifecycle shared across every provisioner bound to it via `provision_on`.

use super::{BoxedProvisioner, ProvisionContext, Provisioner};
use crate::util::Error;
use argus_types::ResourceIdentifier;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;

/// The payload C2's `createOrUpdateCluster`/`deleteCluster` operate on.
pub struct RemoteClusterConfig {
    pub server: String,
    pub config: serde_json::Value,
}

/// A remote cluster's identity, plus how to reach it. Implemented by
/// domain provisioners that stand up a cluster (vcluster, cluster-api)
/// and consumed by anything that needs to target it.
#[async_trait]
pub trait RemoteClusterGenerator: Send + Sync {
    fn id(&self) -> ResourceIdentifier;
    async fn config(&self, ctx: &ProvisionContext) -> Result<serde_json::Value, Error>;
    async fn server(&self, ctx: &ProvisionContext) -> Result<String, Error>;
}

struct RemoteClusterInner {
    generator: Arc<dyn RemoteClusterGenerator>,
    /// Whether this process owns the remote's registration with the CD
    /// backend. Non-owning handles only ever propagate the binding down
    /// via `on_remote`; they never call the CD driver themselves.
    controller: bool,
    /// Total provisioners bound to this remote via `provision_on`, fixed
    /// once graph construction completes.
    refcount: AtomicU32,
    /// How many bound provisioners have entered `provision()` so far this
    /// reconcile. The first entrant (and only the first) registers the
    /// remote.
    provision_entries: Mutex<u32>,
    /// How many bound provisioners have completed `deprovision()` so far.
    /// The entrant that brings this to `refcount` deregisters the remote.
    deprovision_exits: Mutex<u32>,
}

/// Cheaply cloneable handle shared by every provisioner bound to the same
/// remote cluster. Cloning does not itself bind a provisioner — use
/// `provision_on` for that.
#[derive(Clone)]
pub struct RemoteCluster(Arc<RemoteClusterInner>);

impl RemoteCluster {
    pub fn new(generator: Arc<dyn RemoteClusterGenerator>, controller: bool) -> Self {
        Self(Arc::new(RemoteClusterInner {
            generator,
            controller,
            refcount: AtomicU32::new(0),
            provision_entries: Mutex::new(0),
            deprovision_exits: Mutex::new(0),
        }))
    }

    /// Binds `child` to this remote, incrementing the shared refcount and
    /// returning a wrapper that runs the registration/deregistration
    /// critical section around the child's own provision/deprovision.
    ///
    /// `child` must still be uniquely owned (freshly constructed, not yet
    /// handed to an aggregator) so the remote binding can be pushed down
    /// through `on_remote`.
    pub fn provision_on(&self, mut child: BoxedProvisioner) -> BoxedProvisioner {
        self.0.refcount.fetch_add(1, Ordering::SeqCst);
        Arc::get_mut(&mut child)
            .expect("provision_on requires a uniquely-owned provisioner")
            .on_remote(self.clone());
        Arc::new(ProvisionOn {
            remote: self.clone(),
            child,
        })
    }

    pub fn id(&self) -> ResourceIdentifier {
        self.0.generator.id()
    }

    pub async fn server(&self, ctx: &ProvisionContext) -> Result<String, Error> {
        self.0.generator.server(ctx).await
    }
}

struct ProvisionOn {
    remote: RemoteCluster,
    child: BoxedProvisioner,
}

#[async_trait]
impl Provisioner for ProvisionOn {
    fn name(&self) -> &str {
        self.child.name()
    }

    async fn provision(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        let entering = {
            let mut guard = self.remote.0.provision_entries.lock().await;
            *guard += 1;
            *guard
        };
        if entering == 1 && self.remote.0.controller {
            let id = self.remote.0.generator.id();
            let server = self.remote.0.generator.server(ctx).await?;
            let config = self.remote.0.generator.config(ctx).await?;
            ctx.cd
                .create_or_update_cluster(ctx, &id, &RemoteClusterConfig { server, config })
                .await?;
        }
        self.child.provision(ctx).await
    }

    async fn deprovision(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        self.child.deprovision(ctx).await?;
        let exiting = {
            let mut guard = self.remote.0.deprovision_exits.lock().await;
            *guard += 1;
            *guard
        };
        let total = self.remote.0.refcount.load(Ordering::SeqCst);
        if exiting == total && self.remote.0.controller {
            let id = self.remote.0.generator.id();
            ctx.cd.delete_cluster(ctx, &id).await?;
        }
        Ok(())
    }

    fn background_delete(&mut self) {
        self.child.background_delete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::cd::CdDriver;
    use std::sync::Mutex as StdMutex;

    struct FakeGenerator;

    #[async_trait]
    impl RemoteClusterGenerator for FakeGenerator {
        fn id(&self) -> ResourceIdentifier {
            ResourceIdentifier::new("vcluster", &Default::default())
        }
        async fn config(&self, _ctx: &ProvisionContext) -> Result<serde_json::Value, Error> {
            Ok(serde_json::json!({}))
        }
        async fn server(&self, _ctx: &ProvisionContext) -> Result<String, Error> {
            Ok("https://vcluster.local".to_string())
        }
    }

    struct NoOpChild;

    #[async_trait]
    impl Provisioner for NoOpChild {
        fn name(&self) -> &str {
            "noop"
        }
        async fn provision(&self, _ctx: &ProvisionContext) -> Result<(), Error> {
            Ok(())
        }
        async fn deprovision(&self, _ctx: &ProvisionContext) -> Result<(), Error> {
            Ok(())
        }
    }

    struct CountingCd {
        registrations: StdMutex<u32>,
        deregistrations: StdMutex<u32>,
    }

    #[async_trait]
    impl CdDriver for CountingCd {
        async fn create_or_update_helm_application(
            &self,
            _ctx: &ProvisionContext,
            _id: &ResourceIdentifier,
            _app: &argus_types::HelmApplication,
        ) -> Result<(), Error> {
            Ok(())
        }
        async fn delete_helm_application(
            &self,
            _ctx: &ProvisionContext,
            _id: &ResourceIdentifier,
            _background: bool,
        ) -> Result<(), Error> {
            Ok(())
        }
        async fn create_or_update_cluster(
            &self,
            _ctx: &ProvisionContext,
            _id: &ResourceIdentifier,
            _cluster: &RemoteClusterConfig,
        ) -> Result<(), Error> {
            *self.registrations.lock().unwrap() += 1;
            Ok(())
        }
        async fn delete_cluster(
            &self,
            _ctx: &ProvisionContext,
            _id: &ResourceIdentifier,
        ) -> Result<(), Error> {
            *self.deregistrations.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn test_ctx(cd: Arc<dyn CdDriver>) -> ProvisionContext {
        ProvisionContext {
            client: kube::Client::try_from(
                kube::Config::new("https://unused.invalid".parse().unwrap()),
            )
            .expect("build a client from a bare config for tests"),
            namespace: "ns".to_string(),
            labels: Default::default(),
            bundle: Default::default(),
            now: chrono::Utc::now(),
            cd,
        }
    }

    #[tokio::test]
    async fn only_first_entrant_registers_and_only_last_exitor_deregisters() {
        let counting = Arc::new(CountingCd {
            registrations: StdMutex::new(0),
            deregistrations: StdMutex::new(0),
        });
        let ctx = test_ctx(counting.clone());
        let remote = RemoteCluster::new(Arc::new(FakeGenerator), true);

        let a = remote.provision_on(Arc::new(NoOpChild));
        let b = remote.provision_on(Arc::new(NoOpChild));

        a.provision(&ctx).await.unwrap();
        b.provision(&ctx).await.unwrap();
        assert_eq!(*counting.registrations.lock().unwrap(), 1);

        a.deprovision(&ctx).await.unwrap();
        b.deprovision(&ctx).await.unwrap();
        assert_eq!(*counting.deregistrations.lock().unwrap(), 1);
    }
}
