//! Composition aggregators (C5): serial, concurrent, conditional, and a
//! thin resource wrapper for plain (non-Helm) objects.

use super::remote::RemoteCluster;
use super::{BoxedProvisioner, ProvisionContext, Provisioner};
use crate::util::{Error, MANAGER_NAME};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, Patch, PatchParams, Resource};
use kube::core::NamespaceResourceScope;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

/// Runs children left-to-right on provision, right-to-left on deprovision.
/// The first non-`Ok` result (including `Yield`) short-circuits; later
/// siblings are not attempted, since ordering between them is assumed
/// meaningful.
pub struct Serial {
    name: String,
    children: Vec<BoxedProvisioner>,
}

impl Serial {
    pub fn new(name: impl Into<String>, children: Vec<BoxedProvisioner>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }

    pub fn boxed(self) -> BoxedProvisioner {
        Arc::new(self)
    }
}

#[async_trait]
impl Provisioner for Serial {
    fn name(&self) -> &str {
        &self.name
    }

    async fn provision(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        for child in &self.children {
            child.provision(ctx).await?;
        }
        Ok(())
    }

    async fn deprovision(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        for child in self.children.iter().rev() {
            child.deprovision(ctx).await?;
        }
        Ok(())
    }

    fn on_remote(&mut self, remote: RemoteCluster) {
        for child in &mut self.children {
            Arc::get_mut(child)
                .expect("aggregator children must be uniquely owned during graph construction")
                .on_remote(remote.clone());
        }
    }

    fn background_delete(&mut self) {
        for child in &mut self.children {
            Arc::get_mut(child)
                .expect("aggregator children must be uniquely owned during graph construction")
                .background_delete();
        }
    }
}

/// Drives every child concurrently, waits for all to finish, and returns
/// the first hard error observed. If no child hard-errored but at least
/// one yielded, the group itself yields. All children are always invoked,
/// even once one has failed — idempotence makes this safe, and it avoids
/// under-provisioning the rest of the graph on the next retry.
pub struct Concurrent {
    name: String,
    children: Vec<BoxedProvisioner>,
}

impl Concurrent {
    pub fn new(name: impl Into<String>, children: Vec<BoxedProvisioner>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }

    pub fn boxed(self) -> BoxedProvisioner {
        Arc::new(self)
    }
}

#[async_trait]
impl Provisioner for Concurrent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn provision(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        run_concurrent(&self.name, &self.children, ctx, |child, ctx| async move {
            child.provision(&ctx).await
        })
        .await
    }

    async fn deprovision(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        run_concurrent(&self.name, &self.children, ctx, |child, ctx| async move {
            child.deprovision(&ctx).await
        })
        .await
    }

    fn on_remote(&mut self, remote: RemoteCluster) {
        for child in &mut self.children {
            Arc::get_mut(child)
                .expect("aggregator children must be uniquely owned during graph construction")
                .on_remote(remote.clone());
        }
    }

    fn background_delete(&mut self) {
        for child in &mut self.children {
            Arc::get_mut(child)
                .expect("aggregator children must be uniquely owned during graph construction")
                .background_delete();
        }
    }
}

async fn run_concurrent<F, Fut>(
    name: &str,
    children: &[BoxedProvisioner],
    ctx: &ProvisionContext,
    op: F,
) -> Result<(), Error>
where
    F: Fn(BoxedProvisioner, ProvisionContext) -> Fut,
    Fut: std::future::Future<Output = Result<(), Error>> + Send + 'static,
{
    let handles: Vec<_> = children
        .iter()
        .map(|child| tokio::spawn(op(child.clone(), ctx.clone())))
        .collect();

    let mut hard_error: Option<Error> = None;
    let mut yielded = false;
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_yield() => yielded = true,
            Ok(Err(e)) => {
                if hard_error.is_none() {
                    hard_error = Some(e);
                }
            }
            Err(join_err) => {
                if hard_error.is_none() {
                    hard_error = Some(Error::UserInput(format!(
                        "concurrent provisioner task panicked: {join_err}"
                    )));
                }
            }
        }
    }

    if let Some(e) = hard_error {
        return Err(e);
    }
    if yielded {
        return Err(Error::Yield(format!("{name}: waiting on concurrent children")));
    }
    Ok(())
}

/// `conditional(name, predicate, child)`: on provision, provisions `child`
/// if `predicate` is true, else deprovisions it. On deprovision, always
/// deprovisions `child` regardless of the predicate, so toggling a feature
/// off never leaks resources.
pub struct Conditional {
    name: String,
    predicate: Box<dyn Fn() -> bool + Send + Sync>,
    child: BoxedProvisioner,
}

impl Conditional {
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn() -> bool + Send + Sync + 'static,
        child: BoxedProvisioner,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
            child,
        }
    }

    pub fn boxed(self) -> BoxedProvisioner {
        Arc::new(self)
    }
}

#[async_trait]
impl Provisioner for Conditional {
    fn name(&self) -> &str {
        &self.name
    }

    async fn provision(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        if (self.predicate)() {
            self.child.provision(ctx).await
        } else {
            self.child.deprovision(ctx).await
        }
    }

    async fn deprovision(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        self.child.deprovision(ctx).await
    }

    fn on_remote(&mut self, remote: RemoteCluster) {
        Arc::get_mut(&mut self.child)
            .expect("aggregator children must be uniquely owned during graph construction")
            .on_remote(remote);
    }

    fn background_delete(&mut self) {
        Arc::get_mut(&mut self.child)
            .expect("aggregator children must be uniquely owned during graph construction")
            .background_delete();
    }
}

/// Wraps a plain Kubernetes object (not a Helm application): provision
/// upserts it via server-side apply, deprovision deletes it and yields
/// until it is gone.
pub struct ResourceProvisioner<T> {
    name: String,
    namespace: String,
    object: T,
    _marker: PhantomData<T>,
}

impl<T> ResourceProvisioner<T> {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, object: T) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            object,
            _marker: PhantomData,
        }
    }
}

impl<T> ResourceProvisioner<T>
where
    T: Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Resource<Scope = NamespaceResourceScope>
        + Send
        + Sync
        + 'static,
    <T as Resource>::DynamicType: Default + Send + Sync,
{
    pub fn boxed(self) -> BoxedProvisioner {
        Arc::new(self)
    }
}

#[async_trait]
impl<T> Provisioner for ResourceProvisioner<T>
where
    T: Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Resource<Scope = NamespaceResourceScope>
        + Send
        + Sync
        + 'static,
    <T as Resource>::DynamicType: Default + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn provision(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        let api: Api<T> = Api::namespaced(ctx.client.clone(), &self.namespace);
        api.patch(
            &self.name,
            &PatchParams::apply(MANAGER_NAME),
            &Patch::Apply(&self.object),
        )
        .await?;
        Ok(())
    }

    async fn deprovision(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        let api: Api<T> = Api::namespaced(ctx.client.clone(), &self.namespace);
        match api.get_opt(&self.name).await? {
            None => Ok(()),
            Some(_) => {
                api.delete(&self.name, &DeleteParams::default()).await?;
                Err(Error::Yield(format!("waiting for {} to delete", self.name)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    struct Recording {
        name: String,
        log: Arc<StdMutex<Vec<String>>>,
        result: Result<(), Error>,
    }

    #[async_trait]
    impl Provisioner for Recording {
        fn name(&self) -> &str {
            &self.name
        }
        async fn provision(&self, _ctx: &ProvisionContext) -> Result<(), Error> {
            self.log.lock().unwrap().push(self.name.clone());
            match &self.result {
                Ok(()) => Ok(()),
                Err(Error::Yield(m)) => Err(Error::Yield(m.clone())),
                Err(_) => Err(Error::Cancelled),
            }
        }
        async fn deprovision(&self, _ctx: &ProvisionContext) -> Result<(), Error> {
            self.log.lock().unwrap().push(format!("~{}", self.name));
            Ok(())
        }
    }

    fn test_ctx() -> ProvisionContext {
        use crate::provisioner::cd::CdDriver;
        struct DummyCd;
        #[async_trait]
        impl CdDriver for DummyCd {
            async fn create_or_update_helm_application(
                &self,
                _ctx: &ProvisionContext,
                _id: &argus_types::ResourceIdentifier,
                _app: &argus_types::HelmApplication,
            ) -> Result<(), Error> {
                Ok(())
            }
            async fn delete_helm_application(
                &self,
                _ctx: &ProvisionContext,
                _id: &argus_types::ResourceIdentifier,
                _background: bool,
            ) -> Result<(), Error> {
                Ok(())
            }
            async fn create_or_update_cluster(
                &self,
                _ctx: &ProvisionContext,
                _id: &argus_types::ResourceIdentifier,
                _cluster: &super::super::remote::RemoteClusterConfig,
            ) -> Result<(), Error> {
                Ok(())
            }
            async fn delete_cluster(
                &self,
                _ctx: &ProvisionContext,
                _id: &argus_types::ResourceIdentifier,
            ) -> Result<(), Error> {
                Ok(())
            }
        }
        ProvisionContext {
            client: kube::Client::try_from(
                kube::Config::new("https://unused.invalid".parse().unwrap()),
            )
            .unwrap(),
            namespace: "ns".to_string(),
            labels: Default::default(),
            bundle: Default::default(),
            now: chrono::Utc::now(),
            cd: Arc::new(DummyCd),
        }
    }

    #[tokio::test]
    async fn serial_short_circuits_on_first_yield() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let a: BoxedProvisioner = Arc::new(Recording {
            name: "a".into(),
            log: log.clone(),
            result: Ok(()),
        });
        let b: BoxedProvisioner = Arc::new(Recording {
            name: "b".into(),
            log: log.clone(),
            result: Err(Error::Yield("b not ready".into())),
        });
        let c: BoxedProvisioner = Arc::new(Recording {
            name: "c".into(),
            log: log.clone(),
            result: Ok(()),
        });
        let serial = Serial::new("graph", vec![a, b, c]);
        let err = serial.provision(&test_ctx()).await.unwrap_err();
        assert!(err.is_yield());
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn concurrent_invokes_all_children_even_after_a_hard_error() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let a: BoxedProvisioner = Arc::new(Recording {
            name: "a".into(),
            log: log.clone(),
            result: Err(Error::Cancelled),
        });
        let b: BoxedProvisioner = Arc::new(Recording {
            name: "b".into(),
            log: log.clone(),
            result: Ok(()),
        });
        let group = Concurrent::new("apps", vec![a, b]);
        let err = group.provision(&test_ctx()).await.unwrap_err();
        assert!(!err.is_yield());
        let mut seen = log.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn concurrent_yields_when_no_child_hard_errors_but_one_yields() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let a: BoxedProvisioner = Arc::new(Recording {
            name: "a".into(),
            log: log.clone(),
            result: Err(Error::Yield("waiting".into())),
        });
        let b: BoxedProvisioner = Arc::new(Recording {
            name: "b".into(),
            log: log.clone(),
            result: Ok(()),
        });
        let group = Concurrent::new("apps", vec![a, b]);
        let err = group.provision(&test_ctx()).await.unwrap_err();
        assert!(err.is_yield());
    }

    #[tokio::test]
    async fn conditional_deprovisions_child_when_predicate_is_false() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let child: BoxedProvisioner = Arc::new(Recording {
            name: "autoscaler".into(),
            log: log.clone(),
            result: Ok(()),
        });
        let enabled = Arc::new(AtomicU32::new(0));
        let enabled_read = enabled.clone();
        let cond = Conditional::new("autoscaler", move || enabled_read.load(Ordering::SeqCst) != 0, child);
        cond.provision(&test_ctx()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["~autoscaler"]);

        enabled.store(1, Ordering::SeqCst);
        cond.provision(&test_ctx()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["~autoscaler", "autoscaler"]);
    }

    #[tokio::test]
    async fn conditional_always_deprovisions_regardless_of_predicate() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let child: BoxedProvisioner = Arc::new(Recording {
            name: "ingress".into(),
            log: log.clone(),
            result: Ok(()),
        });
        let cond = Conditional::new("ingress", || true, child);
        cond.deprovision(&test_ctx()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["~ingress"]);
    }
}
