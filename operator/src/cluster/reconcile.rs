//! Entrypoint and reconciliation logic for the `KubernetesCluster` controller.
//!
//! Drives `serial(clusterOpenstack@vcluster, concurrent(cilium@guest,
//! openstack-cloud-provider@guest, conditional(autoscaling, autoscaler),
//! conditional(gpu, gpu-operator), conditional(ingress, ingress),
//! conditional(cert-manager, cert-manager), conditional(dashboard, dashboard),
//! file-injector))`; deprovision runs the same graph in reverse, then
//! releases the cluster's own namespace. There are no further child CRDs to
//! cascade to — a `KubernetesCluster` is the leaf of the resource tree.

use futures::stream::StreamExt;
use kube::{
    Api, ResourceExt,
    client::Client,
    runtime::{Controller, controller::Action},
};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use std::sync::Arc;
use argus_types::*;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::actions;
use crate::provisioner::cd::CdDriver;
use crate::util::{Error, PROBE_INTERVAL, colors::{FG1, FG2}, finalizer};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

pub async fn run(client: Client, namespace: String, cd: Arc<dyn CdDriver>) -> Result<(), Error> {
    println!("{}", "⚙️ Starting KubernetesCluster controller...".green());

    let shutdown = CancellationToken::new();
    let context: Arc<ContextData> = Arc::new(ContextData::new(client.clone(), cd, shutdown.clone()));

    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("argus-cluster-controller-{}", uuid::Uuid::new_v4()));
    let leadership = LeaseLock::new(
        client.clone(),
        &namespace,
        LeaseLockParams {
            holder_id,
            lease_name: "argus-cluster-controller-lock".to_string(),
            lease_ttl: Duration::from_secs(15),
        },
    );

    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        argus_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });

    let mut controller_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = controller_task.take() {
                    task.abort();
                    task.await.ok();
                }
                break Ok(())
            },
            _ = tick.tick() => {}
        }
        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("leader election renew/acquire failed: {e}");
                if let Some(task) = controller_task.take() {
                    task.abort();
                }
                continue;
            }
        };
        if matches!(lease, LeaseLockResult::Acquired(_)) {
            if controller_task.is_none() {
                println!("{}", "👑 Acquired leadership; starting KubernetesCluster controller".green());
                let crd_api: Api<KubernetesCluster> = Api::all(client.clone());
                let context_for_controller = context.clone();
                controller_task = Some(tokio::spawn(async move {
                    Controller::new(crd_api, Default::default())
                        .run(reconcile, on_error, context_for_controller)
                        .for_each(|_res| async move {})
                        .await;
                }));
            }
        } else if let Some(task) = controller_task.take() {
            eprintln!("lost leadership; stopping KubernetesCluster controller");
            task.abort();
        }
    }
}

struct ContextData {
    client: Client,
    cd: Arc<dyn CdDriver>,
    shutdown: CancellationToken,
    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,
}

impl ContextData {
    fn new(client: Client, cd: Arc<dyn CdDriver>, shutdown: CancellationToken) -> Self {
        Self {
            client,
            cd,
            shutdown,
            #[cfg(feature = "metrics")]
            metrics: ControllerMetrics::new("kubernetes_cluster"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ClusterAction {
    EnsureFinalizer,
    EnsureNamespace,
    Provision { namespace: String },
    Deprovisioning { namespace: String },
    RemoveFinalizer,
}

async fn reconcile(instance: Arc<KubernetesCluster>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let name = instance.name_any();

    #[cfg(feature = "metrics")]
    context.metrics.reconcile_counter.with_label_values(&[&name, ""]).inc();

    let action = determine_action(&instance);

    println!(
        "🔧 {}{}{}",
        name.color(FG2),
        " KUBERNETESCLUSTER ACTION: ".color(FG1),
        format!("{:?}", action).color(FG2),
    );

    let result = match action {
        ClusterAction::EnsureFinalizer => {
            actions::ensure_finalizer(client, &instance).await?;
            Action::requeue(Duration::from_secs(1))
        }
        ClusterAction::EnsureNamespace => {
            actions::ensure_namespace(client, &instance).await?;
            Action::requeue(Duration::from_secs(1))
        }
        ClusterAction::Provision { namespace } => {
            match actions::provision(client.clone(), context.cd.clone(), &instance, namespace).await {
                Ok(()) => Action::requeue(PROBE_INTERVAL),
                Err(e) if e.is_yield() => Action::requeue(Duration::from_secs(5)),
                Err(e) => {
                    actions::mark_errored(client, &instance, e.to_string()).await?;
                    return Err(e);
                }
            }
        }
        ClusterAction::Deprovisioning { namespace } => {
            match actions::deprovision_graph(client.clone(), context.cd.clone(), &instance, &namespace).await {
                Ok(()) => {
                    actions::finish_deletion(client, &instance, &namespace, &context.shutdown).await?;
                    Action::await_change()
                }
                Err(e) if e.is_yield() => Action::requeue(Duration::from_secs(5)),
                Err(e) => return Err(e),
            }
        }
        ClusterAction::RemoveFinalizer => {
            actions::remove_finalizer_only(client, &instance).await?;
            Action::await_change()
        }
    };

    Ok(result)
}

fn determine_action(instance: &KubernetesCluster) -> ClusterAction {
    if instance.metadata.deletion_timestamp.is_some() {
        if !finalizer::has_finalizer(instance) {
            return ClusterAction::RemoveFinalizer;
        }
        return match instance.status.as_ref().and_then(|s| s.namespace.clone()) {
            Some(namespace) => ClusterAction::Deprovisioning { namespace },
            None => ClusterAction::RemoveFinalizer,
        };
    }
    if !finalizer::has_finalizer(instance) {
        return ClusterAction::EnsureFinalizer;
    }
    match instance.status.as_ref().and_then(|s| s.namespace.clone()) {
        Some(namespace) => ClusterAction::Provision { namespace },
        None => ClusterAction::EnsureNamespace,
    }
}

fn on_error(instance: Arc<KubernetesCluster>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!("KubernetesCluster reconciliation error: {:?} {:?}", error, instance.name_any()).red()
    );
    Action::requeue(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with(deleted: bool, finalized: bool, namespace: Option<&str>) -> KubernetesCluster {
        let mut cluster = KubernetesCluster::new(
            "c1",
            KubernetesClusterSpec {
                openstack: OpenStackAuth::default(),
                network: NetworkSpec::default(),
                control_plane: MachineSpec::default(),
                workload_pools: Vec::new(),
                features: FeatureToggles::default(),
                api: ApiSettings::default(),
                application_bundle: BundleRef::default(),
                auto_upgrade: None,
            },
        );
        if deleted {
            cluster.metadata.deletion_timestamp = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                chrono::Utc::now(),
            ));
        }
        if finalized {
            cluster.metadata.finalizers = Some(vec![finalizer::PROVISIONER_FINALIZER.to_string()]);
        }
        cluster.status = Some(KubernetesClusterStatus {
            namespace: namespace.map(str::to_string),
            ..Default::default()
        });
        cluster
    }

    #[test]
    fn ensures_namespace_once_finalized() {
        let cluster = cluster_with(false, true, None);
        assert_eq!(determine_action(&cluster), ClusterAction::EnsureNamespace);
    }

    #[test]
    fn provisions_once_namespace_known() {
        let cluster = cluster_with(false, true, Some("cluster-abc"));
        assert_eq!(
            determine_action(&cluster),
            ClusterAction::Provision {
                namespace: "cluster-abc".to_string()
            }
        );
    }

    #[test]
    fn deprovisions_on_delete() {
        let cluster = cluster_with(true, true, Some("cluster-abc"));
        assert_eq!(
            determine_action(&cluster),
            ClusterAction::Deprovisioning {
                namespace: "cluster-abc".to_string()
            }
        );
    }

    #[test]
    fn removes_finalizer_on_delete_when_namespace_never_recorded() {
        let cluster = cluster_with(true, true, None);
        assert_eq!(determine_action(&cluster), ClusterAction::RemoveFinalizer);
    }
}
