//! Entrypoint and reconciliation logic for the `ControlPlane` controller.
//!
//! Drives `serial(vcluster, remoteClusterRegistration(vcluster),
//! certManager@remote, clusterApi@remote)`; deprovision runs the same
//! graph in reverse, then cascades to child `KubernetesCluster`s, then
//! releases the namespace.

use futures::stream::StreamExt;
use kube::{
    Api, ResourceExt,
    client::Client,
    runtime::{Controller, controller::Action},
};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::Arc;
use argus_types::*;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::actions;
use crate::provisioner::cd::CdDriver;
use crate::util::{Error, PROBE_INTERVAL, colors::{FG1, FG2}, finalizer};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

pub async fn run(client: Client, namespace: String, cd: Arc<dyn CdDriver>, manifest_root: PathBuf) -> Result<(), Error> {
    println!("{}", "⚙️ Starting ControlPlane controller...".green());

    let shutdown = CancellationToken::new();
    let context: Arc<ContextData> = Arc::new(ContextData::new(client.clone(), cd, manifest_root, shutdown.clone()));

    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("argus-controlplane-controller-{}", uuid::Uuid::new_v4()));
    let leadership = LeaseLock::new(
        client.clone(),
        &namespace,
        LeaseLockParams {
            holder_id,
            lease_name: "argus-controlplane-controller-lock".to_string(),
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
                println!("{}", "👑 Acquired leadership; starting ControlPlane controller".green());
                let crd_api: Api<ControlPlane> = Api::all(client.clone());
                let context_for_controller = context.clone();
                controller_task = Some(tokio::spawn(async move {
                    Controller::new(crd_api, Default::default())
                        .run(reconcile, on_error, context_for_controller)
                        .for_each(|_res| async move {})
                        .await;
                }));
            }
        } else if let Some(task) = controller_task.take() {
            eprintln!("lost leadership; stopping ControlPlane controller");
            task.abort();
        }
    }
}

struct ContextData {
    client: Client,
    cd: Arc<dyn CdDriver>,
    manifest_root: PathBuf,
    shutdown: CancellationToken,
    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,
}

impl ContextData {
    fn new(client: Client, cd: Arc<dyn CdDriver>, manifest_root: PathBuf, shutdown: CancellationToken) -> Self {
        Self {
            client,
            cd,
            manifest_root,
            shutdown,
            #[cfg(feature = "metrics")]
            metrics: ControllerMetrics::new("control_plane"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ControlPlaneAction {
    EnsureFinalizer,
    EnsureNamespace,
    Provision { namespace: String },
    Deprovisioning { namespace: String },
    RemoveFinalizer,
}

async fn reconcile(instance: Arc<ControlPlane>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let name = instance.name_any();

    #[cfg(feature = "metrics")]
    context.metrics.reconcile_counter.with_label_values(&[&name, ""]).inc();

    let action = determine_action(&instance);

    println!(
        "🔧 {}{}{}",
        name.color(FG2),
        " CONTROLPLANE ACTION: ".color(FG1),
        format!("{:?}", action).color(FG2),
    );

    let result = match action {
        ControlPlaneAction::EnsureFinalizer => {
            actions::ensure_finalizer(client, &instance).await?;
            Action::requeue(Duration::from_secs(1))
        }
        ControlPlaneAction::EnsureNamespace => {
            actions::ensure_namespace(client, &instance).await?;
            Action::requeue(Duration::from_secs(1))
        }
        ControlPlaneAction::Provision { namespace } => {
            match actions::provision(client.clone(), context.cd.clone(), &context.manifest_root, &instance, namespace).await {
                Ok(()) => Action::requeue(PROBE_INTERVAL),
                Err(e) if e.is_yield() => Action::requeue(Duration::from_secs(5)),
                Err(e) => {
                    actions::mark_errored(client, &instance, e.to_string()).await?;
                    return Err(e);
                }
            }
        }
        ControlPlaneAction::Deprovisioning { namespace } => match actions::deprovision_clusters(client.clone(), &namespace).await {
            Ok(()) => {
                actions::deprovision_graph(client.clone(), context.cd.clone(), &context.manifest_root, &instance, &namespace).await?;
                actions::finish_deletion(client, &instance, &namespace, &context.shutdown).await?;
                Action::await_change()
            }
            Err(e) if e.is_yield() => Action::requeue(Duration::from_secs(5)),
            Err(e) => return Err(e),
        },
        ControlPlaneAction::RemoveFinalizer => {
            actions::remove_finalizer_only(client, &instance).await?;
            Action::await_change()
        }
    };

    Ok(result)
}

fn determine_action(instance: &ControlPlane) -> ControlPlaneAction {
    if instance.metadata.deletion_timestamp.is_some() {
        if !finalizer::has_finalizer(instance) {
            return ControlPlaneAction::RemoveFinalizer;
        }
        return match instance.status.as_ref().and_then(|s| s.namespace.clone()) {
            Some(namespace) => ControlPlaneAction::Deprovisioning { namespace },
            None => ControlPlaneAction::RemoveFinalizer,
        };
    }
    if !finalizer::has_finalizer(instance) {
        return ControlPlaneAction::EnsureFinalizer;
    }
    match instance.status.as_ref().and_then(|s| s.namespace.clone()) {
        Some(namespace) => ControlPlaneAction::Provision { namespace },
        None => ControlPlaneAction::EnsureNamespace,
    }
}

fn on_error(instance: Arc<ControlPlane>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!("ControlPlane reconciliation error: {:?} {:?}", error, instance.name_any()).red()
    );
    Action::requeue(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control_plane_with(deleted: bool, finalized: bool, namespace: Option<&str>) -> ControlPlane {
        let mut cp = ControlPlane::new(
            "cp1",
            ControlPlaneSpec {
                project: "p1".to_string(),
                application_bundle: BundleRef::default(),
            },
        );
        if deleted {
            cp.metadata.deletion_timestamp = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                chrono::Utc::now(),
            ));
        }
        if finalized {
            cp.metadata.finalizers = Some(vec![finalizer::PROVISIONER_FINALIZER.to_string()]);
        }
        cp.status = Some(ControlPlaneStatus {
            namespace: namespace.map(str::to_string),
            ..Default::default()
        });
        cp
    }

    #[test]
    fn ensures_namespace_once_finalized() {
        let cp = control_plane_with(false, true, None);
        assert_eq!(determine_action(&cp), ControlPlaneAction::EnsureNamespace);
    }

    #[test]
    fn provisions_once_namespace_known() {
        let cp = control_plane_with(false, true, Some("controlplane-abc"));
        assert_eq!(
            determine_action(&cp),
            ControlPlaneAction::Provision {
                namespace: "controlplane-abc".to_string()
            }
        );
    }

    #[test]
    fn deprovisions_on_delete() {
        let cp = control_plane_with(true, true, Some("controlplane-abc"));
        assert_eq!(
            determine_action(&cp),
            ControlPlaneAction::Deprovisioning {
                namespace: "controlplane-abc".to_string()
            }
        );
    }
}
