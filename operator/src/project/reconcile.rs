//! Entrypoint and reconciliation logic for the `Project` controller.
//!
//! A `Project` owns exactly one generate-named namespace, labelled with
//! the project's name, and cascades deletion to every `ControlPlane`
//! living in it before releasing the namespace itself.

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
use crate::util::{Error, PROBE_INTERVAL, colors::{FG1, FG2}, finalizer};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

pub async fn run(client: Client, namespace: String) -> Result<(), Error> {
    println!("{}", "⚙️ Starting Project controller...".green());

    let shutdown = CancellationToken::new();
    let context: Arc<ContextData> = Arc::new(ContextData::new(client.clone(), shutdown.clone()));

    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("argus-project-controller-{}", uuid::Uuid::new_v4()));
    let leadership = LeaseLock::new(
        client.clone(),
        &namespace,
        LeaseLockParams {
            holder_id,
            lease_name: "argus-project-controller-lock".to_string(),
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
                println!("{}", "👑 Acquired leadership; starting Project controller".green());
                let crd_api: Api<Project> = Api::all(client.clone());
                let context_for_controller = context.clone();
                controller_task = Some(tokio::spawn(async move {
                    Controller::new(crd_api, Default::default())
                        .run(reconcile, on_error, context_for_controller)
                        .for_each(|_res| async move {})
                        .await;
                }));
            }
        } else if let Some(task) = controller_task.take() {
            eprintln!("lost leadership; stopping Project controller");
            task.abort();
        }
    }
}

struct ContextData {
    client: Client,
    shutdown: CancellationToken,
    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,
}

impl ContextData {
    fn new(client: Client, shutdown: CancellationToken) -> Self {
        Self {
            client,
            shutdown,
            #[cfg(feature = "metrics")]
            metrics: ControllerMetrics::new("project"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ProjectAction {
    EnsureFinalizer,
    EnsureNamespace,
    Deprovisioning { namespace: String },
    RemoveFinalizer,
    NoOp,
}

impl ProjectAction {
    fn to_str(&self) -> &str {
        match self {
            ProjectAction::EnsureFinalizer => "EnsureFinalizer",
            ProjectAction::EnsureNamespace => "EnsureNamespace",
            ProjectAction::Deprovisioning { .. } => "Deprovisioning",
            ProjectAction::RemoveFinalizer => "RemoveFinalizer",
            ProjectAction::NoOp => "NoOp",
        }
    }
}

async fn reconcile(instance: Arc<Project>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let name = instance.name_any();

    #[cfg(feature = "metrics")]
    context.metrics.reconcile_counter.with_label_values(&[&name, ""]).inc();

    let action = determine_action(&instance);

    println!(
        "🔧 {}{}{}",
        name.color(FG2),
        " PROJECT ACTION: ".color(FG1),
        format!("{:?}", action).color(FG2),
    );

    #[cfg(feature = "metrics")]
    context
        .metrics
        .action_counter
        .with_label_values(&[&name, "", action.to_str()])
        .inc();

    let result = match action {
        ProjectAction::EnsureFinalizer => {
            actions::ensure_finalizer(client, &instance).await?;
            Action::requeue(Duration::from_secs(1))
        }
        ProjectAction::EnsureNamespace => {
            actions::ensure_namespace(client, &instance).await?;
            Action::requeue(PROBE_INTERVAL)
        }
        ProjectAction::Deprovisioning { namespace } => match actions::deprovision_control_planes(client.clone(), &namespace).await {
            Ok(()) => {
                actions::finish_deletion(client, &instance, &namespace, &context.shutdown).await?;
                Action::await_change()
            }
            Err(e) if e.is_yield() => Action::requeue(Duration::from_secs(5)),
            Err(e) => return Err(e),
        },
        ProjectAction::RemoveFinalizer => {
            actions::remove_finalizer_only(client, &instance).await?;
            Action::await_change()
        }
        ProjectAction::NoOp => Action::requeue(PROBE_INTERVAL),
    };

    Ok(result)
}

fn determine_action(instance: &Project) -> ProjectAction {
    if instance.metadata.deletion_timestamp.is_some() {
        if !finalizer::has_finalizer(instance) {
            return ProjectAction::NoOp;
        }
        return match instance.status.as_ref().and_then(|s| s.namespace.clone()) {
            Some(namespace) => ProjectAction::Deprovisioning { namespace },
            None => ProjectAction::RemoveFinalizer,
        };
    }
    if !finalizer::has_finalizer(instance) {
        return ProjectAction::EnsureFinalizer;
    }
    match instance.status.as_ref().and_then(|s| s.namespace.clone()) {
        Some(_) => ProjectAction::NoOp,
        None => ProjectAction::EnsureNamespace,
    }
}

fn on_error(instance: Arc<Project>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!("Project reconciliation error: {:?} {:?}", error, instance.name_any()).red()
    );
    Action::requeue(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with(deleted: bool, finalized: bool, namespace: Option<&str>) -> Project {
        let mut project = Project::new("p1", ProjectSpec::default());
        if deleted {
            project.metadata.deletion_timestamp = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                chrono::Utc::now(),
            ));
        }
        if finalized {
            project.metadata.finalizers = Some(vec![finalizer::PROVISIONER_FINALIZER.to_string()]);
        }
        project.status = Some(ProjectStatus {
            namespace: namespace.map(str::to_string),
            ..Default::default()
        });
        project
    }

    #[test]
    fn ensures_finalizer_before_anything_else() {
        let project = project_with(false, false, None);
        assert_eq!(determine_action(&project), ProjectAction::EnsureFinalizer);
    }

    #[test]
    fn ensures_namespace_once_finalized() {
        let project = project_with(false, true, None);
        assert_eq!(determine_action(&project), ProjectAction::EnsureNamespace);
    }

    #[test]
    fn is_noop_once_namespace_recorded() {
        let project = project_with(false, true, Some("project-abc"));
        assert_eq!(determine_action(&project), ProjectAction::NoOp);
    }

    #[test]
    fn deprovisions_on_delete_when_namespace_known() {
        let project = project_with(true, true, Some("project-abc"));
        assert_eq!(
            determine_action(&project),
            ProjectAction::Deprovisioning {
                namespace: "project-abc".to_string()
            }
        );
    }

    #[test]
    fn removes_finalizer_on_delete_when_namespace_never_recorded() {
        let project = project_with(true, true, None);
        assert_eq!(determine_action(&project), ProjectAction::RemoveFinalizer);
    }
}
