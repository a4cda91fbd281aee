use crate::util::{Error, finalizer, namespace, patch::patch_status};
use argus_common::labels;
use argus_types::{ControlPlane, Phase, Project};
use kube::api::{Api, DeleteParams, ListParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

pub async fn ensure_finalizer(client: Client, instance: &Project) -> Result<(), Error> {
    finalizer::ensure_finalizer(client, instance).await
}

pub async fn ensure_namespace(client: Client, instance: &Project) -> Result<(), Error> {
    let mut selector = BTreeMap::new();
    selector.insert(labels::PROJECT.to_string(), instance.name_any());
    let ns = namespace::ensure_labeled_namespace(client.clone(), "project-", &selector).await?;
    patch_status(client, instance, |status| {
        status.phase = Phase::Provisioned;
        status.namespace = Some(ns);
        status.message = None;
    })
    .await?;
    Ok(())
}

pub async fn mark_errored(client: Client, instance: &Project, message: String) -> Result<(), Error> {
    patch_status(client, instance, |status| {
        status.phase = Phase::Errored;
        status.message = Some(message);
    })
    .await?;
    Ok(())
}

/// Issues a delete for every `ControlPlane` still present in the project
/// namespace and yields until the list is empty. Each `ControlPlane`'s own
/// reconciler drives its deprovisioning; this only ensures the delete has
/// been requested.
pub async fn deprovision_control_planes(client: Client, namespace: &str) -> Result<(), Error> {
    let api: Api<ControlPlane> = Api::namespaced(client, namespace);
    let list = api.list(&ListParams::default()).await?;
    if list.items.is_empty() {
        return Ok(());
    }
    for control_plane in list.items {
        if control_plane.metadata.deletion_timestamp.is_none() {
            api.delete(&control_plane.name_any(), &DeleteParams::default()).await?;
        }
    }
    Err(Error::Yield(
        "waiting for child control planes to finish deprovisioning".to_string(),
    ))
}

pub async fn finish_deletion(
    client: Client,
    instance: &Project,
    namespace: &str,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    crate::util::namespace::delete_namespace_and_wait(client.clone(), namespace, cancel).await?;
    finalizer::remove_finalizer(client, instance).await
}

pub async fn remove_finalizer_only(client: Client, instance: &Project) -> Result<(), Error> {
    finalizer::remove_finalizer(client, instance).await
}
