use crate::domain::{cert_manager::CertManagerGenerator, cluster_api, vcluster};
use crate::provisioner::aggregate::Serial;
use crate::provisioner::application::ApplicationProvisioner;
use crate::provisioner::cd::CdDriver;
use crate::provisioner::remote::RemoteCluster;
use crate::provisioner::{BoxedProvisioner, ProvisionContext, Provisioner};
use crate::util::{Error, finalizer, merge::merge_labels, namespace, patch::patch_status};
use argus_common::labels;
use argus_types::{ApplicationBundleSpec, ControlPlane, KubernetesCluster, Phase};
use kube::api::{Api, DeleteParams, ListParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn ensure_finalizer(client: Client, instance: &ControlPlane) -> Result<(), Error> {
    finalizer::ensure_finalizer(client, instance).await
}

pub async fn ensure_namespace(client: Client, instance: &ControlPlane) -> Result<String, Error> {
    if let Some(ns) = instance.status.as_ref().and_then(|s| s.namespace.clone()) {
        return Ok(ns);
    }
    let mut selector = BTreeMap::new();
    selector.insert(labels::PROJECT.to_string(), instance.spec.project.clone());
    selector.insert(labels::CONTROL_PLANE.to_string(), instance.name_any());
    let ns = namespace::ensure_labeled_namespace(client.clone(), "controlplane-", &selector).await?;
    patch_status(client, instance, |status| {
        status.namespace = Some(ns.clone());
    })
    .await?;
    Ok(ns)
}

async fn fetch_bundle(client: Client, namespace: &str, bundle_name: &str) -> Result<ApplicationBundleSpec, Error> {
    let api: Api<argus_types::ApplicationBundle> = Api::namespaced(client, namespace);
    let bundle = api.get(bundle_name).await?;
    Ok(bundle.spec)
}

pub fn graph(manifest_root: &Path, control_plane: &str, namespace: &str) -> BoxedProvisioner {
    let remote = RemoteCluster::new(
        Arc::new(vcluster::VclusterGenerator::new(control_plane, namespace)),
        true,
    );
    let cert_manager = remote.provision_on(
        ApplicationProvisioner::new("cert-manager")
            .with_generator(Arc::new(CertManagerGenerator))
            .in_namespace("cert-manager")
            .boxed(),
    );
    let capi = remote.provision_on(cluster_api::provisioner(manifest_root, namespace));
    Serial::new(
        "control-plane",
        vec![vcluster::provisioner(manifest_root, control_plane, namespace), cert_manager, capi],
    )
    .boxed()
}

pub async fn provision(
    client: Client,
    cd: Arc<dyn CdDriver>,
    manifest_root: &Path,
    instance: &ControlPlane,
    namespace: String,
) -> Result<(), Error> {
    let own_namespace = instance
        .namespace()
        .ok_or_else(|| Error::UserInput("ControlPlane is missing metadata.namespace".to_string()))?;
    let bundle = fetch_bundle(client.clone(), &own_namespace, &instance.spec.application_bundle.name).await?;
    let mut project_labels = BTreeMap::new();
    project_labels.insert(labels::PROJECT.to_string(), instance.spec.project.clone());
    let mut own_labels = BTreeMap::new();
    own_labels.insert(labels::CONTROL_PLANE.to_string(), instance.name_any());
    let labels = merge_labels(&[&project_labels, &own_labels]);
    let ctx = ProvisionContext {
        client: client.clone(),
        namespace: namespace.clone(),
        labels,
        bundle,
        now: chrono::Utc::now(),
        cd,
    };
    let tree = graph(manifest_root, &instance.name_any(), &namespace);
    match tree.provision(&ctx).await {
        Ok(()) => {
            patch_status(client, instance, |status| {
                status.phase = Phase::Provisioned;
                status.message = None;
            })
            .await?;
            Ok(())
        }
        Err(e) if e.is_yield() => {
            patch_status(client, instance, |status| {
                status.phase = Phase::Provisioning;
            })
            .await?;
            Err(e)
        }
        Err(e) => Err(e),
    }
}

pub async fn mark_errored(client: Client, instance: &ControlPlane, message: String) -> Result<(), Error> {
    patch_status(client, instance, |status| {
        status.phase = Phase::Errored;
        status.message = Some(message);
    })
    .await?;
    Ok(())
}

/// Issues a delete for every `KubernetesCluster` still present in the
/// control-plane namespace and yields until the list is empty.
pub async fn deprovision_clusters(client: Client, namespace: &str) -> Result<(), Error> {
    let api: Api<KubernetesCluster> = Api::namespaced(client, namespace);
    let list = api.list(&ListParams::default()).await?;
    if list.items.is_empty() {
        return Ok(());
    }
    for cluster in list.items {
        if cluster.metadata.deletion_timestamp.is_none() {
            api.delete(&cluster.name_any(), &DeleteParams::default()).await?;
        }
    }
    Err(Error::Yield(
        "waiting for child kubernetes clusters to finish deprovisioning".to_string(),
    ))
}

pub async fn deprovision_graph(
    client: Client,
    cd: Arc<dyn CdDriver>,
    manifest_root: &Path,
    instance: &ControlPlane,
    namespace: &str,
) -> Result<(), Error> {
    let own_namespace = instance
        .namespace()
        .ok_or_else(|| Error::UserInput("ControlPlane is missing metadata.namespace".to_string()))?;
    let bundle = fetch_bundle(client.clone(), &own_namespace, &instance.spec.application_bundle.name).await?;
    let mut project_labels = BTreeMap::new();
    project_labels.insert(labels::PROJECT.to_string(), instance.spec.project.clone());
    let mut own_labels = BTreeMap::new();
    own_labels.insert(labels::CONTROL_PLANE.to_string(), instance.name_any());
    let labels = merge_labels(&[&project_labels, &own_labels]);
    let ctx = ProvisionContext {
        client,
        namespace: namespace.to_string(),
        labels,
        bundle,
        now: chrono::Utc::now(),
        cd,
    };
    let tree = graph(manifest_root, &instance.name_any(), namespace);
    tree.deprovision(&ctx).await
}

pub async fn finish_deletion(
    client: Client,
    instance: &ControlPlane,
    namespace: &str,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    namespace::delete_namespace_and_wait(client.clone(), namespace, cancel).await?;
    finalizer::remove_finalizer(client, instance).await
}

pub async fn remove_finalizer_only(client: Client, instance: &ControlPlane) -> Result<(), Error> {
    finalizer::remove_finalizer(client, instance).await
}
