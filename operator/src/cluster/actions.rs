use crate::domain::{
    cert_manager::CertManagerGenerator, cilium::CiliumGenerator, cluster_autoscaler::ClusterAutoscalerGenerator,
    cluster_openstack::ClusterOpenstackGenerator, dashboard::DashboardGenerator, file_injector, ingress::IngressGenerator,
    nvidia_gpu_operator, openstack_cloud_provider::OpenstackCloudProviderGenerator, vcluster::VclusterGenerator,
};
use crate::provisioner::aggregate::{Concurrent, Conditional, Serial};
use crate::provisioner::application::ApplicationProvisioner;
use crate::provisioner::cd::CdDriver;
use crate::provisioner::remote::RemoteCluster;
use crate::provisioner::{BoxedProvisioner, ProvisionContext, Provisioner};
use crate::util::{Error, finalizer, merge::merge_labels, namespace, patch::patch_status};
use argus_common::labels;
use argus_types::{ApplicationBundleSpec, KubernetesCluster, Phase};
use kube::api::Api;
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const GPU_OPERATOR_LICENCE_ENV: &str = "NVIDIA_GPU_LICENSE_KEY";

pub async fn ensure_finalizer(client: Client, instance: &KubernetesCluster) -> Result<(), Error> {
    finalizer::ensure_finalizer(client, instance).await
}

pub async fn ensure_namespace(client: Client, instance: &KubernetesCluster) -> Result<String, Error> {
    if let Some(ns) = instance.status.as_ref().and_then(|s| s.namespace.clone()) {
        return Ok(ns);
    }
    let mut selector = BTreeMap::new();
    selector.insert(labels::CLUSTER.to_string(), instance.name_any());
    let ns = namespace::ensure_labeled_namespace(client.clone(), "cluster-", &selector).await?;
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

/// A `KubernetesCluster` doesn't carry a direct reference to its owning
/// `ControlPlane`; it is recovered from the label the control plane
/// reconciler stamped on the namespace the cluster lives in.
async fn control_plane_name(client: Client, controlplane_namespace: &str) -> Result<String, Error> {
    namespace::read_namespace_label(client, controlplane_namespace, labels::CONTROL_PLANE).await
}

async fn project_name(client: Client, controlplane_namespace: &str) -> Result<String, Error> {
    namespace::read_namespace_label(client, controlplane_namespace, labels::PROJECT).await
}

fn has_gpu_pool(instance: &KubernetesCluster) -> bool {
    instance
        .spec
        .workload_pools
        .iter()
        .any(|pool| pool.autoscaling.as_ref().is_some_and(|a| a.scheduler_hint.gpu.is_some()))
}

/// Builds `serial(clusterOpenstack, concurrent(cilium, openstack-cloud-provider,
/// conditional(autoscaling, autoscaler), conditional(gpu, gpu-operator),
/// conditional(ingress, ingress), conditional(cert-manager, cert-manager),
/// conditional(dashboard, dashboard), file-injector))`.
///
/// `clusterOpenstack` is bound to the control plane's vcluster (it deploys
/// the Cluster API objects CAPI's controllers, running inside the vcluster,
/// reconcile into real OpenStack machines); everything else is bound to the
/// guest cluster the OpenStack chart itself brings up and registers.
pub fn graph(instance: &KubernetesCluster, control_plane: &str, controlplane_namespace: &str, namespace: &str) -> Result<BoxedProvisioner, Error> {
    let spec = &instance.spec;
    let cluster_name = instance.name_any();

    let vcluster_remote = RemoteCluster::new(
        Arc::new(VclusterGenerator::new(control_plane, controlplane_namespace)),
        false,
    );

    let openstack_gen = Arc::new(ClusterOpenstackGenerator::new(
        cluster_name.clone(),
        namespace.to_string(),
        spec.control_plane.clone(),
        spec.workload_pools.clone(),
        spec.network.clone(),
        spec.openstack.clone(),
    ));
    let cluster_openstack_step = vcluster_remote.provision_on(
        ApplicationProvisioner::new("cluster-openstack")
            .with_generator(openstack_gen.clone())
            .boxed(),
    );

    let guest = RemoteCluster::new(openstack_gen, true);

    let cloud_provider = Arc::new(OpenstackCloudProviderGenerator::new(&spec.openstack)?);

    let autoscaling_enabled = spec.features.autoscaling;
    let has_gpu = has_gpu_pool(instance);
    let ingress_enabled = spec.features.ingress;
    let cert_manager_enabled = spec.features.cert_manager;
    let dashboard_enabled = spec.features.dashboard;
    let licence_key = std::env::var(GPU_OPERATOR_LICENCE_ENV).unwrap_or_default();

    let cilium_step = guest.provision_on(
        ApplicationProvisioner::new("cilium")
            .with_generator(Arc::new(CiliumGenerator::new(spec.network.clone())))
            .in_namespace("kube-system")
            .boxed(),
    );

    let cloud_provider_step = guest.provision_on(
        ApplicationProvisioner::new("openstack-cloud-provider")
            .with_generator(cloud_provider)
            .in_namespace("kube-system")
            .boxed(),
    );

    let autoscaler_step = Conditional::new(
        "cluster-autoscaler",
        move || autoscaling_enabled,
        guest.provision_on(
            ApplicationProvisioner::new("cluster-autoscaler")
                .with_generator(Arc::new(ClusterAutoscalerGenerator::new(cluster_name.clone())))
                .in_namespace("kube-system")
                .boxed(),
        ),
    )
    .boxed();

    let gpu_operator_step = Conditional::new("nvidia-gpu-operator", move || has_gpu, nvidia_gpu_operator::provisioner(&guest, &licence_key)).boxed();

    let ingress_step = Conditional::new(
        "ingress",
        move || ingress_enabled,
        guest.provision_on(
            ApplicationProvisioner::new("ingress-nginx")
                .with_generator(Arc::new(IngressGenerator::new(spec.api.allowed_prefixes.clone())))
                .in_namespace("ingress-nginx")
                .boxed(),
        ),
    )
    .boxed();

    let cert_manager_step = Conditional::new(
        "cert-manager",
        move || cert_manager_enabled,
        guest.provision_on(
            ApplicationProvisioner::new("cert-manager")
                .with_generator(Arc::new(CertManagerGenerator))
                .in_namespace("cert-manager")
                .boxed(),
        ),
    )
    .boxed();

    let dashboard_step = Conditional::new(
        "dashboard",
        move || dashboard_enabled,
        guest.provision_on(
            ApplicationProvisioner::new("kubernetes-dashboard")
                .with_generator(Arc::new(DashboardGenerator))
                .in_namespace("kubernetes-dashboard")
                .boxed(),
        ),
    )
    .boxed();

    let file_injector_step = file_injector::provisioner(&guest, "kube-system", &spec.workload_pools, spec.features.file_injection);

    let addons = Concurrent::new(
        "addons",
        vec![
            cilium_step,
            cloud_provider_step,
            autoscaler_step,
            gpu_operator_step,
            ingress_step,
            cert_manager_step,
            dashboard_step,
            file_injector_step,
        ],
    )
    .boxed();

    Ok(Serial::new("kubernetes-cluster", vec![cluster_openstack_step, addons]).boxed())
}

pub async fn provision(
    client: Client,
    cd: Arc<dyn CdDriver>,
    instance: &KubernetesCluster,
    namespace: String,
) -> Result<(), Error> {
    let controlplane_namespace = instance
        .namespace()
        .ok_or_else(|| Error::UserInput("KubernetesCluster is missing metadata.namespace".to_string()))?;
    let control_plane = control_plane_name(client.clone(), &controlplane_namespace).await?;
    let project = project_name(client.clone(), &controlplane_namespace).await?;
    let bundle = fetch_bundle(client.clone(), &controlplane_namespace, &instance.spec.application_bundle.name).await?;

    let mut owner_labels = BTreeMap::new();
    owner_labels.insert(labels::PROJECT.to_string(), project);
    owner_labels.insert(labels::CONTROL_PLANE.to_string(), control_plane.clone());
    let mut cluster_labels = BTreeMap::new();
    cluster_labels.insert(labels::CLUSTER.to_string(), instance.name_any());
    let labels = merge_labels(&[&owner_labels, &cluster_labels]);

    let ctx = ProvisionContext {
        client: client.clone(),
        namespace: namespace.clone(),
        labels,
        bundle,
        now: chrono::Utc::now(),
        cd,
    };
    let tree = graph(instance, &control_plane, &controlplane_namespace, &namespace)?;
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

pub async fn mark_errored(client: Client, instance: &KubernetesCluster, message: String) -> Result<(), Error> {
    patch_status(client, instance, |status| {
        status.phase = Phase::Errored;
        status.message = Some(message);
    })
    .await?;
    Ok(())
}

pub async fn deprovision_graph(
    client: Client,
    cd: Arc<dyn CdDriver>,
    instance: &KubernetesCluster,
    namespace: &str,
) -> Result<(), Error> {
    let controlplane_namespace = instance
        .namespace()
        .ok_or_else(|| Error::UserInput("KubernetesCluster is missing metadata.namespace".to_string()))?;
    let control_plane = control_plane_name(client.clone(), &controlplane_namespace).await?;
    let project = project_name(client.clone(), &controlplane_namespace).await?;
    let bundle = fetch_bundle(client.clone(), &controlplane_namespace, &instance.spec.application_bundle.name).await?;

    let mut owner_labels = BTreeMap::new();
    owner_labels.insert(labels::PROJECT.to_string(), project);
    owner_labels.insert(labels::CONTROL_PLANE.to_string(), control_plane.clone());
    let mut cluster_labels = BTreeMap::new();
    cluster_labels.insert(labels::CLUSTER.to_string(), instance.name_any());
    let labels = merge_labels(&[&owner_labels, &cluster_labels]);

    let ctx = ProvisionContext {
        client,
        namespace: namespace.to_string(),
        labels,
        bundle,
        now: chrono::Utc::now(),
        cd,
    };
    let tree = graph(instance, &control_plane, &controlplane_namespace, namespace)?;
    tree.deprovision(&ctx).await
}

pub async fn finish_deletion(
    client: Client,
    instance: &KubernetesCluster,
    namespace: &str,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    namespace::delete_namespace_and_wait(client.clone(), namespace, cancel).await?;
    finalizer::remove_finalizer(client, instance).await
}

pub async fn remove_finalizer_only(client: Client, instance: &KubernetesCluster) -> Result<(), Error> {
    finalizer::remove_finalizer(client, instance).await
}
