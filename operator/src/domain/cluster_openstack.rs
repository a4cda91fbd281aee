//! cluster-openstack: renders the Cluster API + OpenStack-provider Helm
//! chart for one `KubernetesCluster`, and is also the `RemoteClusterGenerator`
//! that registers the resulting Kubernetes cluster as a provisioning target.
//!
//! The workload-pool list is snapshotted at construction so a concurrent
//! spec edit mid-reconcile cannot corrupt the generated chart values.

use super::{kubeconfig_server, read_kubeconfig_secret};
use crate::provisioner::ProvisionContext;
use crate::provisioner::application::Generator;
use crate::provisioner::remote::RemoteClusterGenerator;
use crate::util::Error;
use argus_types::{MachineSpec, NetworkSpec, OpenStackAuth, ResourceIdentifier, WorkloadPool};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams};
use kube::ResourceExt;
use std::collections::HashSet;

const CAPI_KINDS: &[(&str, &str, &str)] = &[
    ("cluster.x-k8s.io", "v1beta1", "MachineDeployment"),
    ("bootstrap.cluster.x-k8s.io", "v1beta1", "KubeadmConfigTemplate"),
    ("infrastructure.cluster.x-k8s.io", "v1alpha7", "OpenStackMachineTemplate"),
    ("controlplane.cluster.x-k8s.io", "v1beta1", "KubeadmControlPlane"),
];

pub struct ClusterOpenstackGenerator {
    cluster_name: String,
    namespace: String,
    control_plane: MachineSpec,
    workload_pools: Vec<WorkloadPool>,
    network: NetworkSpec,
    openstack: OpenStackAuth,
}

impl ClusterOpenstackGenerator {
    pub fn new(
        cluster_name: impl Into<String>,
        namespace: impl Into<String>,
        control_plane: MachineSpec,
        workload_pools: Vec<WorkloadPool>,
        network: NetworkSpec,
        openstack: OpenStackAuth,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            namespace: namespace.into(),
            control_plane,
            workload_pools,
            network,
            openstack,
        }
    }

    fn kubeconfig_secret_name(&self) -> String {
        format!("{}-kubeconfig", self.cluster_name)
    }

    fn pool_values(&self, pool: &WorkloadPool) -> serde_json::Value {
        let mut value = serde_json::json!({
            "name": pool.name,
            "replicas": pool.replicas,
            "version": pool.version,
            "flavor": pool.machine.flavor,
            "image": pool.machine.image,
        });
        if let Some(scaling) = &pool.autoscaling {
            let mut hint = serde_json::json!({
                "cpu": scaling.scheduler_hint.cpu,
                "memoryGiB": scaling.scheduler_hint.memory_gib,
            });
            if let Some(gpu) = &scaling.scheduler_hint.gpu {
                hint["gpu"] = serde_json::json!({ "count": gpu.count });
            }
            value["autoscaling"] = serde_json::json!({
                "min": scaling.min,
                "max": scaling.max,
                "hint": hint,
            });
        }
        value
    }

    /// Expected CAPI child resource name prefixes for the currently
    /// declared workload pools.
    fn expected_prefixes(&self) -> HashSet<String> {
        self.workload_pools
            .iter()
            .map(|pool| format!("{}-{}", self.cluster_name, pool.name))
            .collect()
    }
}

#[async_trait]
impl Generator for ClusterOpenstackGenerator {
    fn release_name(&self, _ctx: &ProvisionContext) -> Option<String> {
        Some(self.cluster_name.clone())
    }

    fn values(&self, _ctx: &ProvisionContext, _interface: Option<&str>) -> serde_json::Value {
        serde_json::json!({
            "cloudName": self.openstack.cloud_name,
            "externalNetwork": self.openstack.external_network,
            "failureDomain": self.openstack.failure_domain,
            "controlPlane": {
                "replicas": self.control_plane.replicas,
                "flavor": self.control_plane.flavor,
                "image": self.control_plane.image,
                "version": self.control_plane.version,
            },
            "network": {
                "nodeCidr": self.network.node_cidr,
                "podCidr": self.network.pod_cidr,
                "serviceCidr": self.network.service_cidr,
                "nameservers": self.network.nameservers,
            },
            "workloadPools": self.workload_pools.iter().map(|p| self.pool_values(p)).collect::<Vec<_>>(),
        })
    }

    fn create_namespace_override(&self) -> Option<bool> {
        Some(true)
    }

    /// Deletes CAPI child resources that no longer correspond to a
    /// declared workload pool.
    async fn post_provision(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        let expected = self.expected_prefixes();
        for (group, version, kind) in CAPI_KINDS {
            let resource = kube::api::ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, kind));
            let api: Api<DynamicObject> = Api::namespaced_with(ctx.client.clone(), &self.namespace, &resource);
            let list = api
                .list(&ListParams::default().labels(&format!("cluster.x-k8s.io/cluster-name={}", self.cluster_name)))
                .await?;
            for obj in list.items {
                let name = obj.name_any();
                let owned = expected.iter().any(|prefix| name.starts_with(prefix.as_str()));
                if !owned {
                    api.delete(&name, &DeleteParams::default()).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteClusterGenerator for ClusterOpenstackGenerator {
    fn id(&self) -> ResourceIdentifier {
        ResourceIdentifier::new(format!("cluster-{}", self.cluster_name), &Default::default())
    }

    async fn server(&self, ctx: &ProvisionContext) -> Result<String, Error> {
        let kubeconfig = read_kubeconfig_secret(ctx, &self.namespace, &self.kubeconfig_secret_name()).await?;
        kubeconfig_server(&kubeconfig)
    }

    async fn config(&self, ctx: &ProvisionContext) -> Result<serde_json::Value, Error> {
        read_kubeconfig_secret(ctx, &self.namespace, &self.kubeconfig_secret_name()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(name: &str) -> WorkloadPool {
        WorkloadPool {
            name: name.to_string(),
            machine: MachineSpec::default(),
            replicas: 3,
            version: "v1.31.0".to_string(),
            autoscaling: None,
            labels: Default::default(),
            files: Vec::new(),
        }
    }

    #[test]
    fn expected_prefixes_are_keyed_by_cluster_and_pool_name() {
        let gen = ClusterOpenstackGenerator::new(
            "prod",
            "controlplane-xyz",
            MachineSpec::default(),
            vec![pool("workers"), pool("gpu")],
            NetworkSpec::default(),
            OpenStackAuth::default(),
        );
        let expected = gen.expected_prefixes();
        assert!(expected.contains("prod-workers"));
        assert!(expected.contains("prod-gpu"));
        assert_eq!(expected.len(), 2);
    }
}
