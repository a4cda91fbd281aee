//! Domain provisioners (C7): thin generators over the Provisioner
//! Framework, one per bootstrap/workload application a `ControlPlane` or
//! `KubernetesCluster` needs.

pub mod cert_manager;
pub mod cilium;
pub mod cluster_api;
pub mod cluster_autoscaler;
pub mod cluster_openstack;
pub mod dashboard;
pub mod file_injector;
pub mod ingress;
pub mod nvidia_gpu_operator;
pub mod openstack_cloud_provider;
pub mod vcluster;

use crate::util::Error;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::ResourceExt;

use crate::provisioner::ProvisionContext;

/// Shared by every domain generator that registers a remote cluster from a
/// kubeconfig Secret it (or a sibling it depends on) produced: vcluster
/// writes one for itself, cluster-api writes one per `KubernetesCluster`.
pub(crate) async fn read_kubeconfig_secret(
    ctx: &ProvisionContext,
    namespace: &str,
    name: &str,
) -> Result<serde_json::Value, Error> {
    let secret = Api::<Secret>::namespaced(ctx.client.clone(), namespace)
        .get(name)
        .await
        .map_err(|e| match e {
            kube::Error::Api(e) if e.code == 404 => {
                Error::Yield(format!("waiting for kubeconfig secret {name} in {namespace}"))
            }
            e => Error::from(e),
        })?;
    let raw = secret
        .data
        .as_ref()
        .and_then(|d| d.get("config").or_else(|| d.get("value")))
        .map(|b| b.0.clone())
        .ok_or_else(|| Error::NotFound(format!("secret {} has no kubeconfig key", secret.name_any())))?;
    let text = std::str::from_utf8(&raw)
        .map_err(|_| Error::InvalidCloudConfig(format!("secret {name} kubeconfig is not valid UTF-8")))?;
    let parsed: serde_yaml::Value = serde_yaml::from_str(text)?;
    Ok(serde_json::to_value(parsed)?)
}

pub(crate) fn kubeconfig_server(kubeconfig: &serde_json::Value) -> Result<String, Error> {
    kubeconfig
        .pointer("/clusters/0/cluster/server")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::InvalidCloudConfig("kubeconfig is missing clusters[0].cluster.server".to_string()))
}
