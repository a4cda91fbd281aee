//! vcluster: the Helm-deployed virtual control plane backing a
//! `ControlPlane`, and the `RemoteClusterGenerator` that registers it as a
//! deployment target for everything the control plane provisions inside it.

use super::{kubeconfig_server, read_kubeconfig_secret};
use crate::provisioner::aggregate::Serial;
use crate::provisioner::application::{ApplicationProvisioner, Generator};
use crate::provisioner::manifest::ManifestProvisioner;
use crate::provisioner::remote::RemoteClusterGenerator;
use crate::provisioner::{BoxedProvisioner, ProvisionContext};
use crate::util::Error;
use argus_types::{HelmParameter, ResourceIdentifier};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub struct VclusterGenerator {
    control_plane: String,
    namespace: String,
}

impl VclusterGenerator {
    pub fn new(control_plane: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            control_plane: control_plane.into(),
            namespace: namespace.into(),
        }
    }

    fn kubeconfig_secret_name(&self) -> String {
        format!("vc-{}-kubeconfig", self.control_plane)
    }
}

#[async_trait]
impl Generator for VclusterGenerator {
    fn release_name(&self, _ctx: &ProvisionContext) -> Option<String> {
        Some(self.control_plane.clone())
    }

    fn parameters(&self, _ctx: &ProvisionContext, _interface: Option<&str>) -> Vec<HelmParameter> {
        vec![HelmParameter {
            name: "sync.toHost.ingresses.enabled".to_string(),
            value: "true".to_string(),
        }]
    }

    fn create_namespace_override(&self) -> Option<bool> {
        Some(true)
    }
}

#[async_trait]
impl RemoteClusterGenerator for VclusterGenerator {
    fn id(&self) -> ResourceIdentifier {
        ResourceIdentifier::new(format!("vcluster-{}", self.control_plane), &Default::default())
    }

    async fn server(&self, ctx: &ProvisionContext) -> Result<String, Error> {
        let kubeconfig = read_kubeconfig_secret(ctx, &self.namespace, &self.kubeconfig_secret_name()).await?;
        kubeconfig_server(&kubeconfig)
    }

    async fn config(&self, ctx: &ProvisionContext) -> Result<serde_json::Value, Error> {
        read_kubeconfig_secret(ctx, &self.namespace, &self.kubeconfig_secret_name()).await
    }
}

/// Renders the `vcluster-bootstrap` manifest (the namespace-scoped objects
/// the vcluster statefulset needs before Argo CD can reach it) ahead of
/// the Helm chart itself.
pub fn provisioner(manifest_root: &Path, control_plane: &str, namespace: &str) -> BoxedProvisioner {
    let bootstrap = ManifestProvisioner::new("vcluster-bootstrap", manifest_root, namespace)
        .with_release_name(control_plane)
        .boxed();
    let chart = ApplicationProvisioner::new("vcluster")
        .with_generator(Arc::new(VclusterGenerator::new(control_plane, namespace)))
        .in_namespace(namespace)
        .boxed();
    Serial::new("vcluster", vec![bootstrap, chart]).boxed()
}
