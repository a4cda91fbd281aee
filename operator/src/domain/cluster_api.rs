//! Cluster API core + OpenStack infrastructure provider: installed inside
//! the vcluster so `cluster-openstack` has CAPI CRDs to target.

use crate::provisioner::ProvisionContext;
use crate::provisioner::aggregate::Serial;
use crate::provisioner::application::{ApplicationProvisioner, Generator};
use crate::provisioner::manifest::ManifestProvisioner;
use crate::provisioner::BoxedProvisioner;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub struct ClusterApiGenerator;

#[async_trait]
impl Generator for ClusterApiGenerator {
    fn release_name(&self, _ctx: &ProvisionContext) -> Option<String> {
        Some("cluster-api".to_string())
    }

    fn create_namespace_override(&self) -> Option<bool> {
        Some(true)
    }
}

/// Renders the `cluster-api-bootstrap` manifest (the CRDs and RBAC the
/// Cluster API core and OpenStack provider chart expect to already exist)
/// ahead of the Helm chart itself.
pub fn provisioner(manifest_root: &Path, namespace: &str) -> BoxedProvisioner {
    let bootstrap = ManifestProvisioner::new("cluster-api-bootstrap", manifest_root, namespace)
        .with_release_name("cluster-api")
        .boxed();
    let chart = ApplicationProvisioner::new("cluster-api")
        .with_generator(Arc::new(ClusterApiGenerator))
        .in_namespace(namespace)
        .boxed();
    Serial::new("cluster-api", vec![bootstrap, chart]).boxed()
}
