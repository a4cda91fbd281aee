//! cluster-autoscaler, gated by the `autoscaling` feature toggle — wired
//! behind a `conditional` by the caller rather than checking the toggle
//! itself, so deprovision always runs regardless of the flag's value.

use crate::provisioner::ProvisionContext;
use crate::provisioner::application::Generator;
use async_trait::async_trait;

pub struct ClusterAutoscalerGenerator {
    cluster_name: String,
}

impl ClusterAutoscalerGenerator {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
        }
    }
}

#[async_trait]
impl Generator for ClusterAutoscalerGenerator {
    fn release_name(&self, _ctx: &ProvisionContext) -> Option<String> {
        Some("cluster-autoscaler".to_string())
    }

    fn values(&self, _ctx: &ProvisionContext, _interface: Option<&str>) -> serde_json::Value {
        serde_json::json!({
            "cloudProvider": "clusterapi",
            "autoDiscovery": { "clusterName": self.cluster_name },
        })
    }

    fn create_namespace_override(&self) -> Option<bool> {
        Some(true)
    }
}
