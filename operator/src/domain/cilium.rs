//! Cilium CNI, values derived from the cluster's declared pod/service CIDRs.

use crate::provisioner::ProvisionContext;
use crate::provisioner::application::Generator;
use argus_types::NetworkSpec;
use async_trait::async_trait;

pub struct CiliumGenerator {
    network: NetworkSpec,
}

impl CiliumGenerator {
    pub fn new(network: NetworkSpec) -> Self {
        Self { network }
    }
}

#[async_trait]
impl Generator for CiliumGenerator {
    fn release_name(&self, _ctx: &ProvisionContext) -> Option<String> {
        Some("cilium".to_string())
    }

    fn values(&self, _ctx: &ProvisionContext, _interface: Option<&str>) -> serde_json::Value {
        serde_json::json!({
            "ipam": {
                "operator": { "clusterPoolIPv4PodCIDRList": [self.network.pod_cidr] },
            },
            "kubeProxyReplacement": true,
            "k8sServiceHost": "localhost",
            "nativeRoutingCIDR": self.network.node_cidr,
        })
    }

    fn create_namespace_override(&self) -> Option<bool> {
        Some(true)
    }
}
