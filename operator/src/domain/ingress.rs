//! Ingress controller, gated by the `ingress` feature toggle.

use crate::provisioner::ProvisionContext;
use crate::provisioner::application::Generator;
use async_trait::async_trait;

pub struct IngressGenerator {
    allowed_prefixes: Vec<String>,
}

impl IngressGenerator {
    pub fn new(allowed_prefixes: Vec<String>) -> Self {
        Self { allowed_prefixes }
    }
}

#[async_trait]
impl Generator for IngressGenerator {
    fn release_name(&self, _ctx: &ProvisionContext) -> Option<String> {
        Some("ingress-nginx".to_string())
    }

    fn values(&self, _ctx: &ProvisionContext, _interface: Option<&str>) -> serde_json::Value {
        serde_json::json!({
            "controller": {
                "ingressClassResource": { "default": true },
                "config": { "allow-snippet-annotations": false },
            },
            "allowedHostPrefixes": self.allowed_prefixes,
        })
    }

    fn create_namespace_override(&self) -> Option<bool> {
        Some(true)
    }
}
