//! cert-manager: installed once per control plane / cluster, gated by the
//! `cert_manager` feature toggle where the caller wires it behind a
//! `conditional`.

use crate::provisioner::ProvisionContext;
use crate::provisioner::application::Generator;
use async_trait::async_trait;

pub struct CertManagerGenerator;

#[async_trait]
impl Generator for CertManagerGenerator {
    fn release_name(&self, _ctx: &ProvisionContext) -> Option<String> {
        Some("cert-manager".to_string())
    }

    fn values(&self, _ctx: &ProvisionContext, _interface: Option<&str>) -> serde_json::Value {
        serde_json::json!({ "installCRDs": true })
    }

    fn create_namespace_override(&self) -> Option<bool> {
        Some(true)
    }
}
