//! Kubernetes Dashboard, gated by the `dashboard` feature toggle.

use crate::provisioner::ProvisionContext;
use crate::provisioner::application::Generator;
use async_trait::async_trait;

pub struct DashboardGenerator;

#[async_trait]
impl Generator for DashboardGenerator {
    fn release_name(&self, _ctx: &ProvisionContext) -> Option<String> {
        Some("kubernetes-dashboard".to_string())
    }

    fn create_namespace_override(&self) -> Option<bool> {
        Some(true)
    }
}
