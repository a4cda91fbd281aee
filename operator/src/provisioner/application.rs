//! Application provisioner (C4): materializes exactly one Helm application
//! on a (possibly remote) cluster, keyed to the owning resource.

use super::remote::RemoteCluster;
use super::{BoxedProvisioner, ProvisionContext, Provisioner};
use crate::util::Error;
use argus_types::{ApplicationBundleSpec, BundleApplicationVersion, HelmParameter, ResourceIdentifier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Selects the version auto-upgrade (and C4's bundle resolution) would pick
/// for `name`: the newest non-preview version whose end-of-life, if any,
/// has not passed as of `now`. "Newest" is a lexicographic comparison of
/// the version string — bundles are expected to use zero-padded or
/// otherwise order-preserving version strings.
pub fn select_current<'a>(
    bundle: &'a ApplicationBundleSpec,
    name: &str,
    now: DateTime<Utc>,
) -> Option<&'a BundleApplicationVersion> {
    bundle
        .applications
        .iter()
        .find(|entry| entry.name == name)?
        .versions
        .iter()
        .filter(|v| !v.preview && v.end_of_life.is_none_or(|eol| eol > now))
        .max_by(|a, b| a.version.cmp(&b.version))
}

/// The generator capability protocol (discoverable at runtime in the
/// source system; modelled here as a trait with neutral default
/// implementations so a generator only overrides what it needs).
#[async_trait]
pub trait Generator: Send + Sync {
    fn release_name(&self, _ctx: &ProvisionContext) -> Option<String> {
        None
    }

    fn parameters(&self, _ctx: &ProvisionContext, _interface: Option<&str>) -> Vec<HelmParameter> {
        Vec::new()
    }

    fn values(&self, _ctx: &ProvisionContext, _interface: Option<&str>) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// `ignoreDifferences` JSON pointers to append to the submitted
    /// Application.
    fn customize(&self, _interface: Option<&str>) -> Vec<String> {
        Vec::new()
    }

    fn create_namespace_override(&self) -> Option<bool> {
        None
    }

    fn server_side_apply_override(&self) -> Option<bool> {
        None
    }

    async fn post_provision(&self, _ctx: &ProvisionContext) -> Result<(), Error> {
        Ok(())
    }
}

pub struct ApplicationProvisioner {
    application_name: String,
    override_name: Option<String>,
    namespace_override: Option<String>,
    allow_degraded: bool,
    generator: Option<Arc<dyn Generator>>,
    remote: Option<RemoteCluster>,
    background_delete: bool,
}

impl ApplicationProvisioner {
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            override_name: None,
            namespace_override: None,
            allow_degraded: false,
            generator: None,
            remote: None,
            background_delete: false,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.override_name = Some(name.into());
        self
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace_override = Some(namespace.into());
        self
    }

    pub fn allow_degraded(mut self) -> Self {
        self.allow_degraded = true;
        self
    }

    pub fn boxed(self) -> BoxedProvisioner {
        Arc::new(self)
    }

    fn identifier(&self, ctx: &ProvisionContext) -> ResourceIdentifier {
        let name = self
            .override_name
            .clone()
            .unwrap_or_else(|| self.application_name.clone());
        let mut labels = ctx.labels.clone();
        labels.insert("argus.io/application".to_string(), self.application_name.clone());
        ResourceIdentifier::new(name, &labels)
    }
}

#[async_trait]
impl Provisioner for ApplicationProvisioner {
    fn name(&self) -> &str {
        self.override_name.as_deref().unwrap_or(&self.application_name)
    }

    async fn provision(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        let id = self.identifier(ctx);
        let version = ctx.resolve_application(&self.application_name)?;
        let interface = version.interface.as_deref();

        let release = self
            .generator
            .as_ref()
            .and_then(|g| g.release_name(ctx))
            .filter(|r| !r.is_empty())
            .or_else(|| version.application.release.clone());

        let mut parameters = version.application.parameters.clone();
        if let Some(generator) = &self.generator {
            parameters.extend(generator.parameters(ctx, interface));
        }

        let values = self
            .generator
            .as_ref()
            .map(|generator| generator.values(ctx, interface))
            .filter(|v| !v.is_null())
            .unwrap_or_else(|| version.application.values.clone());

        let ignore_differences = self
            .generator
            .as_ref()
            .map(|generator| generator.customize(interface))
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| version.application.ignore_differences.clone());

        let destination_cluster_id = match &self.remote {
            Some(remote) => Some(remote.server(ctx).await?),
            None => None,
        };

        let mut app = version.application.clone();
        app.release = release;
        app.parameters = parameters;
        app.values = values;
        app.ignore_differences = ignore_differences;
        app.destination_cluster_id = destination_cluster_id;
        app.destination_namespace = self
            .namespace_override
            .clone()
            .unwrap_or_else(|| ctx.namespace.clone());
        app.allow_degraded |= self.allow_degraded;
        if let Some(generator) = &self.generator {
            if let Some(create_namespace) = generator.create_namespace_override() {
                app.create_namespace = create_namespace;
            }
            if let Some(server_side_apply) = generator.server_side_apply_override() {
                app.server_side_apply = server_side_apply;
            }
        }

        ctx.cd.create_or_update_helm_application(ctx, &id, &app).await?;

        if let Some(generator) = &self.generator {
            generator.post_provision(ctx).await?;
        }
        Ok(())
    }

    async fn deprovision(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        let id = self.identifier(ctx);
        ctx.cd
            .delete_helm_application(ctx, &id, self.background_delete)
            .await
    }

    fn on_remote(&mut self, remote: RemoteCluster) {
        if self.remote.is_none() {
            self.remote = Some(remote);
        }
    }

    fn background_delete(&mut self) {
        self.background_delete = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_types::{ApplicationBundleEntry, HelmApplication};

    fn bundle_with(versions: Vec<BundleApplicationVersion>) -> ApplicationBundleSpec {
        ApplicationBundleSpec {
            applications: vec![ApplicationBundleEntry {
                name: "cilium".to_string(),
                versions,
            }],
        }
    }

    fn version(v: &str, preview: bool, eol: Option<DateTime<Utc>>) -> BundleApplicationVersion {
        BundleApplicationVersion {
            version: v.to_string(),
            application: HelmApplication::default(),
            interface: None,
            end_of_life: eol,
            preview,
        }
    }

    #[test]
    fn select_current_skips_preview_and_expired_versions() {
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let expired = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let bundle = bundle_with(vec![
            version("1.0.0", false, Some(expired)),
            version("1.1.0", true, None),
            version("1.2.0", false, None),
        ]);
        let chosen = select_current(&bundle, "cilium", now).unwrap();
        assert_eq!(chosen.version, "1.2.0");
    }

    #[test]
    fn select_current_returns_none_for_unknown_application() {
        let bundle = bundle_with(vec![version("1.0.0", false, None)]);
        let now = Utc::now();
        assert!(select_current(&bundle, "missing", now).is_none());
    }

    #[test]
    fn select_current_returns_none_when_all_versions_filtered_out() {
        let now = Utc::now();
        let bundle = bundle_with(vec![version("1.0.0", true, None)]);
        assert!(select_current(&bundle, "cilium", now).is_none());
    }
}
