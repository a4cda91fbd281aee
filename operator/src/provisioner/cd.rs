//! CD driver abstraction (C2): translates a canonical `HelmApplication` +
//! `ResourceIdentifier` + optional remote cluster into create/update/delete
//! calls on a continuous-delivery backend.
//!
//! The only shipped driver targets ArgoCD: Applications are submitted as
//! `argoproj.io/v1alpha1` `Application` objects via server-side apply, and
//! remote clusters are registered the way ArgoCD's own CLI does it — as
//! `Secret`s labelled `argocd.argoproj.io/secret-type: cluster` in the
//! ArgoCD namespace.

use super::remote::RemoteClusterConfig;
use crate::util::{Error, MANAGER_NAME, hash_spec};
use argus_types::{HelmApplication, ResourceIdentifier};
use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ObjectMeta, Patch, PatchParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;

use super::ProvisionContext;

/// ArgoCD's cascading-delete finalizer: present iff deletion should be
/// gating (foreground) rather than fire-and-forget.
const ARGOCD_FINALIZER: &str = "resources-finalizer.argocd.argoproj.io";

#[async_trait]
pub trait CdDriver: Send + Sync {
    /// Upsert an Application with identity `id`. Repeated calls with the
    /// same `(id, app)` must be a no-op; a changed `app` replaces the spec
    /// while preserving identity, labels, and finalizers.
    async fn create_or_update_helm_application(
        &self,
        ctx: &ProvisionContext,
        id: &ResourceIdentifier,
        app: &HelmApplication,
    ) -> Result<(), Error>;

    /// Delete the Application for `id`. Gating (`background == false`)
    /// calls return only once the object is gone, yielding while deletion
    /// is in progress; background calls return as soon as delete is
    /// accepted.
    async fn delete_helm_application(
        &self,
        ctx: &ProvisionContext,
        id: &ResourceIdentifier,
        background: bool,
    ) -> Result<(), Error>;

    /// Register a remote cluster. The backend may legitimately not be
    /// ready yet; that must surface as `Error::Yield`, not a fatal error.
    async fn create_or_update_cluster(
        &self,
        ctx: &ProvisionContext,
        id: &ResourceIdentifier,
        cluster: &RemoteClusterConfig,
    ) -> Result<(), Error>;

    async fn delete_cluster(&self, ctx: &ProvisionContext, id: &ResourceIdentifier)
    -> Result<(), Error>;
}

pub struct ArgoCdDriver {
    namespace: String,
}

impl ArgoCdDriver {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    fn application_resource() -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk("argoproj.io", "v1alpha1", "Application"))
    }

    /// The driver owns the mapping from `ResourceIdentifier` to CD-native
    /// identity: a deterministic name prefix plus a short hash of the
    /// identifier so two resources that share an application name but
    /// differ in owning labels do not collide in ArgoCD's single
    /// namespace.
    fn resource_name(id: &ResourceIdentifier) -> String {
        let digest = hash_spec(id);
        format!("{MANAGER_NAME}-{}-{}", id.name, &digest[..10])
    }

    fn identity_labels(id: &ResourceIdentifier) -> BTreeMap<String, String> {
        let mut labels = id.labels_map();
        labels.insert("argus.io/application".to_string(), id.name.clone());
        labels
    }

    fn build_application(
        &self,
        id: &ResourceIdentifier,
        app: &HelmApplication,
        background: bool,
    ) -> DynamicObject {
        let name = Self::resource_name(id);
        let mut source = serde_json::json!({
            "repoURL": app.repo,
            "targetRevision": app.version,
        });
        if let Some(chart) = &app.chart {
            source["chart"] = serde_json::Value::String(chart.clone());
        }
        if let Some(path) = &app.path {
            source["path"] = serde_json::Value::String(path.clone());
        }
        let mut helm = serde_json::json!({});
        if let Some(release) = &app.release {
            helm["releaseName"] = serde_json::Value::String(release.clone());
        }
        if !app.parameters.is_empty() {
            helm["parameters"] = serde_json::to_value(&app.parameters).unwrap();
        }
        if !app.values.is_null() {
            helm["valuesObject"] = app.values.clone();
        }
        if helm.as_object().is_some_and(|m| !m.is_empty()) {
            source["helm"] = helm;
        }

        let destination = serde_json::json!({
            "server": app.destination_cluster_id.clone().unwrap_or_else(|| "https://kubernetes.default.svc".to_string()),
            "namespace": app.destination_namespace,
        });

        let mut sync_options = Vec::new();
        if app.create_namespace {
            sync_options.push("CreateNamespace=true".to_string());
        }
        if app.server_side_apply {
            sync_options.push("ServerSideApply=true".to_string());
        }

        let spec = serde_json::json!({
            "project": "default",
            "source": source,
            "destination": destination,
            "syncPolicy": {
                "automated": { "selfHeal": true, "allowEmpty": app.allow_degraded },
                "syncOptions": sync_options,
            },
            "ignoreDifferences": app.ignore_differences.iter().map(|pointer| {
                serde_json::json!({ "jsonPointers": [pointer] })
            }).collect::<Vec<_>>(),
        });

        let mut obj = DynamicObject::new(&name, &Self::application_resource())
            .data(serde_json::json!({ "spec": spec }));
        obj.metadata = ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.clone()),
            labels: Some(Self::identity_labels(id)),
            finalizers: if background {
                None
            } else {
                Some(vec![ARGOCD_FINALIZER.to_string()])
            },
            ..Default::default()
        };
        obj
    }
}

#[async_trait]
impl CdDriver for ArgoCdDriver {
    async fn create_or_update_helm_application(
        &self,
        ctx: &ProvisionContext,
        id: &ResourceIdentifier,
        app: &HelmApplication,
    ) -> Result<(), Error> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(ctx.client.clone(), &self.namespace, &Self::application_resource());
        let object = self.build_application(id, app, false);
        api.patch(
            &object.name_any(),
            &PatchParams::apply(MANAGER_NAME),
            &Patch::Apply(&object),
        )
        .await?;
        Ok(())
    }

    async fn delete_helm_application(
        &self,
        ctx: &ProvisionContext,
        id: &ResourceIdentifier,
        background: bool,
    ) -> Result<(), Error> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(ctx.client.clone(), &self.namespace, &Self::application_resource());
        let name = Self::resource_name(id);
        match api.get_opt(&name).await? {
            None => Ok(()),
            Some(existing) => {
                if existing.meta().deletion_timestamp.is_none() {
                    api.delete(&name, &DeleteParams::default()).await?;
                }
                if background {
                    Ok(())
                } else {
                    Err(Error::Yield(format!("waiting for Application {name} to finalize")))
                }
            }
        }
    }

    async fn create_or_update_cluster(
        &self,
        ctx: &ProvisionContext,
        id: &ResourceIdentifier,
        cluster: &RemoteClusterConfig,
    ) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(ctx.client.clone(), &self.namespace);
        let name = Self::resource_name(id);
        let mut labels = Self::identity_labels(id);
        labels.insert(
            "argocd.argoproj.io/secret-type".to_string(),
            "cluster".to_string(),
        );
        let mut data = BTreeMap::new();
        data.insert("name".to_string(), ByteString(id.name.clone().into_bytes()));
        data.insert("server".to_string(), ByteString(cluster.server.clone().into_bytes()));
        data.insert(
            "config".to_string(),
            ByteString(serde_json::to_vec(&cluster.config).map_err(Error::from)?),
        );
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };
        api.patch(
            &name,
            &PatchParams::apply(MANAGER_NAME),
            &Patch::Apply(&secret),
        )
        .await?;
        Ok(())
    }

    async fn delete_cluster(
        &self,
        ctx: &ProvisionContext,
        id: &ResourceIdentifier,
    ) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(ctx.client.clone(), &self.namespace);
        let name = Self::resource_name(id);
        match api.get_opt(&name).await? {
            None => Ok(()),
            Some(_) => {
                api.delete(&name, &DeleteParams::default()).await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    #[test]
    fn resource_name_is_deterministic_and_disambiguates_by_labels() {
        let mut labels_a = Map::new();
        labels_a.insert("cluster".to_string(), "prod".to_string());
        let id_a = ResourceIdentifier::new("cilium", &labels_a);

        let mut labels_b = Map::new();
        labels_b.insert("cluster".to_string(), "staging".to_string());
        let id_b = ResourceIdentifier::new("cilium", &labels_b);

        let name_a = ArgoCdDriver::resource_name(&id_a);
        let name_a_again = ArgoCdDriver::resource_name(&id_a);
        let name_b = ArgoCdDriver::resource_name(&id_b);

        assert_eq!(name_a, name_a_again);
        assert_ne!(name_a, name_b);
        assert!(name_a.starts_with(MANAGER_NAME));
    }
}
