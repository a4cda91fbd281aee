//! Manual finalizer management for the three top-level CRDs, mirroring
//! `patch::patch_status`'s merge-patch-via-`kube::Api` shape rather than
//! reaching for `kube::runtime::finalizer`'s wrapper combinator.

use super::{Error, MANAGER_NAME};
use kube::{
    Api, Client, ResourceExt,
    api::{Patch, PatchParams, Resource},
    core::NamespaceResourceScope,
};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

pub const PROVISIONER_FINALIZER: &str = "argus.io/provisioner";

pub fn has_finalizer<T: ResourceExt>(instance: &T) -> bool {
    instance.finalizers().iter().any(|f| f == PROVISIONER_FINALIZER)
}

pub async fn ensure_finalizer<T>(client: Client, instance: &T) -> Result<(), Error>
where
    T: Clone + Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Debug,
    <T as Resource>::DynamicType: Default,
{
    if has_finalizer(instance) {
        return Ok(());
    }
    let mut finalizers = instance.finalizers().to_vec();
    finalizers.push(PROVISIONER_FINALIZER.to_string());
    patch_finalizers(client, instance, finalizers).await
}

pub async fn remove_finalizer<T>(client: Client, instance: &T) -> Result<(), Error>
where
    T: Clone + Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Debug,
    <T as Resource>::DynamicType: Default,
{
    let finalizers: Vec<String> = instance
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != PROVISIONER_FINALIZER)
        .cloned()
        .collect();
    patch_finalizers(client, instance, finalizers).await
}

async fn patch_finalizers<T>(client: Client, instance: &T, finalizers: Vec<String>) -> Result<(), Error>
where
    T: Clone + Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Debug,
    <T as Resource>::DynamicType: Default,
{
    let name = instance
        .meta()
        .name
        .as_deref()
        .ok_or_else(|| Error::UserInput("resource is missing metadata.name".to_string()))?;
    let namespace = instance
        .meta()
        .namespace
        .as_deref()
        .ok_or_else(|| Error::UserInput("resource is missing metadata.namespace".to_string()))?;
    let api: Api<T> = Api::namespaced(client, namespace);
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
    api.patch(name, &PatchParams::apply(MANAGER_NAME), &Patch::Merge(&patch)).await?;
    Ok(())
}
