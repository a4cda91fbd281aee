//! Shared by the three top-level reconcilers: each owns exactly one
//! generate-named, label-selected namespace.

use super::Error;
use argus_common::wait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Finds the namespace selected by `labels`, creating one with
/// `generate_name` if none exists yet. Idempotent across reconciles: once
/// created, the same namespace name is returned every time.
pub async fn ensure_labeled_namespace(
    client: Client,
    generate_name: &str,
    labels: &BTreeMap<String, String>,
) -> Result<String, Error> {
    let api: Api<Namespace> = Api::all(client);
    let selector = labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    let existing = api.list(&ListParams::default().labels(&selector)).await?;
    if let Some(ns) = existing.items.into_iter().next() {
        return Ok(ns.name_any());
    }
    let ns = Namespace {
        metadata: ObjectMeta {
            generate_name: Some(generate_name.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        ..Default::default()
    };
    let created = api.create(&PostParams::default(), &ns).await?;
    Ok(created.name_any())
}

/// Deletes `name` if it still exists and blocks until the apiserver
/// confirms it is gone, backing off between polls. This is a single
/// reconciler-owned action, not a provisioner graph node, so it blocks
/// rather than yielding back to the controller.
pub async fn delete_namespace_and_wait(
    client: Client,
    name: &str,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let api: Api<Namespace> = Api::all(client);
    match api.get_opt(name).await? {
        None => return Ok(()),
        Some(ns) if ns.metadata.deletion_timestamp.is_none() => {
            api.delete(name, &DeleteParams::default()).await?;
        }
        Some(_) => {}
    }
    loop {
        wait::wait(cancel, 1).await.map_err(|_| Error::Cancelled)?;
        if api.get_opt(name).await?.is_none() {
            return Ok(());
        }
    }
}

/// Reads a label off the namespace a resource lives in — used to recover
/// an owning resource's name (e.g. the control plane that owns the
/// namespace a `KubernetesCluster` was created in) without a second CRD
/// lookup.
pub async fn read_namespace_label(client: Client, namespace: &str, key: &str) -> Result<String, Error> {
    let api: Api<Namespace> = Api::all(client);
    let ns = api.get(namespace).await?;
    ns.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .cloned()
        .ok_or_else(|| Error::LabelMissing(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_join_is_stable_for_a_single_label() {
        let mut labels = BTreeMap::new();
        labels.insert("argus.io/project".to_string(), "p1".to_string());
        let selector = labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        assert_eq!(selector, "argus.io/project=p1");
    }
}
