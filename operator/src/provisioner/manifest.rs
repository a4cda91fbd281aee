//! Manifest provisioner (C6): the fallback path for applications that
//! cannot be delivered through the CD backend (bootstrap components).
//! Loads a local YAML manifest, runs it through templating, JSON-patch
//! overlays, and environment substitution — each gated by the manifest's
//! own registry entry — then creates whatever the manifest describes.

use super::{BoxedProvisioner, ProvisionContext, Provisioner};
use crate::util::Error;
use async_trait::async_trait;
use json_patch::Patch as JsonPatch;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, PostParams};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use lazy_static::lazy_static;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const RELEASE_NAME_EYECATCHER: &str = "__RELEASE_NAME__";
const NAMESPACE_EYECATCHER: &str = "__NAMESPACE__";

/// A logical manifest id, resolved through [`MANIFEST_REGISTRY`] to a
/// directory shipped alongside the binary.
pub type ManifestId = &'static str;

pub struct ManifestEntry {
    pub dir: &'static str,
    pub templated: bool,
    pub substitute_env: bool,
}

lazy_static! {
    /// Process-local table of manifest ids to where they live on disk and
    /// which pipeline steps apply to them. Remote URLs are deliberately
    /// not supported here — manifests are vendored, not fetched.
    pub static ref MANIFEST_REGISTRY: HashMap<ManifestId, ManifestEntry> = {
        let mut m = HashMap::new();
        m.insert(
            "cluster-api-bootstrap",
            ManifestEntry {
                dir: "cluster-api-bootstrap",
                templated: true,
                substitute_env: false,
            },
        );
        m.insert(
            "vcluster-bootstrap",
            ManifestEntry {
                dir: "vcluster-bootstrap",
                templated: true,
                substitute_env: true,
            },
        );
        m
    };
}

#[derive(Deserialize)]
struct PatchSelector {
    group: String,
    version: String,
    kind: String,
    #[serde(default)]
    name: Option<String>,
    patch: JsonPatch,
}

/// Kinds the bootstrap manifests (Cluster API's CRDs/RBAC, vcluster's own
/// bootstrap objects) are known to ship that live outside any namespace.
/// Anything not on this list is treated as namespace-scoped.
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "Namespace",
    "PriorityClass",
    "StorageClass",
];

fn is_cluster_scoped(obj: &DynamicObject) -> bool {
    obj.types
        .as_ref()
        .is_some_and(|types| CLUSTER_SCOPED_KINDS.contains(&types.kind.as_str()))
}

fn api_resource_for(obj: &DynamicObject) -> Result<ApiResource, Error> {
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| Error::UserInput("manifest document is missing apiVersion/kind".to_string()))?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), types.api_version.clone()),
    };
    Ok(ApiResource::from_gvk(&GroupVersionKind::gvk(
        &group,
        &version,
        &types.kind,
    )))
}

/// Shell-style `$VAR`/`${VAR}` expansion. An unresolved variable (mapper
/// returns `None`) expands to the empty string.
fn substitute_env(input: &str, mapper: &dyn Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('{') => {
                chars.next();
                let mut name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    name.push(c);
                }
                out.push_str(&mapper(&name).unwrap_or_default());
            }
            Some(&c0) if c0.is_alphabetic() || c0 == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&mapper(&name).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }
    out
}

fn substitute_json_strings(value: &mut serde_json::Value, mapper: &dyn Fn(&str) -> Option<String>) {
    match value {
        serde_json::Value::String(s) => *s = substitute_env(s, mapper),
        serde_json::Value::Array(items) => {
            for item in items {
                substitute_json_strings(item, mapper);
            }
        }
        serde_json::Value::Object(map) => {
            for v in map.values_mut() {
                substitute_json_strings(v, mapper);
            }
        }
        _ => {}
    }
}

pub struct ManifestProvisioner {
    id: ManifestId,
    manifest_root: PathBuf,
    namespace: String,
    release_name: Option<String>,
    owner_references: Vec<OwnerReference>,
    env_mapper: Option<Arc<dyn Fn(&str) -> Option<String> + Send + Sync>>,
}

impl ManifestProvisioner {
    pub fn new(id: ManifestId, manifest_root: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            id,
            manifest_root: manifest_root.into(),
            namespace: namespace.into(),
            release_name: None,
            owner_references: Vec::new(),
            env_mapper: None,
        }
    }

    pub fn with_release_name(mut self, release_name: impl Into<String>) -> Self {
        self.release_name = Some(release_name.into());
        self
    }

    pub fn with_owner_references(mut self, owner_references: Vec<OwnerReference>) -> Self {
        self.owner_references = owner_references;
        self
    }

    pub fn with_env_mapper(mut self, mapper: Arc<dyn Fn(&str) -> Option<String> + Send + Sync>) -> Self {
        self.env_mapper = Some(mapper);
        self
    }

    pub fn boxed(self) -> BoxedProvisioner {
        Arc::new(self)
    }

    fn entry(&self) -> Result<&'static ManifestEntry, Error> {
        MANIFEST_REGISTRY
            .get(self.id)
            .ok_or_else(|| Error::NotFound(format!("manifest {} is not registered", self.id)))
    }

    fn manifest_path(&self, entry: &ManifestEntry) -> PathBuf {
        self.manifest_root.join(entry.dir).join("manifest.yaml")
    }

    fn patches_path(&self, entry: &ManifestEntry) -> PathBuf {
        self.manifest_root.join(entry.dir).join("patches.json")
    }

    fn load_patches(path: &Path) -> Result<Vec<PatchSelector>, Error> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn template(&self, raw: &str) -> Result<String, Error> {
        let release = self.release_name.as_deref().ok_or_else(|| {
            Error::UserInput(format!(
                "manifest {} is templated but no release name was supplied",
                self.id
            ))
        })?;
        Ok(raw
            .replace(RELEASE_NAME_EYECATCHER, release)
            .replace(NAMESPACE_EYECATCHER, &self.namespace))
    }

    fn build_objects(&self, entry: &ManifestEntry, raw: &str, patches: &[PatchSelector]) -> Result<Vec<DynamicObject>, Error> {
        let mapper: Box<dyn Fn(&str) -> Option<String>> = match &self.env_mapper {
            Some(mapper) => {
                let mapper = mapper.clone();
                Box::new(move |name: &str| mapper(name))
            }
            None => Box::new(|_: &str| None),
        };

        let mut objects = Vec::new();
        for doc in raw.split("\n---\n") {
            let doc = doc.trim();
            if doc.is_empty() {
                continue;
            }
            let yaml_value: serde_yaml::Value = serde_yaml::from_str(doc)?;
            let mut value = serde_json::to_value(yaml_value).map_err(Error::from)?;

            for selector in patches {
                let matches = value
                    .get("apiVersion")
                    .and_then(|v| v.as_str())
                    .is_some_and(|api_version| {
                        let expected = if selector.group.is_empty() {
                            selector.version.clone()
                        } else {
                            format!("{}/{}", selector.group, selector.version)
                        };
                        api_version == expected
                    })
                    && value.get("kind").and_then(|v| v.as_str()) == Some(selector.kind.as_str())
                    && selector
                        .name
                        .as_deref()
                        .is_none_or(|name| value.pointer("/metadata/name").and_then(|v| v.as_str()) == Some(name));
                if matches {
                    json_patch::patch(&mut value, &selector.patch)?;
                }
            }

            if entry.substitute_env {
                substitute_json_strings(&mut value, &mapper);
            }

            let mut object: DynamicObject = serde_json::from_value(value)?;
            if object.metadata.namespace.is_none() && !is_cluster_scoped(&object) {
                object.metadata.namespace = Some(self.namespace.clone());
            }
            if !self.owner_references.is_empty() {
                object.metadata.owner_references = Some(self.owner_references.clone());
            }
            objects.push(object);
        }
        Ok(objects)
    }
}

#[async_trait]
impl Provisioner for ManifestProvisioner {
    fn name(&self) -> &str {
        self.id
    }

    async fn provision(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        let entry = self.entry()?;
        let raw = std::fs::read_to_string(self.manifest_path(entry))?;
        let raw = if entry.templated { self.template(&raw)? } else { raw };
        let patches = Self::load_patches(&self.patches_path(entry))?;
        let objects = self.build_objects(entry, &raw, &patches)?;

        for object in objects {
            let resource = api_resource_for(&object)?;
            let name = object
                .metadata
                .name
                .clone()
                .ok_or_else(|| Error::UserInput("manifest document is missing metadata.name".to_string()))?;
            let api: Api<DynamicObject> = if is_cluster_scoped(&object) {
                Api::all_with(ctx.client.clone(), &resource)
            } else {
                let namespace = object.metadata.namespace.clone().unwrap_or_else(|| self.namespace.clone());
                Api::namespaced_with(ctx.client.clone(), &namespace, &resource)
            };
            if api.get_opt(&name).await?.is_none() {
                api.create(&PostParams::default(), &object).await?;
            }
        }
        Ok(())
    }

    /// Manifest-applied bootstrap objects are not torn down: the pipeline
    /// only ever creates (see the registry's updates-out-of-scope note),
    /// and deletion would require re-deriving ownership this provisioner
    /// never persists.
    async fn deprovision(&self, _ctx: &ProvisionContext) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_env_expands_braced_and_bare_vars() {
        let mapper = |name: &str| match name {
            "FOO" => Some("bar".to_string()),
            _ => None,
        };
        assert_eq!(substitute_env("x=${FOO}-$FOO!", &mapper), "x=bar-bar!");
        assert_eq!(substitute_env("missing=$MISSING.", &mapper), "missing=.");
        assert_eq!(substitute_env("no vars here", &mapper), "no vars here");
    }

    #[test]
    fn template_replaces_both_eyecatchers() {
        let provisioner = ManifestProvisioner::new("cluster-api-bootstrap", "/manifests", "controlplane-abc")
            .with_release_name("cluster-api");
        let rendered = provisioner
            .template("release: __RELEASE_NAME__\nnamespace: __NAMESPACE__\n")
            .unwrap();
        assert_eq!(rendered, "release: cluster-api\nnamespace: controlplane-abc\n");
    }

    #[test]
    fn template_without_release_name_is_a_programmer_error() {
        let provisioner = ManifestProvisioner::new("cluster-api-bootstrap", "/manifests", "controlplane-abc");
        assert!(provisioner.template("release: __RELEASE_NAME__").is_err());
    }

    #[test]
    fn build_objects_splits_and_sets_namespace() {
        let provisioner = ManifestProvisioner::new("vcluster-bootstrap", "/manifests", "controlplane-abc");
        let entry = ManifestEntry {
            dir: "vcluster-bootstrap",
            templated: false,
            substitute_env: false,
        };
        let raw = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n  namespace: explicit\n";
        let objects = provisioner.build_objects(&entry, raw, &[]).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].metadata.namespace.as_deref(), Some("controlplane-abc"));
        assert_eq!(objects[1].metadata.namespace.as_deref(), Some("explicit"));
    }

    #[test]
    fn build_objects_leaves_cluster_scoped_kinds_without_a_namespace() {
        let provisioner = ManifestProvisioner::new("cluster-api-bootstrap", "/manifests", "controlplane-abc")
            .with_release_name("cluster-api");
        let entry = ManifestEntry {
            dir: "cluster-api-bootstrap",
            templated: false,
            substitute_env: false,
        };
        let raw = "apiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\nmetadata:\n  name: clusters.cluster.x-k8s.io\n";
        let objects = provisioner.build_objects(&entry, raw, &[]).unwrap();
        assert_eq!(objects[0].metadata.namespace, None);
    }

    #[test]
    fn build_objects_applies_matching_patch_by_gvk_and_name() {
        let provisioner = ManifestProvisioner::new("vcluster-bootstrap", "/manifests", "controlplane-abc");
        let entry = ManifestEntry {
            dir: "vcluster-bootstrap",
            templated: false,
            substitute_env: false,
        };
        let raw = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\ndata:\n  x: \"1\"\n";
        let patch_json = serde_json::json!([
            { "op": "replace", "path": "/data/x", "value": "2" }
        ]);
        let patch: JsonPatch = serde_json::from_value(patch_json).unwrap();
        let selectors = vec![PatchSelector {
            group: String::new(),
            version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            name: Some("a".to_string()),
            patch,
        }];
        let objects = provisioner.build_objects(&entry, raw, &selectors).unwrap();
        assert_eq!(
            objects[0].data.pointer("/data/x").and_then(|v| v.as_str()),
            Some("2")
        );
    }
}
