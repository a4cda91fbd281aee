use super::MANAGER_NAME;
use argus_types::*;
use k8s_openapi::{
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    jiff::Timestamp,
};
use kube::{
    Api, Client, Error,
    api::{Patch, PatchParams, Resource},
    core::NamespaceResourceScope,
};
use serde::{Serialize, de::DeserializeOwned};
use std::{clone::Clone, fmt::Debug};

pub trait Object<S: Status> {
    /// Returns a mutable reference to the status object, initializing
    /// it with the default value if it does not exist.
    fn mut_status(&mut self) -> &mut S;
}

pub trait Status {
    /// Sets the last updated timestamp to the given value.
    fn set_last_updated(&mut self, last_updated: Time);

    /// The phase this status currently carries, used to derive the
    /// user-visible `Available` condition.
    fn phase(&self) -> Phase;

    /// The human message this status currently carries.
    fn message(&self) -> Option<String>;

    /// The `conditions[]` slice to upsert the `Available` condition into.
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
}

impl Object<ProjectStatus> for Project {
    fn mut_status(&mut self) -> &mut ProjectStatus {
        if self.status.is_some() {
            return self.status.as_mut().unwrap();
        }
        self.status = Some(Default::default());
        self.status.as_mut().unwrap()
    }
}

impl Status for ProjectStatus {
    fn set_last_updated(&mut self, last_updated: Time) {
        self.last_updated = Some(last_updated);
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn message(&self) -> Option<String> {
        self.message.clone()
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl Object<ControlPlaneStatus> for ControlPlane {
    fn mut_status(&mut self) -> &mut ControlPlaneStatus {
        if self.status.is_some() {
            return self.status.as_mut().unwrap();
        }
        self.status = Some(Default::default());
        self.status.as_mut().unwrap()
    }
}

impl Status for ControlPlaneStatus {
    fn set_last_updated(&mut self, last_updated: Time) {
        self.last_updated = Some(last_updated);
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn message(&self) -> Option<String> {
        self.message.clone()
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl Object<KubernetesClusterStatus> for KubernetesCluster {
    fn mut_status(&mut self) -> &mut KubernetesClusterStatus {
        if self.status.is_some() {
            return self.status.as_mut().unwrap();
        }
        self.status = Some(Default::default());
        self.status.as_mut().unwrap()
    }
}

impl Status for KubernetesClusterStatus {
    fn set_last_updated(&mut self, last_updated: Time) {
        self.last_updated = Some(last_updated);
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn message(&self) -> Option<String> {
        self.message.clone()
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

/// Upserts the `Available` condition to reflect `status`'s current phase:
/// `True` iff `Provisioned`, `False` for every other phase in the closed
/// set. The transition timestamp only moves when the condition's `status`
/// actually flips, per the usual Kubernetes condition convention.
fn sync_available_condition<S: Status>(status: &mut S, observed_generation: i64, now: &Time) {
    let phase = status.phase();
    let reason = phase.to_string();
    let condition_status = if matches!(phase, Phase::Provisioned) { "True" } else { "False" };
    let message = status.message().unwrap_or_else(|| reason.clone());
    let conditions = status.conditions_mut();
    match conditions.iter_mut().find(|c| c.type_ == "Available") {
        Some(existing) => {
            if existing.status != condition_status {
                existing.last_transition_time = now.clone();
            }
            existing.status = condition_status.to_string();
            existing.reason = reason;
            existing.message = message;
            existing.observed_generation = Some(observed_generation);
        }
        None => conditions.push(Condition {
            type_: "Available".to_string(),
            status: condition_status.to_string(),
            reason,
            message,
            last_transition_time: now.clone(),
            observed_generation: Some(observed_generation),
        }),
    }
}

/// Patch the resource's status object with the provided function.
/// The function is passed a mutable reference to the status object,
/// which is to be mutated in-place. Move closures are supported.
pub async fn patch_status<S: Status, T>(
    client: Client,
    instance: &T,
    f: impl FnOnce(&mut S),
) -> Result<T, Error>
where
    <T as Resource>::DynamicType: Default,
    T: Clone
        + Resource
        + Object<S>
        + Serialize
        + DeserializeOwned
        + Debug
        + Resource<Scope = NamespaceResourceScope>,
{
    let observed_generation = instance.meta().generation.unwrap_or(0);
    let patch = Patch::Json::<T>({
        let mut modified = instance.clone();
        let status = modified.mut_status();
        f(status);
        let now = Time::from(Timestamp::now());
        status.set_last_updated(now.clone());
        sync_available_condition(status, observed_generation, &now);
        json_patch::diff(
            &serde_json::to_value(instance).unwrap(),
            &serde_json::to_value(&modified).unwrap(),
        )
    });
    let name = instance.meta().name.as_deref().unwrap();
    let namespace = instance.meta().namespace.as_deref().unwrap();
    let api: Api<T> = Api::namespaced(client, namespace);
    api.patch_status(name, &PatchParams::apply(MANAGER_NAME), &patch)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_available_condition_inserts_then_updates_in_place() {
        let mut status = ProjectStatus {
            phase: Phase::Provisioning,
            ..Default::default()
        };
        let t1 = Time::from(Timestamp::now());
        sync_available_condition(&mut status, 1, &t1);
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].status, "False");
        assert_eq!(status.conditions[0].reason, "Provisioning");

        status.phase = Phase::Provisioned;
        let t2 = Time::from(Timestamp::now());
        sync_available_condition(&mut status, 2, &t2);
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].status, "True");
        assert_eq!(status.conditions[0].reason, "Provisioned");
        assert_eq!(status.conditions[0].observed_generation, Some(2));
    }
}
