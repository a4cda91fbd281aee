//! openstack-cloud-provider: translates a `clouds.yaml` blob into the
//! chart's expected `global:` block. The translation (and its validation)
//! runs once at construction, so an invalid auth shape fails graph
//! construction rather than surfacing mid-provision.

use crate::provisioner::ProvisionContext;
use crate::provisioner::application::Generator;
use crate::util::Error;
use argus_types::OpenStackAuth;
use async_trait::async_trait;

pub struct OpenstackCloudProviderGenerator {
    values: serde_json::Value,
}

impl OpenstackCloudProviderGenerator {
    pub fn new(auth: &OpenStackAuth) -> Result<Self, Error> {
        Ok(Self {
            values: build_global_block(auth)?,
        })
    }
}

#[async_trait]
impl Generator for OpenstackCloudProviderGenerator {
    fn release_name(&self, _ctx: &ProvisionContext) -> Option<String> {
        Some("openstack-cloud-provider".to_string())
    }

    fn values(&self, _ctx: &ProvisionContext, _interface: Option<&str>) -> serde_json::Value {
        self.values.clone()
    }

    fn create_namespace_override(&self) -> Option<bool> {
        Some(true)
    }
}

fn build_global_block(auth: &OpenStackAuth) -> Result<serde_json::Value, Error> {
    use base64::Engine;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth.clouds_yaml.trim().as_bytes())
        .map_err(|e| Error::InvalidCloudConfig(format!("clouds.yaml is not valid base64: {e}")))?;
    let text = String::from_utf8(decoded)
        .map_err(|_| Error::InvalidCloudConfig("clouds.yaml is not valid UTF-8".to_string()))?;
    let parsed: serde_yaml::Value = serde_yaml::from_str(&text)?;
    let parsed: serde_json::Value = serde_json::to_value(parsed)?;

    let cloud = parsed
        .pointer(&format!("/clouds/{}/auth", auth.cloud_name))
        .ok_or_else(|| Error::InvalidCloudConfig(format!("clouds.yaml has no cloud named {}", auth.cloud_name)))?;

    let get = |key: &str| cloud.get(key).and_then(|v| v.as_str());
    let auth_type = cloud
        .get("auth_type")
        .and_then(|v| v.as_str())
        .unwrap_or("password");

    let auth_block = match auth_type {
        "v3applicationcredential" => {
            let id = get("application_credential_id").ok_or_else(|| {
                Error::InvalidCloudConfig("v3applicationcredential requires application_credential_id".to_string())
            })?;
            let secret = get("application_credential_secret").ok_or_else(|| {
                Error::InvalidCloudConfig(
                    "v3applicationcredential requires application_credential_secret".to_string(),
                )
            })?;
            serde_json::json!({
                "authURL": get("auth_url"),
                "applicationCredentialID": id,
                "applicationCredentialSecret": secret,
            })
        }
        "v3password" | "password" => {
            let username = get("username")
                .ok_or_else(|| Error::InvalidCloudConfig("v3password requires username".to_string()))?;
            let password = get("password")
                .ok_or_else(|| Error::InvalidCloudConfig("v3password requires password".to_string()))?;

            let has_domain_id = get("domain_id").is_some();
            let has_domain_name = get("domain_name").is_some();
            let has_user_project_domains = get("user_domain_name").is_some() && get("project_domain_name").is_some();
            if !((has_domain_id ^ has_domain_name) || has_user_project_domains) {
                return Err(Error::InvalidCloudConfig(
                    "v3password requires exactly one of domain id/name, or both user- and project-domain identifiers"
                        .to_string(),
                ));
            }

            let has_project_id = get("project_id").is_some();
            let has_project_name = get("project_name").is_some();
            if has_project_id == has_project_name {
                return Err(Error::InvalidCloudConfig(
                    "v3password requires exactly one of project id or project name".to_string(),
                ));
            }

            serde_json::json!({
                "authURL": get("auth_url"),
                "username": username,
                "password": password,
                "domainID": get("domain_id"),
                "domainName": get("domain_name"),
                "userDomainName": get("user_domain_name"),
                "projectDomainName": get("project_domain_name"),
                "projectID": get("project_id"),
                "projectName": get("project_name"),
            })
        }
        other => return Err(Error::InvalidCloudConfig(format!("unsupported auth_type {other}"))),
    };

    Ok(serde_json::json!({
        "global": {
            "cloudConfig": auth_block,
            "caCert": auth.ca,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn encode(yaml: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(yaml)
    }

    fn auth_with(clouds_yaml: String) -> OpenStackAuth {
        OpenStackAuth {
            cloud_name: "mycloud".to_string(),
            clouds_yaml,
            ca: None,
            external_network: "public".to_string(),
            failure_domain: "nova".to_string(),
            ssh_key: None,
        }
    }

    #[test]
    fn v3password_with_domain_id_and_project_id_succeeds() {
        let yaml = r#"
clouds:
  mycloud:
    auth:
      auth_url: "https://example.invalid/v3"
      username: "alice"
      password: "hunter2"
      domain_id: "default"
      project_id: "abc123"
"#;
        let auth = auth_with(encode(yaml));
        let gen = OpenstackCloudProviderGenerator::new(&auth).unwrap();
        assert_eq!(
            gen.values["global"]["cloudConfig"]["username"],
            serde_json::json!("alice")
        );
    }

    #[test]
    fn v3password_with_both_domain_id_and_domain_name_fails() {
        let yaml = r#"
clouds:
  mycloud:
    auth:
      auth_url: "https://example.invalid/v3"
      username: "alice"
      password: "hunter2"
      domain_id: "default"
      domain_name: "Default"
      project_id: "abc123"
"#;
        let auth = auth_with(encode(yaml));
        assert!(OpenstackCloudProviderGenerator::new(&auth).is_err());
    }

    #[test]
    fn v3applicationcredential_requires_id_and_secret() {
        let yaml = r#"
clouds:
  mycloud:
    auth:
      auth_type: v3applicationcredential
      auth_url: "https://example.invalid/v3"
      application_credential_id: "cred-id"
      application_credential_secret: "cred-secret"
"#;
        let auth = auth_with(encode(yaml));
        let gen = OpenstackCloudProviderGenerator::new(&auth).unwrap();
        assert_eq!(
            gen.values["global"]["cloudConfig"]["applicationCredentialID"],
            serde_json::json!("cred-id")
        );
    }

    #[test]
    fn unknown_cloud_name_fails() {
        let yaml = "clouds:\n  other:\n    auth: {}\n";
        let auth = auth_with(encode(yaml));
        assert!(OpenstackCloudProviderGenerator::new(&auth).is_err());
    }
}
