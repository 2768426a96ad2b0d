use std::collections::BTreeMap;

use kube::CustomResource;
use representations::ResourceServerRepresentation;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Error, Result};
use crate::status::Condition;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    kind = "Client",
    group = "keycloak.pewty.fr",
    version = "v1",
    namespaced,
    status = "ClientStatus"
)]
#[kube(
    shortname = "kcc",
    doc = "Custom resource for managing Clients inside of Keycloak",
    printcolumn = r#"{"name":"Realm", "type":"string", "jsonPath":".spec.realm"}"#,
    printcolumn = r#"{"name":"Client ID", "type":"string", "description":"Identifier of the converged client", "jsonPath":".status.clientId"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClientSpec {
    #[serde(default)]
    pub realm: String,
    #[serde(default)]
    pub client: ClientFields,
    /// Secret holding the client identifier and secret. Takes the place of
    /// the inline `client.clientId` and `client.secret` fields.
    pub client_secret_ref: Option<CredentialSecretRef>,
}

/// Desired state of the client inside Keycloak. Absent fields are left
/// untouched on create and on update.
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientFields {
    pub id: Option<String>,
    pub client_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub root_url: Option<String>,
    pub admin_url: Option<String>,
    pub base_url: Option<String>,
    pub surrogate_auth_required: Option<bool>,
    pub enabled: Option<bool>,
    pub always_display_in_console: Option<bool>,
    pub client_authenticator_type: Option<String>,
    /// Deprecated, use `clientSecretRef`.
    pub secret: Option<String>,
    pub registration_access_token: Option<String>,
    pub default_roles: Option<Vec<String>>,
    pub redirect_uris: Option<Vec<String>>,
    pub web_origins: Option<Vec<String>>,
    pub not_before: Option<i32>,
    pub bearer_only: Option<bool>,
    pub consent_required: Option<bool>,
    pub standard_flow_enabled: Option<bool>,
    pub implicit_flow_enabled: Option<bool>,
    pub direct_access_grants_enabled: Option<bool>,
    pub service_accounts_enabled: Option<bool>,
    pub authorization_services_enabled: Option<bool>,
    pub direct_grants_only: Option<bool>,
    pub public_client: Option<bool>,
    pub frontchannel_logout: Option<bool>,
    pub protocol: Option<String>,
    pub attributes: Option<BTreeMap<String, String>>,
    pub authentication_flow_binding_overrides: Option<BTreeMap<String, String>>,
    pub full_scope_allowed: Option<bool>,
    pub node_re_registration_timeout: Option<i32>,
    pub registered_nodes: Option<BTreeMap<String, u32>>,
    pub protocol_mappers: Option<Vec<ProtocolMapper>>,
    pub client_template: Option<String>,
    pub use_template_config: Option<bool>,
    pub use_template_scope: Option<bool>,
    pub use_template_mappers: Option<bool>,
    pub default_client_scopes: Option<Vec<String>>,
    pub optional_client_scopes: Option<Vec<String>>,
    pub authorization_settings: Option<ResourceServerRepresentation>,
    pub access: Option<BTreeMap<String, bool>>,
    pub origin: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMapper {
    pub id: Option<String>,
    pub name: Option<String>,
    pub protocol: Option<String>,
    pub protocol_mapper: Option<String>,
    pub config: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSecretRef {
    pub secret_name: String,
    #[serde(default = "default_client_id_key")]
    pub client_id_key_name: String,
    #[serde(default = "default_client_secret_key")]
    pub client_secret_key_name: String,
}

fn default_client_id_key() -> String {
    "clientId".into()
}

fn default_client_secret_key() -> String {
    "clientSecret".into()
}

impl CredentialSecretRef {
    pub fn new(secret_name: impl Into<String>) -> Self {
        Self {
            secret_name: secret_name.into(),
            client_id_key_name: default_client_id_key(),
            client_secret_key_name: default_client_secret_key(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub client_id: Option<String>,
}

/// Where the identifier and secret of a client come from. Exactly one
/// source is active for a resource.
#[derive(Clone, Debug, PartialEq)]
pub enum CredentialSource {
    Inline {
        client_id: String,
        secret: Option<String>,
    },
    SecretRef(CredentialSecretRef),
}

impl ClientSpec {
    /// Check the fields a pass cannot do without and pick the credential
    /// source.
    pub fn validate(&self) -> Result<CredentialSource> {
        if self.realm.trim().is_empty() {
            return Err(Error::Validation("realm is required".into()));
        }

        match &self.client_secret_ref {
            Some(secret_ref) => {
                if self.client.client_id.is_some() || self.client.secret.is_some() {
                    return Err(Error::Validation(
                        "client.clientId and client.secret must not be set when clientSecretRef is used".into(),
                    ));
                }
                if secret_ref.secret_name.is_empty() {
                    return Err(Error::Validation(
                        "clientSecretRef.secretName is required".into(),
                    ));
                }
                if secret_ref.client_id_key_name.is_empty()
                    || secret_ref.client_secret_key_name.is_empty()
                {
                    return Err(Error::Validation(
                        "clientSecretRef key names must not be empty".into(),
                    ));
                }

                Ok(CredentialSource::SecretRef(secret_ref.clone()))
            }
            None => match self.client.client_id.as_deref() {
                Some(client_id) if !client_id.is_empty() => Ok(CredentialSource::Inline {
                    client_id: client_id.to_owned(),
                    secret: self.client.secret.clone(),
                }),
                _ => Err(Error::Validation("clientId is required".into())),
            },
        }
    }
}

pub fn credentials_secret_name(name: &str) -> String {
    format!("{name}-client-credentials")
}
