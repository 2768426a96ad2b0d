mod admin;

use std::env;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use representations::ClientRepresentation;
use reqwest::StatusCode;

pub use admin::KeycloakAdmin;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnv(&'static str, String),
    #[error("Invalid Keycloak url: {0}")]
    InvalidUrl(String),
    #[error("Http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Keycloak returned {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("Keycloak did not return the id of the created client")]
    MissingLocation,
    #[error("Client payload has no id")]
    MissingId,
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Api { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Operator level credentials, distinct from the credentials of the managed
/// clients.
#[derive(Clone)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
    pub realm: String,
    pub client_id: String,
}

impl fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("realm", &self.realm)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct KeycloakConfig {
    pub url: String,
    pub credentials: AdminCredentials,
    pub timeout: Duration,
}

fn required(name: &'static str) -> Result<String> {
    env::var(name).map_err(|_| Error::MissingEnv(name))
}

fn optional(name: &'static str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_owned())
}

impl KeycloakConfig {
    pub fn try_from_env() -> Result<Self> {
        let timeout = optional("KEYCLOAK_TIMEOUT_SECONDS", "30");
        let timeout = timeout
            .parse()
            .map_err(|_| Error::InvalidEnv("KEYCLOAK_TIMEOUT_SECONDS", timeout))?;

        Ok(Self {
            url: required("KEYCLOAK_URL")?,
            credentials: AdminCredentials {
                username: required("KEYCLOAK_USER")?,
                password: required("KEYCLOAK_PASSWORD")?,
                realm: optional("KEYCLOAK_REALM", "master"),
                client_id: optional("KEYCLOAK_CLIENT_ID", "admin-cli"),
            },
            timeout: Duration::from_secs(timeout),
        })
    }

    pub fn build_client(&self) -> Result<KeycloakAdmin> {
        KeycloakAdmin::new(&self.url, self.timeout)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

/// Client management in an identity provider.
///
/// Implementations hold no state between calls; every call is authorized by
/// the token returned from [`IdentityProvider::authenticate`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, credentials: &AdminCredentials) -> Result<AccessToken>;

    /// Clients in `realm` whose `clientId` is exactly `client_id`.
    async fn find_clients(
        &self,
        token: &AccessToken,
        realm: &str,
        client_id: &str,
    ) -> Result<Vec<ClientRepresentation>>;

    /// Returns the internal id Keycloak assigned to the new client.
    async fn create_client(
        &self,
        token: &AccessToken,
        realm: &str,
        client: &ClientRepresentation,
    ) -> Result<String>;

    async fn get_client(
        &self,
        token: &AccessToken,
        realm: &str,
        id: &str,
    ) -> Result<ClientRepresentation>;

    /// `client.id` selects the client to update.
    async fn update_client(
        &self,
        token: &AccessToken,
        realm: &str,
        client: &ClientRepresentation,
    ) -> Result<()>;

    async fn delete_client(&self, token: &AccessToken, realm: &str, id: &str) -> Result<()>;
}
