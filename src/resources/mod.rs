mod client;
mod convert;

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, instrument, warn};

use crate::context::Context;
use crate::keycloak;
use crate::reconciler::Disposition;
use crate::store::{self, ResourceKey};

pub use client::{
    credentials_secret_name, Client, ClientFields, ClientSpec, ClientStatus, CredentialSecretRef,
    CredentialSource, ProtocolMapper,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid spec: {0}")]
    Validation(String),
    #[error("Failed to authenticate with Keycloak: {0}")]
    Authentication(#[source] keycloak::Error),
    #[error("Failed to read secret '{name}': {source}")]
    SecretRead { name: String, source: store::Error },
    #[error("Secret '{0}' not found")]
    SecretNotFound(String),
    #[error("Secret '{name}' has no value for key '{key}'")]
    SecretKey { name: String, key: String },
    #[error("Failed to query clients: {0}")]
    Query(#[source] keycloak::Error),
    #[error("Failed to create client: {0}")]
    Create(#[source] keycloak::Error),
    #[error("Failed to update client: {0}")]
    Update(#[source] keycloak::Error),
    #[error("Failed to delete client: {0}")]
    Delete(#[source] keycloak::Error),
    #[error("Failed to write secret '{name}': {source}")]
    SecretWrite { name: String, source: store::Error },
    #[error("Store error: {0}")]
    Store(#[from] store::Error),
    #[error("MissingObjectKey: {0}")]
    MissingObjectKey(&'static str),
}

impl Error {
    /// Reason of the Ready condition recorded for this error.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Validation(_) | Error::MissingObjectKey(_) => "ValidationFailed",
            Error::Authentication(_) => "AuthenticationFailed",
            Error::SecretRead { .. } | Error::SecretNotFound(_) | Error::SecretKey { .. } => {
                "SecretReadFailed"
            }
            Error::Query(_) => "QueryFailed",
            Error::Create(_) => "CreationFailed",
            Error::Update(_) => "UpdateFailed",
            Error::Delete(_) => "DeletionFailed",
            Error::SecretWrite { .. } => "SecretWriteFailed",
            Error::Store(_) => "ReconcileFailed",
        }
    }

    /// Whether retrying without a change to the resource can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Validation(_) | Error::MissingObjectKey(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn resource_key(obj: &Client) -> Result<ResourceKey> {
    let name = obj
        .metadata
        .name
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    let namespace = obj
        .metadata
        .namespace
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;

    Ok(ResourceKey::new(namespace, name))
}

#[instrument(skip(obj, ctx))]
pub async fn reconcile(obj: Arc<Client>, ctx: Arc<Context>) -> Result<Action> {
    debug!(name = obj.name_any(), "Reconcile");

    let key = resource_key(&obj)?;
    let disposition = ctx.reconciler.reconcile(&key).await?;
    ctx.backoff.reset(&key);

    Ok(match disposition {
        Disposition::Done => Action::await_change(),
        Disposition::Converged => Action::requeue(ctx.resync_interval),
        Disposition::Requeue => Action::requeue(Duration::ZERO),
    })
}

pub fn error_policy(obj: Arc<Client>, err: &Error, ctx: Arc<Context>) -> Action {
    if !err.is_retryable() {
        warn!(name = obj.name_any(), error = %err, "Not retrying until the resource changes");
        return Action::await_change();
    }

    match resource_key(&obj) {
        Ok(key) => {
            let delay = ctx.backoff.next_delay(&key);
            warn!(%key, error = %err, ?delay, "Reconcile failed, retrying");
            Action::requeue(delay)
        }
        Err(_) => Action::await_change(),
    }
}
