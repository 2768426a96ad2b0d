//! One convergence pass of a `Client` resource against Keycloak.
//!
//! A pass never commits more than one change to the resource itself: adding
//! the finalizer ends the pass, so the finalizer is always stored before a
//! client is created in Keycloak.

use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use representations::ClientRepresentation;
use tracing::{debug, info, trace, warn};

use crate::context::ControllerEvents;
use crate::keycloak::{AccessToken, AdminCredentials, IdentityProvider};
use crate::resources::{credentials_secret_name, Client, CredentialSource, Error, Result};
use crate::status::{find_condition, upsert_condition, Condition, ConditionStatus, READY};
use crate::store::{self, ClientStore, ResourceKey, SecretData, SecretStore};

pub const FINALIZER: &str = "keycloak.pewty.fr/finalizer";

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub finalizer: String,
    pub credentials: AdminCredentials,
}

impl ReconcilerConfig {
    pub fn new(credentials: AdminCredentials) -> Self {
        Self {
            finalizer: FINALIZER.into(),
            credentials,
        }
    }
}

/// Outcome of a successful pass, handed back to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Nothing left to do for this resource until it changes again.
    Done,
    /// Keycloak matches the resource; check again on the next resync.
    Converged,
    /// Run another pass right away.
    Requeue,
}

/// Secret that receives the credentials of a client.
#[derive(Debug, Clone)]
struct CredentialRecord {
    name: String,
    client_id_key: String,
    secret_key: String,
    owner: Option<OwnerReference>,
}

#[derive(Debug)]
struct ResolvedCredentials {
    client_id: String,
    secret: Option<String>,
    record: CredentialRecord,
}

fn secret_value(data: &SecretData, key: &str) -> Option<String> {
    data.get(key)
        .and_then(|value| String::from_utf8(value.clone()).ok())
        .filter(|value| !value.is_empty())
}

fn credential_data(
    record: &CredentialRecord,
    client_id: Option<&str>,
    secret: Option<&str>,
) -> SecretData {
    let mut data = SecretData::new();
    if let Some(client_id) = client_id.filter(|id| !id.is_empty()) {
        data.insert(record.client_id_key.clone(), client_id.as_bytes().to_vec());
    }
    if let Some(secret) = secret.filter(|secret| !secret.is_empty()) {
        data.insert(record.secret_key.clone(), secret.as_bytes().to_vec());
    }
    data
}

pub struct Reconciler {
    config: ReconcilerConfig,
    clients: Arc<dyn ClientStore>,
    secrets: Arc<dyn SecretStore>,
    provider: Arc<dyn IdentityProvider>,
    events: Arc<dyn ControllerEvents>,
}

impl Reconciler {
    pub fn new(
        config: ReconcilerConfig,
        clients: Arc<dyn ClientStore>,
        secrets: Arc<dyn SecretStore>,
        provider: Arc<dyn IdentityProvider>,
        events: Arc<dyn ControllerEvents>,
    ) -> Self {
        Self {
            config,
            clients,
            secrets,
            provider,
            events,
        }
    }

    pub async fn reconcile(&self, key: &ResourceKey) -> Result<Disposition> {
        let Some(client) = self.clients.get(key).await? else {
            debug!(%key, "Client resource not found, ignoring since it must be deleted");
            return Ok(Disposition::Done);
        };

        let source = match client.spec.validate() {
            Ok(source) => source,
            Err(err) => return Err(self.fail(key, &client, err).await),
        };
        if matches!(source, CredentialSource::Inline { .. }) {
            warn!(%key, "Inline client credentials are deprecated, use clientSecretRef");
        }

        trace!(%key, "Authenticating with Keycloak");
        let token = match self.provider.authenticate(&self.config.credentials).await {
            Ok(token) => token,
            Err(err) => return Err(self.fail(key, &client, Error::Authentication(err)).await),
        };

        let has_finalizer = client
            .finalizers()
            .iter()
            .any(|finalizer| *finalizer == self.config.finalizer);

        if client.meta().deletion_timestamp.is_some() {
            if has_finalizer {
                return self.cleanup(key, &client, &source, &token).await;
            }
            return Ok(Disposition::Done);
        }

        if !has_finalizer {
            debug!(%key, "Adding finalizer");
            self.clients
                .add_finalizer(key, &client, &self.config.finalizer)
                .await?;
            return Ok(Disposition::Requeue);
        }

        self.apply(key, &client, source, &token).await
    }

    async fn apply(
        &self,
        key: &ResourceKey,
        client: &Client,
        source: CredentialSource,
        token: &AccessToken,
    ) -> Result<Disposition> {
        let realm = client.spec.realm.as_str();

        let credentials = match self.resolve_credentials(key, client, source).await {
            Ok(credentials) => credentials,
            Err(err) => return Err(self.fail(key, client, err).await),
        };

        let mut payload = ClientRepresentation::from(&client.spec.client);
        payload.client_id = Some(credentials.client_id.clone());
        // Without a secret Keycloak keeps or generates one
        payload.secret = credentials.secret.clone();

        trace!(%key, client_id = credentials.client_id, "Looking up client");
        let existing = match self
            .provider
            .find_clients(token, realm, &credentials.client_id)
            .await
        {
            Ok(found) => found.into_iter().next(),
            Err(err) => return Err(self.fail(key, client, Error::Query(err)).await),
        };

        match existing {
            None => self.create(key, client, payload, &credentials, token).await,
            Some(existing) => {
                self.update(key, client, payload, existing, &credentials, token)
                    .await
            }
        }
    }

    async fn create(
        &self,
        key: &ResourceKey,
        client: &Client,
        mut payload: ClientRepresentation,
        credentials: &ResolvedCredentials,
        token: &AccessToken,
    ) -> Result<Disposition> {
        let realm = client.spec.realm.as_str();
        let client_id = credentials.client_id.as_str();

        // The internal id is assigned by Keycloak
        payload.id = None;

        debug!(%key, client_id, "Creating client");
        let id = match self.provider.create_client(token, realm, &payload).await {
            Ok(id) => id,
            Err(err) => return Err(self.fail(key, client, Error::Create(err)).await),
        };

        let created = match self.provider.get_client(token, realm, &id).await {
            Ok(created) => created,
            Err(err) => return Err(self.fail(key, client, Error::Query(err)).await),
        };
        info!(%key, client_id, id, "Created client");
        self.publish(self.events.client_created(client, client_id).await);

        let record = &credentials.record;
        let data = credential_data(
            record,
            created.client_id.as_deref(),
            created.secret.as_deref(),
        );
        if data.is_empty() {
            warn!(%key, client_id, "Keycloak returned neither a client id nor a secret, not storing credentials");
        } else {
            trace!(%key, secret = record.name, "Storing credentials");
            if let Err(err) = self
                .secrets
                .upsert(&key.namespace, &record.name, data, record.owner.clone())
                .await
            {
                let err = Error::SecretWrite {
                    name: record.name.clone(),
                    source: err,
                };
                return Err(self.fail(key, client, err).await);
            }
            self.publish(self.events.secret_updated(client, &record.name).await);
        }

        self.report(
            key,
            client,
            ConditionStatus::True,
            "Created",
            "Client successfully created in Keycloak",
            Some(client_id),
        )
        .await?;

        Ok(Disposition::Converged)
    }

    async fn update(
        &self,
        key: &ResourceKey,
        client: &Client,
        mut payload: ClientRepresentation,
        existing: ClientRepresentation,
        credentials: &ResolvedCredentials,
        token: &AccessToken,
    ) -> Result<Disposition> {
        let realm = client.spec.realm.as_str();
        let client_id = credentials.client_id.as_str();

        payload.id = existing.id.clone();

        debug!(%key, client_id, id = ?payload.id, "Updating client");
        if let Err(err) = self.provider.update_client(token, realm, &payload).await {
            return Err(self.fail(key, client, Error::Update(err)).await);
        }
        self.publish(self.events.client_updated(client, client_id).await);

        // Keycloak already converged at this point, a failed write is picked
        // up again by the next pass.
        let secret = credentials.secret.as_deref().or(existing.secret.as_deref());
        if secret.is_some() {
            let record = &credentials.record;
            let data = credential_data(record, Some(client_id), secret);
            match self
                .secrets
                .upsert(&key.namespace, &record.name, data, record.owner.clone())
                .await
            {
                Ok(()) => trace!(%key, secret = record.name, "Refreshed credentials"),
                Err(err) => {
                    warn!(%key, secret = record.name, error = %err, "Failed to refresh credentials")
                }
            }
        }

        self.report(
            key,
            client,
            ConditionStatus::True,
            "Updated",
            "Client successfully updated in Keycloak",
            Some(client_id),
        )
        .await?;

        Ok(Disposition::Converged)
    }

    async fn cleanup(
        &self,
        key: &ResourceKey,
        client: &Client,
        source: &CredentialSource,
        token: &AccessToken,
    ) -> Result<Disposition> {
        let realm = client.spec.realm.as_str();

        debug!(%key, "Cleanup");
        match self.cleanup_client_id(key, client, source).await {
            Some(client_id) => {
                if let Err(err) = self.delete_remote(client, realm, &client_id, token).await {
                    return Err(self.fail(key, client, err).await);
                }
            }
            None => {
                warn!(%key, "No client id available, skipping cleanup in Keycloak");
            }
        }

        debug!(%key, "Removing finalizer");
        self.clients
            .remove_finalizer(key, client, &self.config.finalizer)
            .await?;

        Ok(Disposition::Done)
    }

    async fn delete_remote(
        &self,
        client: &Client,
        realm: &str,
        client_id: &str,
        token: &AccessToken,
    ) -> Result<()> {
        let found = self
            .provider
            .find_clients(token, realm, client_id)
            .await
            .map_err(Error::Delete)?;

        match found.into_iter().next().and_then(|existing| existing.id) {
            Some(id) => match self.provider.delete_client(token, realm, &id).await {
                Ok(()) => {
                    info!(client_id, id, "Deleted client");
                    self.publish(self.events.client_deleted(client, client_id).await);
                }
                Err(err) if err.is_not_found() => {
                    debug!(client_id, id, "Client disappeared before it was deleted");
                    self.publish(self.events.client_not_found(client, client_id).await);
                }
                Err(err) => return Err(Error::Delete(err)),
            },
            None => {
                debug!(client_id, "Client not found in Keycloak, nothing to delete");
                self.publish(self.events.client_not_found(client, client_id).await);
            }
        }

        Ok(())
    }

    /// Identifier to clean up. Prefers the credential secret, falls back to
    /// the last converged identifier when the secret can not be read.
    async fn cleanup_client_id(
        &self,
        key: &ResourceKey,
        client: &Client,
        source: &CredentialSource,
    ) -> Option<String> {
        let secret_ref = match source {
            CredentialSource::Inline { client_id, .. } => return Some(client_id.clone()),
            CredentialSource::SecretRef(secret_ref) => secret_ref,
        };

        let cached = || client.status.as_ref().and_then(|s| s.client_id.clone());

        match self
            .secrets
            .get(&key.namespace, &secret_ref.secret_name)
            .await
        {
            Ok(Some(data)) => {
                secret_value(&data, &secret_ref.client_id_key_name).or_else(cached)
            }
            Ok(None) => {
                warn!(%key, secret = secret_ref.secret_name, "Credential secret is gone");
                cached()
            }
            Err(err) => {
                warn!(%key, secret = secret_ref.secret_name, error = %err, "Failed to read credential secret");
                cached()
            }
        }
    }

    async fn resolve_credentials(
        &self,
        key: &ResourceKey,
        client: &Client,
        source: CredentialSource,
    ) -> Result<ResolvedCredentials> {
        match source {
            CredentialSource::Inline { client_id, secret } => Ok(ResolvedCredentials {
                client_id,
                secret: secret.filter(|secret| !secret.is_empty()),
                record: CredentialRecord {
                    name: credentials_secret_name(&key.name),
                    client_id_key: "clientId".into(),
                    secret_key: "clientSecret".into(),
                    owner: client.controller_owner_ref(&()),
                },
            }),
            CredentialSource::SecretRef(secret_ref) => {
                let name = secret_ref.secret_name;

                let data = self
                    .secrets
                    .get(&key.namespace, &name)
                    .await
                    .map_err(|source| Error::SecretRead {
                        name: name.clone(),
                        source,
                    })?
                    .ok_or_else(|| Error::SecretNotFound(name.clone()))?;

                let client_id = secret_value(&data, &secret_ref.client_id_key_name).ok_or_else(
                    || Error::SecretKey {
                        name: name.clone(),
                        key: secret_ref.client_id_key_name.clone(),
                    },
                )?;
                let secret = secret_value(&data, &secret_ref.client_secret_key_name);
                if secret.is_none() {
                    debug!(%key, secret = name, "Credential secret has no client secret, Keycloak will generate one");
                }

                Ok(ResolvedCredentials {
                    client_id,
                    secret,
                    record: CredentialRecord {
                        name,
                        client_id_key: secret_ref.client_id_key_name,
                        secret_key: secret_ref.client_secret_key_name,
                        owner: None,
                    },
                })
            }
        }
    }

    async fn report(
        &self,
        key: &ResourceKey,
        client: &Client,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        client_id: Option<&str>,
    ) -> Result<(), store::Error> {
        let mut new_status = client.status.clone().unwrap_or_default();
        let previous = find_condition(&new_status.conditions, READY).map(|ready| ready.status);
        if previous != Some(status) {
            info!(%key, ?previous, current = ?status, reason, "Ready condition changed");
        }
        upsert_condition(
            &mut new_status.conditions,
            Condition::ready(status, reason, message, client.meta().generation),
        );
        if let Some(client_id) = client_id {
            new_status.client_id = Some(client_id.to_owned());
        }

        trace!(%key, reason, "Updating status");
        self.clients.patch_status(key, client, &new_status).await
    }

    /// Record `err` as a failed Ready condition and hand it back.
    async fn fail(&self, key: &ResourceKey, client: &Client, err: Error) -> Error {
        if let Err(status_err) = self
            .report(
                key,
                client,
                ConditionStatus::False,
                err.reason(),
                &err.to_string(),
                None,
            )
            .await
        {
            warn!(%key, error = %status_err, "Failed to update status");
        }

        err
    }

    fn publish(&self, result: Result<(), kube::Error>) {
        if let Err(err) = result {
            warn!(error = %err, "Failed to publish event");
        }
    }
}
