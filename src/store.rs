//! Access to the cluster state the reconciler reads and writes: the `Client`
//! resources themselves and the secrets holding client credentials.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::api::{ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, ResourceExt};
use serde_json::json;
use tracing::{debug, trace};

use crate::resources::{Client, ClientStatus};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Kube api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("Failed to commit: {0}")]
    Commit(#[from] kube::api::entry::CommitError),
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Namespace and name of a resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Raw key/value content of a secret.
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// Reads and writes of `Client` resources.
///
/// Writes that depend on the state read earlier must fail on a concurrent
/// modification instead of overwriting it.
#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn get(&self, key: &ResourceKey) -> Result<Option<Client>>;

    async fn add_finalizer(&self, key: &ResourceKey, client: &Client, finalizer: &str)
        -> Result<()>;

    async fn remove_finalizer(
        &self,
        key: &ResourceKey,
        client: &Client,
        finalizer: &str,
    ) -> Result<()>;

    /// Replace the status. Fails when `client` is no longer the latest
    /// version of the resource.
    async fn patch_status(
        &self,
        key: &ResourceKey,
        client: &Client,
        status: &ClientStatus,
    ) -> Result<()>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<SecretData>>;

    /// Create the secret or update the given keys of an existing one. Keys
    /// not in `data` are kept. `owner` is only applied on creation.
    async fn upsert(
        &self,
        namespace: &str,
        name: &str,
        data: SecretData,
        owner: Option<OwnerReference>,
    ) -> Result<()>;
}

pub struct KubeClientStore {
    client: kube::Client,
    field_manager: String,
}

impl KubeClientStore {
    pub fn new(client: kube::Client, field_manager: &str) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api(&self, namespace: &str) -> Api<Client> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_finalizers(
        &self,
        key: &ResourceKey,
        client: &Client,
        finalizers: Vec<String>,
    ) -> Result<()> {
        // The resource version turns the merge patch into a conditional
        // write, a concurrent update results in a conflict.
        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": client.resource_version(),
            }
        });

        self.api(&key.namespace)
            .patch(
                &key.name,
                &PatchParams {
                    field_manager: Some(self.field_manager.clone()),
                    ..Default::default()
                },
                &Patch::Merge(&patch),
            )
            .await?;

        Ok(())
    }
}

#[async_trait]
impl ClientStore for KubeClientStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<Client>> {
        Ok(self.api(&key.namespace).get_opt(&key.name).await?)
    }

    async fn add_finalizer(
        &self,
        key: &ResourceKey,
        client: &Client,
        finalizer: &str,
    ) -> Result<()> {
        let mut finalizers = client.finalizers().to_vec();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_owned());

        trace!(%key, finalizer, "Adding finalizer");
        self.patch_finalizers(key, client, finalizers).await
    }

    async fn remove_finalizer(
        &self,
        key: &ResourceKey,
        client: &Client,
        finalizer: &str,
    ) -> Result<()> {
        let finalizers: Vec<String> = client
            .finalizers()
            .iter()
            .filter(|f| *f != finalizer)
            .cloned()
            .collect();

        trace!(%key, finalizer, "Removing finalizer");
        self.patch_finalizers(key, client, finalizers).await
    }

    async fn patch_status(
        &self,
        key: &ResourceKey,
        client: &Client,
        status: &ClientStatus,
    ) -> Result<()> {
        // Conditions are replaced as a whole, a concurrent status write
        // must not be overwritten.
        let status = json!({
            "metadata": {
                "resourceVersion": client.resource_version(),
            },
            "status": status,
        });

        self.api(&key.namespace)
            .patch_status(
                &key.name,
                &PatchParams {
                    field_manager: Some(self.field_manager.clone()),
                    ..Default::default()
                },
                &Patch::Merge(&status),
            )
            .await?;

        Ok(())
    }
}

pub struct KubeSecretStore {
    client: kube::Client,
    field_manager: String,
}

impl KubeSecretStore {
    pub fn new(client: kube::Client, field_manager: &str) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<SecretData>> {
        let secrets = Api::<Secret>::namespaced(self.client.clone(), namespace);

        Ok(secrets.get_opt(name).await?.map(|secret| {
            secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(key, value)| (key, value.0))
                .collect()
        }))
    }

    async fn upsert(
        &self,
        namespace: &str,
        name: &str,
        data: SecretData,
        owner: Option<OwnerReference>,
    ) -> Result<()> {
        let secrets = Api::<Secret>::namespaced(self.client.clone(), namespace);

        let data: BTreeMap<String, ByteString> = data
            .into_iter()
            .map(|(key, value)| (key, ByteString(value)))
            .collect();

        let mut secret = secrets
            .entry(name)
            .await?
            .and_modify(|secret| {
                debug!(namespace, name, "Updating existing secret");
                secret
                    .data
                    .get_or_insert_with(BTreeMap::new)
                    .extend(data.clone());
            })
            .or_insert(|| {
                debug!(namespace, name, "Creating new secret");
                Secret {
                    metadata: ObjectMeta {
                        owner_references: owner.map(|oref| vec![oref]),
                        ..Default::default()
                    },
                    data: Some(data),
                    ..Default::default()
                }
            });

        trace!(namespace, name, "Committing secret");
        secret
            .commit(&PostParams {
                dry_run: false,
                field_manager: Some(self.field_manager.clone()),
            })
            .await?;

        Ok(())
    }
}
