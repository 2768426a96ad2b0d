use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    runtime::events::{Event, EventType, Recorder, Reporter},
    Resource, ResourceExt,
};

use crate::keycloak::{self, KeycloakConfig};
use crate::reconciler::{Reconciler, ReconcilerConfig};
use crate::resources::Client;
use crate::store::{KubeClientStore, KubeSecretStore, ResourceKey};

const BACKOFF_BASE: Duration = Duration::from_secs(5);
const BACKOFF_MAX: Duration = Duration::from_secs(300);

pub struct Context {
    pub reconciler: Reconciler,
    pub resync_interval: Duration,
    pub backoff: Backoff,
}

impl Context {
    pub fn new(
        controller_name: &str,
        client: kube::Client,
        keycloak_config: KeycloakConfig,
        resync_interval: Duration,
    ) -> Result<Self, keycloak::Error> {
        let reporter: Reporter = controller_name.into();
        let recorder = Recorder::new(client.clone(), reporter);

        let reconciler = Reconciler::new(
            ReconcilerConfig::new(keycloak_config.credentials.clone()),
            Arc::new(KubeClientStore::new(client.clone(), controller_name)),
            Arc::new(KubeSecretStore::new(client, controller_name)),
            Arc::new(keycloak_config.build_client()?),
            Arc::new(recorder),
        );

        Ok(Self {
            reconciler,
            resync_interval,
            backoff: Backoff::new(BACKOFF_BASE, BACKOFF_MAX),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Failures {
    count: u32,
    last: Instant,
}

/// Per resource retry delay, doubling with every consecutive failure.
///
/// Resources that stop failing without a successful pass, for example
/// because they were deleted, are forgotten once they have not failed for
/// twice the maximum delay.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<ResourceKey, Failures>>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn next_delay(&self, key: &ResourceKey) -> Duration {
        let now = Instant::now();
        let expiry = self.max.saturating_mul(2);

        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.retain(|_, failure| now.duration_since(failure.last) <= expiry);

        let failure = failures.entry(key.clone()).or_insert(Failures {
            count: 0,
            last: now,
        });
        let delay = self
            .base
            .checked_mul(2u32.saturating_pow(failure.count))
            .map_or(self.max, |delay| delay.min(self.max));
        failure.count = failure.count.saturating_add(1);
        failure.last = now;

        delay
    }

    pub fn reset(&self, key: &ResourceKey) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

#[async_trait]
pub trait ControllerEvents: Send + Sync {
    async fn client_created(&self, obj: &Client, client_id: &str) -> Result<(), kube::Error>;

    async fn client_updated(&self, obj: &Client, client_id: &str) -> Result<(), kube::Error>;

    async fn client_deleted(&self, obj: &Client, client_id: &str) -> Result<(), kube::Error>;

    async fn client_not_found(&self, obj: &Client, client_id: &str) -> Result<(), kube::Error>;

    async fn secret_updated(&self, obj: &Client, secret_name: &str) -> Result<(), kube::Error>;
}

#[async_trait]
impl ControllerEvents for Recorder {
    async fn client_created(&self, obj: &Client, client_id: &str) -> Result<(), kube::Error> {
        self.publish(
            &Event {
                type_: EventType::Normal,
                reason: "ClientCreated".into(),
                note: Some(format!("Created client '{client_id}'")),
                action: "ClientCreated".into(),
                secondary: None,
            },
            &obj.object_ref(&()),
        )
        .await
    }

    async fn client_updated(&self, obj: &Client, client_id: &str) -> Result<(), kube::Error> {
        self.publish(
            &Event {
                type_: EventType::Normal,
                reason: "ClientUpdated".into(),
                note: Some(format!("Updated client '{client_id}'")),
                action: "ClientUpdated".into(),
                secondary: None,
            },
            &obj.object_ref(&()),
        )
        .await
    }

    async fn client_deleted(&self, obj: &Client, client_id: &str) -> Result<(), kube::Error> {
        self.publish(
            &Event {
                type_: EventType::Normal,
                reason: "ClientDeleted".into(),
                note: Some(format!("Deleted client '{client_id}'")),
                action: "ClientDeleted".into(),
                secondary: None,
            },
            &obj.object_ref(&()),
        )
        .await
    }

    async fn client_not_found(&self, obj: &Client, client_id: &str) -> Result<(), kube::Error> {
        self.publish(
            &Event {
                type_: EventType::Warning,
                reason: "ClientNotFound".into(),
                note: Some(format!("Client '{client_id}' was already gone")),
                action: "ClientDeleted".into(),
                secondary: None,
            },
            &obj.object_ref(&()),
        )
        .await
    }

    async fn secret_updated(&self, obj: &Client, secret_name: &str) -> Result<(), kube::Error> {
        let secret = ObjectReference {
            api_version: Some("v1".into()),
            kind: Some("Secret".into()),
            name: Some(secret_name.into()),
            namespace: obj.namespace(),
            ..Default::default()
        };

        self.publish(
            &Event {
                type_: EventType::Normal,
                reason: "SecretUpdated".into(),
                note: Some(format!("Stored client credentials in secret '{secret_name}'")),
                action: "SecretUpdated".into(),
                secondary: Some(secret),
            },
            &obj.object_ref(&()),
        )
        .await
    }
}
