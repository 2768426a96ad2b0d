use std::{env, sync::Arc, time::Duration};

use anyhow::Context as _;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use keycloak_client_controller::{
    context::Context,
    keycloak::KeycloakConfig,
    resources::{error_policy, reconcile, Client},
};
use kube::{runtime::Controller, Api, Client as KubeClient};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

const CONTROLLER_NAME: &str = "keycloak.pewty.fr";

fn resync_interval() -> anyhow::Result<Duration> {
    let seconds = match env::var("CONTROLLER_RESYNC_SECONDS") {
        Ok(value) => value
            .parse()
            .with_context(|| format!("Invalid CONTROLLER_RESYNC_SECONDS: {value}"))?,
        Err(_) => 3600,
    };

    Ok(Duration::from_secs(seconds))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logger = tracing_subscriber::fmt::layer().json();
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    Registry::default().with(logger).with(env_filter).init();

    info!("Starting controller");

    let client = KubeClient::try_default().await?;

    let data = Context::new(
        CONTROLLER_NAME,
        client.clone(),
        KeycloakConfig::try_from_env()?,
        resync_interval()?,
    )?;

    let clients = Api::<Client>::all(client.clone());
    let secrets = Api::<Secret>::all(client.clone());

    Controller::new(clients, Default::default())
        .owns(secrets, Default::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, Arc::new(data))
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("reconciled {:?}", obj.0.name),
                Err(err) => warn!("reconcile failed: {}", err),
            }
        })
        .await;

    Ok(())
}
