use std::time::Duration;

use async_trait::async_trait;
use representations::ClientRepresentation;
use reqwest::{header, Response, Url};
use serde::Deserialize;
use tracing::trace;

use super::{AccessToken, AdminCredentials, Error, IdentityProvider, Result};

/// [`IdentityProvider`] backed by the Keycloak admin REST API.
#[derive(Debug, Clone)]
pub struct KeycloakAdmin {
    http: reqwest::Client,
    base: Url,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl KeycloakAdmin {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(url).map_err(|err| Error::InvalidUrl(format!("{url}: {err}")))?;
        if base.cannot_be_a_base() {
            return Err(Error::InvalidUrl(url.to_owned()));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { http, base })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }

    fn clients_url(&self, realm: &str, rest: &[&str]) -> Result<Url> {
        let mut segments = vec!["admin", "realms", realm, "clients"];
        segments.extend_from_slice(rest);

        self.url(&segments)
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(Error::Api { status, message })
}

fn id_from_location(location: &str) -> Option<String> {
    location
        .trim_end_matches('/')
        .rsplit_once('/')
        .map(|(_, id)| id)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
}

#[async_trait]
impl IdentityProvider for KeycloakAdmin {
    async fn authenticate(&self, credentials: &AdminCredentials) -> Result<AccessToken> {
        let url = self.url(&[
            "realms",
            credentials.realm.as_str(),
            "protocol",
            "openid-connect",
            "token",
        ])?;

        trace!(realm = %credentials.realm, "Requesting admin token");
        let response = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "password"),
                ("client_id", credentials.client_id.as_str()),
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await?;

        let token: TokenResponse = check(response).await?.json().await?;

        Ok(AccessToken::new(token.access_token))
    }

    async fn find_clients(
        &self,
        token: &AccessToken,
        realm: &str,
        client_id: &str,
    ) -> Result<Vec<ClientRepresentation>> {
        let url = self.clients_url(realm, &[])?;

        let response = self
            .http
            .get(url)
            .bearer_auth(token.as_str())
            .query(&[("clientId", client_id), ("search", "false")])
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    async fn create_client(
        &self,
        token: &AccessToken,
        realm: &str,
        client: &ClientRepresentation,
    ) -> Result<String> {
        let url = self.clients_url(realm, &[])?;

        let response = self
            .http
            .post(url)
            .bearer_auth(token.as_str())
            .json(client)
            .send()
            .await?;
        let response = check(response).await?;

        response
            .headers()
            .get(header::LOCATION)
            .and_then(|location| location.to_str().ok())
            .and_then(id_from_location)
            .ok_or(Error::MissingLocation)
    }

    async fn get_client(
        &self,
        token: &AccessToken,
        realm: &str,
        id: &str,
    ) -> Result<ClientRepresentation> {
        let url = self.clients_url(realm, &[id])?;

        let response = self
            .http
            .get(url)
            .bearer_auth(token.as_str())
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    async fn update_client(
        &self,
        token: &AccessToken,
        realm: &str,
        client: &ClientRepresentation,
    ) -> Result<()> {
        let id = client.id.as_deref().ok_or(Error::MissingId)?;
        let url = self.clients_url(realm, &[id])?;

        let response = self
            .http
            .put(url)
            .bearer_auth(token.as_str())
            .json(client)
            .send()
            .await?;
        check(response).await?;

        Ok(())
    }

    async fn delete_client(&self, token: &AccessToken, realm: &str, id: &str) -> Result<()> {
        let url = self.clients_url(realm, &[id])?;

        let response = self
            .http
            .delete(url)
            .bearer_auth(token.as_str())
            .send()
            .await?;
        check(response).await?;

        Ok(())
    }
}
