use super::types::{Credential, LoginRequest, LoginResponse};
use super::CredentialProvider;
use crate::error::CredentialError;
use async_trait::async_trait;
use reqwest::Client;

pub struct CatalogAuth {
    client: Client,
    auth_url: String,
}

impl CatalogAuth {
    pub fn new(client: Client, auth_url: &str) -> Self {
        Self {
            client,
            auth_url: auth_url.to_string(),
        }
    }
}

#[async_trait]
impl CredentialProvider for CatalogAuth {
    async fn login(&self, account: &str, password: &str) -> Result<Credential, CredentialError> {
        let resp = self
            .client
            .post(&self.auth_url)
            .json(&LoginRequest { name: account, password })
            .send()
            .await
            .map_err(CredentialError::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CredentialError::Rejected { status, body });
        }

        let bytes = resp.bytes().await.map_err(CredentialError::Transport)?;
        parse_login_response(&bytes)
    }
}

fn parse_login_response(body: &[u8]) -> Result<Credential, CredentialError> {
    let parsed: LoginResponse = serde_json::from_slice(body).map_err(CredentialError::Decode)?;
    match parsed.token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => Ok(Credential::from_token(token)),
        _ => Err(CredentialError::MissingToken),
    }
}
