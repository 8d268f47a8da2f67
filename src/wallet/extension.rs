//! HTTP client for an external signing extension
//!
//! Keys never enter this process: transactions are handed to the extension,
//! which asks its user to approve them and returns the signed or posted result.

use crate::error::{BridgeError, BridgeResult};

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[derive(Clone)]
pub struct SigningExtension {
    http: Client,
    base_url: String,
    chain: String,
}

impl SigningExtension {
    pub fn new(http: Client, base_url: &str, chain: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            chain: chain.into(),
        }
    }

    /// POST a JSON request to the extension
    pub async fn call<Req, Resp>(&self, path: &str, body: &Req) -> BridgeResult<Resp>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!("Signing extension request: {}", url);

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| BridgeError::Connection {
                chain: self.chain.clone(),
                message: format!("Signing extension unreachable: {}", e),
            })?;

        match response.status() {
            s if s.is_success() => Ok(response.json::<Resp>().await?),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => Err(BridgeError::Wallet(
                "Request rejected by the wallet user".to_string(),
            )),
            s => {
                let text = response.text().await.unwrap_or_default();
                Err(BridgeError::Wallet(format!(
                    "Signing extension returned {}: {}",
                    s, text
                )))
            }
        }
    }
}
