//! REST client for the wallet daemon's address and subscription interface.

use bitvoice_engine::{WalletBackend, WalletError};
use log::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const WALLET_REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RestWalletBackend {
    base_url: String,
    client: Client,
}

impl RestWalletBackend {
    pub fn new(base_url: &str) -> Result<Self, WalletError> {
        let client = Client::builder()
            .timeout(WALLET_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WalletError::Unreachable(e.to_string()))?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), client })
    }
}

#[derive(Debug, Deserialize)]
struct AddressResponse {
    address: String,
}

#[derive(Debug, Serialize)]
struct WatchRequest<'a> {
    address: &'a str,
}

impl WalletBackend for RestWalletBackend {
    async fn new_address(&self) -> Result<String, WalletError> {
        let url = format!("{}/addresses", self.base_url);
        trace!("👛️ Requesting a new receiving address");
        let response = self.client.post(&url).send().await.map_err(|e| WalletError::Unreachable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(WalletError::Rejected(format!("HTTP {} from {url}", response.status())));
        }
        let body = response.json::<AddressResponse>().await.map_err(|e| WalletError::Rejected(e.to_string()))?;
        Ok(body.address)
    }

    async fn watch_address(&self, address: &str) -> Result<(), WalletError> {
        let url = format!("{}/watch", self.base_url);
        trace!("👛️ Subscribing the wallet observer to {address}");
        let response = self
            .client
            .post(&url)
            .json(&WatchRequest { address })
            .send()
            .await
            .map_err(|e| WalletError::Unreachable(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(WalletError::Rejected(format!("HTTP {} from {url}", response.status())))
        }
    }
}
