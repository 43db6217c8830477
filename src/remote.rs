//! typed client for the vault control api
//!
//! thin wrapper over five endpoints: init, unseal, and the generate-root
//! attempt/update/cancel ceremony. all calls are blocking round-trips with a
//! bounded timeout; the coordinator decides what to retry.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// request timeout so a dead vault cannot stall an operation forever
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// the remote sealed-system surface the coordinator drives.
///
/// the production implementation is [`HttpSealedClient`]; tests script this
/// trait directly.
pub trait SealedApi {
    /// initialize the vault. destructive, never retried automatically.
    /// threshold equals share count: every share is required to unseal.
    fn init(&mut self, key_shares: u32) -> Result<InitResponse>;

    /// submit one unseal share. `sealed == false` in the response means
    /// quorum was reached and the vault is open.
    fn submit_unseal_share(&mut self, share: &str) -> Result<UnsealStatus>;

    /// start a root token generation attempt
    fn begin_root_generation(&mut self) -> Result<AttemptResponse>;

    /// submit one share towards the active attempt
    fn submit_root_share(&mut self, share: &str, nonce: &str) -> Result<UpdateResponse>;

    /// abandon the active attempt so future attempts are not blocked
    fn cancel_root_generation(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct InitRequest {
    pub secret_shares: u32,
    pub secret_threshold: u32,
    pub stored_shares: u32,
    pub recovery_shares: u32,
    pub recovery_threshold: u32,
}

impl InitRequest {
    /// all fields equal: no threshold slack in this design
    pub fn all_equal(key_shares: u32) -> Self {
        Self {
            secret_shares: key_shares,
            secret_threshold: key_shares,
            stored_shares: key_shares,
            recovery_shares: key_shares,
            recovery_threshold: key_shares,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitResponse {
    pub keys: Vec<String>,
    pub root_token: String,
}

#[derive(Debug, Clone, Serialize)]
struct UnsealRequest<'a> {
    key: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnsealStatus {
    pub sealed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttemptResponse {
    pub nonce: String,
    pub otp: String,
}

#[derive(Debug, Clone, Serialize)]
struct UpdateRequest<'a> {
    key: &'a str,
    nonce: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateResponse {
    pub complete: bool,
    #[serde(default)]
    pub encoded_root_token: Option<String>,
}

/// http client for a live vault
pub struct HttpSealedClient {
    address: String,
    http: reqwest::blocking::Client,
}

impl HttpSealedClient {
    pub fn new(address: &str) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Remote(e.to_string()))?;
        Ok(Self {
            address: address.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn put_json<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let mut req = self
            .http
            .put(format!("{}{}", self.address, path))
            .header("X-Vault-Request", "true");
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().map_err(|e| Error::Remote(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(Error::Remote(format!("{path} returned {status}: {text}")));
        }
        resp.json().map_err(|e| Error::Remote(e.to_string()))
    }
}

impl SealedApi for HttpSealedClient {
    fn init(&mut self, key_shares: u32) -> Result<InitResponse> {
        self.put_json("/v1/sys/init", Some(&InitRequest::all_equal(key_shares)))
    }

    fn submit_unseal_share(&mut self, share: &str) -> Result<UnsealStatus> {
        self.put_json("/v1/sys/unseal", Some(&UnsealRequest { key: share }))
    }

    fn begin_root_generation(&mut self) -> Result<AttemptResponse> {
        self.put_json::<(), _>("/v1/sys/generate-root/attempt", None)
    }

    fn submit_root_share(&mut self, share: &str, nonce: &str) -> Result<UpdateResponse> {
        self.put_json(
            "/v1/sys/generate-root/update",
            Some(&UpdateRequest { key: share, nonce }),
        )
    }

    fn cancel_root_generation(&mut self) -> Result<()> {
        let resp = self
            .http
            .delete(format!("{}/v1/sys/generate-root/attempt", self.address))
            .header("X-Vault-Request", "true")
            .send()
            .map_err(|e| Error::Remote(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::Remote(format!(
                "cancel returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
