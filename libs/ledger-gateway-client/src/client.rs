use std::fmt::Debug;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::result::{Error, Result};

/// Chaincode method that records the folded public keys.
pub const PUT_FOLDED_PUBLIC_KEYS_METHOD: &str = "KVContractGo:PutFoldedPublicKeys";

/// Chaincode method that records a single vote under a key.
pub const PUT_VOTE_METHOD: &str = "KVContractGo:PutVote";

/// Administrative identity exchanged for a bearer token on every call.
#[derive(Clone)]
pub struct Credentials {
    pub id: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// A client for the ledger gateway.
///
/// Tokens are never cached: each ledger operation enrolls first and uses the
/// fresh token for exactly one invocation. Nothing is retried.
#[derive(Clone)]
pub struct Client {
    base_url: Url,
    channel: String,
    contract: String,
    credentials: Credentials,
    http: reqwest::Client,
}

impl Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("channel", &self.channel)
            .field("contract", &self.contract)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl Client {
    /// Create a new client for the gateway at `base_url`, invoking
    /// `contract` on `channel`.
    ///
    /// # Example
    ///
    /// ```
    /// # use ledger_gateway_client::{Client, Credentials};
    /// let base_url = "http://localhost:8801".parse().unwrap();
    /// let client = Client::new(
    ///     base_url,
    ///     "vote-channel",
    ///     "SentinelVote",
    ///     Credentials::new("admin", "adminpw"),
    /// );
    /// ```
    pub fn new(
        base_url: Url,
        channel: impl Into<String>,
        contract: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            base_url,
            channel: channel.into(),
            contract: contract.into(),
            credentials,
            http: reqwest::Client::new(),
        }
    }

    /// Create a new client for a gateway running on localhost with the
    /// development credentials.
    pub fn localhost() -> Self {
        Self::new(
            "http://localhost:8801"
                .parse()
                .expect("hardcoded URL is valid"),
            "vote-channel",
            "SentinelVote",
            Credentials::new("admin", "adminpw"),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Exchange the administrative credentials for a bearer token.
    pub async fn enroll(&self) -> Result<String> {
        let request = EnrollRequest {
            id: self.credentials.id.clone(),
            secret: self.credentials.secret.clone(),
        };
        let response = self
            .http
            .post(self.base_url.join("/user/enroll")?)
            .json(&request)
            .send()
            .await?;

        let status_code = response.status();
        let text = response.text().await?;

        if !status_code.is_success() {
            return Err(Error::Http {
                status_code,
                text,
                context: format!("failed to enroll as {:?}", self.credentials.id),
            });
        }

        let EnrollResponse { token } = serde_json::from_str(&text)?;
        if token.is_empty() {
            return Err(Error::Authentication(
                "gateway returned an empty token".to_owned(),
            ));
        }

        Ok(token)
    }

    /// Invoke `method` with positional `args`, authenticated by a freshly
    /// enrolled token. Returns the gateway's response body.
    pub async fn invoke(&self, method: &str, args: Vec<String>) -> Result<String> {
        let token = self.enroll().await?;
        let url = self
            .base_url
            .join(&format!("/invoke/{}/{}", self.channel, self.contract))?;

        tracing::debug!("Invoking {method} with {} argument(s)", args.len());

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&InvokeRequest {
                method: method.to_owned(),
                args,
            })
            .send()
            .await?;

        let status_code = response.status();
        let text = response.text().await?;

        if !status_code.is_success() {
            return Err(Error::Http {
                status_code,
                text,
                context: format!("failed to invoke {method}"),
            });
        }

        Ok(text)
    }

    /// Record the folded public keys on the ledger.
    pub async fn put_folded_public_keys(&self, folded_public_keys: &str) -> Result<()> {
        self.invoke(
            PUT_FOLDED_PUBLIC_KEYS_METHOD,
            vec![folded_public_keys.to_owned()],
        )
        .await?;
        Ok(())
    }

    /// Record a vote on the ledger. `payload` is stored as-is.
    pub async fn put_vote(&self, key: &str, payload: &str) -> Result<()> {
        self.invoke(PUT_VOTE_METHOD, vec![key.to_owned(), payload.to_owned()])
            .await?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnrollRequest {
    pub id: String,
    pub secret: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnrollResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvokeRequest {
    pub method: String,
    pub args: Vec<String>,
}
