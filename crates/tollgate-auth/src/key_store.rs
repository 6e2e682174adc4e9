//! Verification key fetching and storage.
//!
//! The key store holds at most one verification key. A background loop
//! fetches it from the authority's public-key endpoint, retrying on a fixed
//! delay until it succeeds. Readers get an `Arc` snapshot and never wait on
//! the loop.

use std::fmt;
use std::future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::error::KeyFetchError;
use crate::AuthConfig;

/// Key document served by the authority.
#[derive(Debug, Deserialize)]
struct PublicKeyDocument {
    #[serde(rename = "publicKey")]
    public_key: String,
}

/// Key material together with the algorithm it verifies.
///
/// The decoding key is parsed once, when the key is built.
#[derive(Clone)]
pub struct VerificationKey {
    material: String,
    algorithm: Algorithm,
    decoding: DecodingKey,
}

impl VerificationKey {
    /// Build a key from PEM material (or a shared secret for `HS*`).
    ///
    /// # Errors
    ///
    /// Returns `KeyFetchError::Malformed` if the material cannot be parsed
    /// for `algorithm`.
    pub fn from_material(
        material: impl Into<String>,
        algorithm: Algorithm,
    ) -> Result<Self, KeyFetchError> {
        let material = material.into();
        let decoding = parse_material(&material, algorithm)
            .map_err(|e| KeyFetchError::Malformed(e.to_string()))?;

        Ok(Self {
            material,
            algorithm,
            decoding,
        })
    }

    /// The raw key material as served by the authority.
    #[must_use]
    pub fn material(&self) -> &str {
        &self.material
    }

    /// The algorithm tokens must be signed with.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub(crate) const fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("algorithm", &self.algorithm)
            .field("material_len", &self.material.len())
            .finish_non_exhaustive()
    }
}

fn parse_material(
    material: &str,
    algorithm: Algorithm,
) -> jsonwebtoken::errors::Result<DecodingKey> {
    let bytes = material.as_bytes();
    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            Ok(DecodingKey::from_secret(bytes))
        }
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(bytes),
        Algorithm::EdDSA => DecodingKey::from_ed_pem(bytes),
        _ => DecodingKey::from_rsa_pem(bytes),
    }
}

/// Holder of the current verification key.
pub struct KeyStore {
    config: AuthConfig,
    client: reqwest::Client,
    current: ArcSwapOption<VerificationKey>,
    refresh: Notify,
}

impl KeyStore {
    /// Create an empty key store.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: AuthConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self::with_client(client, config))
    }

    /// Create an empty key store with a custom reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: AuthConfig) -> Self {
        Self {
            config,
            client,
            current: ArcSwapOption::empty(),
            refresh: Notify::new(),
        }
    }

    /// Get the configuration this store fetches with.
    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// The latest installed key, if any. Never blocks.
    #[must_use]
    pub fn current_key(&self) -> Option<Arc<VerificationKey>> {
        self.current.load_full()
    }

    /// Replace the stored key wholesale.
    pub fn install(&self, key: VerificationKey) {
        self.current.store(Some(Arc::new(key)));
    }

    /// Wake the refresh loop so it re-fetches immediately.
    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    /// Fetch the key document and parse it, without installing it.
    ///
    /// # Errors
    ///
    /// Returns a classified `KeyFetchError` on network failure, non-2xx
    /// status, or an unparseable body or key.
    pub async fn fetch(&self) -> Result<VerificationKey, KeyFetchError> {
        let url = self.config.public_key_url();
        tracing::debug!(url = %url, "Fetching public key");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| KeyFetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeyFetchError::Status(status.as_u16()));
        }

        let document: PublicKeyDocument = response
            .json()
            .await
            .map_err(|e| KeyFetchError::Malformed(e.to_string()))?;

        VerificationKey::from_material(document.public_key, self.config.algorithm)
    }

    /// Fetch and install the key in one step.
    ///
    /// A failed fetch leaves any installed key in place.
    ///
    /// # Errors
    ///
    /// Returns the fetch error.
    pub async fn refresh_once(&self) -> Result<(), KeyFetchError> {
        let key = self.fetch().await?;
        self.install(key);
        tracing::info!(algorithm = ?self.config.algorithm, "Public key fetched successfully");
        Ok(())
    }

    /// Run the refresh loop until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// While no key is installed, failures are retried every
    /// `retry_delay_seconds`. Once a key is installed the loop only wakes on
    /// [`request_refresh`](Self::request_refresh) or, if configured, the
    /// periodic refresh interval.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let wait = match self.refresh_once().await {
                Ok(()) => self.config.refresh_interval(),
                Err(e) => {
                    let has_key = self.current_key().is_some();
                    tracing::warn!(
                        reason = e.reason(),
                        error = %e,
                        has_key,
                        retry_in_secs = self.config.retry_delay_seconds,
                        "Failed to fetch public key"
                    );
                    if has_key {
                        self.config.refresh_interval()
                    } else {
                        Some(self.config.retry_delay())
                    }
                }
            };

            tokio::select! {
                () = pause(wait) => {}
                () = self.refresh.notified() => {
                    tracing::debug!("Public key refresh requested");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Public key refresh loop stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn_refresh(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(shutdown))
    }
}

async fn pause(wait: Option<Duration>) {
    match wait {
        Some(duration) => tokio::time::sleep(duration).await,
        None => future::pending::<()>().await,
    }
}
