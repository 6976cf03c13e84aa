//! Pulls an image from a registry v2 API into a rootfs directory.
//!
//! `RegistryClient::pull` runs the stages in order and stops at the first
//! failure: parse, authenticate, resolve the manifest, fetch and extract the
//! layers, then fetch the image config. Nothing is retried.

mod auth;
mod extract;
mod layers;
mod manifest;
pub mod models;
pub mod transport;

use std::path::PathBuf;

use tracing::info;

pub use auth::authenticate;
pub use layers::fetch_and_extract_layers;
pub use manifest::resolve_manifest;
use models::{AuthToken, ConfigBlob, ImageConfig, LayerManifest};
use transport::{HttpTransport, Transport};

use crate::config::RegistryConfig;
use crate::error::{FetchError, PullError, TransportError};
use crate::platform::HostPlatform;
use crate::reference::ImageReference;

/// State for one pull: the reference being pulled and the token that
/// authorises every request made for it.
#[derive(Debug)]
pub struct PullSession {
    reference: ImageReference,
    token: AuthToken,
    registry_url: String,
}

impl PullSession {
    pub fn new(reference: ImageReference, token: AuthToken, registry_url: &str) -> Self {
        Self {
            reference,
            token,
            registry_url: registry_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn reference(&self) -> &ImageReference {
        &self.reference
    }

    pub fn token(&self) -> &str {
        &self.token.access_token
    }

    pub fn manifest_url(&self, tag_or_digest: &str) -> String {
        format!(
            "{}/{}/manifests/{}",
            self.registry_url,
            self.reference.repository(),
            tag_or_digest
        )
    }

    pub fn blob_url(&self, digest: &str) -> String {
        format!(
            "{}/{}/blobs/{}",
            self.registry_url,
            self.reference.repository(),
            digest
        )
    }
}

/// A pulled image: where its filesystem is and how it wants to be run.
#[derive(Debug)]
pub struct PulledImage {
    pub rootfs: PathBuf,
    pub config: ImageConfig,
}

pub struct RegistryClient<T = HttpTransport> {
    transport: T,
    config: RegistryConfig,
    host: HostPlatform,
}

impl RegistryClient<HttpTransport> {
    pub fn new(config: RegistryConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(config.timeout())?;
        Ok(Self::with_transport(transport, config, HostPlatform::detect()))
    }
}

impl<T: Transport> RegistryClient<T> {
    pub fn with_transport(transport: T, config: RegistryConfig, host: HostPlatform) -> Self {
        Self {
            transport,
            config,
            host,
        }
    }

    pub fn pull(&self, image: &str) -> Result<PulledImage, PullError> {
        let reference: ImageReference = image.parse()?;
        info!(reference = %reference, "Image details parsed");

        let token = authenticate(
            &self.transport,
            &self.config.auth_url,
            &self.config.auth_service,
            &reference,
            &self.config.credentials,
        )?;
        let session = PullSession::new(reference, token, &self.config.registry_url);

        let manifest = resolve_manifest(&self.transport, &session, &self.host)?;
        let rootfs =
            fetch_and_extract_layers(&self.transport, &session, &manifest, &self.config.images_dir)?;
        let config = self.fetch_image_config(&session, &manifest)?;

        Ok(PulledImage { rootfs, config })
    }

    /// Downloads the config blob named by `manifest` and extracts its runtime settings.
    pub fn fetch_image_config(
        &self,
        session: &PullSession,
        manifest: &LayerManifest,
    ) -> Result<ImageConfig, FetchError> {
        let digest = &manifest.config.digest;
        let body = self
            .transport
            .get(&session.blob_url(digest), session.token(), None)?;
        let blob: ConfigBlob =
            serde_json::from_reader(body).map_err(|source| FetchError::Config {
                digest: digest.clone(),
                source,
            })?;

        info!(
            env = blob.config.env.len(),
            cmd = ?blob.config.cmd,
            working_dir = %blob.config.working_dir,
            "Image config pulled"
        );
        Ok(blob.config)
    }
}
