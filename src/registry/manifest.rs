use std::io::Read;

use tracing::{debug, info, warn};

use super::PullSession;
use super::models::{
    DOCKER_MANIFEST, DOCKER_MANIFEST_LIST, Descriptor, LayerManifest, ManifestDocument,
    ManifestList, OCI_INDEX, OCI_MANIFEST,
};
use super::transport::Transport;
use crate::error::ResolveError;
use crate::platform::HostPlatform;

/// Accept header for a single-platform manifest.
fn manifest_accept() -> String {
    [DOCKER_MANIFEST, OCI_MANIFEST].join(", ")
}

/// Accept header when a manifest list may come back.
fn list_accept() -> String {
    [DOCKER_MANIFEST_LIST, OCI_INDEX, DOCKER_MANIFEST, OCI_MANIFEST].join(", ")
}

/// Finds the first list entry built for `host`.
pub fn select_platform<'a>(list: &'a ManifestList, host: &HostPlatform) -> Option<&'a Descriptor> {
    list.manifests.iter().find(|m| {
        m.platform
            .as_ref()
            .is_some_and(|p| p.architecture == host.architecture && p.os == host.os)
    })
}

fn fetch_document(
    transport: &impl Transport,
    session: &PullSession,
    tag_or_digest: &str,
    accept: &str,
) -> Result<Vec<u8>, ResolveError> {
    let url = session.manifest_url(tag_or_digest);
    let mut body = Vec::new();
    transport
        .get(&url, session.token(), Some(accept))?
        .read_to_end(&mut body)
        .map_err(|source| ResolveError::Read {
            reference: tag_or_digest.to_string(),
            source,
        })?;
    Ok(body)
}

fn decode<T: serde::de::DeserializeOwned>(
    body: &[u8],
    tag_or_digest: &str,
) -> Result<T, ResolveError> {
    serde_json::from_slice(body).map_err(|source| ResolveError::Decode {
        reference: tag_or_digest.to_string(),
        source,
    })
}

/// Resolves the session's reference to a single-platform manifest.
///
/// Images in the default namespace may be multi-platform: the tag is fetched
/// first and, if it names a manifest list, the entry for `host` is chosen.
/// When no entry matches, the tag itself is fetched as a plain manifest.
pub fn resolve_manifest(
    transport: &impl Transport,
    session: &PullSession,
    host: &HostPlatform,
) -> Result<LayerManifest, ResolveError> {
    let tag = session.reference().tag.as_str();
    let mut target = (tag.to_string(), manifest_accept());

    if session.reference().is_library() {
        let body = fetch_document(transport, session, tag, &list_accept())?;
        match decode::<ManifestDocument>(&body, tag)? {
            ManifestDocument::Manifest(manifest) => {
                debug!(tag, "Tag resolved directly to a manifest");
                return Ok(log_manifest(manifest));
            }
            ManifestDocument::List(list) => {
                debug!(
                    schema = list.schema_version,
                    media_type = %list.media_type,
                    entries = list.manifests.len(),
                    "Tag resolved to a manifest list"
                );
                match select_platform(&list, host) {
                    Some(entry) => {
                        let variant = entry.platform.as_ref().and_then(|p| p.variant.as_deref());
                        debug!(
                            digest = %entry.digest,
                            os = %host.os,
                            arch = %host.architecture,
                            variant = variant.unwrap_or("-"),
                            "Selected platform manifest"
                        );
                        let accept = if entry.media_type.is_empty() {
                            manifest_accept()
                        } else {
                            entry.media_type.clone()
                        };
                        target = (entry.digest.clone(), accept);
                    }
                    None => warn!(
                        os = %host.os,
                        arch = %host.architecture,
                        "No manifest for host platform, falling back to tag {}",
                        tag
                    ),
                }
            }
        }
    }

    let (tag_or_digest, accept) = target;
    let body = fetch_document(transport, session, &tag_or_digest, &accept)?;
    let manifest: LayerManifest = decode(&body, &tag_or_digest)?;
    Ok(log_manifest(manifest))
}

fn log_manifest(manifest: LayerManifest) -> LayerManifest {
    info!(
        schema = manifest.schema_version,
        media_type = %manifest.media_type,
        layers = manifest.layers.len(),
        "Manifest pulled"
    );
    manifest
}
