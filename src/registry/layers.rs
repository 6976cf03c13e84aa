use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::info;
use uuid::Uuid;

use super::PullSession;
use super::extract::{create_dir_all, extract_layer};
use super::models::LayerManifest;
use super::transport::Transport;
use crate::error::FetchError;

/// Downloads every layer of `manifest`, in order, into a fresh directory under
/// `images_dir` and returns its absolute path.
///
/// Layers are applied one at a time so later layers overwrite earlier ones.
/// A failure leaves the directory partially populated.
pub fn fetch_and_extract_layers(
    transport: &impl Transport,
    session: &PullSession,
    manifest: &LayerManifest,
    images_dir: &Path,
) -> Result<PathBuf, FetchError> {
    let dir = images_dir.join(Uuid::new_v4().to_string());
    create_dir_all(&dir).map_err(|source| FetchError::Io {
        path: dir.clone(),
        source,
    })?;
    let rootfs = dir.canonicalize().map_err(|source| FetchError::Io {
        path: dir.clone(),
        source,
    })?;

    let total = manifest.layers.len();
    for (idx, layer) in manifest.layers.iter().enumerate() {
        let blob = transport.get(&session.blob_url(&layer.digest), session.token(), None)?;
        info!(size = layer.size, "Fetched layer - {} ({}/{})", layer.digest, idx + 1, total);

        extract_layer(&rootfs, &layer.digest, GzDecoder::new(blob))?;
        info!("Extracted layer - {} ({}/{})", layer.digest, idx + 1, total);
    }

    info!(rootfs = %rootfs.display(), "Layer fetching completed");
    Ok(rootfs)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::fs;
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::TempDir;

    use super::*;
    use crate::registry::extract::tests::{Entry, tar_bytes};
    use crate::registry::models::{AuthToken, Descriptor};
    use crate::registry::transport::fake::FakeTransport;

    pub(crate) const REGISTRY: &str = "https://registry.test/v2";

    pub(crate) fn gzip_layer(entries: &[Entry]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes(entries)).unwrap();
        encoder.finish().unwrap()
    }

    fn descriptor(digest: &str) -> Descriptor {
        Descriptor {
            digest: digest.into(),
            media_type: "application/vnd.docker.image.rootfs.diff.tar.gzip".into(),
            size: 0,
            platform: None,
        }
    }

    fn session() -> PullSession {
        let token = AuthToken {
            access_token: "tok".into(),
            scope: String::new(),
            expires_in: 300,
            issued_at: None,
        };
        PullSession::new("alpine".parse().unwrap(), token, REGISTRY)
    }

    fn manifest(layers: &[&str]) -> LayerManifest {
        LayerManifest {
            schema_version: 2,
            media_type: String::new(),
            config: descriptor("sha256:config"),
            layers: layers.iter().map(|d| descriptor(d)).collect(),
        }
    }

    #[test]
    fn test_later_layers_overwrite_earlier_ones() {
        let mut transport = FakeTransport::default();
        transport
            .respond(
                format!("{REGISTRY}/library/alpine/blobs/sha256:a"),
                gzip_layer(&[Entry::File("f", b"1"), Entry::File("only-a", b"a")]),
            )
            .respond(
                format!("{REGISTRY}/library/alpine/blobs/sha256:b"),
                gzip_layer(&[Entry::File("f", b"2")]),
            );
        let images = TempDir::new().unwrap();

        let rootfs = fetch_and_extract_layers(
            &transport,
            &session(),
            &manifest(&["sha256:a", "sha256:b"]),
            images.path(),
        )
        .unwrap();

        assert!(rootfs.is_absolute());
        assert!(rootfs.starts_with(images.path().canonicalize().unwrap()));
        assert_eq!(fs::read_to_string(rootfs.join("f")).unwrap(), "2");
        assert_eq!(fs::read_to_string(rootfs.join("only-a")).unwrap(), "a");
        assert_eq!(
            transport.requested_urls(),
            [
                format!("{REGISTRY}/library/alpine/blobs/sha256:a"),
                format!("{REGISTRY}/library/alpine/blobs/sha256:b"),
            ]
        );
    }

    #[test]
    fn test_each_pull_gets_a_fresh_directory() {
        let transport = FakeTransport::default();
        let images = TempDir::new().unwrap();

        let first = fetch_and_extract_layers(&transport, &session(), &manifest(&[]), images.path()).unwrap();
        let second = fetch_and_extract_layers(&transport, &session(), &manifest(&[]), images.path()).unwrap();
        assert_ne!(first, second);
        assert!(first.is_dir() && second.is_dir());
    }

    #[test]
    fn test_stops_at_first_failing_layer() {
        let mut transport = FakeTransport::default();
        transport
            .respond(
                format!("{REGISTRY}/library/alpine/blobs/sha256:a"),
                gzip_layer(&[Entry::File("a", b"1")]),
            )
            .respond(format!("{REGISTRY}/library/alpine/blobs/sha256:bad"), b"not gzip".to_vec())
            .respond(
                format!("{REGISTRY}/library/alpine/blobs/sha256:c"),
                gzip_layer(&[Entry::File("c", b"1")]),
            );
        let images = TempDir::new().unwrap();

        let result = fetch_and_extract_layers(
            &transport,
            &session(),
            &manifest(&["sha256:a", "sha256:bad", "sha256:c"]),
            images.path(),
        );
        assert!(matches!(result, Err(FetchError::Layer { ref digest, .. }) if digest == "sha256:bad"));
        assert_eq!(transport.requested_urls().len(), 2);
    }

    #[test]
    fn test_missing_blob() {
        let transport = FakeTransport::default();
        let images = TempDir::new().unwrap();
        let result =
            fetch_and_extract_layers(&transport, &session(), &manifest(&["sha256:gone"]), images.path());
        assert!(matches!(result, Err(FetchError::Transport(_))));
    }
}
