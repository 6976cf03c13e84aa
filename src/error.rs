//! Error types for each stage of the pull-and-launch pipeline.
//!
//! Component errors are typed; `main` is the only place that turns them into
//! an exit code.

use std::path::PathBuf;

/// Malformed or empty image reference.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("image reference is empty")]
    Empty,

    #[error("invalid {component} '{value}' in image reference '{reference}'")]
    InvalidComponent {
        reference: String,
        component: &'static str,
        value: String,
    },
}

/// Failure talking to the registry or the token endpoint.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },

    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("username and password are required to authenticate")]
    MissingCredentials,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to decode token response")]
    Decode(#[from] serde_json::Error),

    #[error("token endpoint returned an empty access token")]
    EmptyToken,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to read manifest response for {reference}")]
    Read {
        reference: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode manifest for {reference}")]
    Decode {
        reference: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to prepare {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to unpack layer {digest}")]
    Layer {
        digest: String,
        #[source]
        source: std::io::Error,
    },

    #[error("layer entry escapes the rootfs: {path:?}")]
    UnsafePath { path: PathBuf },

    #[error("failed to decode image config {digest}")]
    Config {
        digest: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Any failure of `RegistryClient::pull`, surfaced verbatim from its stage.
#[derive(Debug, thiserror::Error)]
pub enum PullError {
    #[error("invalid image reference")]
    Parse(#[from] ParseError),

    #[error("authentication failed")]
    Auth(#[from] AuthError),

    #[error("manifest resolution failed")]
    Resolve(#[from] ResolveError),

    #[error("layer fetch failed")]
    Fetch(#[from] FetchError),
}

/// Malformed bootstrap frame.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("bootstrap frame is missing the {0}")]
    Missing(&'static str),

    #[error("unsupported bootstrap frame version '{0}'")]
    UnsupportedVersion(String),

    #[error("invalid environment count '{0}'")]
    InvalidCount(String),

    #[error("bootstrap frame declares {declared} environment entries but only {available} arguments remain")]
    Truncated { declared: usize, available: usize },

    #[error("bootstrap argument {0} is not valid UTF-8")]
    NotUnicode(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("argument contains an interior NUL byte")]
    Argument(#[from] std::ffi::NulError),

    #[error("failed to create synchronisation pipe")]
    Pipe(#[source] nix::Error),

    #[error("failed to clone namespaced child")]
    Clone(#[source] nix::Error),

    #[error("failed to write {path:?}")]
    IdMap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to release child")]
    Release(#[source] std::io::Error),

    #[error("failed to wait for child")]
    Wait(#[source] nix::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to set hostname")]
    Hostname(#[source] nix::Error),

    #[error("failed to change root to {path:?}")]
    ChangeRoot {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("failed to create {path:?}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to mount procfs")]
    Mount(#[source] nix::Error),

    #[error("failed to unshare mount and pid namespaces")]
    Unshare(#[source] nix::Error),

    #[error("failed to run {command}")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to unmount procfs")]
    Unmount(#[source] nix::Error),
}
