use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

pub const DEFAULT_REGISTRY_URL: &str = "https://registry-1.docker.io/v2";
pub const DEFAULT_AUTH_URL: &str = "https://auth.docker.io/token";
pub const DEFAULT_AUTH_SERVICE: &str = "registry.docker.io";
pub const DEFAULT_IMAGES_DIR: &str = "./images";

/// Where images come from and where they are unpacked.
#[derive(Args, Debug, Clone)]
pub struct RegistryConfig {
    /// Base URL of the registry v2 API
    #[arg(long, env = "TINYBOX_REGISTRY_URL", default_value = DEFAULT_REGISTRY_URL)]
    pub registry_url: String,

    /// Token endpoint used for the password grant
    #[arg(long, env = "TINYBOX_AUTH_URL", default_value = DEFAULT_AUTH_URL)]
    pub auth_url: String,

    /// Service name sent to the token endpoint
    #[arg(long, env = "TINYBOX_AUTH_SERVICE", default_value = DEFAULT_AUTH_SERVICE)]
    pub auth_service: String,

    /// Parent directory for extracted images, one subdirectory per pull
    #[arg(long, env = "TINYBOX_IMAGES_DIR", default_value = DEFAULT_IMAGES_DIR)]
    pub images_dir: PathBuf,

    /// Overall timeout for each HTTP request; unlimited when unset
    #[arg(long, env = "TINYBOX_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    #[command(flatten)]
    pub credentials: Credentials,
}

impl RegistryConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            auth_service: DEFAULT_AUTH_SERVICE.to_string(),
            images_dir: PathBuf::from(DEFAULT_IMAGES_DIR),
            timeout_secs: None,
            credentials: Credentials::default(),
        }
    }
}

/// Registry account used for the password grant.
#[derive(Args, Clone, Default)]
pub struct Credentials {
    /// OAuth client identifier
    #[arg(long, env = "CLIENT_ID", default_value = "")]
    pub client_id: String,

    /// Registry account name
    #[arg(long, env = "DOCKER_USERNAME", default_value = "")]
    pub username: String,

    /// Registry account password
    #[arg(long, env = "DOCKER_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,
}

impl Credentials {
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

// keeps the password out of logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
