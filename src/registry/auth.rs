use tracing::info;

use super::models::AuthToken;
use super::transport::Transport;
use crate::config::Credentials;
use crate::error::AuthError;
use crate::reference::ImageReference;

const GRANT_TYPE: &str = "password";

/// Exchanges account credentials for a pull-scoped bearer token.
///
/// The token is not cached or refreshed; a pull that outlives `expires_in`
/// fails on its next request.
pub fn authenticate(
    transport: &impl Transport,
    auth_url: &str,
    service: &str,
    reference: &ImageReference,
    credentials: &Credentials,
) -> Result<AuthToken, AuthError> {
    if !credentials.is_complete() {
        return Err(AuthError::MissingCredentials);
    }

    let scope = format!("repository:{}:pull", reference.repository());
    let form = [
        ("client_id", credentials.client_id.as_str()),
        ("service", service),
        ("grant_type", GRANT_TYPE),
        ("username", credentials.username.as_str()),
        ("password", credentials.password.as_str()),
        ("scope", scope.as_str()),
    ];

    let body = transport.post_form(auth_url, &form)?;
    let token: AuthToken = serde_json::from_slice(&body)?;
    if token.access_token.is_empty() {
        return Err(AuthError::EmptyToken);
    }

    info!(
        scope = %token.scope,
        expires_in = token.expires_in,
        issued_at = token.issued_at.as_deref().unwrap_or("-"),
        "Authentication completed"
    );
    Ok(token)
}
