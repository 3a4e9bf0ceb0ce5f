//! Authentication hook
//!
//! A single injectable function decides, per client connection, which
//! application the client belongs to and which credential the realm should
//! use when it links to the mesh. The transport calls it exactly once, on
//! the first (`auth`) frame, before any peer exists.

use std::sync::Arc;

/// Outcome of a successful authentication
#[derive(Debug, Clone)]
pub struct AuthGrant {
    /// Application id the connection is admitted to; selects the realm
    pub app_id: String,
    /// Credential the realm presents when linking to the mesh
    pub credential: String,
}

/// Injectable authentication hook: public key in, grant or refusal out.
///
/// `None` refuses the connection; the transport must close it before any
/// peer is created.
pub type AuthHook = Arc<dyn Fn(&str) -> Option<AuthGrant> + Send + Sync>;

/// Hook that admits every client, echoing its public key as the app id
/// and granting a fixed mesh credential.
pub fn echo_auth_hook(credential: impl Into<String>) -> AuthHook {
    let credential = credential.into();
    Arc::new(move |public_key: &str| {
        Some(AuthGrant {
            app_id: public_key.to_string(),
            credential: credential.clone(),
        })
    })
}
