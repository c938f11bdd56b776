//! Credential material for one storage account.

use crate::error::{Error, Result};

/// What the client needs before it can authenticate: the auth endpoint
/// and the user/key pair. Resolved into a storage URL and token by the
/// first protocol call of a session.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// URL for obtaining an auth token.
    pub auth_url: String,
    /// User name to authenticate as.
    pub user: String,
    /// Key or password to authenticate with.
    pub key: String,
    /// Use the service-net internal network: the returned storage
    /// endpoint's host gets a `snet-` prefix before reuse.
    pub snet: bool,
}

impl Credentials {
    pub fn new(
        auth_url: impl Into<String>,
        user: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            auth_url: auth_url.into(),
            user: user.into(),
            key: key.into(),
            snet: false,
        }
    }

    pub fn with_snet(mut self, snet: bool) -> Self {
        self.snet = snet;
        self
    }

    /// Builds credentials from optional sources, failing when any part
    /// is missing.
    pub fn resolve(
        auth_url: Option<String>,
        user: Option<String>,
        key: Option<String>,
        snet: bool,
    ) -> Result<Self> {
        match (auth_url, user, key) {
            (Some(auth_url), Some(user), Some(key)) => Ok(Self {
                auth_url,
                user,
                key,
                snet,
            }),
            _ => Err(Error::Config(
                "requires ST_AUTH, ST_USER, and ST_KEY environment variables \
                 be set or overridden with -A, -U, or -K"
                    .to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_requires_all_parts() {
        let ok = Credentials::resolve(
            Some("https://auth.example.com/v1.0".to_string()),
            Some("tester".to_string()),
            Some("secret".to_string()),
            true,
        )
        .unwrap();
        assert_eq!(ok.user, "tester");
        assert!(ok.snet);

        let missing = Credentials::resolve(None, Some("tester".to_string()), None, false);
        assert!(matches!(missing, Err(Error::Config(_))));
    }
}
