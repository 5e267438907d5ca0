/// Google Cloud Access Tokens
///
/// Turns a service account key file into a `gcloud-sdk` token source scoped
/// for the Cloud Platform APIs. REST clients only see [`AccessTokenSource`],
/// which yields a ready-made `Authorization` header value per request.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use gcloud_sdk::{GoogleAuthTokenGenerator, TokenSourceType};
use thiserror::Error;
use tracing::debug;

/// Full management scope for Google Cloud APIs.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Failure to turn a key file into a token source.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("service account info was not in the expected format: {0}")]
    Format(String),
}

/// Failure to obtain an access token.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to obtain access token: {0}")]
    Source(String),
}

/// Something that can authorize a Google API request.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// Value for the `Authorization` header, e.g. `Bearer ya29...`.
    async fn authorization(&self) -> Result<String, TokenError>;
}

/// Token source backed by a service account key.
pub struct ServiceAccountTokens {
    path: String,
    source: GoogleAuthTokenGenerator,
}

impl fmt::Debug for ServiceAccountTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountTokens")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountTokens {
    /// Read a key file and build a scoped token source from it. No token is
    /// requested until the first API call.
    pub async fn from_file(path: &Path, scopes: &[&str]) -> Result<Self, CredentialError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| CredentialError::Read {
                path: path.display().to_string(),
                source,
            })?;

        let source = GoogleAuthTokenGenerator::new(
            TokenSourceType::Json(contents),
            scopes.iter().map(|s| s.to_string()).collect(),
        )
        .await
        .map_err(|e| CredentialError::Format(e.to_string()))?;

        debug!("Loaded service account credentials from {}", path.display());

        Ok(Self {
            path: path.display().to_string(),
            source,
        })
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountTokens {
    async fn authorization(&self) -> Result<String, TokenError> {
        let token = self
            .source
            .create_token()
            .await
            .map_err(|e| TokenError::Source(e.to_string()))?;
        Ok(token.header_value())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const TEST_RSA_KEY: &str = include_str!("testdata/test_rsa_key.pem");

    pub(crate) fn key_json() -> String {
        serde_json::json!({
            "type": "service_account",
            "project_id": "demo-project",
            "private_key_id": "key-1",
            "private_key": TEST_RSA_KEY,
            "client_email": "mcp@demo-project.iam.gserviceaccount.com",
            "client_id": "1234567890",
            "token_uri": "https://oauth2.googleapis.com/token",
        })
        .to_string()
    }

    fn key_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let err = ServiceAccountTokens::from_file(
            Path::new("/definitely/not/here/credentials.json"),
            &[CLOUD_PLATFORM_SCOPE],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CredentialError::Read { .. }));
        assert!(err.to_string().contains("/definitely/not/here/credentials.json"));
    }

    #[tokio::test]
    async fn non_json_key_is_a_format_error() {
        let file = key_file("this is not a key file");
        let err = ServiceAccountTokens::from_file(file.path(), &[CLOUD_PLATFORM_SCOPE])
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::Format(_)));
    }

    #[tokio::test]
    async fn loads_service_account_key_without_network() {
        let file = key_file(&key_json());
        let tokens = ServiceAccountTokens::from_file(file.path(), &[CLOUD_PLATFORM_SCOPE])
            .await
            .unwrap();

        let debug = format!("{:?}", tokens);
        assert!(debug.contains("ServiceAccountTokens"));
        assert!(!debug.contains("PRIVATE KEY"));
    }
}
