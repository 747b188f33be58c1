use crate::error::{ServiceError, ServiceResult};
use secrecy::{ExposeSecret, SecretString};

/// Environment variable holding an API key.
pub const API_KEY_ENV: &str = "AZURE_AI_FOUNDRY_API_KEY";

/// Environment variable holding a pre-acquired Entra ID access token.
pub const TOKEN_ENV: &str = "AZURE_AI_FOUNDRY_TOKEN";

/// Credential types accepted by [`ServiceClient`](crate::client::ServiceClient).
#[derive(Clone)]
pub enum ServiceCredential {
    /// API key authentication.
    ApiKey(SecretString),

    /// A bearer token acquired out of band (e.g. `az account get-access-token`).
    AccessToken(SecretString),

    /// Microsoft Entra ID token read from `AZURE_AI_FOUNDRY_TOKEN` on every request.
    EntraId,
}

impl ServiceCredential {
    /// Create a credential from `AZURE_AI_FOUNDRY_API_KEY`.
    /// Falls back to Entra ID if the variable is unset or empty.
    pub fn from_env() -> ServiceResult<Self> {
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.is_empty() => Ok(Self::ApiKey(SecretString::from(key))),
            _ => Ok(Self::EntraId),
        }
    }

    /// Create an API key credential.
    pub fn api_key(key: impl Into<String>) -> Self {
        Self::ApiKey(SecretString::from(key.into()))
    }

    /// Create a credential from an already acquired access token.
    pub fn access_token(token: impl Into<String>) -> Self {
        Self::AccessToken(SecretString::from(token.into()))
    }

    /// Create an Entra ID credential.
    pub fn entra_id() -> Self {
        Self::EntraId
    }

    /// Resolve the credential to an `Authorization` header value.
    pub async fn resolve(&self) -> ServiceResult<String> {
        match self {
            Self::ApiKey(secret) | Self::AccessToken(secret) => {
                Ok(format!("Bearer {}", secret.expose_secret()))
            }
            Self::EntraId => {
                let token = std::env::var(TOKEN_ENV)
                    .ok()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| {
                        ServiceError::Auth(format!(
                            "no credential available. Set {API_KEY_ENV} or {TOKEN_ENV}."
                        ))
                    })?;
                Ok(format!("Bearer {}", token))
            }
        }
    }
}

impl std::fmt::Debug for ServiceCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => write!(f, "ServiceCredential::ApiKey(****)"),
            Self::AccessToken(_) => write!(f, "ServiceCredential::AccessToken(****)"),
            Self::EntraId => write!(f, "ServiceCredential::EntraId"),
        }
    }
}
