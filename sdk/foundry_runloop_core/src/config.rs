//! Environment-driven configuration.
//!
//! Mirrors the variables the Agent Service quickstarts read, so an existing
//! `.env` for those samples works unchanged.

use crate::auth::ServiceCredential;
use crate::client::{ServiceClient, ENDPOINT_ENV};
use crate::error::{ServiceError, ServiceResult};

/// Project endpoint, e.g. `https://<resource>.services.ai.azure.com/api/projects/<project>`.
pub const PROJECT_ENDPOINT_ENV: &str = "PROJECT_ENDPOINT";
/// Legacy resource endpoint, used when `PROJECT_ENDPOINT` is unset.
pub const AZURE_ENDPOINT_ENV: &str = "AZURE_ENDPOINT";
pub const MODEL_ENV: &str = "MODEL_DEPLOYMENT_NAME";
pub const AGENT_NAME_ENV: &str = "AGENT_NAME";
pub const AGENT_INSTRUCTIONS_ENV: &str = "AGENT_INSTRUCTIONS";

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_AGENT_NAME: &str = "runloop-agent";
pub const DEFAULT_AGENT_INSTRUCTIONS: &str =
    "You are a helpful assistant that provides clear and concise information.";

/// Settings needed to open a session against the Agent Service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub endpoint: String,
    pub model: String,
    pub agent_name: String,
    pub agent_instructions: String,
    pub credential: ServiceCredential,
}

impl ServiceConfig {
    /// Read configuration from the process environment.
    ///
    /// The endpoint is taken from `PROJECT_ENDPOINT`, then `AZURE_ENDPOINT`,
    /// then `AZURE_AI_FOUNDRY_ENDPOINT`. Everything else has a default.
    pub fn from_env() -> ServiceResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> ServiceResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let endpoint = [PROJECT_ENDPOINT_ENV, AZURE_ENDPOINT_ENV, ENDPOINT_ENV]
            .into_iter()
            .find_map(|key| non_empty(key))
            .ok_or_else(|| {
                ServiceError::MissingConfig(format!(
                    "set {PROJECT_ENDPOINT_ENV} (or {AZURE_ENDPOINT_ENV}) to the project endpoint"
                ))
            })?;

        let model = non_empty(MODEL_ENV).unwrap_or_else(|| {
            tracing::info!(model = DEFAULT_MODEL, "no {MODEL_ENV} provided, using default");
            DEFAULT_MODEL.to_string()
        });
        let agent_name =
            non_empty(AGENT_NAME_ENV).unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string());
        let agent_instructions = non_empty(AGENT_INSTRUCTIONS_ENV)
            .unwrap_or_else(|| DEFAULT_AGENT_INSTRUCTIONS.to_string());

        Ok(Self {
            endpoint,
            model,
            agent_name,
            agent_instructions,
            credential: ServiceCredential::from_env()?,
        })
    }

    /// Override the credential picked up from the environment.
    pub fn with_credential(mut self, credential: ServiceCredential) -> Self {
        self.credential = credential;
        self
    }

    /// Build a [`ServiceClient`] for this configuration.
    pub fn client(&self) -> ServiceResult<ServiceClient> {
        ServiceClient::builder()
            .endpoint(self.endpoint.clone())
            .credential(self.credential.clone())
            .build()
    }
}
