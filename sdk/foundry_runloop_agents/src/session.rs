//! An agent and a thread whose lifetime is tied to a scope.
//!
//! Every exit path deletes both remote resources: [`Session::close`] on the
//! normal path, and a background deletion from `Drop` when the session is
//! dropped early (an error returned with `?`, or a panic).
//!
//! ```rust,no_run
//! use foundry_runloop_agents::agent::AgentCreateRequest;
//! use foundry_runloop_agents::driver::RunDriver;
//! use foundry_runloop_agents::error::RunLoopError;
//! use foundry_runloop_agents::session;
//! use foundry_runloop_agents::tools::ToolRegistry;
//! use foundry_runloop_core::config::ServiceConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ServiceConfig::from_env()?.client()?;
//! let driver = RunDriver::new(client.clone(), ToolRegistry::new());
//! let request = AgentCreateRequest::builder()
//!     .model("gpt-4o")
//!     .instructions("You are a helpful agent.")
//!     .build()?;
//!
//! let replies = session::scoped(&client, &request, |handle| async move {
//!     let messages = handle.ask(&driver, "Hi, Agent!").await?;
//!     Ok::<_, RunLoopError>(messages.assistant_text())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;

use foundry_runloop_core::client::ServiceClient;
use foundry_runloop_core::error::{ServiceError, ServiceResult};

use crate::agent::{self, Agent, AgentCreateRequest};
use crate::driver::RunDriver;
use crate::error::RunLoopResult;
use crate::message::{self, MessageCreateRequest, MessageList};
use crate::run::RunCreateRequest;
use crate::thread::{self, Thread};

/// An agent plus a thread, deleted when the session ends.
#[derive(Debug)]
pub struct Session {
    client: ServiceClient,
    agent: Agent,
    thread: Thread,
    closed: bool,
}

impl Session {
    /// Create the agent, then the thread.
    ///
    /// If the thread cannot be created the agent is deleted before the
    /// error is returned.
    ///
    /// # Tracing
    ///
    /// Emits a span named `foundry::sessions::open` with field `model`.
    #[tracing::instrument(
        name = "foundry::sessions::open",
        skip(client, request),
        fields(model = %request.model)
    )]
    pub async fn open(client: &ServiceClient, request: &AgentCreateRequest) -> ServiceResult<Self> {
        let agent = agent::create(client, request).await?;

        let thread = match thread::create(client, None).await {
            Ok(thread) => thread,
            Err(err) => {
                if let Err(cleanup) = agent::delete(client, &agent.id).await {
                    tracing::warn!(agent_id = %agent.id, error = %cleanup, "failed to delete agent");
                }
                return Err(err);
            }
        };

        tracing::debug!(agent_id = %agent.id, thread_id = %thread.id, "session opened");
        Ok(Self {
            client: client.clone(),
            agent,
            thread,
            closed: false,
        })
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    /// An owned handle to this session's agent and thread.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            client: self.client.clone(),
            agent_id: self.agent.id.clone(),
            thread_id: self.thread.id.clone(),
        }
    }

    /// Delete the thread, then the agent.
    ///
    /// Both deletions are attempted; the first failure is returned.
    #[tracing::instrument(
        name = "foundry::sessions::close",
        skip(self),
        fields(agent_id = %self.agent.id, thread_id = %self.thread.id)
    )]
    pub async fn close(mut self) -> ServiceResult<()> {
        self.closed = true;

        let thread_result = thread::delete(&self.client, &self.thread.id).await;
        let agent_result = agent::delete(&self.client, &self.agent.id).await;

        thread_result?;
        agent_result?;
        tracing::debug!("session closed");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }

        let agent_id = self.agent.id.clone();
        let thread_id = self.thread.id.clone();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(%agent_id, %thread_id, "session dropped outside a runtime, resources leaked");
            return;
        };

        tracing::warn!(%agent_id, %thread_id, "session dropped without close, deleting in background");
        let client = self.client.clone();
        runtime.spawn(async move {
            if let Err(err) = thread::delete(&client, &thread_id).await {
                tracing::warn!(%thread_id, error = %err, "background thread deletion failed");
            }
            if let Err(err) = agent::delete(&client, &agent_id).await {
                tracing::warn!(%agent_id, error = %err, "background agent deletion failed");
            }
        });
    }
}

/// Owned access to a session's agent and thread.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    client: ServiceClient,
    agent_id: String,
    thread_id: String,
}

impl SessionHandle {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Post `prompt` as a user message, run the agent to completion, and
    /// return the messages that run produced, oldest first.
    pub async fn ask(
        &self,
        driver: &RunDriver,
        prompt: impl Into<String>,
    ) -> RunLoopResult<MessageList> {
        let request = MessageCreateRequest::user(prompt)?;
        message::create(&self.client, &self.thread_id, &request).await?;

        let run_request = RunCreateRequest::for_agent(&self.agent_id)?;
        let outcome = driver.execute(&self.thread_id, &run_request).await?;

        Ok(message::list_for_run(&self.client, &self.thread_id, &outcome.run.id).await?)
    }
}

/// Open a session, run `body` with a handle to it, and always close it.
///
/// An error from `body` takes precedence over a cleanup error; the latter
/// is then only logged.
pub async fn scoped<F, Fut, T, E>(
    client: &ServiceClient,
    request: &AgentCreateRequest,
    body: F,
) -> Result<T, E>
where
    F: FnOnce(SessionHandle) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<ServiceError>,
{
    let session = Session::open(client, request).await?;
    let result = body(session.handle()).await;
    let cleanup = session.close().await;

    match (result, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup)) => Err(cleanup.into()),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup)) => {
            tracing::warn!(error = %cleanup, "session cleanup failed after body error");
            Err(err)
        }
    }
}
