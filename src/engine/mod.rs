//! Container engine abstraction.
//!
//! The lifecycle code talks to the engine only through [`ContainerEngine`],
//! using the engine-neutral views defined here. [`docker::DockerEngine`]
//! is the production implementation.

pub mod docker;

#[cfg(test)]
pub(crate) mod fake;

use crate::error::Result;
use crate::mount::MountDescriptor;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

pub use docker::DockerEngine;

/// Stream of log chunks from a container.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Process state as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    /// Created but never started.
    Created,
    /// Main process running.
    Running,
    /// Main process exited.
    Exited,
    /// Any other engine state (paused, restarting, removing, dead, ...).
    Other(String),
}

impl ContainerState {
    /// Parse the engine's state string.
    pub fn parse(state: &str) -> Self {
        match state {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "exited" => ContainerState::Exited,
            other => ContainerState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Created => write!(f, "created"),
            ContainerState::Running => write!(f, "running"),
            ContainerState::Exited => write!(f, "exited"),
            ContainerState::Other(state) => write!(f, "{}", state),
        }
    }
}

/// One host-side binding of a container port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortBinding {
    /// Host interface.
    pub host_ip: Option<String>,
    /// Host port; empty or `"0"` means engine-assigned.
    pub host_port: Option<String>,
}

impl PortBinding {
    /// Binding to a specific host port, or to an ephemeral one for `None`.
    pub fn to_host(port: Option<u16>) -> Self {
        Self {
            host_ip: None,
            host_port: Some(port.map(|p| p.to_string()).unwrap_or_default()),
        }
    }
}

/// Port map keyed by container port, e.g. `"8888/tcp"`.
pub type PortMap = HashMap<String, Vec<PortBinding>>;

/// Engine-neutral view of an inspected container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    /// Engine id.
    pub id: String,
    /// Name without the leading `/`.
    pub name: String,
    /// Id of the image the container runs.
    pub image_id: String,
    /// Image reference the container was created from.
    pub image: String,
    /// Engine process state.
    pub state: ContainerState,
    /// Environment as `KEY=VALUE` strings.
    pub env: Vec<String>,
    /// Mounts with sources resolved to host paths or volume names.
    pub mounts: Vec<MountDescriptor>,
    /// Port bindings requested at creation time.
    pub port_bindings: PortMap,
    /// Ports currently published on the host.
    pub ports: PortMap,
}

/// Engine-neutral view of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDetails {
    /// Image id.
    pub id: String,
    /// Repository tags.
    pub tags: Vec<String>,
    /// Repository digests.
    pub digests: Vec<String>,
}

impl ImageDetails {
    /// Most specific reference to create a container from: the first repo
    /// digest if the image was pulled from a registry, else the image id.
    pub fn pinned_reference(&self) -> &str {
        self.digests.first().map(String::as_str).unwrap_or(&self.id)
    }
}

/// Parameters for creating a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateContainer {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Environment variables.
    pub env: Vec<(String, String)>,
    /// Mounts.
    pub mounts: Vec<MountDescriptor>,
    /// Container port (e.g. `"8888/tcp"`) to host binding.
    pub port_bindings: PortMap,
}

/// Command to execute inside a running container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecRequest {
    /// Command and arguments.
    pub cmd: Vec<String>,
    /// User to run as; `None` uses the container default.
    pub user: Option<String>,
    /// Working directory; `None` uses the container default.
    pub workdir: Option<String>,
    /// Run with extended privileges.
    pub privileged: bool,
}

impl ExecRequest {
    /// Request running `cmd` with container defaults.
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Result of an exec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code of the command.
    pub exit_code: i64,
    /// Combined stdout and stderr.
    pub output: String,
}

/// A started exec whose output is still being produced.
pub struct ExecSession {
    /// Engine id of the exec, used to read the exit code.
    pub exec_id: String,
    /// Combined stdout and stderr, chunk by chunk as it is produced.
    pub output: LogStream,
}

impl fmt::Debug for ExecSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecSession")
            .field("exec_id", &self.exec_id)
            .finish_non_exhaustive()
    }
}

/// Operations consumed from the container engine.
///
/// Lookups return `Ok(None)` for missing resources. Mutations report a
/// missing resource as an engine error of kind
/// [`EngineErrorKind::NotFound`](crate::error::EngineErrorKind::NotFound).
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Inspect a container by name or id.
    async fn container(&self, name_or_id: &str) -> Result<Option<ContainerDetails>>;

    /// Inspect an image by reference or id.
    async fn image(&self, reference: &str) -> Result<Option<ImageDetails>>;

    /// Pull an image and return it.
    async fn pull_image(&self, reference: &str) -> Result<ImageDetails>;

    /// Create a container without starting it; returns its id.
    async fn create_container(&self, request: &CreateContainer) -> Result<String>;

    /// Start a container.
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Stop a container, killing it after `timeout`.
    async fn stop_container(&self, id: &str, timeout: Option<Duration>) -> Result<()>;

    /// Restart a container.
    async fn restart_container(&self, id: &str) -> Result<()>;

    /// Remove a container, keeping its named volumes.
    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Start a command inside a container, streaming its output.
    async fn exec_stream(&self, id: &str, request: &ExecRequest) -> Result<ExecSession>;

    /// Exit code of a finished exec.
    ///
    /// Only meaningful once the session's output stream has ended.
    async fn exec_exit_code(&self, exec_id: &str) -> Result<i64>;

    /// Run a command inside a container and wait for it to finish,
    /// collecting its output.
    async fn exec(&self, id: &str, request: &ExecRequest) -> Result<ExecOutput> {
        let ExecSession {
            exec_id,
            mut output,
        } = self.exec_stream(id, request).await?;

        let mut collected = String::new();
        while let Some(chunk) = output.next().await {
            collected.push_str(&chunk?);
        }
        Ok(ExecOutput {
            exit_code: self.exec_exit_code(&exec_id).await?,
            output: collected,
        })
    }

    /// Stream the container's output.
    fn logs(&self, id: &str, follow: bool) -> LogStream;

    /// Whether a named volume exists.
    async fn volume_exists(&self, name: &str) -> Result<bool>;

    /// Remove a named volume.
    async fn remove_volume(&self, name: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_state_parse() {
        assert_eq!(ContainerState::parse("created"), ContainerState::Created);
        assert_eq!(ContainerState::parse("running"), ContainerState::Running);
        assert_eq!(ContainerState::parse("exited"), ContainerState::Exited);
        assert_eq!(
            ContainerState::parse("paused"),
            ContainerState::Other("paused".into())
        );
        assert_eq!(ContainerState::parse("restarting").to_string(), "restarting");
    }

    #[test]
    fn test_pinned_reference_prefers_digest() {
        let mut image = ImageDetails {
            id: "sha256:abc".into(),
            tags: vec!["aiidalab/full-stack:latest".into()],
            digests: vec!["aiidalab/full-stack@sha256:def".into()],
        };
        assert_eq!(image.pinned_reference(), "aiidalab/full-stack@sha256:def");
        image.digests.clear();
        assert_eq!(image.pinned_reference(), "sha256:abc");
    }

    #[test]
    fn test_port_binding_to_host() {
        assert_eq!(
            PortBinding::to_host(Some(8888)).host_port.as_deref(),
            Some("8888")
        );
        assert_eq!(PortBinding::to_host(None).host_port.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_exec_collects_output_and_exit_code() {
        let engine = fake::FakeEngine::new()
            .with_local_image(fake::registry_image("aiidalab/base:latest", "1234"));
        let id = engine
            .create_container(&CreateContainer {
                name: "exec-target".into(),
                image: "aiidalab/base:latest".into(),
                env: Vec::new(),
                mounts: Vec::new(),
                port_bindings: PortMap::new(),
            })
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();
        engine.set_exec_output(vec!["HTTP/1.1 ".into(), "503\n".into()]);
        engine.set_service_exit_code(22);

        let result = engine
            .exec(&id, &ExecRequest::new(["curl"]))
            .await
            .unwrap();
        assert_eq!(result.output, "HTTP/1.1 503\n");
        assert_eq!(result.exit_code, 22);
    }
}
