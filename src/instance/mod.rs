//! Instance lifecycle control.
//!
//! An [`Instance`] binds one [`Profile`] to a container engine. It holds no
//! container state of its own: container and image are looked up fresh on
//! every call, so the engine is the single source of truth.

mod status;

pub use status::{derive_status, InstanceStatus};

use crate::drift;
use crate::engine::{
    ContainerDetails, ContainerEngine, ContainerState, CreateContainer, ExecRequest, ExecSession,
    ImageDetails, LogStream, PortBinding, PortMap,
};
use crate::error::{Error, Result};
use crate::introspect::{self, env_var, NOTEBOOK_PORT};
use crate::mount::{plan_mounts, MountKind};
use crate::naming::Naming;
use crate::profile::{Profile, ENV_JUPYTER_TOKEN};
use crate::readiness::{self, ProbeSettings, ReadinessOutcome};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Readiness timeout used when computing the status.
pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Bytes of randomness in the access token (rendered as 64 hex chars).
const TOKEN_BYTES: usize = 32;

/// Owner applied to the package cache after start.
const CONDA_DIR_OWNER: &str = "1000:1000";

/// Generate a fresh notebook access token.
fn generate_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    getrandom::getrandom(&mut bytes).map_err(|e| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("failed to generate access token: {}", e),
        ))
    })?;
    Ok(hex::encode(bytes))
}

/// A command running inside an instance.
///
/// Drain [`ExecHandle::output`] first; the exit code is only known once
/// the output has ended.
pub struct ExecHandle {
    engine: Arc<dyn ContainerEngine>,
    exec_id: String,
    /// Combined stdout and stderr as it is produced.
    pub output: LogStream,
}

impl std::fmt::Debug for ExecHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecHandle")
            .field("exec_id", &self.exec_id)
            .finish_non_exhaustive()
    }
}

impl ExecHandle {
    /// Exit code of the finished command.
    pub async fn exit_code(&self) -> Result<i64> {
        self.engine.exec_exit_code(&self.exec_id).await
    }
}

/// Runtime pairing of a profile with a container engine.
pub struct Instance {
    engine: Arc<dyn ContainerEngine>,
    profile: Profile,
    naming: Naming,
    probe: ProbeSettings,
}

impl Instance {
    /// Create an instance with the default naming scheme and probes.
    pub fn new(engine: Arc<dyn ContainerEngine>, profile: Profile) -> Self {
        Self {
            engine,
            profile,
            naming: Naming::default(),
            probe: ProbeSettings::default(),
        }
    }

    /// Use a different naming scheme.
    pub fn with_naming(mut self, naming: Naming) -> Self {
        self.naming = naming;
        self
    }

    /// Use different readiness probe settings.
    pub fn with_probe_settings(mut self, probe: ProbeSettings) -> Self {
        self.probe = probe;
        self
    }

    /// The desired profile.
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Replace the desired profile.
    pub fn set_profile(&mut self, profile: Profile) {
        self.profile = profile;
    }

    /// The naming scheme.
    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    pub(crate) fn engine(&self) -> &dyn ContainerEngine {
        self.engine.as_ref()
    }

    /// Name of the container managed for this profile.
    pub fn container_name(&self) -> String {
        self.naming.container_name(self.profile.name())
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// The container, if one exists.
    pub async fn container(&self) -> Result<Option<ContainerDetails>> {
        self.engine.container(&self.container_name()).await
    }

    /// The local image for the profile's reference, if present.
    pub async fn image(&self) -> Result<Option<ImageDetails>> {
        self.engine.image(self.profile.image()).await
    }

    /// The container, or [`Error::RequiresContainer`].
    pub(crate) async fn require_container(&self) -> Result<ContainerDetails> {
        self.container()
            .await?
            .ok_or_else(|| Error::requires_container(self.container_name()))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Pull the profile's image.
    pub async fn pull(&self) -> Result<ImageDetails> {
        tracing::info!(image = %self.profile.image(), "pulling image");
        let image = self.engine.pull_image(self.profile.image()).await?;
        tracing::info!(image = %self.profile.image(), id = %image.id, "pulled image");
        Ok(image)
    }

    fn ensure_home_mount_exists(&self) -> Result<()> {
        let home_mount = self.profile.home_mount();
        if MountKind::for_source(home_mount) == MountKind::Bind {
            tracing::info!(path = %home_mount, "ensuring home mount point exists");
            std::fs::create_dir_all(home_mount)?;
        }
        Ok(())
    }

    /// Create the container without starting it.
    ///
    /// Fails with [`Error::ContainerExists`] if a container is already
    /// present. The image is pulled if it is not available locally and the
    /// container is pinned to it by digest (or id for local images).
    pub async fn create(&self) -> Result<ContainerDetails> {
        let name = self.container_name();
        if self.container().await?.is_some() {
            return Err(Error::ContainerExists { container: name });
        }

        let mounts = plan_mounts(&self.profile, &self.naming)?;
        self.ensure_home_mount_exists()?;

        let image = match self.image().await? {
            Some(image) => image,
            None => self.pull().await?,
        };

        let mut port_bindings = PortMap::new();
        port_bindings.insert(
            NOTEBOOK_PORT.to_string(),
            vec![PortBinding::to_host(self.profile.port())],
        );

        let request = CreateContainer {
            name: name.clone(),
            image: image.pinned_reference().to_string(),
            env: self.profile.environment(&generate_token()?),
            mounts,
            port_bindings,
        };

        let id = self.engine.create_container(&request).await?;
        tracing::info!(container = %name, id = %id, "created container");

        self.engine
            .container(&id)
            .await?
            .ok_or_else(|| Error::engine_not_found("create container", id))
    }

    /// Start the instance, creating the container first if needed.
    ///
    /// Starting an instance that is already running is not an error, and a
    /// create that races with a concurrent start reuses the container that
    /// won.
    pub async fn start(&self) -> Result<()> {
        self.ensure_home_mount_exists()?;
        let name = self.container_name();
        tracing::info!(container = %name, "starting container");

        let container = match self.container().await? {
            Some(container) => container,
            None => match self.create().await {
                Ok(container) => container,
                Err(e) if matches!(e, Error::ContainerExists { .. }) || e.is_conflict() => {
                    tracing::debug!(container = %name, "container was created concurrently");
                    self.require_container().await?
                }
                Err(e) => return Err(e),
            },
        };

        match self.engine.start_container(&container.id).await {
            Ok(()) => tracing::info!(container = %name, id = %container.id, "started container"),
            Err(e) if e.is_not_modified() => {
                tracing::debug!(container = %name, "container already running")
            }
            Err(e) => return Err(e),
        }

        self.post_start().await;
        Ok(())
    }

    /// Restart an existing container.
    pub async fn restart(&self) -> Result<()> {
        let container = self.require_container().await?;
        self.engine.restart_container(&container.id).await?;
        tracing::info!(container = %container.name, "restarted container");
        self.post_start().await;
        Ok(())
    }

    /// Replace the container with a fresh one, keeping data volumes.
    pub async fn recreate(&self) -> Result<ContainerDetails> {
        let container = self.require_container().await?;
        if container.state == ContainerState::Running {
            self.stop(None).await?;
        }
        self.remove(false, false).await?;
        self.create().await
    }

    /// Stop an existing container, killing it after `timeout`.
    pub async fn stop(&self, timeout: Option<Duration>) -> Result<()> {
        let container = self.require_container().await?;
        match self.engine.stop_container(&container.id, timeout).await {
            Ok(()) => {
                tracing::info!(container = %container.name, "stopped container");
                Ok(())
            }
            Err(e) if e.is_not_modified() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Remove the container and optionally its package cache and home data.
    ///
    /// Resources that are already gone are skipped.
    pub async fn remove(&self, conda: bool, data: bool) -> Result<()> {
        if let Some(container) = self.container().await? {
            match self.engine.remove_container(&container.id).await {
                Ok(()) => tracing::info!(container = %container.name, "removed container"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(Error::removal(container.name, e.to_string())),
            }
        }

        if conda {
            self.remove_volume(&self.naming.conda_volume_name(self.profile.name()))
                .await?;
        }

        if data {
            let home_mount = self.profile.home_mount();
            match MountKind::for_source(home_mount) {
                MountKind::Volume => self.remove_volume(home_mount).await?,
                MountKind::Bind => match std::fs::remove_dir_all(home_mount) {
                    Ok(()) => tracing::info!(path = %home_mount, "removed home directory"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(Error::removal(home_mount, e.to_string())),
                },
            }
        }
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        if !self.engine.volume_exists(name).await? {
            tracing::debug!(volume = %name, "volume does not exist");
            return Ok(());
        }
        match self.engine.remove_volume(name).await {
            Ok(()) => {
                tracing::info!(volume = %name, "removed volume");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(volume = %name, "volume already removed");
                Ok(())
            }
            Err(e) => Err(Error::removal(name, e.to_string())),
        }
    }

    /// Fix-ups run after every start; failures are only logged.
    pub async fn post_start(&self) {
        let conda_dir = self.profile.conda_dir();
        let mut request = ExecRequest::new(["chown", "-R", CONDA_DIR_OWNER, conda_dir.as_str()]);
        request.privileged = true;

        let result = match self.require_container().await {
            Ok(container) => self.engine.exec(&container.id, &request).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(output) if output.exit_code == 0 => {
                tracing::debug!(path = %conda_dir, "package cache owned by the system user")
            }
            Ok(output) => tracing::warn!(
                path = %conda_dir,
                exit_code = output.exit_code,
                "failed to ensure the package cache is owned by the system user"
            ),
            Err(e) => tracing::warn!(
                path = %conda_dir,
                error = %e,
                "failed to ensure the package cache is owned by the system user"
            ),
        }
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Current status, probing readiness for at most
    /// [`DEFAULT_STATUS_TIMEOUT`].
    pub async fn status(&self) -> Result<InstanceStatus> {
        self.status_with_timeout(Some(DEFAULT_STATUS_TIMEOUT)).await
    }

    /// Current status, probing readiness for at most `timeout`.
    pub async fn status_with_timeout(&self, timeout: Option<Duration>) -> Result<InstanceStatus> {
        let container = self.container().await?;
        let probe = match &container {
            Some(c) if c.state == ContainerState::Running => Some(
                readiness::wait_for_services(self.engine(), &c.id, &self.probe, timeout).await,
            ),
            _ => None,
        };
        Ok(derive_status(
            container.as_ref().map(|c| &c.state),
            probe.as_ref(),
        ))
    }

    /// Wait until the services are ready.
    ///
    /// Fails with [`Error::ServicesFailed`] on a hard probe failure and
    /// [`Error::ServicesTimeout`] if `timeout` expires.
    pub async fn wait_for_services(&self, timeout: Option<Duration>) -> Result<()> {
        let container = self.require_container().await?;
        let outcome: ReadinessOutcome =
            readiness::wait_for_services(self.engine(), &container.id, &self.probe, timeout).await;
        outcome.into_result(timeout)
    }

    /// Host ports currently published for the notebook service.
    pub async fn host_ports(&self) -> Result<Vec<u16>> {
        Ok(introspect::host_ports(&self.require_container().await?))
    }

    /// Notebook URL including the access token.
    pub async fn url(&self) -> Result<String> {
        let container = self.require_container().await?;
        let port = introspect::host_ports(&container)
            .first()
            .copied()
            .ok_or_else(|| Error::no_host_port(container.id.clone()))?;
        let token = env_var(&container, ENV_JUPYTER_TOKEN).ok_or_else(|| {
            Error::NotManagedContainer {
                name: container.name.clone(),
            }
        })?;
        Ok(format!("http://localhost:{}/?token={}", port, token))
    }

    // ========================================================================
    // Interaction
    // ========================================================================

    /// Stream the container's output.
    pub async fn logs(&self, follow: bool) -> Result<LogStream> {
        let container = self.require_container().await?;
        Ok(self.engine.logs(&container.id, follow))
    }

    /// Start a command inside the container and stream its output.
    ///
    /// Unprivileged commands run as the system user in the home directory.
    pub async fn exec(&self, cmd: &[String], privileged: bool) -> Result<ExecHandle> {
        let container = self.require_container().await?;
        tracing::info!(container = %container.name, command = %cmd.join(" "), "executing");
        let mut request = ExecRequest::new(cmd.iter().cloned());
        if privileged {
            request.privileged = true;
        } else {
            request.user = Some(self.profile.system_user().to_string());
            request.workdir = Some(self.profile.home_dir());
        }
        let ExecSession { exec_id, output } =
            self.engine.exec_stream(&container.id, &request).await?;
        Ok(ExecHandle {
            engine: self.engine.clone(),
            exec_id,
            output,
        })
    }

    /// Reasons why the container no longer matches the profile.
    pub async fn configuration_changes(&self) -> Result<Vec<String>> {
        drift::configuration_changes(self).await
    }
}
