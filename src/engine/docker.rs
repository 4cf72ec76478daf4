//! Docker engine backed by `bollard`.
//!
//! Translates bollard's inspect models into the engine-neutral views and
//! bollard errors into [`Error`]. No bollard type leaves this module.

use super::{
    ContainerDetails, ContainerEngine, ContainerState, CreateContainer, ExecRequest, ExecSession,
    ImageDetails, LogStream, PortBinding, PortMap,
};
use crate::error::{EngineErrorKind, Error, Result};
use crate::mount::{MountDescriptor, MountKind};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogsOptions, RemoveContainerOptions,
    RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerInspectResponse, HostConfig, Mount, MountPoint, MountTypeEnum};
use bollard::volume::RemoveVolumeOptions;
use bollard::Docker;
use futures_util::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::time::Duration;

/// Container engine talking to a local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using the platform defaults (`DOCKER_HOST` or the local socket)
    /// and verify the daemon answers.
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::EngineUnavailable(e.to_string()))?;
        docker
            .ping()
            .await
            .map_err(|e| Error::EngineUnavailable(e.to_string()))?;

        if let Ok(version) = docker.version().await {
            tracing::debug!(
                version = version.version.as_deref().unwrap_or("unknown"),
                "connected to docker daemon"
            );
        }

        Ok(Self { docker })
    }

    /// Wrap an existing client.
    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

/// Translate a bollard error, classifying well-known HTTP responses.
fn engine_error(operation: &str, err: bollard::errors::Error) -> Error {
    let kind = match &err {
        bollard::errors::Error::DockerResponseServerError { status_code, .. } => {
            match *status_code {
                404 => EngineErrorKind::NotFound,
                409 => EngineErrorKind::Conflict,
                304 => EngineErrorKind::NotModified,
                _ => EngineErrorKind::Other,
            }
        }
        _ => EngineErrorKind::Other,
    };
    let reason = match &err {
        bollard::errors::Error::DockerResponseServerError { message, .. } => message.clone(),
        other => other.to_string(),
    };
    Error::engine_with_kind(operation, reason, kind)
}

/// Split `repo[:tag]` so that a pull never requests every tag of a
/// repository. Digest references are passed through unchanged.
fn split_image_reference(reference: &str) -> (&str, &str) {
    if reference.contains('@') {
        return (reference, "");
    }
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (reference, "latest"),
    }
}

fn port_map(ports: Option<HashMap<String, Option<Vec<bollard::models::PortBinding>>>>) -> PortMap {
    ports
        .unwrap_or_default()
        .into_iter()
        .map(|(port, bindings)| {
            let bindings = bindings
                .unwrap_or_default()
                .into_iter()
                .map(|b| PortBinding {
                    host_ip: b.host_ip,
                    host_port: b.host_port,
                })
                .collect();
            (port, bindings)
        })
        .collect()
}

fn mount_descriptor(mount: MountPoint) -> Option<MountDescriptor> {
    let target = mount.destination?;
    // Volumes carry their name; bind mounts only a host path.
    let (kind, source) = match mount.name.filter(|name| !name.is_empty()) {
        Some(name) => (MountKind::Volume, name),
        None => (MountKind::Bind, mount.source?),
    };
    Some(MountDescriptor {
        kind,
        source,
        target,
        read_only: !mount.rw.unwrap_or(true),
    })
}

fn container_details(response: ContainerInspectResponse) -> ContainerDetails {
    let state = response
        .state
        .and_then(|s| s.status)
        .map(|status| ContainerState::parse(&status.to_string()))
        .unwrap_or_else(|| ContainerState::Other("unknown".into()));

    let config = response.config.unwrap_or_default();

    ContainerDetails {
        id: response.id.unwrap_or_default(),
        name: response
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        image_id: response.image.unwrap_or_default(),
        image: config.image.unwrap_or_default(),
        state,
        env: config.env.unwrap_or_default(),
        mounts: response
            .mounts
            .unwrap_or_default()
            .into_iter()
            .filter_map(mount_descriptor)
            .collect(),
        port_bindings: port_map(response.host_config.and_then(|h| h.port_bindings)),
        ports: port_map(response.network_settings.and_then(|n| n.ports)),
    }
}

/// Whole seconds the engine waits before killing, rounded up so that a
/// sub-second grace period is not turned into an immediate kill.
fn grace_period_secs(timeout: Duration) -> i64 {
    timeout.as_secs_f64().ceil() as i64
}

fn engine_mount(mount: &MountDescriptor) -> Mount {
    Mount {
        target: Some(mount.target.clone()),
        source: Some(mount.source.clone()),
        typ: Some(match mount.kind {
            MountKind::Bind => MountTypeEnum::BIND,
            MountKind::Volume => MountTypeEnum::VOLUME,
        }),
        read_only: Some(mount.read_only),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn container(&self, name_or_id: &str) -> Result<Option<ContainerDetails>> {
        match self
            .docker
            .inspect_container(name_or_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => Ok(Some(container_details(response))),
            Err(e) => {
                let err = engine_error("inspect container", e);
                if err.is_not_found() {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn image(&self, reference: &str) -> Result<Option<ImageDetails>> {
        match self.docker.inspect_image(reference).await {
            Ok(image) => Ok(Some(ImageDetails {
                id: image.id.unwrap_or_default(),
                tags: image.repo_tags.unwrap_or_default(),
                digests: image.repo_digests.unwrap_or_default(),
            })),
            Err(e) => {
                let err = engine_error("inspect image", e);
                if err.is_not_found() {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn pull_image(&self, reference: &str) -> Result<ImageDetails> {
        let (from_image, tag) = split_image_reference(reference);
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };

        self.docker
            .create_image(Some(options), None, None)
            .try_for_each(|info| async move {
                if let Some(status) = info.status {
                    tracing::debug!(image = %reference, progress = ?info.progress, "{}", status);
                }
                Ok(())
            })
            .await
            .map_err(|e| Error::ImagePull {
                image: reference.to_string(),
                reason: engine_error("pull image", e).to_string(),
            })?;

        self.image(reference).await?.ok_or_else(|| Error::ImagePull {
            image: reference.to_string(),
            reason: "image not found after pull".into(),
        })
    }

    async fn create_container(&self, request: &CreateContainer) -> Result<String> {
        let port_bindings = request
            .port_bindings
            .iter()
            .map(|(port, bindings)| {
                let bindings = bindings
                    .iter()
                    .map(|b| bollard::models::PortBinding {
                        host_ip: b.host_ip.clone(),
                        host_port: b.host_port.clone(),
                    })
                    .collect();
                (port.clone(), Some(bindings))
            })
            .collect();

        let exposed_ports = request
            .port_bindings
            .keys()
            .map(|port| (port.clone(), HashMap::new()))
            .collect();

        let config = Config {
            image: Some(request.image.clone()),
            env: Some(
                request
                    .env
                    .iter()
                    .map(|(key, value)| format!("{}={}", key, value))
                    .collect(),
            ),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                mounts: Some(request.mounts.iter().map(engine_mount).collect()),
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: request.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| engine_error("create container", e))?;

        for warning in &response.warnings {
            tracing::warn!(container = %request.name, "{}", warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| engine_error("start container", e))
    }

    async fn stop_container(&self, id: &str, timeout: Option<Duration>) -> Result<()> {
        let options = timeout.map(|t| StopContainerOptions {
            t: grace_period_secs(t),
        });
        self.docker
            .stop_container(id, options)
            .await
            .map_err(|e| engine_error("stop container", e))
    }

    async fn restart_container(&self, id: &str) -> Result<()> {
        self.docker
            .restart_container(id, None::<RestartContainerOptions>)
            .await
            .map_err(|e| engine_error("restart container", e))
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    v: false,
                    force: false,
                    link: false,
                }),
            )
            .await
            .map_err(|e| engine_error("remove container", e))
    }

    async fn exec_stream(&self, id: &str, request: &ExecRequest) -> Result<ExecSession> {
        let options = CreateExecOptions {
            cmd: Some(request.cmd.clone()),
            user: request.user.clone(),
            working_dir: request.workdir.clone(),
            privileged: Some(request.privileged),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec_id = self
            .docker
            .create_exec(id, options)
            .await
            .map_err(|e| engine_error("create exec", e))?
            .id;

        let output: LogStream = match self
            .docker
            .start_exec(&exec_id, None)
            .await
            .map_err(|e| engine_error("start exec", e))?
        {
            StartExecResults::Attached { output, .. } => Box::pin(output.map(|chunk| {
                chunk
                    .map(|c| c.to_string())
                    .map_err(|e| engine_error("read exec output", e))
            })),
            StartExecResults::Detached => Box::pin(futures_util::stream::empty()),
        };

        Ok(ExecSession { exec_id, output })
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<i64> {
        let inspect = self
            .docker
            .inspect_exec(exec_id)
            .await
            .map_err(|e| engine_error("inspect exec", e))?;
        Ok(inspect.exit_code.unwrap_or(-1))
    }

    fn logs(&self, id: &str, follow: bool) -> LogStream {
        let options = LogsOptions::<String> {
            follow,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        Box::pin(
            self.docker
                .logs(id, Some(options))
                .map(|chunk| {
                    chunk
                        .map(|c| c.to_string())
                        .map_err(|e| engine_error("read logs", e))
                }),
        )
    }

    async fn volume_exists(&self, name: &str) -> Result<bool> {
        match self.docker.inspect_volume(name).await {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = engine_error("inspect volume", e);
                if err.is_not_found() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.docker
            .remove_volume(name, None::<RemoveVolumeOptions>)
            .await
            .map_err(|e| engine_error("remove volume", e))
    }
}
