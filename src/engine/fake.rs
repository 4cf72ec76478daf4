//! In-memory container engine for tests.
//!
//! Emulates just enough of a Docker daemon for the lifecycle code: images
//! that can be pulled from a pretend registry, containers with process
//! state and published ports, named volumes, and scripted exec results.

use super::{
    ContainerDetails, ContainerEngine, ContainerState, CreateContainer, ExecRequest, ExecSession,
    ImageDetails, LogStream, PortBinding,
};
use crate::error::{EngineErrorKind, Error, Result};
use crate::mount::MountKind;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const FIRST_EPHEMERAL_PORT: u16 = 49153;

#[derive(Debug)]
struct FakeState {
    images: Vec<ImageDetails>,
    registry: Vec<ImageDetails>,
    containers: Vec<ContainerDetails>,
    volumes: BTreeSet<String>,
    next_id: u32,
    next_port: u16,
    publish_ports: bool,
    init_exit_code: i64,
    service_exit_codes: VecDeque<i64>,
    service_exit_code: i64,
    logs: Vec<String>,
    exec_output: Vec<String>,
    exec_calls: Vec<ExecRequest>,
    exec_exit_codes: HashMap<String, i64>,
}

/// In-memory [`ContainerEngine`].
#[derive(Debug)]
pub(crate) struct FakeEngine {
    state: Mutex<FakeState>,
}

/// Image as the registry would serve it, with a repo digest.
pub(crate) fn registry_image(tag: &str, id: &str) -> ImageDetails {
    let repository = tag.rsplit_once(':').map(|(repo, _)| repo).unwrap_or(tag);
    ImageDetails {
        id: format!("sha256:{}", id),
        tags: vec![tag.to_string()],
        digests: vec![format!("{}@sha256:{}", repository, id)],
    }
}

fn not_found(operation: &str, what: &str) -> Error {
    Error::engine_not_found(operation, format!("no such object: {}", what))
}

impl FakeState {
    fn find_image(&self, reference: &str) -> Option<&ImageDetails> {
        self.images.iter().find(|image| {
            image.id == reference
                || image.tags.iter().any(|t| t == reference)
                || image.digests.iter().any(|d| d == reference)
        })
    }

    fn find_container(&mut self, name_or_id: &str) -> Option<&mut ContainerDetails> {
        let name = name_or_id.trim_start_matches('/');
        self.containers
            .iter_mut()
            .find(|c| c.id == name_or_id || c.name == name)
    }

    fn container_mut(&mut self, operation: &str, id: &str) -> Result<&mut ContainerDetails> {
        self.find_container(id)
            .ok_or_else(|| not_found(operation, id))
    }

    fn run(&mut self, operation: &str, id: &str) -> Result<()> {
        let publish = self.publish_ports;
        let mut next_port = self.next_port;
        let container = self.container_mut(operation, id)?;
        container.state = ContainerState::Running;
        container.ports.clear();
        if publish {
            for (port, bindings) in &container.port_bindings {
                let published = bindings
                    .iter()
                    .map(|binding| {
                        let host_port = match binding.host_port.as_deref() {
                            Some(p) if !p.is_empty() && p != "0" => p.to_string(),
                            _ => {
                                next_port += 1;
                                (next_port - 1).to_string()
                            }
                        };
                        PortBinding {
                            host_ip: Some("0.0.0.0".into()),
                            host_port: Some(host_port),
                        }
                    })
                    .collect();
                container.ports.insert(port.clone(), published);
            }
        }
        self.next_port = next_port;
        Ok(())
    }
}

impl FakeEngine {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                images: Vec::new(),
                registry: Vec::new(),
                containers: Vec::new(),
                volumes: BTreeSet::new(),
                next_id: 0,
                next_port: FIRST_EPHEMERAL_PORT,
                publish_ports: true,
                init_exit_code: 0,
                service_exit_codes: VecDeque::new(),
                service_exit_code: 0,
                logs: Vec::new(),
                exec_output: Vec::new(),
                exec_calls: Vec::new(),
                exec_exit_codes: HashMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Make an image available for pulling.
    pub(crate) fn with_registry_image(self, image: ImageDetails) -> Self {
        self.state().registry.push(image);
        self
    }

    /// Make an image available locally without pulling.
    pub(crate) fn with_local_image(self, image: ImageDetails) -> Self {
        self.state().images.push(image);
        self
    }

    /// Exit code of the init-completion command.
    pub(crate) fn set_init_exit_code(&self, code: i64) {
        self.state().init_exit_code = code;
    }

    /// Exit codes returned by successive service probes, before falling
    /// back to the default code.
    pub(crate) fn push_service_exit_codes(&self, codes: impl IntoIterator<Item = i64>) {
        self.state().service_exit_codes.extend(codes);
    }

    /// Exit code of the service probe once the scripted codes are used up.
    pub(crate) fn set_service_exit_code(&self, code: i64) {
        self.state().service_exit_code = code;
    }

    /// Whether starting a container publishes its ports.
    pub(crate) fn set_publish_ports(&self, publish: bool) {
        self.state().publish_ports = publish;
    }

    /// Lines returned by the logs stream.
    pub(crate) fn set_logs(&self, lines: Vec<String>) {
        self.state().logs = lines;
    }

    /// Output chunks produced by every exec.
    pub(crate) fn set_exec_output(&self, chunks: Vec<String>) {
        self.state().exec_output = chunks;
    }

    pub(crate) fn has_volume(&self, name: &str) -> bool {
        self.state().volumes.contains(name)
    }

    pub(crate) fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    /// Exec requests received so far.
    pub(crate) fn exec_calls(&self) -> Vec<ExecRequest> {
        self.state().exec_calls.clone()
    }

    /// Mutate a container in place, as an out-of-band change would.
    pub(crate) fn update_container(&self, name: &str, f: impl FnOnce(&mut ContainerDetails)) {
        let mut state = self.state();
        if let Some(container) = state.find_container(name) {
            f(container);
        }
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn container(&self, name_or_id: &str) -> Result<Option<ContainerDetails>> {
        Ok(self.state().find_container(name_or_id).cloned())
    }

    async fn image(&self, reference: &str) -> Result<Option<ImageDetails>> {
        Ok(self.state().find_image(reference).cloned())
    }

    async fn pull_image(&self, reference: &str) -> Result<ImageDetails> {
        let mut state = self.state();
        let image = state
            .registry
            .iter()
            .find(|image| image.tags.iter().any(|t| t == reference))
            .cloned()
            .ok_or_else(|| Error::ImagePull {
                image: reference.to_string(),
                reason: "manifest unknown".into(),
            })?;
        state.images.retain(|existing| existing.id != image.id);
        for existing in state.images.iter_mut() {
            existing.tags.retain(|t| t != reference);
        }
        state.images.push(image.clone());
        Ok(image)
    }

    async fn create_container(&self, request: &CreateContainer) -> Result<String> {
        let mut state = self.state();
        if state.find_container(&request.name).is_some() {
            return Err(Error::engine_with_kind(
                "create container",
                format!("container name \"/{}\" is already in use", request.name),
                EngineErrorKind::Conflict,
            ));
        }
        let image_id = state
            .find_image(&request.image)
            .map(|image| image.id.clone())
            .ok_or_else(|| not_found("create container", &request.image))?;

        for mount in &request.mounts {
            if mount.kind == MountKind::Volume {
                state.volumes.insert(mount.source.clone());
            }
        }

        state.next_id += 1;
        let id = format!("fake{:04}", state.next_id);
        state.containers.push(ContainerDetails {
            id: id.clone(),
            name: request.name.clone(),
            image_id,
            image: request.image.clone(),
            state: ContainerState::Created,
            env: request
                .env
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect(),
            mounts: request.mounts.clone(),
            port_bindings: request.port_bindings.clone(),
            ports: Default::default(),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        if state.container_mut("start container", id)?.state == ContainerState::Running {
            return Err(Error::engine_with_kind(
                "start container",
                "container already started",
                EngineErrorKind::NotModified,
            ));
        }
        state.run("start container", id)
    }

    async fn stop_container(&self, id: &str, _timeout: Option<Duration>) -> Result<()> {
        let mut state = self.state();
        let container = state.container_mut("stop container", id)?;
        if container.state != ContainerState::Running {
            return Err(Error::engine_with_kind(
                "stop container",
                "container already stopped",
                EngineErrorKind::NotModified,
            ));
        }
        container.state = ContainerState::Exited;
        container.ports.clear();
        Ok(())
    }

    async fn restart_container(&self, id: &str) -> Result<()> {
        self.state().run("restart container", id)
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        if state.container_mut("remove container", id)?.state == ContainerState::Running {
            return Err(Error::engine_with_kind(
                "remove container",
                "cannot remove a running container",
                EngineErrorKind::Conflict,
            ));
        }
        state
            .containers
            .retain(|c| c.id != id && c.name != id.trim_start_matches('/'));
        Ok(())
    }

    async fn exec_stream(&self, id: &str, request: &ExecRequest) -> Result<ExecSession> {
        let mut state = self.state();
        if state.container_mut("create exec", id)?.state != ContainerState::Running {
            return Err(Error::engine_with_kind(
                "create exec",
                format!("container {} is not running", id),
                EngineErrorKind::Conflict,
            ));
        }
        state.exec_calls.push(request.clone());

        let exit_code = match request.cmd.first().map(String::as_str) {
            Some("wait-for-services") => state.init_exit_code,
            Some("curl") => {
                let fallback = state.service_exit_code;
                state.service_exit_codes.pop_front().unwrap_or(fallback)
            }
            _ => 0,
        };
        let exec_id = format!("exec{:04}", state.exec_calls.len());
        state.exec_exit_codes.insert(exec_id.clone(), exit_code);

        let chunks: Vec<Result<String>> = state.exec_output.iter().cloned().map(Ok).collect();
        Ok(ExecSession {
            exec_id,
            output: Box::pin(futures_util::stream::iter(chunks)),
        })
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<i64> {
        self.state()
            .exec_exit_codes
            .get(exec_id)
            .copied()
            .ok_or_else(|| not_found("inspect exec", exec_id))
    }

    fn logs(&self, _id: &str, _follow: bool) -> LogStream {
        let lines: Vec<Result<String>> = self.state().logs.iter().cloned().map(Ok).collect();
        Box::pin(futures_util::stream::iter(lines))
    }

    async fn volume_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state().volumes.contains(name))
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        if self.state().volumes.remove(name) {
            Ok(())
        } else {
            Err(not_found("remove volume", name))
        }
    }
}
