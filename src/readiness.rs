//! Readiness probing.
//!
//! The engine reporting a container as running says nothing about whether
//! its init scripts have finished or its notebook server accepts
//! connections. [`wait_for_services`] runs three independent probes
//! concurrently and settles once all of them succeed, one of them fails
//! hard, or the timeout expires:
//!
//! 1. init completion: a fixed command run once inside the container;
//!    any non-zero exit code is a hard failure.
//! 2. service reachability: an HTTP probe run inside the container,
//!    retried while it reports "connection refused" or "timed out".
//! 3. host port assignment: the container is re-inspected until the
//!    notebook port is published on the host.
//!
//! While waiting, the container's output is echoed at debug level.

use crate::engine::{ContainerEngine, ExecRequest};
use crate::error::{Error, Result};
use crate::introspect::{published_ports, NOTEBOOK_PORT};
use futures_util::StreamExt;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Commands, exit codes and intervals used by the probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    /// Command that blocks until the init scripts completed.
    pub init_command: Vec<String>,
    /// Command probing the notebook service from inside the container.
    pub service_command: Vec<String>,
    /// Exit codes of the service command meaning "not reachable yet".
    pub not_ready_exit_codes: Vec<i64>,
    /// Pause between service probes.
    pub service_retry_interval: Duration,
    /// Pause between host port checks.
    pub port_poll_interval: Duration,
    /// Container port that must be published.
    pub service_port: String,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            init_command: vec!["wait-for-services".into()],
            service_command: [
                "curl",
                "--fail-early",
                "--fail",
                "--silent",
                "--max-time",
                "1.0",
                "http://localhost:8888",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            // curl: 7 = failed to connect, 28 = operation timed out
            not_ready_exit_codes: vec![7, 28],
            service_retry_interval: Duration::from_secs(2),
            port_poll_interval: Duration::from_secs(1),
            service_port: NOTEBOOK_PORT.to_string(),
        }
    }
}

/// How a readiness wait settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessOutcome {
    /// All probes succeeded.
    Ready,
    /// A probe failed hard.
    Failed(String),
    /// The timeout expired first.
    TimedOut,
}

impl ReadinessOutcome {
    /// Turn the outcome into a result for callers that need readiness.
    pub fn into_result(self, timeout: Option<Duration>) -> Result<()> {
        match self {
            ReadinessOutcome::Ready => Ok(()),
            ReadinessOutcome::Failed(reason) => Err(Error::ServicesFailed(reason)),
            ReadinessOutcome::TimedOut => Err(Error::ServicesTimeout {
                timeout: timeout.unwrap_or_default(),
            }),
        }
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Stream the container's output into the log until aborted.
fn echo_logs(engine: &dyn ContainerEngine, container_id: &str) -> AbortOnDrop {
    let mut logs = engine.logs(container_id, true);
    let id = container_id.to_string();
    AbortOnDrop(tokio::spawn(async move {
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(chunk) => {
                    for line in chunk.lines().filter(|l| !l.trim().is_empty()) {
                        tracing::debug!(container = %id, "{}", line.trim_end());
                    }
                }
                Err(e) => {
                    tracing::debug!(container = %id, error = %e, "log stream ended");
                    break;
                }
            }
        }
    }))
}

async fn init_scripts_finished(
    engine: &dyn ContainerEngine,
    container_id: &str,
    settings: &ProbeSettings,
) -> Result<()> {
    tracing::debug!(container = %container_id, "waiting for init services to finish");
    let result = engine
        .exec(container_id, &ExecRequest::new(settings.init_command.clone()))
        .await?;
    if result.exit_code != 0 {
        return Err(Error::ServicesFailed(format!(
            "init processes did not complete (exit code {})",
            result.exit_code
        )));
    }
    tracing::debug!(container = %container_id, "init services finished");
    Ok(())
}

async fn notebook_service_online(
    engine: &dyn ContainerEngine,
    container_id: &str,
    settings: &ProbeSettings,
) -> Result<()> {
    tracing::debug!(container = %container_id, "waiting for notebook service to become reachable");
    let request = ExecRequest::new(settings.service_command.clone());
    loop {
        let result = engine.exec(container_id, &request).await?;
        match result.exit_code {
            0 => {
                tracing::debug!(container = %container_id, "notebook service reachable");
                return Ok(());
            }
            code if settings.not_ready_exit_codes.contains(&code) => {
                tokio::time::sleep(settings.service_retry_interval).await;
            }
            code => {
                return Err(Error::ServicesFailed(format!(
                    "notebook service unreachable (probe exit code {})",
                    code
                )))
            }
        }
    }
}

async fn host_port_assigned(
    engine: &dyn ContainerEngine,
    container_id: &str,
    settings: &ProbeSettings,
) -> Result<()> {
    tracing::debug!(container = %container_id, "waiting for host port to be assigned");
    loop {
        let container = engine
            .container(container_id)
            .await?
            .ok_or_else(|| Error::requires_container(container_id))?;
        if !published_ports(&container, &settings.service_port).is_empty() {
            tracing::debug!(container = %container_id, "host port assigned");
            return Ok(());
        }
        tokio::time::sleep(settings.port_poll_interval).await;
    }
}

/// Wait until the services of a running container are usable.
///
/// `timeout = None` waits indefinitely. When the wait settles, probes that
/// are still in flight are dropped and the log echo is aborted. Engine
/// errors raised by a probe count as hard failures.
pub async fn wait_for_services(
    engine: &dyn ContainerEngine,
    container_id: &str,
    settings: &ProbeSettings,
    timeout: Option<Duration>,
) -> ReadinessOutcome {
    tracing::info!(container = %container_id, "waiting for services to come up");
    let started = Instant::now();
    let _echo = echo_logs(engine, container_id);

    let probes = async {
        tokio::try_join!(
            init_scripts_finished(engine, container_id, settings),
            notebook_service_online(engine, container_id, settings),
            host_port_assigned(engine, container_id, settings),
        )
        .map(|_| ())
    };

    let result = match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, probes).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(container = %container_id, "services did not come up in time");
                return ReadinessOutcome::TimedOut;
            }
        },
        None => probes.await,
    };

    match result {
        Ok(()) => {
            tracing::info!(
                container = %container_id,
                elapsed = %humantime::format_duration(Duration::from_millis(
                    started.elapsed().as_millis() as u64
                )),
                "services came up"
            );
            ReadinessOutcome::Ready
        }
        Err(Error::ServicesFailed(reason)) => ReadinessOutcome::Failed(reason),
        Err(e) => ReadinessOutcome::Failed(e.to_string()),
    }
}
