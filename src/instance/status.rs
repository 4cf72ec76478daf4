//! Instance status derivation.

use crate::engine::ContainerState;
use crate::readiness::ReadinessOutcome;
use std::fmt;

/// Status of an instance, recomputed from live signals on every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    /// Running, but the readiness probe failed.
    Unknown,
    /// Container created but never started.
    Created,
    /// No container.
    Down,
    /// Running and all services ready.
    Up,
    /// Container stopped.
    Exited,
    /// Running, services not ready yet.
    Starting,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Unknown => "unknown",
            InstanceStatus::Created => "created",
            InstanceStatus::Down => "down",
            InstanceStatus::Up => "up",
            InstanceStatus::Exited => "exited",
            InstanceStatus::Starting => "starting",
        };
        write!(f, "{}", s)
    }
}

/// Combine the engine-reported state with the readiness outcome.
///
/// A running container without a probe result is still starting. Engine
/// states this tool does not manage (paused, dead, ...) map to `Down`.
pub fn derive_status(
    state: Option<&ContainerState>,
    probe: Option<&ReadinessOutcome>,
) -> InstanceStatus {
    match state {
        None => InstanceStatus::Down,
        Some(ContainerState::Created) => InstanceStatus::Created,
        Some(ContainerState::Exited) => InstanceStatus::Exited,
        Some(ContainerState::Running) => match probe {
            Some(ReadinessOutcome::Ready) => InstanceStatus::Up,
            Some(ReadinessOutcome::Failed(_)) => InstanceStatus::Unknown,
            Some(ReadinessOutcome::TimedOut) | None => InstanceStatus::Starting,
        },
        Some(ContainerState::Other(_)) => InstanceStatus::Down,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_status_table() {
        let running = ContainerState::Running;
        let cases = [
            (None, None, InstanceStatus::Down),
            (Some(ContainerState::Created), None, InstanceStatus::Created),
            (Some(ContainerState::Exited), None, InstanceStatus::Exited),
            (
                Some(running.clone()),
                Some(ReadinessOutcome::Ready),
                InstanceStatus::Up,
            ),
            (
                Some(running.clone()),
                Some(ReadinessOutcome::TimedOut),
                InstanceStatus::Starting,
            ),
            (
                Some(running.clone()),
                Some(ReadinessOutcome::Failed("boom".into())),
                InstanceStatus::Unknown,
            ),
            (Some(running), None, InstanceStatus::Starting),
            (
                Some(ContainerState::Other("paused".into())),
                None,
                InstanceStatus::Down,
            ),
        ];

        for (state, probe, expected) in cases {
            assert_eq!(
                derive_status(state.as_ref(), probe.as_ref()),
                expected,
                "state={:?} probe={:?}",
                state,
                probe
            );
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(InstanceStatus::Up.to_string(), "up");
        assert_eq!(InstanceStatus::Starting.to_string(), "starting");
    }
}
