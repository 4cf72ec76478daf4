//! aiidalab-launch - manage AiiDAlab notebook containers
//!
//! aiidalab-launch is a library and CLI that runs one notebook-serving
//! container per named profile on a local Docker engine.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │  aiidalab-launch CLI / AppState + Config        │
//! ├─────────────────────────────────────────────────┤
//! │  Instance (lifecycle, status, drift)            │
//! ├────────────────┬────────────────┬───────────────┤
//! │  mount planner │  introspector  │  readiness    │
//! ├────────────────┴────────────────┴───────────────┤
//! │  ContainerEngine (DockerEngine via bollard)     │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use aiidalab_launch::{DockerEngine, Instance, Profile};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> aiidalab_launch::Result<()> {
//! let engine = Arc::new(DockerEngine::connect().await?);
//! let instance = Instance::new(engine, Profile::default());
//!
//! instance.start().await?;
//! instance.wait_for_services(Some(Duration::from_secs(120))).await?;
//! println!("{}", instance.url().await?);
//! # Ok(())
//! # }
//! ```
//!
//! # Status
//!
//! | Engine state | Readiness | Status |
//! |--------------|-----------|--------|
//! | no container | - | `Down` |
//! | created | - | `Created` |
//! | exited | - | `Exited` |
//! | running | ready | `Up` |
//! | running | timed out | `Starting` |
//! | running | failed | `Unknown` |
//! | other | - | `Down` |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod app;
pub mod config;
pub mod drift;
pub mod engine;
pub mod error;
pub mod instance;
pub mod introspect;
pub mod mount;
pub mod naming;
pub mod profile;
pub mod readiness;

// Re-export main types for convenience
pub use app::AppState;
pub use config::Config;
pub use engine::{ContainerEngine, DockerEngine};
pub use error::{Error, Result};
pub use instance::{ExecHandle, Instance, InstanceStatus};
pub use mount::{MountDescriptor, MountKind};
pub use naming::Naming;
pub use profile::Profile;
pub use readiness::{ProbeSettings, ReadinessOutcome};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
