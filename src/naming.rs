//! Naming scheme for engine-side resources.
//!
//! Container and volume names are derived from the profile name plus a
//! prefix. The prefix is passed explicitly so that independent callers
//! (for example parallel test suites) can operate side by side on one
//! engine without colliding.

/// Prefix used for containers created by this tool.
pub const DEFAULT_CONTAINER_PREFIX: &str = "aiidalab_";

/// Naming scheme for containers and volumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    container_prefix: String,
}

impl Naming {
    /// Create a naming scheme with a custom container prefix.
    pub fn new(container_prefix: impl Into<String>) -> Self {
        Self {
            container_prefix: container_prefix.into(),
        }
    }

    /// The container prefix.
    pub fn container_prefix(&self) -> &str {
        &self.container_prefix
    }

    /// Container name for a profile.
    pub fn container_name(&self, profile_name: &str) -> String {
        format!("{}{}", self.container_prefix, profile_name)
    }

    /// Name of the package-cache (conda) volume for a profile.
    pub fn conda_volume_name(&self, profile_name: &str) -> String {
        format!("{}_conda", self.container_name(profile_name))
    }

    /// Default named volume used for the home directory.
    pub fn default_home_volume(&self, profile_name: &str) -> String {
        format!("{}_home", self.container_name(profile_name))
    }

    /// Recover the profile name from a container name.
    ///
    /// Returns `None` if the name does not carry the prefix or nothing is
    /// left after stripping it. A leading `/` (as reported by the engine's
    /// inspect output) is ignored.
    pub fn profile_name_from_container<'a>(&self, container_name: &'a str) -> Option<&'a str> {
        let name = container_name.strip_prefix('/').unwrap_or(container_name);
        name.strip_prefix(self.container_prefix.as_str())
            .filter(|rest| !rest.is_empty())
    }
}

impl Default for Naming {
    fn default() -> Self {
        Self::new(DEFAULT_CONTAINER_PREFIX)
    }
}
