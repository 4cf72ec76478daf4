//! Mount planning.
//!
//! This module turns a [`Profile`] into the list of mounts the container is
//! created with, and parses the `source:target[:mode]` strings users put in
//! `extra_mounts`.
//!
//! A mount source that is an absolute path is a bind mount; anything else
//! is treated as the name of an engine-managed volume.

use crate::error::{Error, Result};
use crate::naming::Naming;
use crate::profile::Profile;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::Path;

/// Valid container, image and volume names as accepted by Docker.
static VALID_VOLUME_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]+$").expect("valid regex"));

/// Kind of mount, determined by the shape of its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    /// Host filesystem path.
    Bind,
    /// Engine-managed named volume.
    Volume,
}

impl MountKind {
    /// Bind for absolute paths, volume for everything else.
    pub fn for_source(source: &str) -> Self {
        if Path::new(source).is_absolute() {
            MountKind::Bind
        } else {
            MountKind::Volume
        }
    }
}

impl fmt::Display for MountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountKind::Bind => write!(f, "bind"),
            MountKind::Volume => write!(f, "volume"),
        }
    }
}

/// Canonical mount representation shared by the planner and the
/// introspector.
///
/// `source` is a host path for bind mounts and a volume name for volumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountDescriptor {
    /// Bind or volume.
    pub kind: MountKind,
    /// Host path or volume name.
    pub source: String,
    /// Path inside the container.
    pub target: String,
    /// Read-only mount.
    pub read_only: bool,
}

impl MountDescriptor {
    /// Create a writable mount, deriving the kind from the source.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            kind: MountKind::for_source(&source),
            source,
            target: target.into(),
            read_only: false,
        }
    }

    /// Make the mount read-only.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Access mode token, `ro` or `rw`.
    pub fn mode(&self) -> &'static str {
        if self.read_only {
            "ro"
        } else {
            "rw"
        }
    }

    /// Serialize as `source:target:mode`.
    pub fn to_spec(&self) -> String {
        format!("{}:{}:{}", self.source, self.target, self.mode())
    }
}

/// Check whether a string is acceptable as a volume name.
pub fn is_valid_volume_name(name: &str) -> bool {
    VALID_VOLUME_NAME.is_match(name)
}

/// Validate a mount source: absolute paths are accepted as-is, anything
/// else must be a valid volume name.
pub fn validate_source(source: &str) -> Result<MountKind> {
    match MountKind::for_source(source) {
        MountKind::Bind => Ok(MountKind::Bind),
        MountKind::Volume if is_valid_volume_name(source) => Ok(MountKind::Volume),
        MountKind::Volume => Err(Error::invalid_volume_name(source)),
    }
}

/// Parse a mount specification string.
///
/// Format: `source:target[:mode]`
///
/// - `source` - Absolute host path (bind mount) or volume name
/// - `target` - Absolute path inside the container
/// - `mode` - Optional, `ro` or `rw` (default `rw`)
///
/// Unlike the home mount, bind sources of extra mounts are never created
/// on demand, so a missing source is rejected here.
pub fn parse_mount_spec(spec: &str) -> Result<MountDescriptor> {
    let parts: Vec<&str> = spec.split(':').collect();

    let (source, target, read_only) = match parts.as_slice() {
        [source, target] => (*source, *target, false),
        [source, target, "ro"] => (*source, *target, true),
        [source, target, "rw"] => (*source, *target, false),
        [_, _, mode] => {
            return Err(Error::invalid_mount_spec(
                spec,
                format!("invalid mode '{}' (expected ro or rw)", mode),
            ))
        }
        _ => {
            return Err(Error::invalid_mount_spec(
                spec,
                "expected source:target[:ro|:rw]",
            ))
        }
    };

    if source.is_empty() {
        return Err(Error::invalid_mount_spec(spec, "source must not be empty"));
    }
    if !target.starts_with('/') {
        return Err(Error::invalid_mount_spec(
            spec,
            format!("target must be an absolute path: {}", target),
        ));
    }

    if validate_source(source)? == MountKind::Bind && !Path::new(source).exists() {
        return Err(Error::MountSourceNotFound {
            path: source.into(),
        });
    }

    Ok(MountDescriptor::new(source, target).read_only(read_only))
}

/// Mount for the package cache, always present.
pub fn conda_mount(profile: &Profile, naming: &Naming) -> MountDescriptor {
    MountDescriptor::new(
        naming.conda_volume_name(profile.name()),
        profile.conda_dir(),
    )
}

/// Mount for the user's home directory.
pub fn home_mount(profile: &Profile) -> MountDescriptor {
    MountDescriptor::new(profile.home_mount(), profile.home_dir())
}

/// Derive the ordered mounts a container for `profile` is created with.
///
/// The package cache comes first, then the home directory, then every
/// extra mount. Extra mounts were validated when the profile was built;
/// they are parsed again here because bind sources may have disappeared
/// since.
pub fn plan_mounts(profile: &Profile, naming: &Naming) -> Result<Vec<MountDescriptor>> {
    let mut mounts = vec![conda_mount(profile, naming), home_mount(profile)];
    for spec in profile.extra_mounts() {
        mounts.push(parse_mount_spec(spec)?);
    }
    Ok(mounts)
}
