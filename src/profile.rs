//! Profiles: declarative descriptions of an instance.
//!
//! A [`Profile`] is validated completely when it is built. Invalid names,
//! malformed extra mounts and missing bind sources are rejected here, long
//! before any engine call is made.

use crate::error::{Error, Result};
use crate::mount::{parse_mount_spec, validate_source};
use crate::naming::Naming;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Name of the profile created when no configuration exists.
pub const MAIN_PROFILE_NAME: &str = "default";

/// Host port bound by default.
pub const DEFAULT_PORT: u16 = 8888;

/// Image used by default.
pub const DEFAULT_IMAGE: &str = "aiidalab/full-stack:latest";

/// System user of the default image.
pub const DEFAULT_SYSTEM_USER: &str = "jovyan";

/// Environment variable carrying the default apps.
pub const ENV_DEFAULT_APPS: &str = "AIIDALAB_DEFAULT_APPS";
/// Environment variable carrying the notebook access token.
pub const ENV_JUPYTER_TOKEN: &str = "JUPYTER_TOKEN";
/// Environment variable carrying the system user.
pub const ENV_SYSTEM_USER: &str = "SYSTEM_USER";
/// Environment variable read by the notebook stack for the user name.
pub const ENV_NB_USER: &str = "NB_USER";

// Docker allows underscores in container names; profile names do not, so
// that they remain usable as compose project names.
static VALID_PROFILE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9.-]+$").expect("valid regex"));

/// Check whether a string is usable as a profile name.
pub fn is_valid_profile_name(name: &str) -> bool {
    let encoded: String = url::form_urlencoded::byte_serialize(name.as_bytes()).collect();
    VALID_PROFILE_NAME.is_match(name) && encoded == name
}

/// Declarative description of a desired instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    name: String,
    port: Option<u16>,
    default_apps: Vec<String>,
    system_user: String,
    image: String,
    home_mount: String,
    extra_mounts: BTreeSet<String>,
}

impl Profile {
    /// Start building a profile with the given name.
    pub fn builder(name: impl Into<String>) -> ProfileBuilder {
        ProfileBuilder::new(name)
    }

    /// Builder pre-populated with this profile's values.
    pub fn to_builder(&self) -> ProfileBuilder {
        ProfileBuilder {
            name: self.name.clone(),
            port: self.port,
            default_apps: self.default_apps.clone(),
            system_user: self.system_user.clone(),
            image: self.image.clone(),
            home_mount: Some(self.home_mount.clone()),
            extra_mounts: self.extra_mounts.iter().cloned().collect(),
            naming: Naming::default(),
        }
    }

    /// Unique profile name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host port, `None` lets the engine pick one.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Apps installed on first start.
    pub fn default_apps(&self) -> &[String] {
        &self.default_apps
    }

    /// User account inside the container.
    pub fn system_user(&self) -> &str {
        &self.system_user
    }

    /// Image reference.
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Absolute host path or volume name backing the home directory.
    pub fn home_mount(&self) -> &str {
        &self.home_mount
    }

    /// Extra mounts, normalized to `source:target:mode`.
    pub fn extra_mounts(&self) -> &BTreeSet<String> {
        &self.extra_mounts
    }

    /// Home directory inside the container.
    pub fn home_dir(&self) -> String {
        format!("/home/{}", self.system_user)
    }

    /// Package cache directory inside the container.
    pub fn conda_dir(&self) -> String {
        format!("/home/{}/.conda", self.system_user)
    }

    /// Container environment for this profile.
    pub fn environment(&self, jupyter_token: &str) -> Vec<(String, String)> {
        vec![
            (ENV_DEFAULT_APPS.to_string(), self.default_apps.join(" ")),
            (ENV_JUPYTER_TOKEN.to_string(), jupyter_token.to_string()),
            (ENV_SYSTEM_USER.to_string(), self.system_user.clone()),
            (ENV_NB_USER.to_string(), self.system_user.clone()),
        ]
    }

    /// Serialize to TOML. The name is not part of the document.
    pub fn dumps(&self) -> Result<String> {
        toml::to_string(&ProfileDocument::from(self))
            .map_err(|e| Error::config("serialize profile", e.to_string()))
    }

    /// Parse a profile from TOML produced by [`Profile::dumps`].
    pub fn loads(name: &str, s: &str) -> Result<Self> {
        let document: ProfileDocument =
            toml::from_str(s).map_err(|e| Error::config("parse profile", e.to_string()))?;
        document.into_profile(name, &Naming::default())
    }
}

impl Profile {
    /// The main profile, with its home volume named by `naming`.
    pub fn main(naming: &Naming) -> Self {
        Self {
            name: MAIN_PROFILE_NAME.to_string(),
            port: Some(DEFAULT_PORT),
            default_apps: Vec::new(),
            system_user: DEFAULT_SYSTEM_USER.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            home_mount: naming.default_home_volume(MAIN_PROFILE_NAME),
            extra_mounts: BTreeSet::new(),
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::main(&Naming::default())
    }
}

/// Builder for [`Profile`]; validation happens in [`ProfileBuilder::build`].
#[derive(Debug, Clone)]
pub struct ProfileBuilder {
    name: String,
    port: Option<u16>,
    default_apps: Vec<String>,
    system_user: String,
    image: String,
    home_mount: Option<String>,
    extra_mounts: Vec<String>,
    naming: Naming,
}

impl ProfileBuilder {
    /// Create a builder with default values.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port: Some(DEFAULT_PORT),
            default_apps: Vec::new(),
            system_user: DEFAULT_SYSTEM_USER.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            home_mount: None,
            extra_mounts: Vec::new(),
            naming: Naming::default(),
        }
    }

    /// Set the profile name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the host port (`None` for an engine-assigned port).
    pub fn port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    /// Set the default apps.
    pub fn default_apps(mut self, apps: Vec<String>) -> Self {
        self.default_apps = apps;
        self
    }

    /// Set the system user.
    pub fn system_user(mut self, user: impl Into<String>) -> Self {
        self.system_user = user.into();
        self
    }

    /// Set the image reference.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Set the home mount (absolute path or volume name).
    pub fn home_mount(mut self, home_mount: impl Into<String>) -> Self {
        self.home_mount = Some(home_mount.into());
        self
    }

    /// Add one extra mount specification.
    pub fn extra_mount(mut self, spec: impl Into<String>) -> Self {
        self.extra_mounts.push(spec.into());
        self
    }

    /// Replace all extra mount specifications.
    pub fn extra_mounts(mut self, specs: impl IntoIterator<Item = String>) -> Self {
        self.extra_mounts = specs.into_iter().collect();
        self
    }

    /// Naming scheme used to derive the default home volume.
    pub fn naming(mut self, naming: &Naming) -> Self {
        self.naming = naming.clone();
        self
    }

    /// Validate and build the profile.
    pub fn build(self) -> Result<Profile> {
        if !is_valid_profile_name(&self.name) {
            return Err(Error::invalid_profile_name(self.name));
        }

        let home_mount = self
            .home_mount
            .unwrap_or_else(|| self.naming.default_home_volume(&self.name));
        validate_source(&home_mount)?;

        let extra_mounts = self
            .extra_mounts
            .iter()
            .map(|spec| parse_mount_spec(spec).map(|mount| mount.to_spec()))
            .collect::<Result<BTreeSet<_>>>()?;

        let repository = self.image.split(':').next().unwrap_or_default();
        if repository.ends_with("aiidalab/full-stack") && self.system_user != DEFAULT_SYSTEM_USER
        {
            tracing::warn!(
                profile = %self.name,
                system_user = %self.system_user,
                "resetting the system user may create issues for this image"
            );
        }

        Ok(Profile {
            name: self.name,
            port: self.port,
            default_apps: self.default_apps,
            system_user: self.system_user,
            image: self.image,
            home_mount,
            extra_mounts,
        })
    }
}

/// On-disk shape of a profile.
///
/// An absent `port` means the engine assigns one, since TOML has no null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ProfileDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(default)]
    default_apps: Vec<String>,
    #[serde(default = "default_system_user")]
    system_user: String,
    #[serde(default = "default_image")]
    image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    home_mount: Option<String>,
    #[serde(default)]
    extra_mounts: Vec<String>,
}

fn default_system_user() -> String {
    DEFAULT_SYSTEM_USER.to_string()
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

impl ProfileDocument {
    pub(crate) fn into_profile(self, name: &str, naming: &Naming) -> Result<Profile> {
        let mut builder = Profile::builder(name)
            .naming(naming)
            .port(self.port)
            .default_apps(self.default_apps)
            .system_user(self.system_user)
            .image(self.image)
            .extra_mounts(self.extra_mounts);
        if let Some(home_mount) = self.home_mount {
            builder = builder.home_mount(home_mount);
        }
        builder.build()
    }
}

impl From<&Profile> for ProfileDocument {
    fn from(profile: &Profile) -> Self {
        Self {
            port: profile.port,
            default_apps: profile.default_apps.clone(),
            system_user: profile.system_user.clone(),
            image: profile.image.clone(),
            home_mount: Some(profile.home_mount.clone()),
            extra_mounts: profile.extra_mounts.iter().cloned().collect(),
        }
    }
}

/// Profiles keyed by name, as stored in the configuration file.
pub(crate) type ProfileTable = BTreeMap<String, ProfileDocument>;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const VALID_PROFILE_NAMES: &[&str] = &["abc", "Abc", "aBC", "a0", "a-a", "a-0", "a.b"];
    const INVALID_PROFILE_NAMES: &[&str] = &["", "a", ".a", "a_a", "_a", "aaa_", "a b", "a/b"];

    #[test]
    fn test_default_profile() {
        let profile = Profile::builder(MAIN_PROFILE_NAME).build().unwrap();
        assert_eq!(profile, Profile::default());
        assert_eq!(profile.port(), Some(DEFAULT_PORT));
        assert_eq!(profile.home_mount(), "aiidalab_default_home");
        assert_eq!(profile.home_dir(), "/home/jovyan");
        assert_eq!(profile.conda_dir(), "/home/jovyan/.conda");
    }

    #[test]
    fn test_main_profile_uses_naming() {
        let naming = Naming::new("tests_main_");
        let profile = Profile::main(&naming);
        assert_eq!(profile.home_mount(), "tests_main_default_home");
        assert_eq!(
            profile,
            Profile::builder(MAIN_PROFILE_NAME).naming(&naming).build().unwrap()
        );
    }

    #[test]
    fn test_valid_names_round_trip() {
        for name in VALID_PROFILE_NAMES {
            let profile = Profile::builder(*name).build().unwrap();
            assert_eq!(profile.name(), *name);
        }
    }

    #[test]
    fn test_invalid_names_rejected() {
        for name in INVALID_PROFILE_NAMES {
            let result = Profile::builder(*name).build();
            assert!(
                matches!(result, Err(Error::InvalidProfileName { .. })),
                "should reject '{}'",
                name
            );
        }
    }

    #[test]
    fn test_home_mount_defaults_to_prefixed_volume() {
        let naming = Naming::new("tests_x_");
        let profile = Profile::builder("dev").naming(&naming).build().unwrap();
        assert_eq!(profile.home_mount(), "tests_x_dev_home");
    }

    #[test]
    fn test_home_mount_validation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().display().to_string();

        for valid in ["some_volume".to_string(), path.clone(), format!("{}/home", path)] {
            let profile = Profile::builder("abc").home_mount(valid.clone()).build().unwrap();
            assert_eq!(profile.home_mount(), valid);
        }

        for invalid in ["@some_volume".to_string(), format!("./{}", path)] {
            assert!(Profile::builder("abc").home_mount(invalid).build().is_err());
        }
    }

    #[test]
    fn test_extra_mounts_are_normalized() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().display().to_string();
        let profile = Profile::builder("abc")
            .extra_mount(format!("{}:/opt/test", path))
            .extra_mount("vol_a:/opt/vol:ro")
            .build()
            .unwrap();

        let expected: BTreeSet<String> = [format!("{}:/opt/test:rw", path), "vol_a:/opt/vol:ro".into()]
            .into_iter()
            .collect();
        assert_eq!(profile.extra_mounts(), &expected);
    }

    #[test]
    fn test_invalid_extra_mount_fails_construction() {
        let result = Profile::builder("abc")
            .extra_mount("vol_a:/opt/test:invalid_mode")
            .build();
        assert!(matches!(result, Err(Error::InvalidMountSpec { .. })));
    }

    #[test]
    fn test_environment() {
        let profile = Profile::builder("abc")
            .default_apps(vec!["quantum-espresso".into(), "mfa".into()])
            .build()
            .unwrap();
        let env = profile.environment("t0k3n");
        assert!(env.contains(&(ENV_DEFAULT_APPS.into(), "quantum-espresso mfa".into())));
        assert!(env.contains(&(ENV_JUPYTER_TOKEN.into(), "t0k3n".into())));
        assert!(env.contains(&(ENV_SYSTEM_USER.into(), "jovyan".into())));
        assert!(env.contains(&(ENV_NB_USER.into(), "jovyan".into())));
    }

    #[test]
    fn test_equality() {
        let profile = Profile::default();
        assert_eq!(profile, profile.clone());
        let other = profile.to_builder().name("other").build().unwrap();
        assert_ne!(profile, other);
    }

    #[test]
    fn test_dumps_loads() {
        let dir = TempDir::new().unwrap();
        let profiles = vec![
            Profile::default(),
            Profile::builder("no-port").port(None).build().unwrap(),
            Profile::builder("full")
                .port(Some(9999))
                .default_apps(vec!["a".into(), "b".into()])
                .system_user("aiida")
                .image("aiidalab/base:2024.1")
                .home_mount(dir.path().display().to_string())
                .extra_mount("vol_a:/opt/vol:ro")
                .build()
                .unwrap(),
        ];

        for profile in profiles {
            let dumped = profile.dumps().unwrap();
            assert!(!dumped.contains("name"), "name travels separately");
            assert_eq!(Profile::loads(profile.name(), &dumped).unwrap(), profile);
        }
    }

    #[test]
    fn test_loads_rejects_invalid_content() {
        assert!(Profile::loads("abc", "port = \"not a number\"").is_err());
        assert!(Profile::loads("abc", "extra_mounts = [\"x\"]").is_err());
        assert!(Profile::loads("a_b", "").is_err());
    }
}
