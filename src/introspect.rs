//! Profile introspection.
//!
//! Reconstructs a [`Profile`] from what the engine reports about an
//! existing container: environment, mounts, image tags and port bindings.
//! This is the inverse of [`crate::mount::plan_mounts`] plus the container
//! environment, so that for any profile `p` created through an
//! [`Instance`](crate::instance::Instance),
//! `profile_from_container(container_of(p)) == p`.

use crate::engine::{ContainerDetails, ImageDetails};
use crate::error::{Error, Result};
use crate::naming::Naming;
use crate::profile::{Profile, DEFAULT_IMAGE, ENV_DEFAULT_APPS, ENV_SYSTEM_USER};

/// Container port the notebook service listens on.
pub const NOTEBOOK_PORT: &str = "8888/tcp";

/// Value of an environment variable baked into the container.
pub fn env_var<'a>(container: &'a ContainerDetails, key: &str) -> Option<&'a str> {
    container.env.iter().find_map(|entry| match entry.split_once('=') {
        Some((k, value)) if k == key => Some(value),
        _ => None,
    })
}

/// Host path or volume name mounted at `destination`.
pub fn mount_source_for<'a>(container: &'a ContainerDetails, destination: &str) -> Option<&'a str> {
    container
        .mounts
        .iter()
        .find(|mount| mount.target == destination)
        .map(|mount| mount.source.as_str())
}

/// Whether the mount at `destination` is read-only, `None` if nothing is
/// mounted there.
pub fn is_mount_read_only(container: &ContainerDetails, destination: &str) -> Option<bool> {
    container
        .mounts
        .iter()
        .find(|mount| mount.target == destination)
        .map(|mount| mount.read_only)
}

/// Host port requested for the notebook service at creation time.
///
/// `None` when the engine was asked to pick one.
pub fn configured_host_port(container: &ContainerDetails) -> Option<u16> {
    container
        .port_bindings
        .get(NOTEBOOK_PORT)?
        .first()?
        .host_port
        .as_deref()?
        .parse()
        .ok()
        .filter(|port| *port != 0)
}

/// Host ports currently published for a container port.
pub fn published_ports(container: &ContainerDetails, container_port: &str) -> Vec<u16> {
    container
        .ports
        .get(container_port)
        .map(|bindings| {
            bindings
                .iter()
                .filter_map(|b| b.host_port.as_deref()?.parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Host ports currently published for the notebook service.
pub fn host_ports(container: &ContainerDetails) -> Vec<u16> {
    published_ports(container, NOTEBOOK_PORT)
}

/// Image reference to record in an introspected profile.
fn image_reference(container: &ContainerDetails, image: Option<&ImageDetails>) -> String {
    let tags = image.map(|i| i.tags.as_slice()).unwrap_or_default();
    if tags.iter().any(|tag| tag == DEFAULT_IMAGE) {
        DEFAULT_IMAGE.to_string()
    } else if let Some(tag) = tags.first() {
        tag.clone()
    } else {
        container.image.clone()
    }
}

/// Reconstruct the profile a managed container was created from.
///
/// `image` is the container's image as resolved by the engine; it supplies
/// the tag since containers are created from a pinned digest.
pub fn profile_from_container(
    container: &ContainerDetails,
    image: Option<&ImageDetails>,
    naming: &Naming,
) -> Result<Profile> {
    let not_managed = || Error::NotManagedContainer {
        name: container.name.clone(),
    };

    let name = naming
        .profile_name_from_container(&container.name)
        .ok_or_else(not_managed)?;
    let system_user = env_var(container, ENV_SYSTEM_USER).ok_or_else(not_managed)?;

    let default_apps = env_var(container, ENV_DEFAULT_APPS)
        .map(|apps| apps.split_whitespace().map(String::from).collect())
        .unwrap_or_default();

    let mut builder = Profile::builder(name)
        .naming(naming)
        .port(configured_host_port(container))
        .default_apps(default_apps)
        .system_user(system_user)
        .image(image_reference(container, image));

    let home_dir = format!("/home/{}", system_user);
    let conda_dir = format!("{}/.conda", home_dir);
    if let Some(source) = mount_source_for(container, &home_dir) {
        builder = builder.home_mount(source);
    }

    let extra_mounts = container
        .mounts
        .iter()
        .filter(|mount| mount.target != home_dir && mount.target != conda_dir)
        .map(|mount| mount.to_spec());

    builder.extra_mounts(extra_mounts).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ContainerState, PortBinding, PortMap};
    use crate::mount::{plan_mounts, MountDescriptor};
    use tempfile::TempDir;

    fn container_for(profile: &Profile, naming: &Naming) -> ContainerDetails {
        let mut port_bindings = PortMap::new();
        port_bindings.insert(
            NOTEBOOK_PORT.to_string(),
            vec![PortBinding::to_host(profile.port())],
        );
        ContainerDetails {
            id: "abc".into(),
            name: naming.container_name(profile.name()),
            image_id: "sha256:1".into(),
            image: "aiidalab/full-stack@sha256:1".into(),
            state: ContainerState::Created,
            env: profile
                .environment("token")
                .into_iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect(),
            mounts: plan_mounts(profile, naming).unwrap(),
            port_bindings,
            ports: PortMap::new(),
        }
    }

    fn image_with_tag(tag: &str) -> ImageDetails {
        ImageDetails {
            id: "sha256:1".into(),
            tags: vec![tag.into()],
            digests: vec![],
        }
    }

    #[test]
    fn test_env_var() {
        let naming = Naming::default();
        let container = container_for(&Profile::default(), &naming);
        assert_eq!(env_var(&container, "JUPYTER_TOKEN"), Some("token"));
        assert_eq!(env_var(&container, "SYSTEM_USER"), Some("jovyan"));
        assert_eq!(env_var(&container, "MISSING"), None);
    }

    #[test]
    fn test_round_trip_volume_home() {
        let naming = Naming::new("tests_rt_");
        let profile = Profile::builder("default")
            .naming(&naming)
            .default_apps(vec!["aiidalab-widgets-base".into()])
            .build()
            .unwrap();
        let container = container_for(&profile, &naming);
        let image = image_with_tag(DEFAULT_IMAGE);
        let introspected = profile_from_container(&container, Some(&image), &naming).unwrap();
        assert_eq!(introspected, profile);
    }

    #[test]
    fn test_round_trip_bind_home_and_extras() {
        let naming = Naming::new("tests_rt_");
        let home = TempDir::new().unwrap();
        let extra = TempDir::new().unwrap();
        let profile = Profile::builder("dev")
            .naming(&naming)
            .port(None)
            .system_user("aiida")
            .image("aiidalab/base:2024.1")
            .home_mount(home.path().display().to_string())
            .extra_mount(format!("{}:/opt/extra:ro", extra.path().display()))
            .extra_mount("data_volume:/opt/data")
            .build()
            .unwrap();
        let container = container_for(&profile, &naming);
        let image = image_with_tag("aiidalab/base:2024.1");
        let introspected = profile_from_container(&container, Some(&image), &naming).unwrap();
        assert_eq!(introspected, profile);
        assert_eq!(is_mount_read_only(&container, "/opt/extra"), Some(true));
        assert_eq!(is_mount_read_only(&container, "/opt/missing"), None);
    }

    #[test]
    fn test_image_prefers_default_tag() {
        let container = container_for(&Profile::default(), &Naming::default());
        let image = ImageDetails {
            id: "sha256:1".into(),
            tags: vec!["aiidalab/full-stack:2024.1".into(), DEFAULT_IMAGE.into()],
            digests: vec![],
        };
        assert_eq!(image_reference(&container, Some(&image)), DEFAULT_IMAGE);
        assert_eq!(
            image_reference(&container, None),
            "aiidalab/full-stack@sha256:1"
        );
    }

    #[test]
    fn test_not_managed_container() {
        let naming = Naming::default();
        let mut container = container_for(&Profile::default(), &naming);
        container.name = "postgres".into();
        let result = profile_from_container(&container, None, &naming);
        assert!(matches!(result, Err(Error::NotManagedContainer { .. })));

        let other = Naming::new("other_");
        let container = container_for(&Profile::default(), &naming);
        assert!(profile_from_container(&container, None, &other).is_err());
    }

    #[test]
    fn test_missing_system_user_is_not_managed() {
        let naming = Naming::default();
        let mut container = container_for(&Profile::default(), &naming);
        container.env.retain(|e| !e.starts_with("SYSTEM_USER="));
        assert!(matches!(
            profile_from_container(&container, None, &naming),
            Err(Error::NotManagedContainer { .. })
        ));
    }

    #[test]
    fn test_ports() {
        let naming = Naming::default();
        let mut container = container_for(&Profile::default(), &naming);
        assert_eq!(configured_host_port(&container), Some(8888));
        assert!(host_ports(&container).is_empty());

        container.ports.insert(
            NOTEBOOK_PORT.into(),
            vec![PortBinding {
                host_ip: Some("0.0.0.0".into()),
                host_port: Some("8888".into()),
            }],
        );
        assert_eq!(host_ports(&container), vec![8888]);

        let ephemeral = Profile::builder("eph").port(None).build().unwrap();
        let container = container_for(&ephemeral, &naming);
        assert_eq!(configured_host_port(&container), None);
    }

    #[test]
    fn test_mount_source_for() {
        let naming = Naming::default();
        let mut container = container_for(&Profile::default(), &naming);
        assert_eq!(
            mount_source_for(&container, "/home/jovyan"),
            Some("aiidalab_default_home")
        );
        container.mounts = vec![MountDescriptor::new("other_home", "/home/jovyan")];
        assert_eq!(mount_source_for(&container, "/home/jovyan"), Some("other_home"));
        assert_eq!(mount_source_for(&container, "/home/jovyan/.conda"), None);
    }
}
