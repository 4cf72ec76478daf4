//! Configuration drift detection.
//!
//! Compares an existing container with the profile it is supposed to
//! implement. The result is advisory: nothing here changes the container,
//! the caller decides whether drift warrants a recreate.

use crate::error::Result;
use crate::instance::Instance;
use crate::introspect::{mount_source_for, profile_from_container};
use crate::mount::plan_mounts;

/// The container runs a different image than the profile resolves to.
pub const IMAGE_CHANGED: &str = "Image has changed.";

/// A mount source differs from the planned one.
pub const MOUNTS_CHANGED: &str = "Mount configuration has changed.";

/// The introspected profile differs from the desired one.
pub const PROFILE_CHANGED: &str = "Profile configuration has changed.";

/// List the ways the instance's container deviates from its profile.
///
/// Fails with [`Error::RequiresContainer`](crate::error::Error::RequiresContainer)
/// if there is no container. An empty list means no drift.
pub async fn configuration_changes(instance: &Instance) -> Result<Vec<String>> {
    let container = instance.require_container().await?;
    let engine = instance.engine();
    let mut changes = Vec::new();

    // An image that cannot be resolved locally would be pulled on create,
    // so the container cannot be running it.
    let desired_image = instance.image().await?;
    if desired_image.as_ref().map(|image| image.id.as_str()) != Some(container.image_id.as_str()) {
        changes.push(IMAGE_CHANGED.to_string());
    }

    let mounts_match = match plan_mounts(instance.profile(), instance.naming()) {
        Ok(planned) => planned
            .iter()
            .all(|mount| mount_source_for(&container, &mount.target) == Some(mount.source.as_str())),
        Err(e) => {
            tracing::debug!(error = %e, "unable to plan mounts for drift check");
            false
        }
    };
    if !mounts_match {
        changes.push(MOUNTS_CHANGED.to_string());
    }

    let current_image = engine.image(&container.image_id).await?;
    match profile_from_container(&container, current_image.as_ref(), instance.naming()) {
        Ok(current) if &current == instance.profile() => {}
        Ok(_) => changes.push(PROFILE_CHANGED.to_string()),
        Err(e) => {
            tracing::debug!(container = %container.name, error = %e, "unable to introspect container");
            changes.push(PROFILE_CHANGED.to_string());
        }
    }

    for change in &changes {
        tracing::debug!(container = %container.name, "{}", change);
    }
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::{registry_image, FakeEngine};
    use crate::naming::Naming;
    use crate::profile::{Profile, DEFAULT_IMAGE};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (Arc<FakeEngine>, Instance) {
        let engine = Arc::new(
            FakeEngine::new().with_registry_image(registry_image(DEFAULT_IMAGE, "1111")),
        );
        let naming = Naming::new("tests_drift_");
        let profile = Profile::builder("default").naming(&naming).build().unwrap();
        let instance = Instance::new(engine.clone(), profile).with_naming(naming);
        (engine, instance)
    }

    #[tokio::test]
    async fn test_unchanged_instance_has_no_drift() {
        let (_engine, instance) = setup();
        instance.create().await.unwrap();
        assert!(configuration_changes(&instance).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mount_source_change_is_detected() {
        let (engine, instance) = setup();
        instance.create().await.unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().display().to_string();
        engine.update_container(&instance.container_name(), |container| {
            for mount in container.mounts.iter_mut() {
                if mount.target == "/home/jovyan" {
                    mount.source = path.clone();
                }
            }
        });

        let changes = configuration_changes(&instance).await.unwrap();
        assert_eq!(changes, vec![MOUNTS_CHANGED, PROFILE_CHANGED]);
    }

    #[tokio::test]
    async fn test_missing_mount_is_detected() {
        let (engine, instance) = setup();
        instance.create().await.unwrap();
        engine.update_container(&instance.container_name(), |container| {
            container.mounts.retain(|m| m.target != "/home/jovyan/.conda");
        });
        let changes = configuration_changes(&instance).await.unwrap();
        assert!(changes.contains(&MOUNTS_CHANGED.to_string()));
    }

    #[tokio::test]
    async fn test_image_id_change_is_detected() {
        let (engine, instance) = setup();
        instance.create().await.unwrap();
        engine.update_container(&instance.container_name(), |container| {
            container.image_id = "sha256:0000".into();
        });
        let changes = configuration_changes(&instance).await.unwrap();
        assert!(changes.contains(&IMAGE_CHANGED.to_string()));
    }

    #[tokio::test]
    async fn test_drift_does_not_mutate() {
        let (engine, mut instance) = setup();
        instance.create().await.unwrap();
        let before = instance.container().await.unwrap();

        instance.set_profile(
            instance
                .profile()
                .to_builder()
                .port(Some(9999))
                .build()
                .unwrap(),
        );
        let changes = configuration_changes(&instance).await.unwrap();
        assert_eq!(changes, vec![PROFILE_CHANGED]);
        assert_eq!(instance.container().await.unwrap(), before);
        assert_eq!(engine.container_count(), 1);
    }
}
