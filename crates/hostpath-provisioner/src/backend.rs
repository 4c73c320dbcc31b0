//! Directory-per-volume backend
//!
//! Each volume is a directory named after the volume under a shared root.
//! Directories are world-writable so that any workload can use them.

use async_trait::async_trait;
use hostpath_types::{AssetDescriptor, Volume};
use provision_controller::{ProvisionError, ProvisionRequest, Provisioner};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

const VOLUME_MODE: u32 = 0o777;

/// Provisions volumes as directories under `root`
#[derive(Debug, Clone)]
pub struct HostPathProvisioner {
    identity: String,
    root: PathBuf,
}

impl HostPathProvisioner {
    /// Create a backend acting as `identity`
    pub fn new(identity: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            identity: identity.into(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory backing `volume_name`
    pub fn path_for(&self, volume_name: &str) -> PathBuf {
        self.root.join(volume_name)
    }

    /// Directory for `volume_name`, which must be a single plain path component
    fn volume_dir(&self, volume_name: &str) -> Result<PathBuf, ProvisionError> {
        let mut components = Path::new(volume_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.path_for(volume_name)),
            _ => Err(ProvisionError::Backend(format!(
                "invalid volume name {:?}",
                volume_name
            ))),
        }
    }

    /// Check that the root exists and is writable, creating it if needed
    pub async fn probe_root(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let probe = self.root.join(format!(".probe-{}", std::process::id()));
        tokio::fs::write(&probe, b"").await?;
        tokio::fs::remove_file(&probe).await
    }
}

#[async_trait]
impl Provisioner for HostPathProvisioner {
    async fn provision(&self, request: &ProvisionRequest) -> Result<AssetDescriptor, ProvisionError> {
        let path = self.volume_dir(&request.volume_name)?;
        debug!(path = %path.display(), "Creating volume directory");

        // Existing directories are reused
        tokio::fs::create_dir_all(&path).await?;
        set_open_permissions(&path).await?;

        info!(path = %path.display(), claim = %request.claim, "Created volume directory");
        Ok(AssetDescriptor::HostPath { path })
    }

    async fn delete(&self, volume: &Volume) -> Result<(), ProvisionError> {
        let Some(owner) = volume.owner_identity() else {
            return Err(ProvisionError::Backend(
                "identity annotation not found on volume".into(),
            ));
        };
        if owner != self.identity {
            return Err(ProvisionError::ignored(
                "identity annotation on volume does not match ours",
            ));
        }

        // Only the directory this backend would have created is removed
        let expected = self.volume_dir(&volume.name)?;
        let AssetDescriptor::HostPath { path } = &volume.source;
        if path != &expected {
            return Err(ProvisionError::Backend(format!(
                "volume path {} does not match {}",
                path.display(),
                expected.display()
            )));
        }

        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {
                info!(path = %path.display(), "Removed volume directory");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Volume directory already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
async fn set_open_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(VOLUME_MODE)).await
}

#[cfg(not(unix))]
async fn set_open_permissions(_path: &Path) -> io::Result<()> {
    let _ = VOLUME_MODE;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostpath_types::{
        Claim, ClaimKey, Quantity, ReclaimPolicy, VolumePhase, PROVISIONED_BY_ANNOTATION,
        PROVISIONER_IDENTITY_ANNOTATION, PROVISIONER_NAME,
    };
    use std::collections::BTreeMap;

    fn request(claim: &Claim) -> ProvisionRequest {
        ProvisionRequest::for_claim(claim, BTreeMap::new())
    }

    fn volume_at(path: PathBuf, owner: Option<&str>) -> Volume {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            PROVISIONED_BY_ANNOTATION.to_string(),
            PROVISIONER_NAME.to_string(),
        );
        if let Some(owner) = owner {
            annotations.insert(
                PROVISIONER_IDENTITY_ANNOTATION.to_string(),
                owner.to_string(),
            );
        }
        Volume {
            name: "pvc-test".into(),
            capacity: Quantity::gibibytes(1),
            access_modes: Vec::new(),
            reclaim_policy: ReclaimPolicy::Delete,
            source: AssetDescriptor::HostPath { path },
            claim_ref: None,
            phase: VolumePhase::Released,
            annotations,
            created_at: chrono::Utc::now(),
        }
    }

    fn claim() -> Claim {
        Claim::new(ClaimKey::new("default", "C1"), "hostpath", Quantity::gibibytes(1))
    }

    #[tokio::test]
    async fn test_provision_creates_open_directory() {
        let root = tempfile::tempdir().unwrap();
        let backend = HostPathProvisioner::new("node-a", root.path());
        let claim = claim();

        let descriptor = backend.provision(&request(&claim)).await.unwrap();
        let expected = root.path().join(claim.volume_name_for());
        assert_eq!(
            descriptor,
            AssetDescriptor::HostPath {
                path: expected.clone()
            }
        );
        assert!(expected.is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&expected).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o777);
        }
    }

    #[tokio::test]
    async fn test_provision_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let backend = HostPathProvisioner::new("node-a", root.path());
        let claim = claim();

        let first = backend.provision(&request(&claim)).await.unwrap();
        let AssetDescriptor::HostPath { path } = &first;
        std::fs::write(path.join("data"), b"keep").unwrap();

        let second = backend.provision(&request(&claim)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(path.join("data")).unwrap(), b"keep");
    }

    #[tokio::test]
    async fn test_delete_removes_tree_and_tolerates_absence() {
        let root = tempfile::tempdir().unwrap();
        let backend = HostPathProvisioner::new("node-a", root.path());
        let path = root.path().join("pvc-test");
        std::fs::create_dir_all(path.join("nested")).unwrap();
        std::fs::write(path.join("nested/file"), b"x").unwrap();

        let volume = volume_at(path.clone(), Some("node-a"));
        backend.delete(&volume).await.unwrap();
        assert!(!path.exists());

        // Already gone
        backend.delete(&volume).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_refuses_foreign_volume() {
        let root = tempfile::tempdir().unwrap();
        let backend = HostPathProvisioner::new("node-a", root.path());
        let path = root.path().join("pvc-test");
        std::fs::create_dir_all(&path).unwrap();

        let err = backend
            .delete(&volume_at(path.clone(), Some("node-b")))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Ignored { .. }));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_delete_requires_identity_annotation() {
        let root = tempfile::tempdir().unwrap();
        let backend = HostPathProvisioner::new("node-a", root.path());
        let path = root.path().join("pvc-test");
        std::fs::create_dir_all(&path).unwrap();

        let err = backend.delete(&volume_at(path.clone(), None)).await.unwrap_err();
        assert!(err.is_counted());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_delete_refuses_paths_outside_root() {
        let root = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let backend = HostPathProvisioner::new("node-a", root.path());

        let err = backend
            .delete(&volume_at(elsewhere.path().to_path_buf(), Some("node-a")))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Backend(_)));
        assert!(elsewhere.path().exists());
    }

    #[tokio::test]
    async fn test_delete_refuses_parent_traversal() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("volumes");
        let sibling = parent.path().join("sibling");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&sibling).unwrap();
        let backend = HostPathProvisioner::new("node-a", &root);

        let err = backend
            .delete(&volume_at(root.join("..").join("sibling"), Some("node-a")))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Backend(_)));
        assert!(sibling.is_dir());
    }

    #[tokio::test]
    async fn test_delete_refuses_root_itself() {
        let root = tempfile::tempdir().unwrap();
        let backend = HostPathProvisioner::new("node-a", root.path());
        let other = root.path().join("pvc-other");
        std::fs::create_dir_all(&other).unwrap();

        let err = backend
            .delete(&volume_at(root.path().to_path_buf(), Some("node-a")))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Backend(_)));
        assert!(other.is_dir());
    }

    #[tokio::test]
    async fn test_rejects_volume_names_that_leave_root() {
        let root = tempfile::tempdir().unwrap();
        let backend = HostPathProvisioner::new("node-a", root.path());

        let mut volume = volume_at(root.path().join("pvc-test"), Some("node-a"));
        volume.name = "../pvc-test".into();
        assert!(matches!(
            backend.delete(&volume).await,
            Err(ProvisionError::Backend(_))
        ));

        let mut request = request(&claim());
        request.volume_name = "..".into();
        assert!(matches!(
            backend.provision(&request).await,
            Err(ProvisionError::Backend(_))
        ));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_probe_creates_missing_root() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("volumes");
        let backend = HostPathProvisioner::new("node-a", &root);

        backend.probe_root().await.unwrap();
        assert!(root.is_dir());
        assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
    }
}
