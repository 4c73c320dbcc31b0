//! Configuration for the hostpath provisioner daemon

use crate::error::{DaemonError, DaemonResult};
use hostpath_types::{AccessMode, Claim, ClaimKey, Quantity, ReclaimPolicy};
use provision_controller::{ConfigError, ControllerConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Default directory under which volumes are created
pub const DEFAULT_ROOT: &str = "/tmp/hostpath-provisioner";

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Identity of the node this instance runs on
    #[serde(default)]
    pub node_name: String,

    /// Directory holding provisioned volumes
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Control loop configuration
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Claims registered in the local store at startup
    #[serde(default)]
    pub claims: Vec<ClaimSeed>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            root: default_root(),
            controller: ControllerConfig::default(),
            logging: LoggingConfig::default(),
            claims: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// A claim declared in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSeed {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    pub name: String,

    /// Class name; the controller's class when omitted
    #[serde(default)]
    pub class: Option<String>,

    pub size: Quantity,

    #[serde(default)]
    pub access_modes: Vec<AccessMode>,

    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
}

impl ClaimSeed {
    pub fn into_claim(self, default_class: &str) -> Claim {
        let class = self.class.unwrap_or_else(|| default_class.to_string());
        let modes = if self.access_modes.is_empty() {
            vec![AccessMode::ReadWriteOnce]
        } else {
            self.access_modes
        };
        Claim::new(ClaimKey::new(self.namespace, self.name), class, self.size)
            .with_access_modes(modes)
            .with_reclaim_policy(self.reclaim_policy)
    }
}

/// Parses `namespace/name=size`, as given to `--claim`
impl FromStr for ClaimSeed {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, size) = s.split_once('=').ok_or_else(|| {
            DaemonError::Config(format!("claim {:?} must be namespace/name=size", s))
        })?;
        let key: ClaimKey = key
            .trim()
            .parse()
            .map_err(|e: hostpath_types::ClaimKeyError| DaemonError::Config(e.to_string()))?;
        let size: Quantity = size
            .parse()
            .map_err(|e: hostpath_types::QuantityError| DaemonError::Config(e.to_string()))?;

        Ok(Self {
            namespace: key.namespace,
            name: key.name,
            class: None,
            size,
            access_modes: Vec::new(),
            reclaim_policy: ReclaimPolicy::default(),
        })
    }
}

// Default value helpers
fn default_root() -> PathBuf {
    PathBuf::from(DEFAULT_ROOT)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then `KHP_`
    /// environment variables (`KHP_CONTROLLER__WORKERS=8`)
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("KHP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Check mandatory settings and derive the controller identity
    pub fn finalize(mut self) -> DaemonResult<Self> {
        if self.node_name.trim().is_empty() {
            return Err(ConfigError::Missing("node name").into());
        }
        if self.root.as_os_str().is_empty() {
            return Err(ConfigError::Missing("root").into());
        }
        if !self.root.is_absolute() {
            return Err(DaemonError::Config(format!(
                "root must be an absolute path, got {}",
                self.root.display()
            )));
        }

        self.controller.identity = self.node_name.clone();
        self.controller.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.root, PathBuf::from("/tmp/hostpath-provisioner"));
        assert_eq!(config.logging.level, "info");
        assert!(config.claims.is_empty());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.root, PathBuf::from(DEFAULT_ROOT));
        assert_eq!(config.controller.workers, ControllerConfig::default().workers);
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provisioner.toml");
        std::fs::write(
            &path,
            r#"
node_name = "node-a"
root = "/srv/volumes"

[controller]
workers = 2

[[claims]]
name = "data"
size = "1Gi"
reclaim_policy = "Retain"
"#,
        )
        .unwrap();

        let config = DaemonConfig::load(path.to_str()).unwrap();
        assert_eq!(config.node_name, "node-a");
        assert_eq!(config.root, PathBuf::from("/srv/volumes"));
        assert_eq!(config.controller.workers, 2);
        assert_eq!(config.claims.len(), 1);
        assert_eq!(config.claims[0].size, Quantity::gibibytes(1));
        assert_eq!(config.claims[0].reclaim_policy, ReclaimPolicy::Retain);
    }

    #[test]
    fn test_finalize_requires_node_name() {
        let err = DaemonConfig::default().finalize().unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: node name is mandatory");
    }

    #[test]
    fn test_finalize_requires_root() {
        let config = DaemonConfig {
            node_name: "node-a".into(),
            root: PathBuf::new(),
            ..Default::default()
        };
        assert!(matches!(config.finalize(), Err(DaemonError::Config(_))));
    }

    #[test]
    fn test_finalize_sets_identity() {
        let config = DaemonConfig {
            node_name: "node-a".into(),
            ..Default::default()
        }
        .finalize()
        .unwrap();
        assert_eq!(config.controller.identity, "node-a");
    }

    #[test]
    fn test_parse_claim_flag() {
        let seed: ClaimSeed = "team-a/data=10Gi".parse().unwrap();
        assert_eq!(seed.namespace, "team-a");
        assert_eq!(seed.name, "data");
        assert_eq!(seed.size, Quantity::gibibytes(10));
        assert_eq!(seed.reclaim_policy, ReclaimPolicy::default());

        let claim = seed.into_claim("hostpath");
        assert_eq!(claim.key, ClaimKey::new("team-a", "data"));
    }

    #[test]
    fn test_parse_claim_flag_rejects_malformed() {
        for input in ["data=1Gi", "team-a/data", "team-a/data=lots", "=1Gi"] {
            assert!(
                matches!(input.parse::<ClaimSeed>(), Err(DaemonError::Config(_))),
                "{input} should not parse"
            );
        }
    }

    #[test]
    fn test_seed_defaults() {
        let seed = ClaimSeed {
            namespace: default_namespace(),
            name: "data".into(),
            class: None,
            size: Quantity::mebibytes(512),
            access_modes: Vec::new(),
            reclaim_policy: ReclaimPolicy::Delete,
        };
        let claim = seed.into_claim("hostpath");
        assert_eq!(claim.class_name.as_deref(), Some("hostpath"));
        assert_eq!(claim.access_modes, vec![AccessMode::ReadWriteOnce]);
        assert!(!claim.is_bound());
    }
}
