//! Hostpath Provisioner - dynamic hostPath volumes for a single node
//!
//! Provides:
//! - [`HostPathProvisioner`], a backend that creates one world-writable
//!   directory per volume under a configured root
//! - [`DaemonConfig`], layered file and `KHP_` environment configuration
//! - [`Daemon`], the process lifecycle around the provision controller

pub mod backend;
pub mod config;
pub mod error;
pub mod server;

pub use backend::HostPathProvisioner;
pub use config::{ClaimSeed, DaemonConfig, LoggingConfig, DEFAULT_ROOT};
pub use error::{DaemonError, DaemonResult};
pub use server::{shutdown_signal, Daemon};
