// src/system/mod.rs

//! Host collaborators
//!
//! The lifecycle core never shells out directly. It talks to three
//! capability interfaces, each implemented once per packaging family:
//! - `PackageManager` (dpkg/apt or rpm/dnf)
//! - `ServiceManager` (systemd)
//! - `Filesystem` (host filesystem with safety-validated removal)
//!
//! Implementations are selected at startup from `/etc/os-release`.

pub mod command;
mod filesystem;
mod package;
mod platform;
mod service;

pub use filesystem::{Filesystem, HostFilesystem, directory_size};
pub use package::{AptPackageManager, DnfPackageManager, PackageManager, package_manager_for};
pub use platform::{PackageFamily, detect_family, parse_os_release};
pub use service::{ServiceManager, ServiceStatus, SystemdServiceManager, parse_show_output};
