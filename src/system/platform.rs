// src/system/platform.rs

//! Packaging family detection

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// The two supported packaging families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageFamily {
    /// dpkg/apt (Debian, Ubuntu, ...)
    Debian,
    /// rpm/dnf (Fedora, RHEL, Rocky, Alma, ...)
    RedHat,
}

impl fmt::Display for PackageFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debian => write!(f, "debian"),
            Self::RedHat => write!(f, "redhat"),
        }
    }
}

/// Determine the family from `/etc/os-release` content (`ID` and `ID_LIKE`)
pub fn parse_os_release(content: &str) -> Option<PackageFamily> {
    let mut ids = Vec::new();
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.trim() == "ID" || key.trim() == "ID_LIKE" {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            ids.extend(value.split_whitespace().map(str::to_lowercase));
        }
    }

    ids.iter().find_map(|id| match id.as_str() {
        "debian" | "ubuntu" | "linuxmint" | "raspbian" | "pop" => Some(PackageFamily::Debian),
        "rhel" | "fedora" | "centos" | "rocky" | "almalinux" | "ol" | "amzn" => {
            Some(PackageFamily::RedHat)
        }
        _ => None,
    })
}

/// Detect the host's packaging family from an os-release file
pub fn detect_family(os_release: &Path) -> Result<PackageFamily> {
    let content = fs::read_to_string(os_release).map_err(|e| {
        Error::Config(format!("cannot read {}: {}", os_release.display(), e))
    })?;
    parse_os_release(&content).ok_or_else(|| {
        Error::Config(format!(
            "unsupported distribution in {}; set server.family explicitly",
            os_release.display()
        ))
    })
}
