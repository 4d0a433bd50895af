// src/system/package.rs

//! Package manager capability and its dpkg/apt and rpm/dnf implementations

use super::command::{run, run_checked};
use super::platform::PackageFamily;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Operations the lifecycle core needs from the OS package manager
pub trait PackageManager: Send + Sync {
    fn family(&self) -> PackageFamily;

    /// Names of all installed packages
    fn installed_packages(&self) -> Result<Vec<String>>;

    fn is_installed(&self, name: &str) -> Result<bool>;

    /// Raw listing line for an installed package, `None` if absent
    ///
    /// The line does not repeat the package name; version extraction
    /// scans its whitespace-separated fields.
    fn describe(&self, name: &str) -> Result<Option<String>>;

    /// Remove packages; `purge` also drops their configuration where the
    /// packaging family supports it
    fn remove(&self, names: &[String], purge: bool) -> Result<()>;

    fn install(&self, names: &[String]) -> Result<()>;

    fn upgrade(&self, names: &[String]) -> Result<()>;

    /// Install exact `(name, version)` pairs, downgrading if needed
    fn install_versions(&self, packages: &[(String, String)]) -> Result<()>;

    fn update_cache(&self) -> Result<()>;
}

/// Pick the implementation for a packaging family
pub fn package_manager_for(family: PackageFamily) -> Arc<dyn PackageManager> {
    match family {
        PackageFamily::Debian => Arc::new(AptPackageManager::new()),
        PackageFamily::RedHat => Arc::new(DnfPackageManager::new()),
    }
}

fn args_with<'a>(base: &[&'a str], names: &'a [String]) -> Vec<&'a str> {
    let mut args = base.to_vec();
    args.extend(names.iter().map(String::as_str));
    args
}

/// Parse `dpkg-query -W -f '${Package}\t${Status}\n'` output into installed names
fn parse_dpkg_listing(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let (name, status) = line.split_once('\t')?;
            is_dpkg_installed(status).then(|| name.trim().to_string())
        })
        .filter(|name| !name.is_empty())
        .collect()
}

/// `install ok installed` means installed; `deinstall ok config-files` does not
fn is_dpkg_installed(status: &str) -> bool {
    status.split_whitespace().last() == Some("installed")
}

const APT_ENV: &[(&str, &str)] = &[("DEBIAN_FRONTEND", "noninteractive")];

/// dpkg-query for queries, apt-get for changes
#[derive(Debug, Default)]
pub struct AptPackageManager;

impl AptPackageManager {
    pub fn new() -> Self {
        Self
    }
}

impl PackageManager for AptPackageManager {
    fn family(&self) -> PackageFamily {
        PackageFamily::Debian
    }

    fn installed_packages(&self) -> Result<Vec<String>> {
        let output = run_checked("dpkg-query", &["-W", "-f", "${Package}\t${Status}\n"], &[])?;
        let packages = parse_dpkg_listing(&output.stdout);
        debug!("dpkg reports {} installed packages", packages.len());
        Ok(packages)
    }

    fn is_installed(&self, name: &str) -> Result<bool> {
        let output = run("dpkg-query", &["-W", "-f", "${Status}", name])?;
        Ok(output.success() && is_dpkg_installed(&output.stdout))
    }

    fn describe(&self, name: &str) -> Result<Option<String>> {
        let output = run("dpkg-query", &["-W", "-f", "${Status} ${Version}\n", name])?;
        if !output.success() {
            return Ok(None);
        }
        let line = output.first_line();
        let status = line.rsplit_once(' ').map_or(line, |(status, _)| status);
        Ok(is_dpkg_installed(status).then(|| line.to_string()))
    }

    fn remove(&self, names: &[String], purge: bool) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let verb = if purge { "purge" } else { "remove" };
        info!("apt-get {} {}", verb, names.join(" "));
        run_checked("apt-get", &args_with(&[verb, "-y"], names), APT_ENV)?;
        Ok(())
    }

    fn install(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        run_checked("apt-get", &args_with(&["install", "-y"], names), APT_ENV)?;
        Ok(())
    }

    fn upgrade(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        run_checked(
            "apt-get",
            &args_with(&["install", "--only-upgrade", "-y"], names),
            APT_ENV,
        )?;
        Ok(())
    }

    fn install_versions(&self, packages: &[(String, String)]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let pinned: Vec<String> = packages.iter().map(|(n, v)| format!("{}={}", n, v)).collect();
        run_checked(
            "apt-get",
            &args_with(&["install", "-y", "--allow-downgrades"], &pinned),
            APT_ENV,
        )?;
        Ok(())
    }

    fn update_cache(&self) -> Result<()> {
        run_checked("apt-get", &["update"], APT_ENV)?;
        Ok(())
    }
}

/// rpm for queries, dnf for changes
#[derive(Debug, Default)]
pub struct DnfPackageManager;

impl DnfPackageManager {
    pub fn new() -> Self {
        Self
    }
}

impl PackageManager for DnfPackageManager {
    fn family(&self) -> PackageFamily {
        PackageFamily::RedHat
    }

    fn installed_packages(&self) -> Result<Vec<String>> {
        let output = run_checked("rpm", &["-qa", "--qf", "%{NAME}\n"], &[])?;
        let packages: Vec<String> = output
            .stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        debug!("rpm reports {} installed packages", packages.len());
        Ok(packages)
    }

    fn is_installed(&self, name: &str) -> Result<bool> {
        Ok(run("rpm", &["-q", name])?.success())
    }

    fn describe(&self, name: &str) -> Result<Option<String>> {
        let output = run("rpm", &["-q", "--qf", "%{VERSION}-%{RELEASE} %{ARCH}\n", name])?;
        if !output.success() {
            return Ok(None);
        }
        Ok(Some(output.first_line().to_string()))
    }

    fn remove(&self, names: &[String], _purge: bool) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        info!("dnf remove {}", names.join(" "));
        run_checked("dnf", &args_with(&["remove", "-y"], names), &[])?;
        Ok(())
    }

    fn install(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        run_checked("dnf", &args_with(&["install", "-y"], names), &[])?;
        Ok(())
    }

    fn upgrade(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        run_checked("dnf", &args_with(&["upgrade", "-y"], names), &[])?;
        Ok(())
    }

    fn install_versions(&self, packages: &[(String, String)]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let pinned: Vec<String> = packages.iter().map(|(n, v)| format!("{}-{}", n, v)).collect();
        let output = run_checked("dnf", &args_with(&["downgrade", "-y"], &pinned), &[]);
        match output {
            Ok(_) => Ok(()),
            // Not a downgrade (package was removed meanwhile): plain install
            Err(Error::Command { .. }) => {
                run_checked("dnf", &args_with(&["install", "-y"], &pinned), &[])?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn update_cache(&self) -> Result<()> {
        run_checked("dnf", &["makecache"], &[])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dpkg_listing() {
        let stdout = "mysql-server-8.0\tinstall ok installed\n\
                      mysql-common\tdeinstall ok config-files\n\
                      bash\tinstall ok installed\n";
        assert_eq!(parse_dpkg_listing(stdout), vec!["mysql-server-8.0", "bash"]);
    }

    #[test]
    fn test_dpkg_status() {
        assert!(is_dpkg_installed("install ok installed"));
        assert!(!is_dpkg_installed("deinstall ok config-files"));
        assert!(!is_dpkg_installed(""));
    }

    #[test]
    fn test_args_with() {
        let names = vec!["a".to_string(), "b".to_string()];
        assert_eq!(args_with(&["remove", "-y"], &names), vec!["remove", "-y", "a", "b"]);
    }

    #[test]
    fn test_package_manager_for() {
        assert_eq!(package_manager_for(PackageFamily::Debian).family(), PackageFamily::Debian);
        assert_eq!(package_manager_for(PackageFamily::RedHat).family(), PackageFamily::RedHat);
    }
}
