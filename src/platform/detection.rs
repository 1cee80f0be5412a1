//! Platform detection
//!
//! Identifies the host OS, container runtime and privilege level. The result
//! is logged when the kernel backend fails and the selector falls back to
//! userspace.

use std::fmt;
use std::fs;
use std::path::Path;

/// Container runtime the process appears to run under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerEnvironment {
    /// Not running in a container
    None,
    /// Running in Docker
    Docker,
    /// Running in Kubernetes
    Kubernetes,
    /// Running in Podman
    Podman,
    /// Some other container runtime
    Unknown,
}

/// Host information relevant to WireGuard backends
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformInfo {
    /// Operating system name
    pub os: String,
    /// OS release, when known
    pub os_version: Option<String>,
    /// Kernel release (Linux only)
    pub kernel_version: Option<String>,
    /// Container environment
    pub container: ContainerEnvironment,
    /// Whether running as root
    pub is_privileged: bool,
    /// Whether the wireguard kernel module is currently loaded
    pub wireguard_module_loaded: bool,
}

impl PlatformInfo {
    /// Information with only the OS name filled in
    pub fn new() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            os_version: None,
            kernel_version: None,
            container: ContainerEnvironment::None,
            is_privileged: false,
            wireguard_module_loaded: false,
        }
    }

    /// Check if running in any container
    pub fn is_containerized(&self) -> bool {
        self.container != ContainerEnvironment::None
    }
}

impl Default for PlatformInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlatformInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.os,
            self.os_version.as_deref().unwrap_or("unknown")
        )?;
        if let Some(kernel) = &self.kernel_version {
            write!(f, " (kernel {})", kernel)?;
        }
        match self.container {
            ContainerEnvironment::None => {}
            ContainerEnvironment::Docker => write!(f, " in Docker")?,
            ContainerEnvironment::Kubernetes => write!(f, " in Kubernetes")?,
            ContainerEnvironment::Podman => write!(f, " in Podman")?,
            ContainerEnvironment::Unknown => write!(f, " in a container")?,
        }
        if !self.is_privileged {
            write!(f, ", unprivileged")?;
        }
        Ok(())
    }
}

/// Detect the current platform environment
pub fn detect_environment() -> PlatformInfo {
    let mut info = PlatformInfo::new();
    info.container = detect_container();
    info.is_privileged = unsafe { libc::geteuid() == 0 };

    #[cfg(target_os = "linux")]
    {
        info.os_version = detect_linux_version();
        info.kernel_version = fs::read_to_string("/proc/sys/kernel/osrelease")
            .ok()
            .map(|v| v.trim().to_string());
        info.wireguard_module_loaded = Path::new("/sys/module/wireguard").exists();
    }

    #[cfg(target_os = "macos")]
    {
        info.os_version = std::process::Command::new("sw_vers")
            .arg("-productVersion")
            .output()
            .ok()
            .and_then(|output| String::from_utf8(output.stdout).ok())
            .map(|v| v.trim().to_string());
    }

    info
}

fn detect_container() -> ContainerEnvironment {
    if Path::new("/.dockerenv").exists() {
        return ContainerEnvironment::Docker;
    }
    if std::env::var("KUBERNETES_SERVICE_HOST").is_ok() {
        return ContainerEnvironment::Kubernetes;
    }
    if std::env::var("container").as_deref() == Ok("podman") {
        return ContainerEnvironment::Podman;
    }

    match fs::read_to_string("/proc/1/cgroup") {
        Ok(cgroup) => container_from_cgroup(&cgroup),
        Err(_) => ContainerEnvironment::None,
    }
}

fn container_from_cgroup(cgroup: &str) -> ContainerEnvironment {
    if cgroup.contains("kubepods") {
        ContainerEnvironment::Kubernetes
    } else if cgroup.contains("docker") {
        ContainerEnvironment::Docker
    } else if cgroup.contains("podman") || cgroup.contains("libpod") {
        ContainerEnvironment::Podman
    } else if cgroup.contains("/lxc/") {
        ContainerEnvironment::Unknown
    } else {
        ContainerEnvironment::None
    }
}

#[cfg(target_os = "linux")]
fn detect_linux_version() -> Option<String> {
    let contents = fs::read_to_string("/etc/os-release").ok()?;
    contents.lines().find_map(|line| {
        line.strip_prefix("PRETTY_NAME=")
            .map(|v| v.trim_matches('"').to_string())
    })
}
