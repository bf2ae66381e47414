use std::fmt;

use crate::error::InstallError;
use crate::system::System;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Linux,
    Darwin,
}

impl Os {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "linux" => Some(Os::Linux),
            "macos" | "darwin" => Some(Os::Darwin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Darwin => "darwin",
        }
    }
}

/// CPU architecture, named the way download servers name it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Amd64,
    Arm64,
    I386,
    Armv6l,
}

impl Arch {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "x86_64" | "amd64" => Some(Arch::Amd64),
            "aarch64" | "arm64" => Some(Arch::Arm64),
            "x86" | "i386" | "i686" => Some(Arch::I386),
            "arm" | "armv6l" | "armv7l" => Some(Arch::Armv6l),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
            Arch::I386 => "386",
            Arch::Armv6l => "armv6l",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Brew,
}

impl PackageManager {
    /// Probe order when several are installed.
    pub const ALL: [PackageManager; 4] = [
        PackageManager::Apt,
        PackageManager::Dnf,
        PackageManager::Yum,
        PackageManager::Brew,
    ];

    pub fn program(self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Dnf => "dnf",
            PackageManager::Yum => "yum",
            PackageManager::Brew => "brew",
        }
    }

    pub fn detect(system: &dyn System) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|manager| system.which(manager.program()).is_some())
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
    pub package_manager: Option<PackageManager>,
}

impl Platform {
    /// Detect the running platform.
    pub fn detect(system: &dyn System) -> Result<Self, InstallError> {
        Self::from_parts(
            std::env::consts::OS,
            std::env::consts::ARCH,
            PackageManager::detect(system),
        )
    }

    pub fn from_parts(
        os: &str,
        arch: &str,
        package_manager: Option<PackageManager>,
    ) -> Result<Self, InstallError> {
        let os = Os::from_name(os)
            .ok_or_else(|| InstallError::EnvironmentUnsupported(format!("operating system '{os}'")))?;
        let arch = Arch::from_name(arch)
            .ok_or_else(|| InstallError::EnvironmentUnsupported(format!("architecture '{arch}'")))?;

        Ok(Self {
            os,
            arch,
            package_manager,
        })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os.as_str(), self.arch.as_str())
    }
}
