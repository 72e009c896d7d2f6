// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::microcode::MicrocodePolicy;
use crate::secure_boot::SecureBootKeyPaths;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use log::info;
use serde::Deserialize;

/// Config file read when `--config` is not passed.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ukinstall.toml";

/// Everything a run needs to know about the host. Each stage takes
/// this as a parameter rather than using fixed paths, so tests can
/// point every input, output and external tool somewhere else.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub paths: Paths,
    pub tools: Tools,
    pub microcode: MicrocodeConfig,
    pub boot_entry: BootEntryConfig,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    /// Candidate os-release files, highest priority first.
    pub os_release: Vec<Utf8PathBuf>,
    pub machine_id: Utf8PathBuf,
    pub cmdline: Utf8PathBuf,
    pub kernel: Utf8PathBuf,
    pub initramfs: Utf8PathBuf,
    /// Microcode bundle. Optional.
    pub microcode: Utf8PathBuf,
    pub efi_stub: Utf8PathBuf,
    /// Splash bitmap. Optional.
    pub splash: Utf8PathBuf,
    /// Root of the Secure Boot key hierarchy.
    pub keys: Utf8PathBuf,
    /// Mountpoint of the EFI system partition.
    pub esp: Utf8PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            os_release: vec!["/etc/os-release".into(), "/usr/lib/os-release".into()],
            machine_id: "/etc/machine-id".into(),
            cmdline: "/etc/kernel/cmdline".into(),
            kernel: "/boot/vmlinuz-linux".into(),
            initramfs: "/boot/initramfs-linux.img".into(),
            microcode: "/boot/intel-ucode.img".into(),
            efi_stub: "/usr/lib/systemd/boot/efi/linuxx64.efi.stub".into(),
            splash: "/usr/share/systemd/bootctl/splash-arch.bmp".into(),
            keys: "/etc/secureboot/keys".into(),
            esp: "/efi".into(),
        }
    }
}

/// Program name (looked up in `PATH`) or path of each external tool.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Tools {
    pub objcopy: Utf8PathBuf,
    pub sbsign: Utf8PathBuf,
    pub efibootmgr: Utf8PathBuf,
    pub bsdtar: Utf8PathBuf,
    pub iucode_tool: Utf8PathBuf,
    pub mountpoint: Utf8PathBuf,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            objcopy: "objcopy".into(),
            sbsign: "sbsign".into(),
            efibootmgr: "efibootmgr".into(),
            bsdtar: "bsdtar".into(),
            iucode_tool: "iucode_tool".into(),
            mountpoint: "mountpoint".into(),
        }
    }
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MicrocodeConfig {
    pub policy: MicrocodePolicy,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BootEntryConfig {
    /// Disk containing the ESP (`efibootmgr --disk`).
    pub disk: Option<Utf8PathBuf>,

    /// ESP partition number (`efibootmgr --part`).
    pub part: Option<u32>,
}

impl Config {
    /// Load the config file at `path`. The file must exist.
    pub fn load(path: &Utf8Path) -> Result<Config> {
        let src = fs::read_to_string(path)?;
        Config::parse(&src).with_context(|| format!("invalid config file {path}"))
    }

    /// Load the config file at `path`, or the default config file if
    /// `path` is `None`. Unlike an explicitly requested file, the
    /// default file is allowed to be missing, in which case the
    /// built-in defaults are used.
    pub fn load_or_default(path: Option<&Utf8Path>) -> Result<Config> {
        if let Some(path) = path {
            return Config::load(path);
        }

        let path = Utf8Path::new(DEFAULT_CONFIG_PATH);
        if path.exists() {
            Config::load(path)
        } else {
            info!("{path} does not exist, using built-in defaults");
            Ok(Config::default())
        }
    }

    fn parse(src: &str) -> Result<Config> {
        Ok(toml::de::from_str(src)?)
    }

    /// Key and certificate used to sign EFI executables. These are
    /// enrolled in the firmware's `db`.
    pub fn key_paths(&self) -> SecureBootKeyPaths {
        SecureBootKeyPaths::new(self.paths.keys.join("db"))
    }

    /// Directory on the ESP that unified kernel images are installed
    /// to.
    pub fn esp_linux_path(&self) -> Utf8PathBuf {
        self.paths.esp.join("EFI/Linux")
    }
}
