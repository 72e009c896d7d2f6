// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::config::Config;
use crate::error::Error;
use crate::os_release::OsRelease;
use anyhow::{bail, Result};
use camino::Utf8Path;
use fs_err as fs;

/// Identity of the installed system, read once at the start of a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SystemIdentity {
    pub machine_id: String,
    pub os_id: String,
    pub os_name: String,
    pub os_pretty_name: String,
    pub version_id: Option<String>,
    pub build_id: Option<String>,
}

impl SystemIdentity {
    pub fn new(machine_id: String, os_release: &OsRelease) -> Self {
        let value = |key| os_release.value(key).map(str::to_owned);
        Self {
            machine_id,
            // These keys all have defaults, so they're never `None`.
            os_id: value("ID").unwrap_or_default(),
            os_name: value("NAME").unwrap_or_default(),
            os_pretty_name: value("PRETTY_NAME").unwrap_or_default(),
            version_id: value("VERSION_ID"),
            build_id: value("BUILD_ID"),
        }
    }

    /// Read the machine ID from the configured path and combine it with
    /// `os_release`.
    pub fn resolve(conf: &Config, os_release: &OsRelease) -> Result<Self> {
        let machine_id = read_machine_id(&conf.paths.machine_id)?;
        Ok(Self::new(machine_id, os_release))
    }

    /// Name of the unified kernel image on the ESP, e.g.
    /// `4f1c...-arch.efi`.
    pub fn efi_file_name(&self) -> String {
        format!("{}-{}.efi", self.machine_id, self.os_id)
    }

    /// Label of the firmware boot entry for this system.
    pub fn boot_entry_label(&self) -> String {
        format!("{} {}", self.os_name, self.machine_id)
    }
}

/// Read the machine ID: the first line of `path`, without the line
/// ending.
pub fn read_machine_id(path: &Utf8Path) -> Result<String> {
    if !path.exists() {
        return Err(Error::MissingInput(path.to_path_buf()).into());
    }

    let contents = fs::read_to_string(path)?;
    let machine_id = contents.lines().next().unwrap_or_default();
    if machine_id.is_empty() {
        bail!("machine ID file {path} is empty");
    }
    Ok(machine_id.to_owned())
}
