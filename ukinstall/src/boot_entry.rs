// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Firmware boot entries, managed through `efibootmgr`.

use crate::config::Config;
use crate::error::Error;
use crate::identity::SystemIdentity;
use anyhow::{Context, Result};
use camino::Utf8Path;
use command_run::Command;
use log::info;

/// One line of the `efibootmgr` boot entry table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootEntry {
    /// Four hex digits, as printed.
    pub boot_number: String,
    pub active: bool,
    pub label: String,
}

impl BootEntry {
    /// Parse a line like `Boot0001* Arch Linux abc123`.
    ///
    /// Returns `None` for lines that are not boot entries, such as
    /// `BootCurrent: 0001` or `BootOrder: 0001,0000`. Newer versions of
    /// `efibootmgr` append the device path after a tab; it is not part
    /// of the label.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix("Boot")?;
        let boot_number = rest.get(..4)?;
        if !boot_number.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }

        let rest = &rest[4..];
        let active = match rest.as_bytes().first()? {
            b'*' => true,
            b' ' => false,
            _ => return None,
        };
        let label = rest[1..].strip_prefix(' ')?;
        let label = label.split('\t').next().unwrap_or(label);

        Some(Self {
            boot_number: boot_number.to_owned(),
            active,
            label: label.to_owned(),
        })
    }
}

/// Parse the boot entries out of `efibootmgr` output, skipping lines
/// that aren't entries.
pub fn parse_entries(output: &str) -> Vec<BootEntry> {
    output.lines().filter_map(BootEntry::parse).collect()
}

/// Get the current firmware boot entries.
pub fn list_entries(conf: &Config) -> Result<Vec<BootEntry>> {
    let efibootmgr = &conf.tools.efibootmgr;
    let output = Command::new(efibootmgr)
        .enable_capture()
        .disable_check()
        .run()?;

    // Capturing also swallows stderr, so put it in the error.
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let err = Error::ToolFailed {
            program: efibootmgr.to_string(),
            status: output.status,
        };
        return Err(anyhow::Error::from(err).context(stderr.trim().to_owned()));
    }

    Ok(parse_entries(&String::from_utf8_lossy(&output.stdout)))
}

/// Convert a path on the ESP to the form the firmware expects, for
/// example `/efi/EFI/Linux/a.efi` becomes `\EFI\Linux\a.efi`.
pub fn loader_path(esp: &Utf8Path, target: &Utf8Path) -> Result<String> {
    let relative = target
        .strip_prefix(esp)
        .with_context(|| format!("{target} is not on the ESP at {esp}"))?;

    let mut loader = String::new();
    for component in relative.components() {
        loader.push('\\');
        loader.push_str(component.as_str());
    }
    Ok(loader)
}

/// Register a boot entry for the installed image unless an entry with
/// the same label already exists. Returns true if an entry was
/// created.
pub fn register(conf: &Config, identity: &SystemIdentity, installed: &Utf8Path) -> Result<bool> {
    let label = identity.boot_entry_label();

    if let Some(entry) = list_entries(conf)?
        .iter()
        .find(|entry| entry.label == label)
    {
        info!("boot entry Boot{} already exists: {label}", entry.boot_number);
        return Ok(false);
    }

    let loader = loader_path(&conf.paths.esp, installed)?;

    let mut cmd = Command::with_args(&conf.tools.efibootmgr, ["--create"]);
    if let Some(disk) = &conf.boot_entry.disk {
        cmd.add_args(&["--disk", disk.as_str()]);
    }
    if let Some(part) = conf.boot_entry.part {
        cmd.add_args(&["--part", part.to_string().as_str()]);
    }
    cmd.add_args(&["--loader", loader.as_str(), "--label", label.as_str()]);
    cmd.run()?;

    info!("created boot entry {label}");
    Ok(true)
}
