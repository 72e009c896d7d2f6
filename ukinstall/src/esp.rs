// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Installing files to the EFI system partition (ESP).

use crate::config::Config;
use crate::error::Error;
use crate::identity::SystemIdentity;
use crate::secure_boot::SignedImage;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use command_run::Command;
use fs_err as fs;
use log::info;
use std::io;

/// Check that the ESP is mounted at the configured path.
pub fn ensure_mounted(conf: &Config) -> Result<()> {
    let esp = &conf.paths.esp;
    if !esp.is_dir() {
        return Err(Error::NotMounted(esp.clone()).into());
    }

    let output = Command::with_args(&conf.tools.mountpoint, ["-q", esp.as_str()])
        .disable_check()
        .run()?;
    if !output.status.success() {
        return Err(Error::NotMounted(esp.clone()).into());
    }

    Ok(())
}

/// Install the signed image as `EFI/Linux/<machine-id>-<os-id>.efi` on
/// the ESP, replacing any previous image with that name. Returns the
/// installed path.
pub fn install_image(
    conf: &Config,
    image: SignedImage,
    identity: &SystemIdentity,
) -> Result<Utf8PathBuf> {
    ensure_mounted(conf)?;

    let target = conf.esp_linux_path().join(identity.efi_file_name());
    move_into_place(image.path(), &target)?;
    info!("installed {target}");

    Ok(target)
}

/// Move `src` to `dst`, creating the parent directory of `dst` if
/// needed.
///
/// If `src` and `dst` are on different filesystems, `src` is copied to
/// a temporary file next to `dst` which is then renamed to `dst`, so a
/// partial copy never appears under the final name.
pub fn move_into_place(src: &Utf8Path, dst: &Utf8Path) -> Result<()> {
    let dir = dst
        .parent()
        .with_context(|| format!("{dst} has no parent directory"))?;
    fs::create_dir_all(dir)?;

    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => copy_into_place(src, dst),
        Err(err) => Err(err.into()),
    }
}

fn copy_into_place(src: &Utf8Path, dst: &Utf8Path) -> Result<()> {
    let dir = dst
        .parent()
        .with_context(|| format!("{dst} has no parent directory"))?;

    // Deleted on drop if anything below fails.
    let mut tmp = tempfile::Builder::new()
        .prefix(".ukinstall-")
        .tempfile_in(dir)?;
    io::copy(&mut fs::File::open(src.as_std_path())?, tmp.as_file_mut())?;
    fs::set_permissions(tmp.path(), fs::metadata(src)?.permissions())?;
    tmp.as_file().sync_all()?;

    tmp.persist(dst)?;
    fs::remove_file(src)?;

    Ok(())
}
