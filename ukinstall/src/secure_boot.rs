// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::assemble::AssembledImage;
use crate::config::Config;
use crate::util::require_file;
use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use command_run::Command;

/// Paths of a signing key pair. The certificate must be enrolled in
/// the firmware's `db` for signed executables to boot.
pub struct SecureBootKeyPaths {
    dir: Utf8PathBuf,
}

impl SecureBootKeyPaths {
    pub fn new(dir: Utf8PathBuf) -> Self {
        Self { dir }
    }

    pub fn key(&self) -> Utf8PathBuf {
        self.dir.join("kernel.key")
    }

    pub fn cert(&self) -> Utf8PathBuf {
        self.dir.join("kernel.crt")
    }
}

/// Unified kernel image that has been signed.
#[derive(Debug)]
pub struct SignedImage(Utf8PathBuf);

impl SignedImage {
    pub fn path(&self) -> &Utf8Path {
        &self.0
    }

    /// Treat `path` as signed without running the signer.
    #[cfg(test)]
    pub fn new_unchecked(path: Utf8PathBuf) -> Self {
        Self(path)
    }
}

/// Sign the file at `src` using the keys provided by `key_paths`. The
/// signed result is written to `dst` (and the `src` is never modified).
pub fn sign(
    sbsign: &Utf8Path,
    src: &Utf8Path,
    dst: &Utf8Path,
    key_paths: &SecureBootKeyPaths,
) -> Result<()> {
    require_file(&key_paths.key())?;
    require_file(&key_paths.cert())?;

    #[rustfmt::skip]
    Command::with_args(sbsign, [
        "--key", key_paths.key().as_str(),
        "--cert", key_paths.cert().as_str(),
        "--output", dst.as_str(),
        src.as_str(),
    ]).run()?;

    Ok(())
}

/// Sign the assembled image. The signed copy is written next to it
/// with a `.signed` suffix.
pub fn sign_image(conf: &Config, image: AssembledImage) -> Result<SignedImage> {
    let dst = Utf8PathBuf::from(format!("{}.signed", image.path()));
    sign(&conf.tools.sbsign, image.path(), &dst, &conf.key_paths())?;
    Ok(SignedImage(dst))
}
