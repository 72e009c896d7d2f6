// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::error::Error;
use anyhow::{anyhow, Result};
use camino::Utf8Path;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::process::Child;

/// Wrapper around a child process that automatically kills and waits on
/// drop.
pub struct ScopedChild(Child);

impl ScopedChild {
    pub fn new(child: Child) -> Self {
        Self(child)
    }
}

impl Deref for ScopedChild {
    type Target = Child;

    fn deref(&self) -> &Child {
        &self.0
    }
}

impl DerefMut for ScopedChild {
    fn deref_mut(&mut self) -> &mut Child {
        &mut self.0
    }
}

impl Drop for ScopedChild {
    fn drop(&mut self) {
        // Ignore errors during drop.
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

/// Convert a std path (such as a `TempDir` path) to a `Utf8Path`.
pub fn utf8_path(path: &Path) -> Result<&Utf8Path> {
    Utf8Path::from_path(path).ok_or_else(|| anyhow!("path is not utf-8: {}", path.display()))
}

/// Return [`Error::MissingInput`] unless `path` is an existing file.
pub fn require_file(path: &Utf8Path) -> Result<(), Error> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::MissingInput(path.to_path_buf()))
    }
}
