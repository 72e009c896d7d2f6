// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use camino::Utf8PathBuf;
use command_run::ErrorKind;
use std::process::ExitStatus;

/// Exit code used when the configuration doesn't match the system, as
/// in `EX_CONFIG` from sysexits.h.
pub const EXIT_CONFIG: i32 = 78;

/// Exit code for any failure without a more specific code.
pub const EXIT_FAILURE: i32 = 1;

/// Errors that callers need to tell apart from generic failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A file the run cannot do without is missing.
    #[error("required input {0} does not exist")]
    MissingInput(Utf8PathBuf),

    /// The EFI system partition is not mounted where the config says
    /// it is.
    #[error("EFI system partition is not mounted at {0}")]
    NotMounted(Utf8PathBuf),

    /// An external program exited unsuccessfully, in a place where
    /// `command_run`'s own error isn't used.
    #[error("{program} failed: {status}")]
    ToolFailed { program: String, status: ExitStatus },
}

/// Get the process exit code for a failed run.
///
/// If an external program failed, its exit code is passed through. A
/// missing ESP mount gets [`EXIT_CONFIG`]. Everything else is
/// [`EXIT_FAILURE`].
pub fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(err) = cause.downcast_ref::<Error>() {
            match err {
                Error::NotMounted(_) => return EXIT_CONFIG,
                Error::ToolFailed { status, .. } => {
                    if let Some(code) = status.code() {
                        return code;
                    }
                }
                Error::MissingInput(_) => {}
            }
        }

        if let Some(err) = cause.downcast_ref::<command_run::Error>() {
            if let ErrorKind::Exit(status) = &err.kind {
                if let Some(code) = status.code() {
                    return code;
                }
            }
        }
    }

    EXIT_FAILURE
}
