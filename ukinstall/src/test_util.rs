// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Helpers for tests that run the real code against fake external
//! tools.

use crate::config::Config;
use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;

/// Write an executable `sh` script named `name` into `dir`.
pub fn write_script(dir: &Utf8Path, name: &str, body: &str) -> Result<Utf8PathBuf> {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}"))?;
    fs::set_permissions(&path, Permissions::from_mode(0o755))?;
    Ok(path)
}

/// Create a config with every path inside `dir`. Nothing is created
/// on disk. The tools are left at their defaults.
pub fn config_in(dir: &Utf8Path) -> Config {
    let mut conf = Config::default();
    let paths = &mut conf.paths;
    paths.os_release = vec![dir.join("os-release")];
    paths.machine_id = dir.join("machine-id");
    paths.cmdline = dir.join("cmdline");
    paths.kernel = dir.join("vmlinuz");
    paths.initramfs = dir.join("initramfs.img");
    paths.microcode = dir.join("ucode.img");
    paths.efi_stub = dir.join("linuxx64.efi.stub");
    paths.splash = dir.join("splash.bmp");
    paths.keys = dir.join("keys");
    paths.esp = dir.join("esp");
    conf
}

/// Fake `sbsign`: writes "signed" followed by the input to the
/// `--output` path.
pub const FAKE_SBSIGN: &str = r#"
out=""
in=""
while [ $# -gt 0 ]; do
    case "$1" in
        --key|--cert) shift ;;
        --output) out="$2"; shift ;;
        *) in="$1" ;;
    esac
    shift
done
{ echo signed; cat "$in"; } > "$out"
"#;

/// Fake `objcopy`: writes its arguments, one per line, to the output
/// file (the last argument).
pub const FAKE_OBJCOPY: &str = r#"
eval out=\${$#}
printf '%s\n' "$@" > "$out"
"#;

/// Fake `efibootmgr` that keeps its boot entries in a file next to the
/// script. `--create` adds an entry, and every invocation prints the
/// table like the real tool does. The arguments of each `--create`
/// call are appended to `create_args`.
pub const FAKE_EFIBOOTMGR: &str = r#"
dir=$(dirname "$0")
state="$dir/entries"
touch "$state"
if [ "$1" = "--create" ]; then
    printf '%s\n' "$@" >> "$dir/create_args"
    label=""
    while [ $# -gt 0 ]; do
        case "$1" in
            --label) label="$2"; shift ;;
        esac
        shift
    done
    count=$(wc -l < "$state")
    printf 'Boot%04X* %s\tHD(1,GPT,0000)/File(\\EFI\\Linux\\x.efi)\n' "$count" "$label" >> "$state"
fi
echo "BootCurrent: 0000"
echo "Timeout: 0 seconds"
echo "BootOrder: 0000"
cat "$state"
"#;

/// Create `<dir>/keys/db/kernel.{key,crt}` with dummy contents.
pub fn write_keys(conf: &Config) -> Result<()> {
    let key_paths = conf.key_paths();
    fs::create_dir_all(key_paths.key().parent().unwrap())?;
    fs::write(key_paths.key(), "key")?;
    fs::write(key_paths.cert(), "cert")?;
    Ok(())
}
