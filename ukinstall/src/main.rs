// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod assemble;
mod boot_entry;
mod config;
mod error;
mod esp;
mod identity;
mod microcode;
mod os_release;
mod secure_boot;
#[cfg(test)]
mod test_util;
mod util;

use anyhow::Result;
use argh::FromArgs;
use camino::Utf8PathBuf;
use config::Config;
use env_logger::Env;
use identity::SystemIdentity;
use log::info;
use os_release::OsRelease;
use std::process;
use tempfile::TempDir;

/// Build, sign, and install a unified kernel image.
#[derive(FromArgs, PartialEq, Debug)]
struct Opt {
    /// path of the config file (default: /etc/ukinstall.toml)
    #[argh(option)]
    config: Option<Utf8PathBuf>,

    /// action to run
    #[argh(subcommand)]
    action: Action,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum Action {
    Install(InstallAction),
    Sign(SignAction),
    Entries(EntriesAction),
}

/// Build a signed unified kernel image, install it on the ESP, and
/// register a boot entry for it.
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "install")]
struct InstallAction {
    /// don't create a firmware boot entry
    #[argh(switch)]
    no_boot_entry: bool,
}

/// Sign an EFI executable with the configured key.
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "sign")]
struct SignAction {
    /// executable to sign
    #[argh(positional)]
    src: Utf8PathBuf,

    /// output path
    #[argh(positional)]
    dst: Utf8PathBuf,
}

/// List the firmware boot entries.
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "entries")]
struct EntriesAction {}

fn load_identity(conf: &Config) -> Result<(OsRelease, SystemIdentity)> {
    let os_release = OsRelease::load(&conf.paths.os_release)?;
    let identity = SystemIdentity::resolve(conf, &os_release)?;
    Ok((os_release, identity))
}

fn run_install(conf: &Config, action: &InstallAction) -> Result<()> {
    let (os_release, identity) = load_identity(conf)?;
    let version = identity
        .version_id
        .as_deref()
        .or(identity.build_id.as_deref())
        .unwrap_or("latest");
    info!(
        "installing {} ({version}) for machine {}",
        identity.os_pretty_name, identity.machine_id
    );

    // Fail before doing any work if the image can't be installed.
    esp::ensure_mounted(conf)?;

    let tmp_dir = TempDir::new()?;
    let tmp_path = util::utf8_path(tmp_dir.path())?;

    let initrd = microcode::merge_microcode(conf, tmp_path)?;
    let image = assemble::assemble_image(conf, &os_release, &initrd, tmp_path)?;
    let signed = secure_boot::sign_image(conf, image)?;
    let installed = esp::install_image(conf, signed, &identity)?;

    if action.no_boot_entry {
        info!("not registering a boot entry");
    } else {
        boot_entry::register(conf, &identity, &installed)?;
    }

    Ok(())
}

fn run_sign(conf: &Config, action: &SignAction) -> Result<()> {
    util::require_file(&action.src)?;

    let tmp_dir = TempDir::new()?;
    let signed = util::utf8_path(tmp_dir.path())?.join("signed.efi");
    secure_boot::sign(&conf.tools.sbsign, &action.src, &signed, &conf.key_paths())?;
    esp::move_into_place(&signed, &action.dst)?;
    info!("signed {} -> {}", action.src, action.dst);

    Ok(())
}

fn run_entries(conf: &Config) -> Result<()> {
    let (_, identity) = load_identity(conf)?;
    let label = identity.boot_entry_label();

    for entry in boot_entry::list_entries(conf)? {
        let active = if entry.active { "*" } else { " " };
        let current = if entry.label == label { "  <- this system" } else { "" };
        println!("Boot{}{active} {}{current}", entry.boot_number, entry.label);
    }

    Ok(())
}

fn run(opt: &Opt) -> Result<()> {
    let conf = Config::load_or_default(opt.config.as_deref())?;

    match &opt.action {
        Action::Install(action) => run_install(&conf, action),
        Action::Sign(action) => run_sign(&conf, action),
        Action::Entries(_) => run_entries(&conf),
    }
}

fn main() {
    env_logger::init_from_env(Env::default().filter_or("UKINSTALL_LOG", "info"));

    let opt: Opt = argh::from_env();
    if let Err(err) = run(&opt) {
        eprintln!("error: {err:?}");
        process::exit(error::exit_code(&err));
    }
}
