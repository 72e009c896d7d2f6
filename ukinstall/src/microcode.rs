// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Early-load CPU microcode.
//!
//! The kernel picks up microcode from an uncompressed cpio archive at
//! the very start of the initramfs, so adding microcode means writing
//! the microcode archive and the original initramfs, in that order,
//! into a new file.

use crate::config::{Config, Tools};
use crate::error::Error;
use crate::util::{require_file, ScopedChild};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fs_err::{self as fs, File};
use log::info;
use serde::Deserialize;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Stdio};

/// Signal number of SIGPIPE on Linux.
const SIGPIPE: i32 = 13;

/// How much of the microcode bundle goes into the initramfs.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum MicrocodePolicy {
    /// Only the microcode matching the CPU of the running system,
    /// selected with `iucode_tool`.
    #[default]
    Minify,

    /// The entire bundle.
    MergeAll,
}

/// Prepend CPU microcode to the initramfs.
///
/// Returns the initramfs to put in the image. This is either a new
/// file in `tmp_dir`, or the configured initramfs unchanged if there
/// is no microcode bundle or no microcode for this CPU.
pub fn merge_microcode(conf: &Config, tmp_dir: &Utf8Path) -> Result<Utf8PathBuf> {
    let bundle = &conf.paths.microcode;
    let initramfs = &conf.paths.initramfs;

    if !bundle.exists() {
        info!("no microcode bundle at {bundle}");
        return Ok(initramfs.clone());
    }
    require_file(initramfs)?;

    let microcode = match conf.microcode.policy {
        MicrocodePolicy::MergeAll => bundle.clone(),
        MicrocodePolicy::Minify => {
            let minified = tmp_dir.join("microcode.img");
            minify(&conf.tools, bundle, &minified)?;
            if !has_content(&minified)? {
                info!("no microcode in {bundle} matches this CPU");
                return Ok(initramfs.clone());
            }
            minified
        }
    };

    let merged = tmp_dir.join("initramfs-microcode.img");
    info!("adding microcode from {microcode} to {initramfs}");
    concat_files(&[microcode.as_path(), initramfs.as_path()], &merged)?;
    Ok(merged)
}

fn has_content(path: &Utf8Path) -> Result<bool> {
    Ok(path.exists() && fs::metadata(path)?.len() > 0)
}

/// Write an early-load microcode archive to `output` that only
/// contains the microcode for this machine's CPU. If there is no
/// matching microcode, `output` may be missing or empty.
fn minify(tools: &Tools, bundle: &Utf8Path, output: &Utf8Path) -> Result<()> {
    // Extract the microcode blobs from the bundle to stdout.
    let mut extract = Command::new(&tools.bsdtar);
    extract.args(["-Oxf", bundle.as_str()]);

    let write_earlyfw = format!("--write-earlyfw={output}");
    let mut select = Command::new(&tools.iucode_tool);
    select.args([
        // Only keep microcode for processors in this system.
        "--scan-system",
        // Input is binary microcode, read from stdin.
        "-tb",
        write_earlyfw.as_str(),
        "-",
    ]);

    run_pipeline(extract, select)
}

/// Run `producer | consumer` and wait for both to exit.
///
/// The consumer must succeed. The producer must succeed too, except
/// that being killed by SIGPIPE is fine: that happens when the
/// consumer exits without reading all of its input.
fn run_pipeline(mut producer: Command, mut consumer: Command) -> Result<()> {
    let producer_name = producer.get_program().to_string_lossy().into_owned();
    let consumer_name = consumer.get_program().to_string_lossy().into_owned();
    println!(
        "{} | {}",
        format!("{producer:?}").replace('"', ""),
        format!("{consumer:?}").replace('"', "")
    );

    producer.stdout(Stdio::piped());
    let mut producer_child = ScopedChild::new(
        producer
            .spawn()
            .with_context(|| format!("failed to run {producer_name}"))?,
    );

    let pipe = producer_child
        .stdout
        .take()
        .context("producer stdout is not piped")?;
    consumer.stdin(pipe);
    let mut consumer_child = ScopedChild::new(
        consumer
            .spawn()
            .with_context(|| format!("failed to run {consumer_name}"))?,
    );

    // `consumer` still holds our copy of the pipe's read end. Close it
    // now, so that the consumer's copy is the only one. Otherwise the
    // producer would block forever on a full pipe if the consumer
    // exits early, rather than getting SIGPIPE.
    drop(consumer);

    let consumer_status = consumer_child.wait()?;
    let producer_status = producer_child.wait()?;

    if !consumer_status.success() {
        return Err(Error::ToolFailed {
            program: consumer_name,
            status: consumer_status,
        }
        .into());
    }
    if !producer_status.success() && producer_status.signal() != Some(SIGPIPE) {
        return Err(Error::ToolFailed {
            program: producer_name,
            status: producer_status,
        }
        .into());
    }

    Ok(())
}

/// Write the contents of each file in `inputs`, in order, to `output`.
fn concat_files(inputs: &[&Utf8Path], output: &Utf8Path) -> Result<()> {
    let mut out = File::create(output.as_std_path())?;
    for input in inputs {
        let mut file = File::open(input.as_std_path())?;
        io::copy(&mut file, &mut out)?;
    }
    out.sync_all()?;
    Ok(())
}
