// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::config::Config;
use crate::os_release::OsRelease;
use crate::util::require_file;
use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use command_run::Command;
use fs_err as fs;
use log::info;

// Load addresses of the sections added to the EFI stub. The stub looks
// the sections up by name, but they need addresses that don't overlap
// the stub itself or each other.
const OSREL_VMA: u64 = 0x20000;
const CMDLINE_VMA: u64 = 0x30000;
const SPLASH_VMA: u64 = 0x40000;
const LINUX_VMA: u64 = 0x2000000;
const INITRD_VMA: u64 = 0x3000000;

/// A file added to the EFI stub as a PE section.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageSection {
    pub name: &'static str,
    pub source: Utf8PathBuf,
    pub load_address: u64,
}

impl ImageSection {
    fn new(name: &'static str, source: &Utf8Path, load_address: u64) -> Self {
        Self {
            name,
            source: source.to_path_buf(),
            load_address,
        }
    }

    /// Argument for `objcopy --add-section`.
    fn add_section_arg(&self) -> String {
        format!("{}={}", self.name, self.source)
    }

    /// Argument for `objcopy --change-section-vma`.
    fn change_vma_arg(&self) -> String {
        format!("{}={:#x}", self.name, self.load_address)
    }
}

/// Unified kernel image in the run's temporary directory, not yet
/// signed.
#[derive(Debug)]
pub struct AssembledImage(Utf8PathBuf);

impl AssembledImage {
    pub fn path(&self) -> &Utf8Path {
        &self.0
    }
}

/// Generate the contents of the `.osrel` section.
///
/// This only carries the keys that the boot menu uses. The stub
/// requires a version, so `VERSION_ID=latest` is added if the system
/// has neither `VERSION_ID` nor `BUILD_ID`.
pub fn os_release_descriptor(os_release: &OsRelease) -> String {
    let mut descriptor = String::new();
    for key in ["PRETTY_NAME", "ID", "VERSION_ID", "BUILD_ID"] {
        if let Some(line) = os_release.line(key) {
            descriptor.push_str(&line);
            descriptor.push('\n');
        }
    }

    if os_release.line("VERSION_ID").is_none() && os_release.line("BUILD_ID").is_none() {
        descriptor.push_str("VERSION_ID=latest\n");
    }

    descriptor
}

/// Get the sections to add to the stub, in the order they are passed
/// to objcopy.
pub fn section_table(conf: &Config, osrel: &Utf8Path, initrd: &Utf8Path) -> Vec<ImageSection> {
    let mut sections = vec![
        ImageSection::new(".osrel", osrel, OSREL_VMA),
        ImageSection::new(".cmdline", &conf.paths.cmdline, CMDLINE_VMA),
    ];

    let splash = &conf.paths.splash;
    if splash.exists() {
        sections.push(ImageSection::new(".splash", splash, SPLASH_VMA));
    } else {
        info!("no splash image at {splash}");
    }

    sections.push(ImageSection::new(".linux", &conf.paths.kernel, LINUX_VMA));
    sections.push(ImageSection::new(".initrd", initrd, INITRD_VMA));
    sections
}

fn objcopy_command(
    objcopy: &Utf8Path,
    sections: &[ImageSection],
    stub: &Utf8Path,
    output: &Utf8Path,
) -> Command {
    let mut cmd = Command::new(objcopy);
    for section in sections {
        cmd.add_args(&["--add-section", section.add_section_arg().as_str()]);
        cmd.add_args(&["--change-section-vma", section.change_vma_arg().as_str()]);
    }
    cmd.add_args(&[stub.as_str(), output.as_str()]);
    cmd
}

/// Build the unsigned unified kernel image in `tmp_dir`.
///
/// `initrd` is the initramfs to embed, which may differ from the
/// configured one if microcode was added.
pub fn assemble_image(
    conf: &Config,
    os_release: &OsRelease,
    initrd: &Utf8Path,
    tmp_dir: &Utf8Path,
) -> Result<AssembledImage> {
    for path in [&conf.paths.efi_stub, &conf.paths.kernel, &conf.paths.cmdline] {
        require_file(path)?;
    }
    require_file(initrd)?;

    let osrel = tmp_dir.join("os-release");
    fs::write(&osrel, os_release_descriptor(os_release))?;

    let sections = section_table(conf, &osrel, initrd);
    let output = tmp_dir.join("linux.efi");
    objcopy_command(&conf.tools.objcopy, &sections, &conf.paths.efi_stub, &output).run()?;

    Ok(AssembledImage(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::test_util::{config_in, write_script, FAKE_OBJCOPY};
    use crate::util::utf8_path;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn section_names(sections: &[ImageSection]) -> Vec<&str> {
        sections.iter().map(|s| s.name).collect()
    }

    #[test]
    fn test_descriptor_without_version() {
        let os_release =
            OsRelease::parse("NAME=Arch\nID=arch\nPRETTY_NAME=\"Arch Linux\"\n").unwrap();
        assert_eq!(
            os_release_descriptor(&os_release),
            "PRETTY_NAME=\"Arch Linux\"\nID=arch\nVERSION_ID=latest\n"
        );

        // No os-release at all.
        assert_eq!(
            os_release_descriptor(&OsRelease::default()),
            "PRETTY_NAME=Linux\nID=linux\nVERSION_ID=latest\n"
        );
    }

    #[test]
    fn test_descriptor_export() {
        let os_release =
            OsRelease::parse("export PRETTY_NAME=\"Debian\"\nexport ID=debian\n").unwrap();
        assert_eq!(
            os_release_descriptor(&os_release),
            "PRETTY_NAME=\"Debian\"\nID=debian\nVERSION_ID=latest\n"
        );
    }

    #[test]
    fn test_descriptor_with_version() {
        let latest = "VERSION_ID=latest";

        let os_release = OsRelease::parse("ID=debian\nVERSION_ID=\"12\"\n").unwrap();
        let descriptor = os_release_descriptor(&os_release);
        assert_eq!(descriptor, "PRETTY_NAME=Linux\nID=debian\nVERSION_ID=\"12\"\n");
        assert!(!descriptor.contains(latest));

        let os_release = OsRelease::parse("ID=arch\nBUILD_ID=rolling\n").unwrap();
        let descriptor = os_release_descriptor(&os_release);
        assert_eq!(descriptor, "PRETTY_NAME=Linux\nID=arch\nBUILD_ID=rolling\n");
        assert!(!descriptor.contains(latest));

        // Unrelated keys are left out.
        let os_release =
            OsRelease::parse("ID=arch\nVERSION_ID=1\nBUILD_ID=2\nHOME_URL=x\n").unwrap();
        assert_eq!(
            os_release_descriptor(&os_release),
            "PRETTY_NAME=Linux\nID=arch\nVERSION_ID=1\nBUILD_ID=2\n"
        );
    }

    #[test]
    fn test_section_table() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let dir = utf8_path(tmp_dir.path())?;
        let conf = config_in(dir);
        let osrel = dir.join("osrel");
        let initrd = dir.join("initrd");

        let sections = section_table(&conf, &osrel, &initrd);
        assert_eq!(
            section_names(&sections),
            [".osrel", ".cmdline", ".linux", ".initrd"]
        );
        assert_eq!(
            sections[3],
            ImageSection {
                name: ".initrd",
                source: initrd.clone(),
                load_address: 0x3000000
            }
        );

        // Splash is only included when the file exists.
        fs::write(&conf.paths.splash, "BM")?;
        let sections = section_table(&conf, &osrel, &initrd);
        assert_eq!(
            section_names(&sections),
            [".osrel", ".cmdline", ".splash", ".linux", ".initrd"]
        );

        let names: HashSet<_> = sections.iter().map(|s| s.name).collect();
        assert_eq!(names.len(), sections.len());

        let addresses: Vec<_> = sections.iter().map(|s| s.change_vma_arg()).collect();
        assert_eq!(
            addresses,
            [
                ".osrel=0x20000",
                ".cmdline=0x30000",
                ".splash=0x40000",
                ".linux=0x2000000",
                ".initrd=0x3000000"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_objcopy_command() {
        let sections = [
            ImageSection::new(".osrel", Utf8Path::new("/tmp/x/os-release"), OSREL_VMA),
            ImageSection::new(".linux", Utf8Path::new("/boot/vmlinuz"), LINUX_VMA),
        ];
        let cmd = objcopy_command(
            Utf8Path::new("objcopy"),
            &sections,
            Utf8Path::new("/stub.efi"),
            Utf8Path::new("/tmp/x/linux.efi"),
        );
        let args: Vec<_> = cmd.args.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(
            args,
            [
                "--add-section",
                ".osrel=/tmp/x/os-release",
                "--change-section-vma",
                ".osrel=0x20000",
                "--add-section",
                ".linux=/boot/vmlinuz",
                "--change-section-vma",
                ".linux=0x2000000",
                "/stub.efi",
                "/tmp/x/linux.efi",
            ]
        );
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_assemble_image() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let dir = utf8_path(tmp_dir.path())?;
        let work = dir.join("work");
        fs::create_dir(&work)?;
        let mut conf = config_in(dir);
        conf.tools.objcopy = write_script(dir, "objcopy", FAKE_OBJCOPY)?;

        let os_release = OsRelease::parse("ID=arch\n")?;
        let initrd = dir.join("initrd-with-ucode");
        for path in [&conf.paths.efi_stub, &conf.paths.cmdline, &conf.paths.kernel] {
            fs::write(path, "x")?;
        }

        // The initrd is checked too.
        let err = assemble_image(&conf, &os_release, &initrd, &work).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::MissingInput(p)) if *p == initrd
        ));

        fs::write(&initrd, "x")?;
        let image = assemble_image(&conf, &os_release, &initrd, &work)?;
        assert_eq!(image.path(), work.join("linux.efi").as_path());

        let args = fs::read_to_string(image.path())?;
        let args: Vec<_> = args.lines().collect();
        assert_eq!(args.len(), 4 * 4 + 2);
        assert_eq!(args[1], format!(".osrel={work}/os-release"));
        assert_eq!(args[13], format!(".initrd={initrd}"));
        assert_eq!(args[16], conf.paths.efi_stub.as_str());

        assert_eq!(
            fs::read_to_string(work.join("os-release"))?,
            "PRETTY_NAME=Linux\nID=arch\nVERSION_ID=latest\n"
        );
        Ok(())
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_assemble_image_objcopy_fails() -> Result<()> {
        let tmp_dir = TempDir::new()?;
        let dir = utf8_path(tmp_dir.path())?;
        let mut conf = config_in(dir);
        conf.tools.objcopy = write_script(dir, "objcopy", "echo 'bad section' >&2; exit 1")?;
        for path in [
            &conf.paths.efi_stub,
            &conf.paths.cmdline,
            &conf.paths.kernel,
            &conf.paths.initramfs,
        ] {
            fs::write(path, "x")?;
        }

        let result = assemble_image(&conf, &OsRelease::default(), &conf.paths.initramfs, dir);
        assert!(result.is_err());
        Ok(())
    }
}
