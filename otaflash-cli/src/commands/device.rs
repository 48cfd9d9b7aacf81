//! Commands that talk to the device: version query and update.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use otaflash::{FirmwareImage, SessionOutcome, VersionInfo};
use std::path::Path;

use crate::{CliError, Settings, use_fancy_output};

/// Render installed versions for humans.
fn format_version_info(info: &VersionInfo) -> String {
    if info.is_blank() {
        return "  No firmware installed".to_string();
    }
    format!(
        "  Current version: {} at 0x{:08X}\n  Backup version:  {} at 0x{:08X}",
        info.current_version, info.current_address, info.backup_version, info.backup_address
    )
}

/// Info command implementation.
pub(crate) fn cmd_info(settings: &Settings, json: bool) -> Result<()> {
    let mut session = settings.open_session()?;
    let info = session
        .query_version()
        .context("Failed to read version information")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    eprintln!("\n{}", style("Device Firmware").bold().underlined());
    eprintln!("{}", format_version_info(&info));
    Ok(())
}

/// Update command implementation.
pub(crate) fn cmd_update(settings: &Settings, firmware: &Path, fw_version: u32) -> Result<()> {
    let image = FirmwareImage::from_file(firmware)
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))?;

    if !settings.quiet {
        eprintln!(
            "{} Loaded {} ({} bytes, {} packets)",
            style("📦").cyan(),
            firmware.display(),
            image.len(),
            image.packet_count()
        );
        if !image.fits_device() {
            eprintln!(
                "{} Image size is outside the range the device accepts",
                style("⚠").yellow()
            );
        }
    }

    let mut session = settings.open_session()?;

    // Create progress bar
    let pb = if settings.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(image.len() as u64);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.set_message(format!("version {fw_version}"));
        pb
    };

    let outcome = session.run_update_with_progress(image.data(), fw_version, |done, _| {
        pb.set_position(done as u64);
    })?;

    match outcome {
        SessionOutcome::Completed {
            target_address,
            packets,
        } => {
            pb.finish_with_message("done");
            if !settings.quiet {
                eprintln!(
                    "\n{} Version {fw_version} written to 0x{target_address:08X} ({packets} packets)",
                    style("🎉").green().bold()
                );
            }

            match session.query_version() {
                Ok(info) => {
                    if !settings.quiet {
                        eprintln!("{}", format_version_info(&info));
                    }
                },
                Err(e) => warn!("Could not re-read version information: {e}"),
            }
            Ok(())
        },
        SessionOutcome::Failed(e) => {
            pb.abandon();
            Err(CliError::Failed(format!("Update failed: {e}")).into())
        },
        SessionOutcome::Aborted(e) => {
            pb.abandon();
            Err(CliError::Failed(format!("Update aborted: {e}")).into())
        },
    }
}
