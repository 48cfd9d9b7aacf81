//! Test image generation.

use anyhow::{Context, Result};
use console::style;
use otaflash::test_pattern;
use std::fs;
use std::path::Path;

/// Gen-image command implementation.
pub(crate) fn cmd_gen_image(output: &Path, size: usize, quiet: bool) -> Result<()> {
    let data = test_pattern(size);
    fs::write(output, &data)
        .with_context(|| format!("Failed to write image: {}", output.display()))?;

    if !quiet {
        eprintln!(
            "{} Created {}: {} bytes",
            style("✓").green(),
            style(output.display()).yellow(),
            data.len()
        );
    }
    Ok(())
}
