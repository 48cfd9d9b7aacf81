//! Port listing command implementation.

use anyhow::{Context, Result};
use console::style;
use otaflash::{NativePortEnumerator, PortEnumerator, PortInfo};

/// One-line description of a port.
fn describe(port: &PortInfo) -> String {
    let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };
    let product = port
        .product
        .as_deref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    format!("{}{vid_pid}{product}", port.name)
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports().context("Failed to enumerate serial ports")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
    } else {
        for port in &ports {
            eprintln!("  {} {}", style("•").green(), describe(port));
        }
    }

    Ok(())
}
