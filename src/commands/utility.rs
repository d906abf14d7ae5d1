//! Utility commands: list, init-config

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use hidtray::{IdentityResolver, ProtocolFamily, Settings};
use hidtray_transport::vendors::WATCHED_VENDOR_IDS;
use hidtray_transport::{BoxedBackend, HidApiBackend};

/// List interfaces of the watched vendors with their classification
pub fn list() -> anyhow::Result<()> {
    let backend: BoxedBackend = Arc::new(HidApiBackend::new().context("initializing hidapi")?);
    let resolver = IdentityResolver::new(Arc::clone(&backend));

    println!("Supported HID interfaces:");
    let mut found = 0;
    for &vendor_id in WATCHED_VENDOR_IDS {
        for info in backend.enumerate(vendor_id, 0)? {
            found += 1;
            let family = ProtocolFamily::classify(&info);
            let container = match family {
                ProtocolFamily::Unclassified => "-".to_string(),
                _ => match resolver.resolve(&info) {
                    Ok(Some(resolved)) => {
                        resolved.handle.close();
                        resolved.container_id.key()
                    }
                    Ok(None) => "-".to_string(),
                    Err(e) => format!("({e})"),
                },
            };
            println!(
                "  VID={:04x} PID={:04x} usage={:04x} page={:04x} {:<13} {} {}",
                info.vendor_id,
                info.product_id,
                info.usage,
                info.usage_page,
                format!("{family:?}"),
                container,
                if info.product.is_empty() {
                    "-"
                } else {
                    info.product.as_str()
                },
            );
        }
    }
    if found == 0 {
        println!("  (none)");
    }
    Ok(())
}

/// Write the default settings file
pub fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        println!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
        return Ok(());
    }
    Settings::default().save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
