//! USB printer probe
//!
//! Lists USB devices and, when `PRINTER_VENDOR_ID` / `PRINTER_PRODUCT_ID`
//! are set, selects that printer and prints the first argument: an
//! `http(s)://` URL is printed as an image, anything else is treated as a
//! base64 ESC/POS payload.

use std::sync::Arc;

use anyhow::Context;
use usb_printer::{NusbHost, PrinterConfig, UsbPrinterModule, logger};

fn parse_id(key: &str) -> anyhow::Result<Option<u16>> {
    let Ok(raw) = std::env::var(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    let value = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => raw.parse(),
    }
    .with_context(|| format!("invalid {}: {}", key, raw))?;
    Ok(Some(value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = PrinterConfig::from_env();
    logger::init_from_config(&config)?;

    tracing::info!("USB printer probe starting...");

    let host = Arc::new(NusbHost::from_config(&config));
    let mut module = UsbPrinterModule::new(config);
    module.init(host)?;

    match module.list_devices() {
        Ok(devices) => {
            for device in devices {
                println!("{}", device.to_json());
            }
        }
        Err(e) => tracing::warn!("{}", e),
    }

    let (Some(vendor_id), Some(product_id)) = (
        parse_id("PRINTER_VENDOR_ID")?,
        parse_id("PRINTER_PRODUCT_ID")?,
    ) else {
        module.teardown();
        return Ok(());
    };

    let device = module.select_device(vendor_id, product_id).await?;
    tracing::info!(device = %device, "Printer selected");

    if let Some(payload) = std::env::args().nth(1) {
        if payload.starts_with("http://") || payload.starts_with("https://") {
            module.print_image(&payload).await?;
        } else {
            module.print_raw(Some(&payload)).await?;
        }
        tracing::info!("Print job sent");
    }

    module.close_connection();
    module.teardown();
    Ok(())
}
