//! Operator tool for the OTAU image catalog
//!
//! Inspects upgrade containers, wraps raw firmware blobs into containers,
//! and indexes image directories the way the running server would.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use std::path::{Path, PathBuf};

use otau_server::catalog::Catalog;
use otau_server::image::{wrap_raw_firmware, OtaImage};

#[derive(Parser)]
#[command(name = "otau-tool")]
#[command(about = "Inspect, wrap and index ZigBee OTA upgrade images", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a container and print its header and sub-elements
    Inspect {
        /// Image file (.zigbee, .ota, .ota.signed)
        file: PathBuf,
    },

    /// Wrap a raw firmware blob into an OTA container
    Wrap {
        /// Raw firmware file (.bin, .GCF)
        raw: PathBuf,

        /// Manufacturer code, hex
        #[arg(long, value_parser = parse_hex_u16)]
        manufacturer: u16,

        /// Image type, hex
        #[arg(long, value_parser = parse_hex_u16)]
        image_type: u16,

        /// File version, hex
        #[arg(long, value_parser = parse_hex_u32)]
        file_version: u32,

        /// Output path; defaults to the canonical name next to the input
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Scan a directory and report the resulting catalog
    Index {
        /// Image directory
        dir: PathBuf,
    },
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    u16::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    u32::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match args.command {
        Command::Inspect { file } => inspect(&file),
        Command::Wrap {
            raw,
            manufacturer,
            image_type,
            file_version,
            out,
        } => wrap(&raw, manufacturer, image_type, file_version, out),
        Command::Index { dir } => index(&dir),
    }
}

fn inspect(file: &Path) -> Result<()> {
    let buf = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let img = OtaImage::from_bytes(&buf)
        .with_context(|| format!("parsing {}", file.display()))?;

    println!("file:              {}", file.display());
    println!("header version:    0x{:04X}", img.header_version);
    println!("header length:     {}", img.header_length);
    println!("field control:     0x{:04X}", img.field_control);
    println!("manufacturer:      0x{:04X}", img.manufacturer_code);
    println!("image type:        0x{:04X}", img.image_type);
    println!("file version:      0x{:08X}", img.file_version);
    println!("stack version:     0x{:04X}", img.zigbee_stack_version);
    println!("header string:     {:?}", img.header_text());
    println!("total image size:  {}", img.total_image_size);

    if let Some(v) = img.security_credential_version {
        println!("security cred:     0x{:02X}", v);
    }
    if let Some(dst) = img.upgrade_file_destination {
        println!("file destination:  0x{:016X}", dst);
    }
    if let Some((min, max)) = img.hardware_version {
        println!("hardware range:    0x{:04X}..0x{:04X}", min, max);
    }

    println!("sub-elements:");
    for sub in &img.sub_elements {
        let preview_len = sub.data.len().min(8);
        println!(
            "  tag 0x{:04X}, {} bytes{}, data {}{}",
            sub.tag,
            sub.data.len(),
            if sub.truncated { " (truncated)" } else { "" },
            hex::encode(&sub.data[..preview_len]),
            if sub.data.len() > preview_len { ".." } else { "" },
        );
    }

    Ok(())
}

fn wrap(
    raw: &Path,
    manufacturer: u16,
    image_type: u16,
    file_version: u32,
    out: Option<PathBuf>,
) -> Result<()> {
    let buf = std::fs::read(raw).with_context(|| format!("reading {}", raw.display()))?;
    let img = wrap_raw_firmware(&buf, manufacturer, image_type, file_version)
        .context("wrapping raw firmware")?;

    let out = out.unwrap_or_else(|| {
        raw.with_file_name(format!(
            "{:04X}-{:04X}-{:08X}.zigbee",
            manufacturer, image_type, file_version
        ))
    });

    std::fs::write(&out, &img.raw).with_context(|| format!("writing {}", out.display()))?;
    log::info!(
        "wrapped {} ({} bytes) into {} ({} bytes)",
        raw.display(),
        buf.len(),
        out.display(),
        img.raw.len()
    );

    Ok(())
}

fn index(dir: &Path) -> Result<()> {
    let mut catalog = Catalog::with_builtin_quirks();
    let indexed = catalog
        .scan(dir)
        .with_context(|| format!("scanning {}", dir.display()))?;

    println!("indexed {} image(s) from {}", indexed, dir.display());
    for entry in catalog.entries() {
        println!(
            "  {}  {:>8} bytes  {}",
            entry.key(),
            entry.image.serve_len(),
            entry.path.display()
        );
    }

    Ok(())
}
