//! ZigBee OTA upgrade server with pluggable APS transport
//!
//! This crate implements the server side of the ZigBee OTA upgrade cluster
//! (0x0019): an image container codec, an on-disk image catalog, and a
//! passive protocol engine that answers polling clients with image
//! metadata, paced firmware blocks and upgrade-completion responses. The
//! radio is not part of the crate; the host injects an APS transport and
//! feeds indications, confirms and timer ticks into the engine.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod image;
pub mod otau;
pub mod time;
pub mod transport;
pub mod wire;
pub mod zcl;

pub use catalog::{Catalog, CatalogError};
pub use config::{Config, ConfigError, OtauConfig};
pub use engine::Engine;
pub use image::{DecodeError, OtaImage};
pub use transport::{ApsTransport, NodeDirectory, Observer, TransportError};
