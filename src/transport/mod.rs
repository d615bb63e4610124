//! APS transport bindings
//!
//! The engine does not own a radio. It composes APS data requests and hands
//! them to an injected [`ApsTransport`]; the host feeds indications and
//! confirms back in. Node metadata comes from an injected [`NodeDirectory`]
//! and state-change notifications go to an injected [`Observer`].

use std::fmt;
use thiserror::Error;

/// APS confirm status: frame delivered.
pub const APS_STATUS_SUCCESS: u8 = 0x00;
/// APS confirm status: no APS acknowledgement from the destination.
pub const APS_STATUS_NO_ACK: u8 = 0xA7;
/// APS confirm status: no MAC acknowledgement on the last hop.
pub const APS_STATUS_MAC_NO_ACK: u8 = 0xE5;

/// Broadcast network address reaching all rx-on-when-idle devices.
pub const NWK_BROADCAST_RXON: u16 = 0xFFFD;
/// Broadcast endpoint.
pub const BROADCAST_ENDPOINT: u8 = 0xFF;

/// A 64-bit IEEE extended address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtAddr(pub u64);

impl fmt::Display for ExtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

/// Destination addressing for an APS data request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DstAddress {
    /// Network (short) address, unicast or broadcast.
    Nwk(u16),
    /// IEEE extended address.
    Ext(ExtAddr),
}

/// Transmit options for an APS data request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    /// Request an APS acknowledgement from the destination.
    pub acknowledged: bool,
}

impl TxOptions {
    pub const ACKNOWLEDGED: TxOptions = TxOptions { acknowledged: true };
    pub const UNACKNOWLEDGED: TxOptions = TxOptions { acknowledged: false };
}

/// APSDE-DATA.request primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApsDataRequest {
    pub dst: DstAddress,
    pub dst_endpoint: u8,
    pub src_endpoint: u8,
    pub profile_id: u16,
    pub cluster_id: u16,
    pub radius: u8,
    pub tx_options: TxOptions,
    /// Delay before the transport puts the frame on air, milliseconds.
    pub send_delay_ms: u32,
    pub asdu: Vec<u8>,
}

/// APSDE-DATA.indication primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApsDataIndication {
    pub src_ext: ExtAddr,
    pub src_nwk: u16,
    pub src_endpoint: u8,
    pub dst_endpoint: u8,
    pub profile_id: u16,
    pub cluster_id: u16,
    pub asdu: Vec<u8>,
}

/// APSDE-DATA.confirm primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApsDataConfirm {
    pub dst: DstAddress,
    /// Request id returned by [`ApsTransport::aps_request`].
    pub id: u8,
    pub status: u8,
}

/// Transport send errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport queue full")]
    QueueFull,

    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Outbound APS capability.
///
/// A successful call returns the 8-bit request id later echoed in the
/// matching [`ApsDataConfirm`]. The transport takes ownership of the frame.
pub trait ApsTransport {
    fn aps_request(&mut self, req: ApsDataRequest) -> Result<u8, TransportError>;
}

/// Descriptor data the node directory knows about a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub endpoint: u8,
    pub profile_id: u16,
    pub manufacturer_code: u16,
    pub rx_on_when_idle: bool,
}

/// Lookup of device descriptors by extended address.
pub trait NodeDirectory {
    fn resolve(&self, addr: ExtAddr) -> Option<NodeDescriptor>;
}

/// A directory that knows nothing; clients are learned from their requests.
#[derive(Debug, Default)]
pub struct EmptyDirectory;

impl NodeDirectory for EmptyDirectory {
    fn resolve(&self, _addr: ExtAddr) -> Option<NodeDescriptor> {
        None
    }
}

/// Receiver of client-record change notifications.
///
/// The engine never calls back into a view; it only raises these events.
pub trait Observer {
    fn node_changed(&mut self, addr: ExtAddr);
}

/// Observer that discards all events.
#[derive(Debug, Default)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn node_changed(&mut self, _addr: ExtAddr) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ext_addr_display() {
        let addr = ExtAddr(0x0021_2EFF_FF01_2345);
        assert_eq!(addr.to_string(), "0x00212EFFFF012345");
    }

    #[test]
    fn test_empty_directory_resolves_nothing() {
        assert_eq!(EmptyDirectory.resolve(ExtAddr(1)), None);
    }
}
