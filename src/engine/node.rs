//! Per-client transfer state

use crate::catalog::ImageKey;
use crate::otau::{Command, HA_PROFILE_ID, MAX_DATA_SIZE};
use crate::time::SteadyTime;
use crate::transport::ExtAddr;

/// Lifecycle state of a client record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientState {
    #[default]
    Idle,
    /// A response was sent, its APS confirm is outstanding.
    WaitConfirm,
    /// In a page transfer, pacing block responses.
    WaitPageSpacing,
    /// Page served, waiting for the client's next page or block request.
    WaitNextRequest,
    /// The last confirm reported a delivery failure.
    Error,
    /// The transfer was aborted; responses carry ABORT until a new query.
    Abort,
}

/// Block transfer cursor, shared by single-block and page serving.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockCursor {
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
    pub offset: u32,
    pub max_data_size: u8,
    pub page_size: u16,
    pub page_bytes_done: u16,
    /// Milliseconds between block responses inside a page.
    pub response_spacing: u16,
}

impl BlockCursor {
    /// Bytes still to serve inside the current page.
    pub fn page_remaining(&self) -> u16 {
        self.page_size.saturating_sub(self.page_bytes_done)
    }
}

/// Echo of the last upgrade end request, kept for the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpgradeEndEcho {
    pub status: u8,
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
}

impl UpgradeEndEcho {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// State the server keeps per OTA client, keyed by extended address.
#[derive(Debug)]
pub struct ClientRecord {
    pub ext_addr: ExtAddr,
    pub nwk_addr: u16,
    pub endpoint: u8,
    /// Endpoint override for image notifies, where devices listen elsewhere.
    pub notify_endpoint: Option<u8>,
    pub profile_id: u16,

    /// As reported in the last query.
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub software_version: u32,
    pub hardware_version: u16,
    pub rx_on_when_idle: bool,

    state: ClientState,
    /// Selected catalog image, referenced by identity.
    pub image: Option<ImageKey>,
    pub permit_update: bool,

    /// Server-side payload cap, shrunk once a route proves lossy.
    pub max_data_size: u8,
    pub cursor: BlockCursor,
    /// Last cluster request received from this client.
    pub last_command: Option<Command>,

    /// ZCL sequence number used for the next response.
    pub sequence: u8,
    /// The single outstanding APS request id, if any.
    pub aps_request_id: Option<u8>,
    /// ZCL command id of the in-flight response.
    pub sent_command: u8,
    /// Data bytes the cursor advances by once the in-flight response
    /// confirms.
    pub pending_advance: u8,
    pub no_ack_count: u8,

    pub last_response_time: Option<SteadyTime>,
    pub last_activity: SteadyTime,
    /// When the current upgrade conversation started.
    pub started_at: SteadyTime,

    pub page_request_retry: u8,
    pub block_response_retry: u8,

    pub upgrade_end: UpgradeEndEcho,
}

impl ClientRecord {
    pub fn new(ext_addr: ExtAddr, nwk_addr: u16, now: SteadyTime) -> Self {
        Self {
            ext_addr,
            nwk_addr,
            endpoint: 0xFF, // until the first request reveals it
            notify_endpoint: None,
            profile_id: HA_PROFILE_ID,
            manufacturer_code: 0,
            image_type: 0,
            software_version: 0,
            hardware_version: 0xFFFF,
            rx_on_when_idle: true,
            state: ClientState::Idle,
            image: None,
            permit_update: false,
            max_data_size: MAX_DATA_SIZE,
            cursor: BlockCursor::default(),
            last_command: None,
            sequence: 0,
            aps_request_id: None,
            sent_command: 0,
            pending_advance: 0,
            no_ack_count: 0,
            last_response_time: None,
            last_activity: now,
            started_at: now,
            page_request_retry: 0,
            block_response_retry: 0,
            upgrade_end: UpgradeEndEcho::default(),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Transition to `state`; returns true when it actually changed.
    pub fn set_state(&mut self, state: ClientState) -> bool {
        if self.state == state {
            return false;
        }
        log::debug!(
            "client {}: {:?} -> {:?}",
            self.ext_addr,
            self.state,
            state
        );
        self.state = state;
        true
    }

    /// True while the client is being served through a page request.
    pub fn in_page_transfer(&self) -> bool {
        self.last_command == Some(Command::ImagePageRequest)
    }

    /// Milliseconds since the conversation started.
    pub fn elapsed_ms(&self, now: SteadyTime) -> u64 {
        now.elapsed_since(self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_defaults() {
        let node = ClientRecord::new(ExtAddr(0xAA), 0x1234, SteadyTime::from_millis(5));
        assert_eq!(node.state(), ClientState::Idle);
        assert_eq!(node.profile_id, HA_PROFILE_ID);
        assert_eq!(node.endpoint, 0xFF);
        assert_eq!(node.max_data_size, MAX_DATA_SIZE);
        assert!(node.aps_request_id.is_none());
        assert!(!node.permit_update);
    }

    #[test]
    fn test_set_state_reports_change() {
        let mut node = ClientRecord::new(ExtAddr(1), 0, SteadyTime::from_millis(0));
        assert!(node.set_state(ClientState::WaitConfirm));
        assert!(!node.set_state(ClientState::WaitConfirm));
        assert_eq!(node.state(), ClientState::WaitConfirm);
    }

    #[test]
    fn test_page_remaining_saturates() {
        let cursor = BlockCursor {
            page_size: 100,
            page_bytes_done: 120,
            ..BlockCursor::default()
        };
        assert_eq!(cursor.page_remaining(), 0);
    }
}
