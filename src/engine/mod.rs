//! OTA upgrade protocol engine
//!
//! Drives the cluster-0x0019 conversation: decodes incoming requests,
//! mutates the client registry, selects images from the catalog and answers
//! through the injected APS transport. Single-threaded and cooperative; the
//! host feeds indications, confirms and timer ticks in, nothing here blocks.

mod gate;
mod node;
mod pacer;
mod registry;
mod requests;
mod responses;


pub use gate::{ActivityGate, ACTIVITY_SWEEP_MS, ACTIVITY_WINDOW_MS, OTAU_MAX_ACTIVE};
pub use node::{BlockCursor, ClientRecord, ClientState, UpgradeEndEcho};
pub use registry::Registry;

use crate::catalog::Catalog;
use crate::config::OtauConfig;
use crate::otau::{Command, SAFE_DATA_SIZE};
use crate::time::SteadyTime;
use crate::transport::{
    ApsDataConfirm, ApsDataIndication, ApsTransport, DstAddress, ExtAddr, NodeDirectory,
    Observer, APS_STATUS_SUCCESS,
};
use crate::zcl::ZclFrame;

/// Pacer cadence: how often page transfers are advanced.
pub const IMAGE_PAGE_TIMER_DELAY_MS: u64 = 10;

/// How long a served page may sit without a follow-up request.
pub const WAIT_NEXT_REQUEST_TIMEOUT_MS: u64 = 60_000;

/// Image-notify nudges sent to a stalled client before giving up.
pub const MAX_IMG_PAGE_REQ_RETRY: u8 = 5;

/// Send attempts for one block response before a page transfer is dropped.
pub const MAX_IMG_BLOCK_RSP_RETRY: u8 = 10;

/// Consecutive no-acks before the block payload is shrunk to the
/// source-route-safe size.
pub const NO_ACK_THRESHOLD: u8 = 3;

/// Interval between dormant-client sweeps.
pub const CLEANUP_SWEEP_MS: u64 = 3 * 60 * 1000;

/// Inactivity after which a client record is dropped.
pub const CLEANUP_DELAY_MS: u64 = 4 * 60 * 60 * 1000;

pub(crate) const MAX_RADIUS: u8 = 0;
pub(crate) const DEFAULT_SRC_ENDPOINT: u8 = 0x01;
pub(crate) const WATCHDOG_SEND_DELAY_MS: u32 = 3_000;

/// The OTA upgrade server engine.
pub struct Engine {
    registry: Registry,
    catalog: Catalog,
    gate: ActivityGate,
    config: OtauConfig,
    transport: Box<dyn ApsTransport>,
    directory: Box<dyn NodeDirectory>,
    observer: Box<dyn Observer>,
    src_endpoint: u8,
    /// Sequence counter for unsolicited frames (image notify).
    zcl_seq: u8,
    serving_enabled: bool,
    last_pacer_run: Option<SteadyTime>,
    last_cleanup_run: Option<SteadyTime>,
}

impl Engine {
    pub fn new(
        catalog: Catalog,
        config: OtauConfig,
        transport: Box<dyn ApsTransport>,
        directory: Box<dyn NodeDirectory>,
        observer: Box<dyn Observer>,
    ) -> Self {
        Self {
            registry: Registry::new(),
            catalog,
            gate: ActivityGate::new(),
            config,
            transport,
            directory,
            observer,
            src_endpoint: DEFAULT_SRC_ENDPOINT,
            zcl_seq: 0,
            serving_enabled: true,
            last_pacer_run: None,
            last_cleanup_run: None,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    /// All known client records.
    pub fn clients(&self) -> impl Iterator<Item = &ClientRecord> {
        self.registry.iter()
    }

    pub fn client(&self, addr: ExtAddr) -> Option<&ClientRecord> {
        self.registry.get(addr)
    }

    /// Stop or resume answering client requests. While disabled, requests
    /// still update the registry but no responses are sent.
    pub fn set_serving_enabled(&mut self, enabled: bool) {
        self.serving_enabled = enabled;
    }

    /// Operator opt-in: allow (or withdraw) serving an image to a client,
    /// needed for devices that are not rx-on-when-idle. Selects a catalog
    /// candidate if none is associated yet.
    pub fn permit_upgrade(&mut self, addr: ExtAddr, permit: bool) -> bool {
        let Some(node) = self.registry.get(addr) else {
            return false;
        };
        let picked = if permit && node.image.is_none() {
            self.catalog
                .best_for(node.manufacturer_code, node.image_type, node.software_version)
                .map(|e| e.key())
        } else {
            node.image
        };

        let node = match self.registry.get_mut(addr) {
            Some(n) => n,
            None => return false,
        };
        node.permit_update = permit;
        if permit {
            node.image = picked;
        }
        self.observer.node_changed(addr);
        true
    }

    /// Abort a running upgrade; every following response carries ABORT
    /// until the client starts over with a fresh query.
    pub fn abort_upgrade(&mut self, addr: ExtAddr) -> bool {
        let Some(node) = self.registry.get_mut(addr) else {
            return false;
        };
        node.set_state(ClientState::Abort);
        node.permit_update = false;
        self.observer.node_changed(addr);
        true
    }

    /// APSDE-DATA.indication entry point.
    pub fn handle_indication(&mut self, ind: &ApsDataIndication, now: SteadyTime) {
        if ind.cluster_id != crate::otau::OTAU_CLUSTER_ID {
            return;
        }

        let frame = match ZclFrame::parse(&ind.asdu) {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("otau: dropping unparseable frame from {}: {}", ind.src_ext, e);
                return;
            }
        };

        if frame.is_default_response() {
            if let &[command, status] = frame.payload.as_slice() {
                log::debug!(
                    "otau: default response from {} for cmd 0x{:02X}, status 0x{:02X}",
                    ind.src_ext,
                    command,
                    status
                );
            }
            return;
        }

        if !frame.is_cluster_command() {
            return;
        }

        let command = match Command::try_from(frame.command) {
            Ok(
                cmd @ (Command::QueryNextImageRequest
                | Command::ImageBlockRequest
                | Command::ImagePageRequest
                | Command::UpgradeEndRequest),
            ) => cmd,
            _ => return,
        };

        let addr = ind.src_ext;
        let descriptor = if self.registry.contains(addr) {
            None
        } else {
            self.directory.resolve(addr)
        };

        let node = self.registry.get_or_insert(addr, ind.src_nwk, now);
        if let Some(desc) = descriptor {
            node.endpoint = desc.endpoint;
            node.profile_id = desc.profile_id;
            node.manufacturer_code = desc.manufacturer_code;
            node.rx_on_when_idle = desc.rx_on_when_idle;
        }
        node.nwk_addr = ind.src_nwk;
        node.last_activity = now;
        node.last_command = Some(command);

        match command {
            Command::QueryNextImageRequest => {
                self.query_next_image_request(addr, ind, &frame, now);
            }
            Command::ImageBlockRequest => {
                self.image_block_request(addr, ind, &frame, now);
            }
            Command::ImagePageRequest => {
                self.image_page_request(addr, ind, &frame, now);
            }
            Command::UpgradeEndRequest => {
                self.upgrade_end_request(addr, ind, &frame, now);
            }
            _ => {}
        }

        self.observer.node_changed(addr);
    }

    /// APSDE-DATA.confirm entry point.
    pub fn handle_confirm(&mut self, conf: &ApsDataConfirm, now: SteadyTime) {
        let DstAddress::Ext(addr) = conf.dst else {
            return;
        };
        let Some(node) = self.registry.get_mut(addr) else {
            return;
        };
        if node.aps_request_id != Some(conf.id) {
            return;
        }

        node.aps_request_id = None;
        let advance = node.pending_advance;
        node.pending_advance = 0;

        if conf.status == APS_STATUS_SUCCESS {
            node.no_ack_count = 0;
            node.block_response_retry = 0;
            node.last_activity = now;

            if advance > 0 {
                node.cursor.offset += u32::from(advance);
                if node.in_page_transfer() {
                    node.cursor.page_bytes_done += u16::from(advance);
                    node.sequence = node.sequence.wrapping_add(1);
                }
            }

            if node.state() == ClientState::WaitConfirm {
                node.set_state(ClientState::Idle);
            }
        } else {
            log::warn!(
                "otau: aps confirm for {} failed, status 0x{:02X}",
                addr,
                conf.status
            );

            let was_block_response =
                node.sent_command == Command::ImageBlockResponse as u8;
            if self.config.no_ack_statuses.contains(&conf.status) {
                node.no_ack_count = node.no_ack_count.saturating_add(1);
                let first_block_failed = was_block_response && node.cursor.offset == 0;
                if (node.no_ack_count >= NO_ACK_THRESHOLD || first_block_failed)
                    && node.max_data_size > SAFE_DATA_SIZE
                {
                    log::info!(
                        "otau: shrinking block payload for {} to {} bytes",
                        addr,
                        SAFE_DATA_SIZE
                    );
                    node.max_data_size = SAFE_DATA_SIZE;
                }
            }

            // an unreachable client must not be re-served every spacing
            // interval forever
            node.block_response_retry = node.block_response_retry.saturating_add(1);
            if node.block_response_retry >= MAX_IMG_BLOCK_RSP_RETRY
                && node.state() == ClientState::WaitPageSpacing
            {
                log::warn!("otau: giving up page transfer for {}", addr);
                node.set_state(ClientState::Idle);
            }
        }

        self.observer.node_changed(addr);
    }

    /// Logical timer entry point. Call at least every
    /// [`IMAGE_PAGE_TIMER_DELAY_MS`] while transfers are running.
    pub fn tick(&mut self, now: SteadyTime) {
        let pacer_due = self
            .last_pacer_run
            .map_or(true, |t| now.elapsed_since(t) >= IMAGE_PAGE_TIMER_DELAY_MS);
        if pacer_due {
            self.last_pacer_run = Some(now);
            self.pacer_pass(now);
        }

        let cleanup_due = self
            .last_cleanup_run
            .map_or(true, |t| now.elapsed_since(t) >= CLEANUP_SWEEP_MS);
        if cleanup_due {
            self.last_cleanup_run = Some(now);
            for addr in self.registry.cleanup(now, CLEANUP_DELAY_MS) {
                self.gate.remove(addr);
                self.observer.node_changed(addr);
            }
        }

        self.gate.tick(now);
    }
}
