//! Incoming request handlers
//!
//! One handler per client-initiated OTA cluster command. Each handler
//! records the request on the client, decides the response per the rules in
//! the upgrade cluster conversation, and sends at most a few frames.

use super::node::{BlockCursor, ClientState, UpgradeEndEcho};
use super::responses::BlockSendOutcome;
use super::Engine;
use crate::otau::{
    Command, ImageAnnouncement, ImageBlockRequest, ImagePageRequest, QueryNextImageRequest,
    Status, UpgradeEndRequest, DONT_CARE_FILE_VERSION, INDEFINITE_UPGRADE_TIME,
    MAX_RESPONSE_SPACING, MIN_RESPONSE_SPACING,
};
use crate::time::SteadyTime;
use crate::transport::{ApsDataIndication, ExtAddr};
use crate::zcl::ZclFrame;

/// What a query next image request is answered with.
enum QueryReply {
    /// Gate closed; the client times out and retries on its own.
    Silent,
    Plain(Status),
    Offer(ImageAnnouncement),
}

impl Engine {
    pub(super) fn query_next_image_request(
        &mut self,
        addr: ExtAddr,
        ind: &ApsDataIndication,
        frame: &ZclFrame,
        now: SteadyTime,
    ) {
        let req = match QueryNextImageRequest::parse(&frame.payload) {
            Ok(req) => req,
            Err(e) => {
                log::info!("otau: bad query next image request from {}: {}", addr, e);
                return;
            }
        };

        {
            let Some(node) = self.registry.get_mut(addr) else {
                return;
            };
            node.upgrade_end.clear();
            node.sequence = frame.sequence;
            node.endpoint = ind.src_endpoint;
            node.profile_id = ind.profile_id;
            node.manufacturer_code = req.manufacturer_code;
            node.image_type = req.image_type;
            node.software_version = req.file_version;
            node.hardware_version = req.hardware_version.unwrap_or(0xFFFF);
            node.started_at = now;
        }

        log::info!(
            "otau: query next image from {}: mfc 0x{:04X}, type 0x{:04X}, sw 0x{:08X}",
            addr,
            req.manufacturer_code,
            req.image_type,
            req.file_version
        );

        if !self.serving_enabled {
            return;
        }

        // associate an image on first contact; sleepy devices stay gated
        // behind the operator's permit
        let needs_selection = self
            .registry
            .get(addr)
            .map_or(false, |n| n.image.is_none());
        if needs_selection {
            let picked = self
                .catalog
                .best_for(req.manufacturer_code, req.image_type, req.file_version)
                .map(|e| e.key());
            if let (Some(key), Some(node)) = (picked, self.registry.get_mut(addr)) {
                log::info!("otau: candidate {} for {}", key, addr);
                node.image = Some(key);
                if node.rx_on_when_idle {
                    node.permit_update = true;
                }
            }
        }

        let reply = {
            let Some(node) = self.registry.get(addr) else {
                return;
            };
            let offer = node
                .image
                .filter(|_| node.permit_update)
                .and_then(|key| self.catalog.get(key))
                .map(|entry| ImageAnnouncement {
                    manufacturer_code: entry.manufacturer_code,
                    image_type: entry.image_type,
                    file_version: entry.file_version,
                    total_image_size: entry.image.serve_len(),
                });

            if node.state() == ClientState::Abort {
                QueryReply::Plain(Status::Abort)
            } else if !self.gate.may_start(addr, now) {
                log::info!("otau: busy, letting {} run into its timeout", addr);
                QueryReply::Silent
            } else if self.catalog.quirks().is_suppressed(
                req.manufacturer_code,
                req.image_type,
                req.file_version,
            ) {
                QueryReply::Plain(Status::NoImageAvailable)
            } else if let Some(offer) = offer {
                QueryReply::Offer(offer)
            } else if self
                .catalog
                .quirks()
                .abort_instead_of_no_image(req.manufacturer_code)
            {
                QueryReply::Plain(Status::Abort)
            } else {
                QueryReply::Plain(Status::NoImageAvailable)
            }
        };

        match reply {
            QueryReply::Silent => {}
            QueryReply::Plain(status) => {
                self.send_query_next_image_response(addr, status, None, now);
            }
            QueryReply::Offer(offer) => {
                self.gate.mark_activity(addr, now);
                self.send_query_next_image_response(addr, Status::Success, Some(offer), now);
            }
        }
    }

    pub(super) fn image_block_request(
        &mut self,
        addr: ExtAddr,
        ind: &ApsDataIndication,
        frame: &ZclFrame,
        now: SteadyTime,
    ) {
        let req = match ImageBlockRequest::parse(&frame.payload) {
            Ok(req) => req,
            Err(e) => {
                log::info!("otau: bad image block request from {}: {}", addr, e);
                return;
            }
        };

        if !self.gate.may_start(addr, now) {
            log::debug!("otau: busy, ignoring block request from {}", addr);
            return;
        }
        self.gate.mark_activity(addr, now);

        let selected_version = self
            .registry
            .get(addr)
            .and_then(|n| n.image)
            .and_then(|key| self.catalog.get(key))
            .map(|e| e.file_version);

        {
            let Some(node) = self.registry.get_mut(addr) else {
                return;
            };
            node.upgrade_end.clear();
            node.sequence = frame.sequence;
            node.endpoint = ind.src_endpoint;
            node.profile_id = ind.profile_id;

            let mut file_version = req.file_version;
            if file_version == DONT_CARE_FILE_VERSION {
                if let Some(v) = selected_version {
                    file_version = v;
                }
            }

            node.cursor = BlockCursor {
                manufacturer_code: req.manufacturer_code,
                image_type: req.image_type,
                file_version,
                offset: req.offset,
                max_data_size: req.max_data_size,
                page_size: 0,
                page_bytes_done: 0,
                response_spacing: 0,
            };
            // the IEEE field adds nothing; records are keyed by extended
            // address already
        }

        log::debug!(
            "otau: block request from {}: offset 0x{:08X}, max {}",
            addr,
            req.offset,
            req.max_data_size
        );

        match self.send_block_response(addr, now) {
            Ok(BlockSendOutcome::Sent) => {
                if let Some(node) = self.registry.get_mut(addr) {
                    if node.state() != ClientState::Abort {
                        node.set_state(ClientState::WaitConfirm);
                    }
                }
            }
            Ok(BlockSendOutcome::Suppressed) => {}
            Err(e) => {
                log::warn!("otau: failed to send image block response: {}", e);
                if let Some(node) = self.registry.get_mut(addr) {
                    node.set_state(ClientState::Idle);
                }
            }
        }
    }

    pub(super) fn image_page_request(
        &mut self,
        addr: ExtAddr,
        ind: &ApsDataIndication,
        frame: &ZclFrame,
        now: SteadyTime,
    ) {
        let req = match ImagePageRequest::parse(&frame.payload) {
            Ok(req) => req,
            Err(e) => {
                log::info!("otau: bad image page request from {}: {}", addr, e);
                return;
            }
        };

        if !self.gate.may_start(addr, now) {
            log::debug!("otau: busy, ignoring page request from {}", addr);
            return;
        }
        self.gate.mark_activity(addr, now);

        let selected_version = self
            .registry
            .get(addr)
            .and_then(|n| n.image)
            .and_then(|key| self.catalog.get(key))
            .map(|e| e.file_version);

        let aborted = {
            let Some(node) = self.registry.get_mut(addr) else {
                return;
            };
            node.upgrade_end.clear();
            node.sequence = frame.sequence;
            node.endpoint = ind.src_endpoint;
            node.profile_id = ind.profile_id;
            node.state() == ClientState::Abort
        };

        if aborted {
            // answer with a single ABORT block response, stay aborted
            if let Err(e) = self.send_block_response(addr, now) {
                log::warn!("otau: failed to send abort response: {}", e);
            }
            return;
        }

        let mut file_version = req.file_version;
        if file_version == DONT_CARE_FILE_VERSION {
            if let Some(v) = selected_version {
                file_version = v;
            }
        }

        let spacing = match self.config.fast_page_spacing {
            Some(fast) => fast,
            None => req
                .response_spacing
                .clamp(MIN_RESPONSE_SPACING, MAX_RESPONSE_SPACING),
        };

        let Some(node) = self.registry.get_mut(addr) else {
            return;
        };
        node.cursor = BlockCursor {
            manufacturer_code: req.manufacturer_code,
            image_type: req.image_type,
            file_version,
            offset: req.offset,
            max_data_size: req.max_data_size,
            page_size: req.page_size,
            page_bytes_done: 0,
            response_spacing: spacing,
        };
        node.page_request_retry = 0;
        node.block_response_retry = 0;
        node.set_state(ClientState::WaitPageSpacing);

        log::debug!(
            "otau: page request from {}: offset 0x{:08X}, page {}, spacing {} ms",
            addr,
            req.offset,
            req.page_size,
            spacing
        );
        // the pacer emits the first block response on its next tick
    }

    pub(super) fn upgrade_end_request(
        &mut self,
        addr: ExtAddr,
        ind: &ApsDataIndication,
        frame: &ZclFrame,
        now: SteadyTime,
    ) {
        let req = match UpgradeEndRequest::parse(&frame.payload) {
            Ok(req) => req,
            Err(e) => {
                log::info!("otau: bad upgrade end request from {}: {}", addr, e);
                return;
            }
        };

        let (offset, manufacturer_code, image_type) = {
            let Some(node) = self.registry.get_mut(addr) else {
                return;
            };
            node.sequence = frame.sequence;
            node.endpoint = ind.src_endpoint;
            node.profile_id = ind.profile_id;
            node.upgrade_end = UpgradeEndEcho {
                status: req.status,
                manufacturer_code: req.manufacturer_code,
                image_type: req.image_type,
                file_version: req.file_version,
            };
            node.set_state(ClientState::Idle);
            (node.cursor.offset, node.manufacturer_code, node.image_type)
        };

        self.gate.remove(addr);

        log::info!(
            "otau: upgrade end from {}: status 0x{:02X}, version 0x{:08X}",
            addr,
            req.status,
            req.file_version
        );

        if req.status != Status::Success as u8 {
            if let Err(e) =
                self.send_default_response(addr, Command::UpgradeEndRequest, Status::Success, now)
            {
                log::warn!("otau: failed to acknowledge upgrade end: {}", e);
            }
            return;
        }

        if offset == 0 {
            // claims success without ever fetching a byte; certain firmwares
            // loop through reboots unless told to abort here
            log::warn!(
                "otau: {} reports success without any transfer, answering abort",
                addr
            );
            if let Err(e) =
                self.send_default_response(addr, Command::UpgradeEndRequest, Status::Abort, now)
            {
                log::warn!("otau: failed to send abort default response: {}", e);
            }
            return;
        }

        let watchdog = self.config.watchdog_reset
            && self
                .catalog
                .quirks()
                .needs_watchdog_reset(manufacturer_code, image_type);
        let upgrade_time = if watchdog {
            INDEFINITE_UPGRADE_TIME
        } else {
            self.config.upgrade_restart_time
        };

        match self.send_upgrade_end_response(addr, req, upgrade_time, now) {
            Ok(()) => {
                if let Some(node) = self.registry.get_mut(addr) {
                    node.permit_update = false;
                    node.image = None;
                }
                if watchdog {
                    self.send_watchdog_reset(addr);
                }
            }
            Err(e) => {
                log::warn!("otau: failed to send upgrade end response: {}", e);
            }
        }
    }
}
