//! Outgoing response composition
//!
//! Builders for every server-to-client frame. Each send records the
//! outstanding APS request id on the client record; the confirm callback is
//! the only place that clears it.

use super::node::ClientState;
use super::Engine;
use crate::otau::{
    Command, ImageBlock, ImageBlockResponse, ImageAnnouncement, ImageNotify,
    QueryNextImageResponse, Status, UpgradeEndRequest, UpgradeEndResponse, DE_CLUSTER_ID,
    HA_PROFILE_ID, OTAU_CLUSTER_ID,
};
use crate::time::SteadyTime;
use crate::transport::{
    ApsDataRequest, DstAddress, ExtAddr, TransportError, TxOptions, BROADCAST_ENDPOINT,
    NWK_BROADCAST_RXON,
};
use crate::wire::{put_u16, put_u8};
use crate::zcl::{
    ZclFrame, FC_DISABLE_DEFAULT_RESPONSE, FC_FRAME_TYPE_CLUSTER, FC_DIRECTION_SERVER_TO_CLIENT,
};

/// Outcome of attempting one block response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BlockSendOutcome {
    Sent,
    /// The page boundary clips the payload to zero bytes; nothing was sent.
    Suppressed,
}

impl Engine {
    /// Compose the APS request for `frame` and hand it to the transport,
    /// recording the in-flight request on the client.
    fn send_to_node(
        &mut self,
        addr: ExtAddr,
        frame: &ZclFrame,
        tx_options: TxOptions,
        now: SteadyTime,
        pending_advance: u8,
    ) -> Result<(), TransportError> {
        let node = self
            .registry
            .get_mut(addr)
            .ok_or_else(|| TransportError::SendFailed("unknown client".to_string()))?;

        let req = ApsDataRequest {
            dst: DstAddress::Ext(addr),
            dst_endpoint: node.endpoint,
            src_endpoint: self.src_endpoint,
            profile_id: node.profile_id,
            cluster_id: OTAU_CLUSTER_ID,
            radius: super::MAX_RADIUS,
            tx_options,
            send_delay_ms: 0,
            asdu: frame.to_bytes(),
        };

        let id = self.transport.aps_request(req)?;
        node.aps_request_id = Some(id);
        node.sent_command = frame.command;
        node.pending_advance = pending_advance;
        node.last_response_time = Some(now);
        Ok(())
    }

    pub(super) fn send_query_next_image_response(
        &mut self,
        addr: ExtAddr,
        status: Status,
        image: Option<ImageAnnouncement>,
        now: SteadyTime,
    ) {
        let Some(sequence) = self.registry.get(addr).map(|n| n.sequence) else {
            return;
        };

        let body = QueryNextImageResponse { status, image };
        let frame = ZclFrame::server_response(
            sequence,
            Command::QueryNextImageResponse as u8,
            body.to_bytes(),
        );

        log::info!(
            "otau: query next image response to {}: {:?}",
            addr,
            status
        );

        match self.send_to_node(addr, &frame, TxOptions::ACKNOWLEDGED, now, 0) {
            Ok(()) => {
                // a fresh query always restarts the conversation, even after
                // an abort was answered
                if let Some(node) = self.registry.get_mut(addr) {
                    node.set_state(ClientState::WaitConfirm);
                }
            }
            Err(e) => {
                log::warn!("otau: failed to send query next image response: {}", e);
                if let Some(node) = self.registry.get_mut(addr) {
                    node.set_state(ClientState::Idle);
                }
            }
        }
    }

    /// Build and send one image block response for the client's cursor.
    ///
    /// Selection of the body follows the block-response rules: metadata
    /// mismatch aborts the transfer, aborted transfers keep answering ABORT,
    /// a missing image or permit answers NO_IMAGE_AVAILABLE, an offset past
    /// the image answers MALFORMED_COMMAND, everything else is a data slice.
    pub(super) fn send_block_response(
        &mut self,
        addr: ExtAddr,
        now: SteadyTime,
    ) -> Result<BlockSendOutcome, TransportError> {
        struct Prepared {
            payload: Vec<u8>,
            acknowledged: bool,
            pending_advance: u8,
            sequence: u8,
        }

        let prepared = {
            let node = self
                .registry
                .get_mut(addr)
                .ok_or_else(|| TransportError::SendFailed("unknown client".to_string()))?;
            let entry = node.image.and_then(|key| self.catalog.get(key));
            let page_mode = node.in_page_transfer();

            let mut acknowledged = true;
            let mut pending_advance = 0u8;

            let body = match entry {
                Some(entry) => {
                    let mismatch = node.cursor.file_version != entry.file_version
                        || node.cursor.image_type != entry.image_type
                        || node.cursor.manufacturer_code != entry.manufacturer_code;

                    if mismatch {
                        node.set_state(ClientState::Abort);
                        ImageBlockResponse {
                            status: Status::Abort,
                            block: None,
                        }
                    } else if node.state() == ClientState::Abort {
                        ImageBlockResponse {
                            status: Status::Abort,
                            block: None,
                        }
                    } else if !node.permit_update {
                        ImageBlockResponse {
                            status: Status::NoImageAvailable,
                            block: None,
                        }
                    } else if node.cursor.offset >= entry.image.serve_len() {
                        ImageBlockResponse {
                            status: Status::MalformedCommand,
                            block: None,
                        }
                    } else {
                        let offset = node.cursor.offset;
                        let remaining = entry.image.serve_len() - offset;

                        let mut size =
                            u32::from(node.cursor.max_data_size.min(node.max_data_size));
                        if let Some(clamp) = self
                            .catalog
                            .quirks()
                            .payload_clamp(node.manufacturer_code)
                        {
                            size = size.min(u32::from(clamp));
                        }
                        size = size.min(remaining);

                        if page_mode {
                            size = size.min(u32::from(node.cursor.page_remaining()));
                            if size == 0 {
                                return Ok(BlockSendOutcome::Suppressed);
                            }
                        }

                        let start = offset as usize;
                        let data = entry.image.raw[start..start + size as usize].to_vec();

                        let last_in_page = page_mode
                            && node.cursor.page_bytes_done + size as u16
                                >= node.cursor.page_size;
                        acknowledged = !page_mode || last_in_page;
                        pending_advance = size as u8;

                        ImageBlockResponse {
                            status: Status::Success,
                            block: Some(ImageBlock {
                                manufacturer_code: entry.manufacturer_code,
                                image_type: entry.image_type,
                                file_version: entry.file_version,
                                offset,
                                data,
                            }),
                        }
                    }
                }
                None => {
                    let status = if node.state() == ClientState::Abort {
                        Status::Abort
                    } else {
                        Status::NoImageAvailable
                    };
                    ImageBlockResponse {
                        status,
                        block: None,
                    }
                }
            };

            Prepared {
                payload: body.to_bytes(),
                acknowledged,
                pending_advance,
                sequence: node.sequence,
            }
        };

        let frame = ZclFrame::server_response(
            prepared.sequence,
            Command::ImageBlockResponse as u8,
            prepared.payload,
        );
        let tx_options = if prepared.acknowledged {
            TxOptions::ACKNOWLEDGED
        } else {
            TxOptions::UNACKNOWLEDGED
        };

        self.send_to_node(addr, &frame, tx_options, now, prepared.pending_advance)?;
        Ok(BlockSendOutcome::Sent)
    }

    pub(super) fn send_upgrade_end_response(
        &mut self,
        addr: ExtAddr,
        req: UpgradeEndRequest,
        upgrade_time: u32,
        now: SteadyTime,
    ) -> Result<(), TransportError> {
        let Some(sequence) = self.registry.get(addr).map(|n| n.sequence) else {
            return Err(TransportError::SendFailed("unknown client".to_string()));
        };

        let body = UpgradeEndResponse {
            manufacturer_code: req.manufacturer_code,
            image_type: req.image_type,
            file_version: req.file_version,
            current_time: 0,
            upgrade_time,
        };
        let frame = ZclFrame::server_response(
            sequence,
            Command::UpgradeEndResponse as u8,
            body.to_bytes(),
        );

        log::info!(
            "otau: upgrade end response to {}: restart in {} s",
            addr,
            upgrade_time
        );

        self.send_to_node(addr, &frame, TxOptions::ACKNOWLEDGED, now, 0)
    }

    pub(super) fn send_default_response(
        &mut self,
        addr: ExtAddr,
        command: Command,
        status: Status,
        now: SteadyTime,
    ) -> Result<(), TransportError> {
        let Some(sequence) = self.registry.get(addr).map(|n| n.sequence) else {
            return Err(TransportError::SendFailed("unknown client".to_string()));
        };

        let frame = ZclFrame::default_response(sequence, command as u8, status as u8);
        self.send_to_node(addr, &frame, TxOptions::ACKNOWLEDGED, now, 0)
    }

    /// Nudge every listening device into querying for an image.
    pub fn broadcast_image_notify(&mut self) -> bool {
        let frame = ZclFrame {
            frame_control: FC_FRAME_TYPE_CLUSTER
                | FC_DIRECTION_SERVER_TO_CLIENT
                | FC_DISABLE_DEFAULT_RESPONSE,
            manufacturer: None,
            sequence: self.next_seq(),
            command: Command::ImageNotify as u8,
            payload: ImageNotify.to_bytes(),
        };

        let req = ApsDataRequest {
            dst: DstAddress::Nwk(NWK_BROADCAST_RXON),
            dst_endpoint: BROADCAST_ENDPOINT,
            src_endpoint: self.src_endpoint,
            profile_id: HA_PROFILE_ID,
            cluster_id: OTAU_CLUSTER_ID,
            radius: super::MAX_RADIUS,
            tx_options: TxOptions::UNACKNOWLEDGED,
            send_delay_ms: 0,
            asdu: frame.to_bytes(),
        };

        match self.transport.aps_request(req) {
            Ok(_) => {
                log::info!("otau: broadcast image notify");
                true
            }
            Err(e) => {
                log::warn!("otau: broadcast image notify failed: {}", e);
                false
            }
        }
    }

    /// Nudge one client into querying for an image. Withheld for devices
    /// whose firmware mishandles the notify command.
    pub fn unicast_image_notify(&mut self, addr: ExtAddr) -> bool {
        let Some(node) = self.registry.get(addr) else {
            return false;
        };
        if self.catalog.quirks().skip_unicast_notify(
            node.manufacturer_code,
            node.image_type,
            node.software_version,
        ) {
            log::debug!("otau: image notify withheld from {}", addr);
            return false;
        }

        let dst_endpoint = node.notify_endpoint.unwrap_or(node.endpoint);
        let profile_id = node.profile_id;

        let frame = ZclFrame {
            frame_control: FC_FRAME_TYPE_CLUSTER | FC_DIRECTION_SERVER_TO_CLIENT,
            manufacturer: None,
            sequence: self.next_seq(),
            command: Command::ImageNotify as u8,
            payload: ImageNotify.to_bytes(),
        };

        let req = ApsDataRequest {
            dst: DstAddress::Ext(addr),
            dst_endpoint,
            src_endpoint: self.src_endpoint,
            profile_id,
            cluster_id: OTAU_CLUSTER_ID,
            radius: super::MAX_RADIUS,
            tx_options: TxOptions::UNACKNOWLEDGED,
            send_delay_ms: 0,
            asdu: frame.to_bytes(),
        };

        // fire and forget; the confirm id is not tracked on the record
        match self.transport.aps_request(req) {
            Ok(_) => {
                log::info!("otau: image notify to {}", addr);
                true
            }
            Err(e) => {
                log::warn!("otau: image notify to {} failed: {}", addr, e);
                false
            }
        }
    }

    /// The vendor restart path: a write-RAM command on the private cluster,
    /// delayed so the upgrade end response settles first.
    pub(super) fn send_watchdog_reset(&mut self, addr: ExtAddr) {
        let Some(node) = self.registry.get(addr) else {
            return;
        };

        let mut payload = Vec::with_capacity(7);
        put_u16(&mut payload, 0x8888); // RAM offset
        put_u8(&mut payload, 1); // data length
        put_u8(&mut payload, 1); // watchdog trigger value
        payload.extend_from_slice(&[0, 0, 0]); // pad to 4 data bytes

        let frame = ZclFrame {
            frame_control: FC_FRAME_TYPE_CLUSTER | FC_DISABLE_DEFAULT_RESPONSE,
            manufacturer: None,
            sequence: node.sequence.wrapping_add(1),
            command: 0x04, // write RAM
            payload,
        };

        let req = ApsDataRequest {
            dst: DstAddress::Ext(addr),
            dst_endpoint: node.endpoint,
            src_endpoint: self.src_endpoint,
            profile_id: node.profile_id,
            cluster_id: DE_CLUSTER_ID,
            radius: super::MAX_RADIUS,
            tx_options: TxOptions::ACKNOWLEDGED,
            send_delay_ms: super::WATCHDOG_SEND_DELAY_MS,
            asdu: frame.to_bytes(),
        };

        match self.transport.aps_request(req) {
            Ok(_) => log::info!("otau: scheduled watchdog reset for {}", addr),
            Err(e) => log::warn!("otau: watchdog reset for {} failed: {}", addr, e),
        }
    }

    fn next_seq(&mut self) -> u8 {
        let seq = self.zcl_seq;
        self.zcl_seq = self.zcl_seq.wrapping_add(1);
        seq
    }
}
