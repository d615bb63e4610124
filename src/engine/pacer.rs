//! Transfer pacer
//!
//! A logical 10 ms tick that advances all page transfers: emits block
//! responses with the negotiated spacing, detects served pages, and nudges
//! stalled clients with image notifies before giving up.

use super::node::ClientState;
use super::responses::BlockSendOutcome;
use super::Engine;
use crate::time::SteadyTime;
use crate::transport::ExtAddr;

enum PacerAction {
    None,
    PageDone,
    Emit,
    Notify,
    GiveUpPage,
    GiveUpRequest,
}

impl Engine {
    pub(super) fn pacer_pass(&mut self, now: SteadyTime) {
        for addr in self.registry.addrs() {
            let action = self.pacer_action(addr, now);
            self.apply_pacer_action(addr, action, now);
        }
    }

    fn pacer_action(&self, addr: ExtAddr, now: SteadyTime) -> PacerAction {
        let Some(node) = self.registry.get(addr) else {
            return PacerAction::None;
        };

        match node.state() {
            ClientState::WaitPageSpacing => {
                // the outstanding confirm is the barrier; never pipeline
                if node.aps_request_id.is_some() {
                    return PacerAction::None;
                }

                if node.cursor.page_bytes_done >= node.cursor.page_size {
                    return PacerAction::PageDone;
                }

                let image_exhausted = node
                    .image
                    .and_then(|key| self.catalog.get(key))
                    .map_or(false, |e| node.cursor.offset >= e.image.serve_len());
                if image_exhausted {
                    return PacerAction::PageDone;
                }

                // spacing applies between page blocks; the first block of a
                // page goes out immediately
                if node.cursor.page_bytes_done > 0 {
                    if let Some(last) = node.last_response_time {
                        if now.elapsed_since(last) < u64::from(node.cursor.response_spacing) {
                            return PacerAction::None;
                        }
                    }
                }

                PacerAction::Emit
            }
            ClientState::WaitNextRequest => {
                if !now.has_expired(node.last_activity, super::WAIT_NEXT_REQUEST_TIMEOUT_MS) {
                    return PacerAction::None;
                }
                if node.page_request_retry >= super::MAX_IMG_PAGE_REQ_RETRY {
                    PacerAction::GiveUpRequest
                } else {
                    PacerAction::Notify
                }
            }
            _ => PacerAction::None,
        }
    }

    fn apply_pacer_action(&mut self, addr: ExtAddr, action: PacerAction, now: SteadyTime) {
        match action {
            PacerAction::None => {}
            PacerAction::PageDone => {
                if let Some(node) = self.registry.get_mut(addr) {
                    node.last_activity = now;
                    node.set_state(ClientState::WaitNextRequest);
                }
                self.observer.node_changed(addr);
            }
            PacerAction::Emit => {
                match self.send_block_response(addr, now) {
                    Ok(BlockSendOutcome::Sent) => {
                        if let Some(node) = self.registry.get_mut(addr) {
                            node.block_response_retry = 0;
                        }
                    }
                    Ok(BlockSendOutcome::Suppressed) => {
                        // page boundary reached without a byte to send
                        if let Some(node) = self.registry.get_mut(addr) {
                            node.last_activity = now;
                            node.set_state(ClientState::WaitNextRequest);
                        }
                    }
                    Err(e) => {
                        log::warn!("otau: block response to {} failed: {}", addr, e);
                        let mut give_up = false;
                        if let Some(node) = self.registry.get_mut(addr) {
                            node.block_response_retry =
                                node.block_response_retry.saturating_add(1);
                            give_up =
                                node.block_response_retry >= super::MAX_IMG_BLOCK_RSP_RETRY;
                        }
                        if give_up {
                            self.apply_pacer_action(addr, PacerAction::GiveUpPage, now);
                        }
                    }
                }
                self.observer.node_changed(addr);
            }
            PacerAction::Notify => {
                if let Some(node) = self.registry.get_mut(addr) {
                    node.page_request_retry = node.page_request_retry.saturating_add(1);
                    node.last_activity = now;
                }
                log::info!("otau: {} stalled, nudging with image notify", addr);
                self.unicast_image_notify(addr);
                self.observer.node_changed(addr);
            }
            PacerAction::GiveUpPage => {
                log::warn!("otau: giving up page transfer for {}", addr);
                if let Some(node) = self.registry.get_mut(addr) {
                    node.set_state(ClientState::Idle);
                }
                self.observer.node_changed(addr);
            }
            PacerAction::GiveUpRequest => {
                log::info!("otau: {} never resumed, back to idle", addr);
                if let Some(node) = self.registry.get_mut(addr) {
                    node.page_request_retry = 0;
                    node.set_state(ClientState::Idle);
                }
                self.observer.node_changed(addr);
            }
        }
    }
}
