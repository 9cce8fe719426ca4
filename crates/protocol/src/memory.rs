//! In-memory endpoint pair
//!
//! Connects a host and a frame inside one process. Each endpoint stamps its own
//! origin on the messages it sends, the way a browser fills in
//! `MessageEvent.origin`, and keeps a journal of what it posted.

use crate::transport::{Endpoint, RawInbound, ResponseChannel};
use chart_frame_shared::{EventTag, Message, ProtocolError, ProtocolResult};
use futures::channel::{mpsc, oneshot};
use std::cell::RefCell;

pub type InboundStream = mpsc::UnboundedReceiver<RawInbound>;

/// One side of an in-memory pairing
pub struct MemoryEndpoint {
    origin: String,
    peer_tx: mpsc::UnboundedSender<RawInbound>,
    own_tx: mpsc::UnboundedSender<RawInbound>,
    sent: RefCell<Vec<serde_json::Value>>,
}

/// Create two connected endpoints with their inbound streams
pub fn pair(
    host_origin: &str,
    frame_origin: &str,
) -> ((MemoryEndpoint, InboundStream), (MemoryEndpoint, InboundStream)) {
    let (host_tx, host_rx) = mpsc::unbounded();
    let (frame_tx, frame_rx) = mpsc::unbounded();

    let host = MemoryEndpoint {
        origin: host_origin.to_string(),
        peer_tx: frame_tx.clone(),
        own_tx: host_tx.clone(),
        sent: RefCell::new(Vec::new()),
    };
    let frame = MemoryEndpoint {
        origin: frame_origin.to_string(),
        peer_tx: host_tx,
        own_tx: frame_tx,
        sent: RefCell::new(Vec::new()),
    };

    ((host, host_rx), (frame, frame_rx))
}

impl MemoryEndpoint {
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Raw envelopes posted so far
    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.sent.borrow().clone()
    }

    /// Tags of the envelopes posted so far, in send order
    pub fn sent_tags(&self) -> Vec<EventTag> {
        self.sent
            .borrow()
            .iter()
            .filter_map(|value| serde_json::from_value::<Message>(value.clone()).ok())
            .map(|message| message.tag())
            .collect()
    }
}

impl Endpoint for MemoryEndpoint {
    fn post(
        &self,
        data: serde_json::Value,
        expect_ack: bool,
    ) -> ProtocolResult<Option<oneshot::Receiver<serde_json::Value>>> {
        let (reply, receiver) = if expect_ack {
            let (tx, rx) = oneshot::channel();
            let channel = ResponseChannel::new(move |value| {
                tx.send(value).map_err(|_| ProtocolError::Transport {
                    message: "Requester is no longer waiting".to_string(),
                })
            });
            (Some(channel), Some(rx))
        } else {
            (None, None)
        };

        self.sent.borrow_mut().push(data.clone());
        self.peer_tx
            .unbounded_send(RawInbound {
                origin: self.origin.clone(),
                data,
                reply,
            })
            .map_err(|_| ProtocolError::Transport {
                message: "Peer endpoint is closed".to_string(),
            })?;

        Ok(receiver)
    }

    fn close(&self) {
        self.own_tx.close_channel();
    }
}
