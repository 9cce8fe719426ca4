//! Origin-checked message transport with per-message acknowledgment
//!
//! An [`Endpoint`] is the raw send primitive (a remote window, or an in-memory
//! peer in tests). [`Transport`] wraps it with envelope encoding, direction
//! tagging, inbound validation and the ack/timeout logic.

use crate::config::ProtocolConfig;
use crate::timer::Timer;
use chart_frame_shared::{AckPayload, Event, EventTag, Message, MessageSource, ProtocolError, ProtocolResult};
use futures::channel::oneshot;
use futures::future::{self, Either};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

type ReplySink = Box<dyn FnOnce(serde_json::Value) -> ProtocolResult<()>>;

/// One-shot reply handle paired with a single inbound request
///
/// The first `reply` is delivered; later calls fail with `AlreadyReplied`.
/// Dropping the channel without replying leaves the sender waiting until its
/// timeout expires.
pub struct ResponseChannel {
    sink: Option<ReplySink>,
}

impl ResponseChannel {
    pub fn new<F>(sink: F) -> Self
    where
        F: FnOnce(serde_json::Value) -> ProtocolResult<()> + 'static,
    {
        Self {
            sink: Some(Box::new(sink)),
        }
    }

    pub fn reply(&mut self, ack: &AckPayload) -> ProtocolResult<()> {
        let sink = self.sink.take().ok_or(ProtocolError::AlreadyReplied)?;
        sink(serde_json::to_value(ack)?)
    }

    pub fn is_resolved(&self) -> bool {
        self.sink.is_none()
    }
}

impl fmt::Debug for ResponseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseChannel")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Message as it arrives from an endpoint, before validation
#[derive(Debug)]
pub struct RawInbound {
    pub origin: String,
    pub data: serde_json::Value,
    pub reply: Option<ResponseChannel>,
}

/// Validated inbound message
#[derive(Debug)]
pub struct Inbound {
    pub event: Event,
    pub reply: Option<ResponseChannel>,
}

/// Raw cross-document send primitive
pub trait Endpoint {
    /// Deliver `data` to the remote side. When `expect_ack` is set the endpoint
    /// attaches a fresh response channel and returns the receiving half.
    fn post(
        &self,
        data: serde_json::Value,
        expect_ack: bool,
    ) -> ProtocolResult<Option<oneshot::Receiver<serde_json::Value>>>;

    /// Stop listening for inbound messages; the inbound stream then ends.
    fn close(&self);
}

/// Directionally tagged transport for one side of the pairing
pub struct Transport {
    endpoint: Rc<dyn Endpoint>,
    local: MessageSource,
    expected_origin: String,
    ack_timeout: Duration,
    timer: Rc<dyn Timer>,
}

impl Transport {
    pub fn new(
        endpoint: Rc<dyn Endpoint>,
        local: MessageSource,
        config: &ProtocolConfig,
        timer: Rc<dyn Timer>,
    ) -> Self {
        Self {
            endpoint,
            local,
            expected_origin: config.expected_origin.clone(),
            ack_timeout: config.ack_timeout(),
            timer,
        }
    }

    pub fn local(&self) -> MessageSource {
        self.local
    }

    pub fn expected_origin(&self) -> &str {
        &self.expected_origin
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    /// Fire-and-forget send
    pub fn post(&self, event: Event) -> ProtocolResult<()> {
        let tag = event.tag();
        let data = self.encode(event)?;
        self.endpoint.post(data, false)?;
        log::trace!("Posted {tag}");
        Ok(())
    }

    /// Send `event` and wait for the reply on its own response channel
    pub async fn request(&self, event: Event) -> ProtocolResult<AckPayload> {
        let tag = event.tag();
        let data = self.encode(event)?;
        let reply = self.endpoint.post(data, true)?.ok_or_else(|| ProtocolError::Transport {
            message: format!("Endpoint attached no response channel to {tag}"),
        })?;

        log::debug!("Sent {tag}, awaiting acknowledgment");

        let timeout = self.timer.sleep(self.ack_timeout);
        let value = match future::select(reply, timeout).await {
            Either::Left((Ok(value), _)) => value,
            Either::Left((Err(oneshot::Canceled), timeout)) => {
                // Receiver dropped the channel; like an unanswered port this only
                // surfaces as a timeout.
                timeout.await;
                return Err(self.timeout_error(tag));
            }
            Either::Right(((), _)) => return Err(self.timeout_error(tag)),
        };

        let ack: AckPayload = serde_json::from_value(value)?;
        if let Some(message) = ack.error {
            log::warn!("{tag} rejected: {message}");
            return Err(ProtocolError::Rejected {
                event: tag,
                message,
            });
        }

        log::debug!("{tag} acknowledged");
        Ok(ack)
    }

    /// Validate a raw inbound message, dropping anything that does not pass
    pub fn accept(&self, raw: RawInbound) -> Option<Inbound> {
        if raw.origin != self.expected_origin {
            log::debug!(
                "Dropping message from unexpected origin '{}' (expected '{}')",
                raw.origin,
                self.expected_origin
            );
            return None;
        }

        let message: Message = match serde_json::from_value(raw.data) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("Dropping malformed message: {e}");
                return None;
            }
        };

        let tag = message.tag();
        if message.source == self.local {
            log::trace!("Ignoring own {tag} echoed back");
            return None;
        }

        if tag.direction().sender() != message.source {
            log::debug!("Dropping {tag}: not valid from {:?}", message.source);
            return None;
        }

        Some(Inbound {
            event: message.event,
            reply: raw.reply,
        })
    }

    pub fn close(&self) {
        self.endpoint.close();
    }

    fn encode(&self, event: Event) -> ProtocolResult<serde_json::Value> {
        let tag = event.tag();
        if tag.direction().sender() != self.local {
            return Err(ProtocolError::Transport {
                message: format!("{tag} cannot be sent from {:?}", self.local),
            });
        }

        Ok(serde_json::to_value(Message::new(event, self.local))?)
    }

    fn timeout_error(&self, event: EventTag) -> ProtocolError {
        log::warn!("No acknowledgment for {event} after {:?}", self.ack_timeout);
        ProtocolError::AckTimeout {
            event,
            timeout_ms: self.ack_timeout.as_millis() as u64,
        }
    }
}
