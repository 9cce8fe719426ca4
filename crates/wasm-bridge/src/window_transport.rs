//! `window.postMessage` endpoint
//!
//! Outbound messages go to the remote window with an explicit target origin.
//! Requests carry a fresh `MessageChannel` port; the receiver acknowledges on
//! that port, so each ack pairs with exactly one request. Inbound messages are
//! collected by a `message` listener on the local window and handed to the
//! protocol as [`RawInbound`] values; origin checks happen in the transport.

use crate::convert::{from_js, to_js};
use chart_frame_protocol::{Endpoint, RawInbound, ResponseChannel};
use chart_frame_shared::{map_transport_error, ProtocolResult};
use futures::channel::{mpsc, oneshot};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{MessageChannel, MessageEvent, MessagePort, Window};

/// Endpoint talking to one remote window (iframe content window or parent)
pub struct WindowEndpoint {
    local: Window,
    remote: Window,
    target_origin: String,
    tx: mpsc::UnboundedSender<RawInbound>,
    on_message: Closure<dyn FnMut(MessageEvent)>,
}

impl WindowEndpoint {
    /// Start listening on the local window and return the inbound stream
    pub fn connect(
        remote: Window,
        target_origin: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RawInbound>), JsValue> {
        let local = web_sys::window().ok_or_else(|| JsValue::from_str("No global window"))?;
        let (tx, rx) = mpsc::unbounded();

        let sender = tx.clone();
        let on_message = Closure::wrap(Box::new(move |e: MessageEvent| {
            let data: serde_json::Value = match from_js(e.data()) {
                Ok(data) => data,
                Err(err) => {
                    log::debug!("Dropping non-JSON message from '{}': {err}", e.origin());
                    return;
                }
            };

            let reply = e
                .ports()
                .get(0)
                .dyn_into::<MessagePort>()
                .ok()
                .map(port_reply);

            let inbound = RawInbound {
                origin: e.origin(),
                data,
                reply,
            };
            if sender.unbounded_send(inbound).is_err() {
                log::debug!("Dropping message from '{}': endpoint closed", e.origin());
            }
        }) as Box<dyn FnMut(MessageEvent)>);

        local.add_event_listener_with_callback("message", on_message.as_ref().unchecked_ref())?;

        Ok((
            Self {
                local,
                remote,
                target_origin: target_origin.to_string(),
                tx,
                on_message,
            },
            rx,
        ))
    }

    pub fn target_origin(&self) -> &str {
        &self.target_origin
    }
}

/// Response channel that answers on a transferred port, then closes it
fn port_reply(port: MessagePort) -> ResponseChannel {
    ResponseChannel::new(move |value| {
        let message = to_js(&value)?;
        let result = port.post_message(&message);
        port.close();
        map_transport_error!(result, "Failed to post acknowledgment")
    })
}

impl Endpoint for WindowEndpoint {
    fn post(
        &self,
        data: serde_json::Value,
        expect_ack: bool,
    ) -> ProtocolResult<Option<oneshot::Receiver<serde_json::Value>>> {
        let message = to_js(&data)?;

        if !expect_ack {
            map_transport_error!(
                self.remote.post_message(&message, &self.target_origin),
                "postMessage failed"
            )?;
            return Ok(None);
        }

        let channel = map_transport_error!(MessageChannel::new(), "Failed to create MessageChannel")?;
        let (tx, rx) = oneshot::channel();

        let port = channel.port1();
        let reply_port = port.clone();
        // Leaked if the peer never answers; the requester times out on its own
        let on_reply = Closure::once_into_js(move |e: MessageEvent| {
            reply_port.set_onmessage(None);
            reply_port.close();
            match from_js::<serde_json::Value>(e.data()) {
                Ok(value) => {
                    let _ = tx.send(value);
                }
                Err(err) => log::debug!("Dropping undecodable acknowledgment: {err}"),
            }
        });
        port.set_onmessage(Some(on_reply.unchecked_ref()));

        let transfer = js_sys::Array::of1(&channel.port2());
        map_transport_error!(
            self.remote
                .post_message_with_transfer(&message, &self.target_origin, &transfer),
            "postMessage failed"
        )?;

        Ok(Some(rx))
    }

    fn close(&self) {
        if let Err(e) = self
            .local
            .remove_event_listener_with_callback("message", self.on_message.as_ref().unchecked_ref())
        {
            log::warn!("Failed to remove message listener: {e:?}");
        }
        self.tx.close_channel();
    }
}
