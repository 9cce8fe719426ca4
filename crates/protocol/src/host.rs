//! Host-side handshake controller
//!
//! Drives `Initialize` → `ChartModelUpdate` → `InitializeComplete` →
//! `TriggerRenderChart`, each step waiting for the frame's acknowledgment, and
//! tracks the render lifecycle events the frame reports back.

use crate::config::HostOptions;
use crate::registry::{EventRegistry, Subscription};
use crate::transport::{RawInbound, Transport};
use chart_frame_shared::events::{
    ChartModelUpdatePayload, ContextMenuActionClickPayload, InitializePayload, Point,
    VisualPropsPayload,
};
use chart_frame_shared::{
    AckPayload, ChartModel, Event, EventTag, ProtocolError, ProtocolResult,
};
use futures::{Future, Stream};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Handshake states as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Idle,
    Initializing,
    AwaitingModelAck,
    AwaitingCompleteAck,
    Rendering,
    Failed,
}

impl HostState {
    fn is_valid_transition(from: HostState, to: HostState) -> bool {
        use HostState::*;

        match (from, to) {
            // Handshake flow
            (Idle | Failed, Initializing) => true,
            (Initializing, AwaitingModelAck) => true,
            (AwaitingModelAck, AwaitingCompleteAck) => true,
            (AwaitingCompleteAck, Rendering) => true,

            // Abandoned handshake
            (Initializing | AwaitingModelAck | AwaitingCompleteAck, Failed) => true,

            // Reset
            (_, Idle) => true,

            _ => false,
        }
    }

    pub fn is_handshaking(self) -> bool {
        matches!(
            self,
            HostState::Initializing | HostState::AwaitingModelAck | HostState::AwaitingCompleteAck
        )
    }
}

/// Render lifecycle as reported by the frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostRenderStatus {
    pub in_progress: bool,
    pub last_error: Option<String>,
    pub completed_cycles: u64,
}

struct HostInner {
    transport: Transport,
    registry: EventRegistry,
    options: HostOptions,
    state: Cell<HostState>,
    state_history: RefCell<Vec<HostState>>,
    chart_model: RefCell<ChartModel>,
    render_status: RefCell<HostRenderStatus>,
}

/// Host end of one chart-frame pairing
#[derive(Clone)]
pub struct HostController {
    inner: Rc<HostInner>,
}

impl HostController {
    pub fn new(transport: Transport, options: HostOptions, chart_model: ChartModel) -> Self {
        let controller = Self {
            inner: Rc::new(HostInner {
                transport,
                registry: EventRegistry::new(),
                options,
                state: Cell::new(HostState::Idle),
                state_history: RefCell::new(vec![HostState::Idle]),
                chart_model: RefCell::new(chart_model),
                render_status: RefCell::new(HostRenderStatus::default()),
            }),
        };
        controller.register_internal_handlers();
        controller
    }

    fn register_internal_handlers(&self) {
        let registry = &self.inner.registry;

        let weak = Rc::downgrade(&self.inner);
        registry.on(EventTag::RenderStart, move |_| {
            if let Some(inner) = weak.upgrade() {
                let mut status = inner.render_status.borrow_mut();
                status.in_progress = true;
                status.last_error = None;
            }
            async { Ok(AckPayload::empty()) }
        });

        let weak = Rc::downgrade(&self.inner);
        registry.on(EventTag::RenderError, move |event| {
            if let (Some(inner), Event::RenderError(payload)) = (weak.upgrade(), event) {
                log::warn!("Chart reported render error: {}", payload.error);
                inner.render_status.borrow_mut().last_error = Some(payload.error);
            }
            async { Ok(AckPayload::empty()) }
        });

        let weak = Rc::downgrade(&self.inner);
        registry.on(EventTag::RenderComplete, move |_| {
            if let Some(inner) = weak.upgrade() {
                let mut status = inner.render_status.borrow_mut();
                status.in_progress = false;
                status.completed_cycles += 1;
            }
            async { Ok(AckPayload::empty()) }
        });

        // The frame only asks; the host applies the change and pushes it back
        let weak: Weak<HostInner> = Rc::downgrade(&self.inner);
        registry.on(EventTag::UpdateVisualProps, move |event| {
            let controller = weak.upgrade().map(|inner| HostController { inner });
            async move {
                if let (Some(controller), Event::UpdateVisualProps(payload)) = (controller, event) {
                    controller.update_visual_props(payload.visual_props).await?;
                }
                Ok(AckPayload::empty())
            }
        });
    }

    /// Run the full handshake and the first render
    ///
    /// Any step whose acknowledgment times out or is rejected moves the
    /// controller to `Failed` and nothing further is sent. The handshake is
    /// never retried automatically.
    pub async fn initialize(&self) -> ProtocolResult<()> {
        let state = self.state();
        if !matches!(state, HostState::Idle | HostState::Failed) {
            return Err(ProtocolError::HandshakeInProgress {
                state: format!("{state:?}"),
            });
        }

        let options = &self.inner.options;
        log::info!(
            "Starting handshake for component {} with {}",
            options.component_id,
            self.inner.transport.expected_origin()
        );

        self.advance(EventTag::Initialize, HostState::Initializing)?;
        let model = self.chart_model();
        let ack = self
            .step(Event::Initialize(InitializePayload {
                component_id: options.component_id.clone(),
                chart_model: model.clone(),
                host_url: options.host_url.clone(),
            }))
            .await?;

        if ack.is_config_valid == Some(false) {
            log::warn!("Chart reports the chart config as invalid");
        }

        let defaults = ack.default_chart_config.unwrap_or_default();
        let merged = model.merged_with_default_config(&defaults);
        *self.inner.chart_model.borrow_mut() = merged.clone();

        self.advance(EventTag::ChartModelUpdate, HostState::AwaitingModelAck)?;
        self.step(Event::ChartModelUpdate(ChartModelUpdatePayload {
            chart_model: merged,
        }))
        .await?;

        self.advance(EventTag::InitializeComplete, HostState::AwaitingCompleteAck)?;
        self.step(Event::InitializeComplete).await?;

        self.advance(EventTag::TriggerRenderChart, HostState::Rendering)?;
        log::info!("Handshake complete");

        self.trigger_render().await
    }

    /// Ask the frame to render the current model
    pub async fn trigger_render(&self) -> ProtocolResult<()> {
        self.ensure_rendering()?;
        self.inner.transport.request(Event::TriggerRenderChart).await?;
        Ok(())
    }

    /// Replace the chart model and, once initialized, push it and re-render
    ///
    /// Refused while the handshake is running: the frame has already been
    /// sent the earlier snapshot and would never see this one.
    pub async fn update_chart_model(&self, chart_model: ChartModel) -> ProtocolResult<()> {
        self.ensure_not_handshaking()?;
        *self.inner.chart_model.borrow_mut() = chart_model.clone();
        if self.state() != HostState::Rendering {
            log::debug!("Chart model stored; it is sent with the next handshake");
            return Ok(());
        }

        self.inner
            .transport
            .request(Event::ChartModelUpdate(ChartModelUpdatePayload { chart_model }))
            .await?;
        self.trigger_render().await
    }

    /// Apply new visual props and push them to the frame once initialized
    pub async fn update_visual_props(&self, visual_props: serde_json::Value) -> ProtocolResult<()> {
        self.ensure_not_handshaking()?;
        let updated = self.inner.chart_model.borrow().with_visual_props(visual_props.clone());
        *self.inner.chart_model.borrow_mut() = updated;

        if self.state() != HostState::Rendering {
            return Ok(());
        }

        self.inner
            .transport
            .request(Event::VisualPropsUpdate(VisualPropsPayload { visual_props }))
            .await?;
        Ok(())
    }

    /// Forward a click on one of the chart's custom context menu entries
    pub async fn click_context_menu_action(
        &self,
        custom_action_id: impl Into<String>,
        clicked_point: Option<Point>,
    ) -> ProtocolResult<()> {
        self.ensure_rendering()?;
        self.inner
            .transport
            .request(Event::ContextMenuActionClick(ContextMenuActionClickPayload {
                custom_action_id: custom_action_id.into(),
                clicked_point,
            }))
            .await?;
        Ok(())
    }

    /// Listen for a frame→host event
    pub fn on<F, Fut>(&self, tag: EventTag, handler: F) -> Subscription
    where
        F: Fn(Event) -> Fut + 'static,
        Fut: Future<Output = ProtocolResult<AckPayload>> + 'static,
    {
        if tag.direction().sender() == self.inner.transport.local() {
            log::warn!("{tag} is sent by the host and never received here");
        }
        self.inner.registry.subscribe(tag, handler)
    }

    /// Handle inbound frame messages until the endpoint closes
    pub async fn serve<S>(&self, inbound: S)
    where
        S: Stream<Item = RawInbound>,
    {
        self.inner.registry.serve(&self.inner.transport, inbound).await;
        log::debug!("Host inbound stream closed");
    }

    /// Return to `Idle` so the handshake can be run again
    pub fn reset(&self) {
        self.transition_to(HostState::Idle);
        *self.inner.render_status.borrow_mut() = HostRenderStatus::default();
    }

    /// Stop listening and drop all handlers
    pub fn close(&self) {
        self.inner.registry.clear();
        self.inner.transport.close();
        self.transition_to(HostState::Idle);
    }

    pub fn state(&self) -> HostState {
        self.inner.state.get()
    }

    pub fn state_history(&self) -> Vec<HostState> {
        self.inner.state_history.borrow().clone()
    }

    pub fn options(&self) -> &HostOptions {
        &self.inner.options
    }

    pub fn chart_model(&self) -> ChartModel {
        self.inner.chart_model.borrow().clone()
    }

    pub fn render_status(&self) -> HostRenderStatus {
        self.inner.render_status.borrow().clone()
    }

    async fn step(&self, event: Event) -> ProtocolResult<AckPayload> {
        let step = event.tag();
        log::info!("Handshake step {step}");
        self.inner.transport.request(event).await.map_err(|e| {
            if e.is_timeout() {
                log::error!("Handshake failed at {step}: chart frame is not responding");
            } else {
                log::error!("Handshake failed at {step}: {e}");
            }
            self.transition_to(HostState::Failed);
            ProtocolError::HandshakeFailed {
                step,
                reason: e.to_string(),
            }
        })
    }

    fn advance(&self, step: EventTag, to: HostState) -> ProtocolResult<()> {
        if self.transition_to(to) {
            Ok(())
        } else {
            Err(ProtocolError::HandshakeFailed {
                step,
                reason: format!("Handshake interrupted in state {:?}", self.state()),
            })
        }
    }

    fn transition_to(&self, to: HostState) -> bool {
        let from = self.inner.state.get();
        if !HostState::is_valid_transition(from, to) {
            log::warn!("Invalid host transition from {from:?} to {to:?}");
            return false;
        }

        self.inner.state.set(to);
        self.inner.state_history.borrow_mut().push(to);
        log::debug!("Host state {from:?} -> {to:?}");
        true
    }

    fn ensure_not_handshaking(&self) -> ProtocolResult<()> {
        let state = self.state();
        if state.is_handshaking() {
            return Err(ProtocolError::HandshakeInProgress {
                state: format!("{state:?}"),
            });
        }
        Ok(())
    }

    fn ensure_rendering(&self) -> ProtocolResult<()> {
        if self.state() == HostState::Rendering {
            Ok(())
        } else {
            Err(ProtocolError::NotInitialized)
        }
    }
}
