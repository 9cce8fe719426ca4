//! Frame-side chart runtime context
//!
//! One [`ChartRuntimeContext`] exists per chart-frame pairing. It answers the
//! host's handshake, holds the current chart model snapshot, runs render cycles
//! through the external [`ChartRenderer`] and relays interaction events back to
//! the host.

use crate::registry::EventRegistry;
use crate::render_lifecycle::{RenderLifecycleTracker, RenderPhase, RenderStats};
use crate::transport::{RawInbound, Transport};
use chart_frame_shared::events::{
    ChartModelUpdatePayload, ContextMenuActionClickPayload, CustomAction, InitializePayload,
    OpenContextMenuPayload, Point, PointerEvent, ShowToolTipPayload, VisualPropsPayload,
};
use chart_frame_shared::{
    AckPayload, ChartConfig, ChartModel, Event, EventTag, ProtocolError, ProtocolResult,
};
use futures::future::LocalBoxFuture;
use futures::Stream;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// Frame view of the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Uninitialized,
    Initializing,
    ModelLoaded,
    Ready,
    Rendering,
}

/// Chart drawing code plugged into the runtime
pub trait ChartRenderer {
    /// Draw the chart from `context.chart_model()`
    fn render<'a>(&'a self, context: &'a ChartRuntimeContext) -> LocalBoxFuture<'a, anyhow::Result<()>>;

    /// Chart config to use when the host supplies none
    fn default_chart_config(&self, _model: &ChartModel) -> Vec<ChartConfig> {
        Vec::new()
    }

    fn validate_config(&self, _config: &[ChartConfig]) -> bool {
        true
    }

    /// Release whatever the previous render left behind (chart instance, canvas)
    fn release(&self) {}
}

/// Returned by visual props subscribers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisualPropsDirective {
    pub trigger_render_chart: bool,
}

impl VisualPropsDirective {
    pub fn rerender() -> Self {
        Self {
            trigger_render_chart: true,
        }
    }
}

pub type VisualPropsCallback = Rc<dyn Fn(&serde_json::Value) -> VisualPropsDirective>;
pub type ActionCallback = Rc<dyn Fn(&ContextMenuActionClickPayload)>;

/// Custom context menu entry together with its click callback
#[derive(Clone)]
pub struct ContextMenuAction {
    pub action: CustomAction,
    pub on_click: ActionCallback,
}

impl ContextMenuAction {
    pub fn new<F>(id: impl Into<String>, label: impl Into<String>, on_click: F) -> Self
    where
        F: Fn(&ContextMenuActionClickPayload) + 'static,
    {
        Self {
            action: CustomAction {
                id: id.into(),
                label: label.into(),
                icon: None,
            },
            on_click: Rc::new(on_click),
        }
    }
}

struct RuntimeInner {
    transport: Transport,
    registry: EventRegistry,
    renderer: Rc<dyn ChartRenderer>,
    tracker: RenderLifecycleTracker,

    state: Cell<HandshakeState>,
    component_id: RefCell<Option<String>>,
    host_url: RefCell<Option<String>>,
    chart_model: RefCell<Rc<ChartModel>>,
    default_chart_config: RefCell<Vec<ChartConfig>>,

    visual_props_subscribers: RefCell<Vec<(u64, VisualPropsCallback)>>,
    next_subscriber_id: Cell<u64>,
    context_menu_actions: RefCell<HashMap<String, ActionCallback>>,

    has_rendered: Cell<bool>,
    torn_down: Cell<bool>,
}

/// Frame-side façade over the protocol
#[derive(Clone)]
pub struct ChartRuntimeContext {
    inner: Rc<RuntimeInner>,
}

impl ChartRuntimeContext {
    /// Create the context and register its handshake handlers
    pub fn create(transport: Transport, renderer: Rc<dyn ChartRenderer>) -> Self {
        let inner = Rc::new(RuntimeInner {
            transport,
            registry: EventRegistry::new(),
            renderer,
            tracker: RenderLifecycleTracker::new(),
            state: Cell::new(HandshakeState::Uninitialized),
            component_id: RefCell::new(None),
            host_url: RefCell::new(None),
            chart_model: RefCell::new(Rc::new(ChartModel::default())),
            default_chart_config: RefCell::new(Vec::new()),
            visual_props_subscribers: RefCell::new(Vec::new()),
            next_subscriber_id: Cell::new(0),
            context_menu_actions: RefCell::new(HashMap::new()),
            has_rendered: Cell::new(false),
            torn_down: Cell::new(false),
        });

        let context = Self { inner };
        context.register_handlers();
        context
    }

    fn register_handlers(&self) {
        const HANDLED: [EventTag; 6] = [
            EventTag::Initialize,
            EventTag::ChartModelUpdate,
            EventTag::InitializeComplete,
            EventTag::TriggerRenderChart,
            EventTag::VisualPropsUpdate,
            EventTag::ContextMenuActionClick,
        ];

        for tag in HANDLED {
            let weak: Weak<RuntimeInner> = Rc::downgrade(&self.inner);
            self.inner.registry.on(tag, move |event| {
                let inner = weak.upgrade();
                async move {
                    let inner = inner.ok_or(ProtocolError::TornDown)?;
                    ChartRuntimeContext { inner }.handle(event).await
                }
            });
        }
    }

    /// Handle inbound host messages until the endpoint closes
    pub async fn serve<S>(&self, inbound: S)
    where
        S: Stream<Item = RawInbound>,
    {
        log::info!("Chart runtime listening for {}", self.inner.transport.expected_origin());
        self.inner.registry.serve(&self.inner.transport, inbound).await;
        log::info!("Chart runtime inbound stream closed");
    }

    async fn handle(&self, event: Event) -> ProtocolResult<AckPayload> {
        if self.inner.torn_down.get() {
            return Err(ProtocolError::TornDown);
        }

        match event {
            Event::Initialize(payload) => Ok(self.on_initialize(payload)),
            Event::ChartModelUpdate(payload) => Ok(self.on_chart_model_update(payload)),
            Event::InitializeComplete => Ok(self.on_initialize_complete()),
            Event::TriggerRenderChart => {
                self.render_chart().await?;
                Ok(AckPayload::empty())
            }
            Event::VisualPropsUpdate(payload) => Ok(self.handle_visual_props_update(payload).await),
            Event::ContextMenuActionClick(payload) => {
                self.on_context_menu_action_click(payload)?;
                Ok(AckPayload::empty())
            }
            other => {
                log::debug!("Chart runtime ignores {}", other.tag());
                Ok(AckPayload::empty())
            }
        }
    }

    fn on_initialize(&self, payload: InitializePayload) -> AckPayload {
        let inner = &self.inner;
        log::info!(
            "Initialize from {} for component {}",
            payload.host_url,
            payload.component_id
        );

        if inner.state.get() != HandshakeState::Uninitialized {
            log::warn!("Re-initializing from {:?}", inner.state.get());
            inner.tracker.supersede();
        }

        inner.state.set(HandshakeState::Initializing);
        *inner.host_url.borrow_mut() = Some(payload.host_url);
        *inner.component_id.borrow_mut() = Some(payload.component_id);

        let defaults = inner.renderer.default_chart_config(&payload.chart_model);
        let is_valid = self.validate(&payload.chart_model, &defaults);
        *inner.default_chart_config.borrow_mut() = defaults.clone();
        *inner.chart_model.borrow_mut() = Rc::new(payload.chart_model);

        AckPayload {
            is_config_valid: Some(is_valid),
            default_chart_config: Some(defaults),
            error: None,
        }
    }

    fn on_chart_model_update(&self, payload: ChartModelUpdatePayload) -> AckPayload {
        let inner = &self.inner;
        inner.tracker.supersede();

        let model = payload.chart_model;
        if !model.has_chart_config() {
            *inner.default_chart_config.borrow_mut() = inner.renderer.default_chart_config(&model);
        }

        let is_valid = self.validate(&model, &inner.default_chart_config.borrow());
        *inner.chart_model.borrow_mut() = Rc::new(model);

        if inner.state.get() == HandshakeState::Initializing {
            inner.state.set(HandshakeState::ModelLoaded);
        }
        log::debug!("Chart model replaced (state {:?})", inner.state.get());

        AckPayload {
            is_config_valid: Some(is_valid),
            ..AckPayload::default()
        }
    }

    fn on_initialize_complete(&self) -> AckPayload {
        let state = self.inner.state.get();
        if state != HandshakeState::ModelLoaded {
            log::warn!("InitializeComplete received in state {state:?}");
        }
        if state != HandshakeState::Rendering {
            self.inner.state.set(HandshakeState::Ready);
        }
        log::info!("Chart runtime ready");
        AckPayload::empty()
    }

    async fn handle_visual_props_update(&self, payload: VisualPropsPayload) -> AckPayload {
        let inner = &self.inner;
        let updated = inner.chart_model.borrow().with_visual_props(payload.visual_props.clone());
        *inner.chart_model.borrow_mut() = Rc::new(updated);

        let subscribers: Vec<VisualPropsCallback> = inner
            .visual_props_subscribers
            .borrow()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        let mut rerender = false;
        for callback in subscribers {
            rerender |= callback(&payload.visual_props).trigger_render_chart;
        }

        if rerender && self.is_initialized() {
            if let Err(e) = self.render_chart().await {
                log::warn!("Re-render after visual props update skipped: {e}");
            }
        }

        AckPayload::empty()
    }

    fn on_context_menu_action_click(&self, payload: ContextMenuActionClickPayload) -> ProtocolResult<()> {
        let callback = self
            .inner
            .context_menu_actions
            .borrow()
            .get(&payload.custom_action_id)
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownAction {
                id: payload.custom_action_id.clone(),
            })?;

        callback(&payload);
        Ok(())
    }

    /// Run one render cycle through the renderer
    ///
    /// Emits `RenderStart`, then `RenderError` if the renderer fails, and
    /// always `RenderComplete`. Fails without emitting anything when the chart
    /// is not initialized or a cycle is already running.
    pub async fn render_chart(&self) -> ProtocolResult<()> {
        let inner = &self.inner;
        if !self.is_initialized() {
            return Err(ProtocolError::NotInitialized);
        }

        let mut cycle = inner.tracker.begin(&inner.transport)?;
        if inner.has_rendered.replace(true) {
            inner.renderer.release();
        }
        inner.state.set(HandshakeState::Rendering);

        match cycle.abortable(inner.renderer.render(self)).await {
            Ok(Ok(())) => log::debug!("Render succeeded"),
            Ok(Err(e)) => {
                log::error!("Render failed: {e:#}");
                cycle.fail(e.to_string());
            }
            Err(_aborted) => log::info!("Render superseded by a newer chart model"),
        }

        if inner.state.get() == HandshakeState::Rendering {
            inner.state.set(HandshakeState::Ready);
        }
        drop(cycle);
        Ok(())
    }

    pub fn emit_open_context_menu(
        &self,
        event: PointerEvent,
        clicked_point: Option<Point>,
        custom_actions: Vec<ContextMenuAction>,
    ) -> ProtocolResult<()> {
        self.ensure_live()?;

        let mut actions = self.inner.context_menu_actions.borrow_mut();
        actions.clear();
        let custom_actions = custom_actions
            .into_iter()
            .map(|entry| {
                actions.insert(entry.action.id.clone(), entry.on_click);
                entry.action
            })
            .collect();
        drop(actions);

        self.inner
            .transport
            .post(Event::OpenContextMenu(OpenContextMenuPayload {
                event,
                clicked_point,
                custom_actions,
            }))
    }

    pub fn emit_close_context_menu(&self) -> ProtocolResult<()> {
        self.ensure_live()?;
        self.inner.transport.post(Event::CloseContextMenu)
    }

    pub fn emit_show_tooltip(&self, payload: ShowToolTipPayload) -> ProtocolResult<()> {
        self.ensure_live()?;
        self.inner.transport.post(Event::ShowToolTip(payload))
    }

    pub fn emit_hide_tooltip(&self) -> ProtocolResult<()> {
        self.ensure_live()?;
        self.inner.transport.post(Event::HideToolTip)
    }

    /// Ask the host to change visual props; the local model is untouched
    /// until the host pushes a `VisualPropsUpdate`
    pub fn emit_update_visual_props(&self, visual_props: serde_json::Value) -> ProtocolResult<()> {
        self.ensure_live()?;
        self.inner
            .transport
            .post(Event::UpdateVisualProps(VisualPropsPayload { visual_props }))
    }

    pub fn on_visual_props_update<F>(&self, callback: F) -> VisualPropsSubscription
    where
        F: Fn(&serde_json::Value) -> VisualPropsDirective + 'static,
    {
        let id = self.inner.next_subscriber_id.get();
        self.inner.next_subscriber_id.set(id + 1);
        self.inner
            .visual_props_subscribers
            .borrow_mut()
            .push((id, Rc::new(callback)));

        VisualPropsSubscription {
            inner: Rc::downgrade(&self.inner),
            id,
        }
    }

    /// Drop every visual props subscriber
    pub fn off_visual_props_update(&self) {
        self.inner.visual_props_subscribers.borrow_mut().clear();
    }

    /// Release the renderer, drop subscriptions and close the endpoint
    pub fn teardown(&self) {
        let inner = &self.inner;
        if inner.torn_down.replace(true) {
            return;
        }

        log::info!("Tearing down chart runtime");
        inner.tracker.supersede();
        inner.registry.clear();
        inner.visual_props_subscribers.borrow_mut().clear();
        inner.context_menu_actions.borrow_mut().clear();
        if inner.has_rendered.replace(false) {
            inner.renderer.release();
        }
        inner.state.set(HandshakeState::Uninitialized);
        inner.transport.close();
    }

    /// Current model snapshot; never mutated in place
    pub fn chart_model(&self) -> Rc<ChartModel> {
        self.inner.chart_model.borrow().clone()
    }

    /// Host chart config, or the renderer's default when the host sent none
    pub fn effective_chart_config(&self) -> Vec<ChartConfig> {
        let model = self.chart_model();
        if model.has_chart_config() {
            model.config.chart_config.clone()
        } else {
            self.inner.default_chart_config.borrow().clone()
        }
    }

    pub fn host_url(&self) -> Option<String> {
        self.inner.host_url.borrow().clone()
    }

    pub fn component_id(&self) -> Option<String> {
        self.inner.component_id.borrow().clone()
    }

    pub fn state(&self) -> HandshakeState {
        self.inner.state.get()
    }

    pub fn is_initialized(&self) -> bool {
        matches!(
            self.inner.state.get(),
            HandshakeState::Ready | HandshakeState::Rendering
        )
    }

    pub fn render_phase(&self) -> RenderPhase {
        self.inner.tracker.phase()
    }

    pub fn render_stats(&self) -> RenderStats {
        self.inner.tracker.stats()
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.get()
    }

    fn validate(&self, model: &ChartModel, defaults: &[ChartConfig]) -> bool {
        if model.has_chart_config() {
            self.inner.renderer.validate_config(&model.config.chart_config)
        } else {
            self.inner.renderer.validate_config(defaults)
        }
    }

    fn ensure_live(&self) -> ProtocolResult<()> {
        if self.inner.torn_down.get() {
            Err(ProtocolError::TornDown)
        } else {
            Ok(())
        }
    }
}

/// Handle to one visual props subscriber
#[derive(Debug)]
pub struct VisualPropsSubscription {
    inner: Weak<RuntimeInner>,
    id: u64,
}

impl VisualPropsSubscription {
    /// Remove this subscriber; returns whether it was still registered
    pub fn cancel(self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };

        let mut subscribers = inner.visual_props_subscribers.borrow_mut();
        let before = subscribers.len();
        subscribers.retain(|(id, _)| *id != self.id);
        subscribers.len() != before
    }
}
