//! Browser bindings for the chart frame protocol
//!
//! [`ChartFrame`] runs inside the embedded chart document and talks to
//! `window.parent`; [`HostFrame`] runs in the host page and talks to an
//! `<iframe>`'s content window.

pub mod browser_timer;
pub mod convert;
pub mod window_transport;

use browser_timer::BrowserTimer;
use chart_frame_protocol::{
    AckPayload, ChartModel, ChartRenderer, ChartRuntimeContext, ContextMenuAction, EventTag,
    HostController, HostOptions, MessageSource, ProtocolConfig, Subscription, Transport,
    VisualPropsDirective, VisualPropsSubscription,
};
use chart_frame_shared::events::{
    ContextMenuActionClickPayload, CustomAction, Point, PointerEvent, ShowToolTipPayload,
};
use chart_frame_shared::ChartConfig;
use convert::{from_js, js_error_message, to_js, to_js_error};
use futures::future::LocalBoxFuture;
use js_sys::{Function, Promise, Reflect};
use std::rc::Rc;
use std::sync::Once;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys::HtmlIFrameElement;
use window_transport::WindowEndpoint;

static INIT: Once = Once::new();

/// Install the panic hook and console logger once per page
pub fn init_logging() {
    INIT.call_once(|| {
        console_error_panic_hook::set_once();
        // Another bundle on the page may already own the logger
        let _ = console_log::init_with_level(log::Level::Debug);
    });
}

fn global_window() -> Result<web_sys::Window, JsValue> {
    web_sys::window().ok_or_else(|| JsValue::from_str("No global window"))
}

/// Renderer implemented by JavaScript callbacks
struct JsRenderer {
    render: Function,
    default_config: Option<Function>,
    release: Option<Function>,
}

impl ChartRenderer for JsRenderer {
    fn render<'a>(&'a self, context: &'a ChartRuntimeContext) -> LocalBoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let model = to_js(&*context.chart_model())?;
            let returned = self
                .render
                .call1(&JsValue::NULL, &model)
                .map_err(|e| anyhow::anyhow!(js_error_message(&e)))?;

            if let Ok(promise) = returned.dyn_into::<Promise>() {
                JsFuture::from(promise)
                    .await
                    .map_err(|e| anyhow::anyhow!(js_error_message(&e)))?;
            }
            Ok(())
        })
    }

    fn default_chart_config(&self, model: &ChartModel) -> Vec<ChartConfig> {
        let Some(callback) = &self.default_config else {
            return Vec::new();
        };

        let result = to_js(model)
            .map_err(|e| e.to_string())
            .and_then(|model| {
                callback
                    .call1(&JsValue::NULL, &model)
                    .map_err(|e| js_error_message(&e))
            })
            .and_then(|value| from_js::<Vec<ChartConfig>>(value).map_err(|e| e.to_string()));

        result.unwrap_or_else(|e| {
            log::warn!("Default chart config callback failed: {e}");
            Vec::new()
        })
    }

    fn release(&self) {
        if let Some(release) = &self.release {
            if let Err(e) = release.call0(&JsValue::NULL) {
                log::warn!("Release callback failed: {}", js_error_message(&e));
            }
        }
    }
}

fn directive_from_js(value: &JsValue) -> VisualPropsDirective {
    let trigger = value.is_object()
        && Reflect::get(value, &JsValue::from_str("triggerRenderChart"))
            .ok()
            .and_then(|flag| flag.as_bool())
            .unwrap_or(false);

    VisualPropsDirective {
        trigger_render_chart: trigger,
    }
}

fn context_menu_action_from_js(value: &JsValue) -> Result<ContextMenuAction, JsValue> {
    let field = |name: &str| Reflect::get(value, &JsValue::from_str(name));

    let id = field("id")?
        .as_string()
        .ok_or_else(|| JsValue::from_str("Context menu action needs a string id"))?;
    let label = field("label")?.as_string().unwrap_or_else(|| id.clone());
    let icon = field("icon")?.as_string();
    let on_click: Function = field("onClick")?
        .dyn_into()
        .map_err(|_| JsValue::from_str("Context menu action needs an onClick function"))?;

    Ok(ContextMenuAction {
        action: CustomAction { id, label, icon },
        on_click: Rc::new(move |payload: &ContextMenuActionClickPayload| {
            let result = to_js(payload)
                .map_err(to_js_error)
                .and_then(|payload| on_click.call1(&JsValue::NULL, &payload));
            if let Err(e) = result {
                log::warn!("Context menu action callback failed: {}", js_error_message(&e));
            }
        }),
    })
}

fn event_tag_from_str(event_type: &str) -> Result<EventTag, JsValue> {
    serde_json::from_value(serde_json::Value::String(event_type.to_string()))
        .map_err(|_| JsValue::from_str(&format!("Unknown event type: {event_type}")))
}

/// Chart-side handle: answers the host and relays interaction events
#[wasm_bindgen]
pub struct ChartFrame {
    context: ChartRuntimeContext,
}

#[wasm_bindgen]
impl ChartFrame {
    /// `config_json` is `{ "expectedOrigin": ..., "ackTimeoutMs"?: ... }`.
    /// `render(chartModel)` may return a promise.
    #[wasm_bindgen(constructor)]
    pub fn new(
        config_json: &str,
        render: Function,
        default_config: Option<Function>,
        release: Option<Function>,
    ) -> Result<ChartFrame, JsValue> {
        init_logging();

        let config = ProtocolConfig::from_json(config_json).map_err(to_js_error)?;
        let parent = global_window()?
            .parent()?
            .ok_or_else(|| JsValue::from_str("Chart frame has no parent window"))?;
        let (endpoint, inbound) = WindowEndpoint::connect(parent, &config.expected_origin)?;

        let transport = Transport::new(
            Rc::new(endpoint),
            MessageSource::Frame,
            &config,
            Rc::new(BrowserTimer),
        );
        let renderer = Rc::new(JsRenderer {
            render,
            default_config,
            release,
        });
        let context = ChartRuntimeContext::create(transport, renderer);

        let serving = context.clone();
        spawn_local(async move { serving.serve(inbound).await });

        log::info!("Chart frame connected to {}", config.expected_origin);
        Ok(Self { context })
    }

    #[wasm_bindgen]
    pub fn chart_model(&self) -> Result<JsValue, JsValue> {
        to_js(&*self.context.chart_model()).map_err(to_js_error)
    }

    #[wasm_bindgen]
    pub fn host_url(&self) -> Option<String> {
        self.context.host_url()
    }

    #[wasm_bindgen]
    pub fn state(&self) -> String {
        format!("{:?}", self.context.state())
    }

    #[wasm_bindgen]
    pub fn is_initialized(&self) -> bool {
        self.context.is_initialized()
    }

    /// `actions` is an array of `{ id, label, icon?, onClick }`
    #[wasm_bindgen]
    pub fn emit_open_context_menu(
        &self,
        event: JsValue,
        clicked_point: JsValue,
        actions: js_sys::Array,
    ) -> Result<(), JsValue> {
        let event: PointerEvent = from_js(event).map_err(to_js_error)?;
        let clicked_point: Option<Point> = from_js(clicked_point).map_err(to_js_error)?;
        let actions = actions
            .iter()
            .map(|action| context_menu_action_from_js(&action))
            .collect::<Result<Vec<_>, _>>()?;

        self.context
            .emit_open_context_menu(event, clicked_point, actions)
            .map_err(to_js_error)
    }

    #[wasm_bindgen]
    pub fn emit_close_context_menu(&self) -> Result<(), JsValue> {
        self.context.emit_close_context_menu().map_err(to_js_error)
    }

    #[wasm_bindgen]
    pub fn emit_show_tooltip(&self, payload: JsValue) -> Result<(), JsValue> {
        let payload: ShowToolTipPayload = from_js(payload).map_err(to_js_error)?;
        self.context.emit_show_tooltip(payload).map_err(to_js_error)
    }

    #[wasm_bindgen]
    pub fn emit_hide_tooltip(&self) -> Result<(), JsValue> {
        self.context.emit_hide_tooltip().map_err(to_js_error)
    }

    #[wasm_bindgen]
    pub fn emit_update_visual_props(&self, visual_props: JsValue) -> Result<(), JsValue> {
        let visual_props = from_js(visual_props).map_err(to_js_error)?;
        self.context
            .emit_update_visual_props(visual_props)
            .map_err(to_js_error)
    }

    /// `callback(visualProps)` may return `{ triggerRenderChart: true }`
    #[wasm_bindgen]
    pub fn on_visual_props_update(&self, callback: Function) -> VisualPropsHandle {
        let subscription = self.context.on_visual_props_update(move |props| {
            let result = to_js(props)
                .map_err(to_js_error)
                .and_then(|props| callback.call1(&JsValue::NULL, &props));
            match result {
                Ok(returned) => directive_from_js(&returned),
                Err(e) => {
                    log::warn!("Visual props callback failed: {}", js_error_message(&e));
                    VisualPropsDirective::default()
                }
            }
        });

        VisualPropsHandle {
            subscription: Some(subscription),
        }
    }

    #[wasm_bindgen]
    pub fn off_visual_props_update(&self) {
        self.context.off_visual_props_update();
    }

    #[wasm_bindgen]
    pub fn teardown(&self) {
        self.context.teardown();
    }
}

#[wasm_bindgen]
pub struct VisualPropsHandle {
    subscription: Option<VisualPropsSubscription>,
}

#[wasm_bindgen]
impl VisualPropsHandle {
    #[wasm_bindgen]
    pub fn cancel(&mut self) -> bool {
        self.subscription
            .take()
            .map_or(false, |subscription| subscription.cancel())
    }
}

/// Host-side handle for one embedded chart
#[wasm_bindgen]
pub struct HostFrame {
    controller: HostController,
}

#[wasm_bindgen]
impl HostFrame {
    #[wasm_bindgen(constructor)]
    pub fn new(
        iframe: HtmlIFrameElement,
        config_json: &str,
        host_url: String,
        chart_model: JsValue,
        component_id: Option<String>,
    ) -> Result<HostFrame, JsValue> {
        init_logging();

        let config = ProtocolConfig::from_json(config_json).map_err(to_js_error)?;
        let chart_model: ChartModel = from_js(chart_model).map_err(to_js_error)?;
        let remote = iframe
            .content_window()
            .ok_or_else(|| JsValue::from_str("iframe has no content window"))?;
        let (endpoint, inbound) = WindowEndpoint::connect(remote, &config.expected_origin)?;

        let mut options = HostOptions::new(host_url);
        if let Some(component_id) = component_id {
            options = options.with_component_id(component_id);
        }

        let transport = Transport::new(
            Rc::new(endpoint),
            MessageSource::Host,
            &config,
            Rc::new(BrowserTimer),
        );
        let controller = HostController::new(transport, options, chart_model);

        let serving = controller.clone();
        spawn_local(async move { serving.serve(inbound).await });

        Ok(Self { controller })
    }

    #[wasm_bindgen]
    pub async fn initialize(&self) -> Result<(), JsValue> {
        self.controller.initialize().await.map_err(to_js_error)
    }

    #[wasm_bindgen]
    pub async fn trigger_render(&self) -> Result<(), JsValue> {
        self.controller.trigger_render().await.map_err(to_js_error)
    }

    #[wasm_bindgen]
    pub async fn update_chart_model(&self, chart_model: JsValue) -> Result<(), JsValue> {
        let chart_model: ChartModel = from_js(chart_model).map_err(to_js_error)?;
        self.controller
            .update_chart_model(chart_model)
            .await
            .map_err(to_js_error)
    }

    #[wasm_bindgen]
    pub async fn update_visual_props(&self, visual_props: JsValue) -> Result<(), JsValue> {
        let visual_props = from_js(visual_props).map_err(to_js_error)?;
        self.controller
            .update_visual_props(visual_props)
            .await
            .map_err(to_js_error)
    }

    #[wasm_bindgen]
    pub async fn click_context_menu_action(
        &self,
        custom_action_id: String,
        clicked_point: JsValue,
    ) -> Result<(), JsValue> {
        let clicked_point: Option<Point> = from_js(clicked_point).map_err(to_js_error)?;
        self.controller
            .click_context_menu_action(custom_action_id, clicked_point)
            .await
            .map_err(to_js_error)
    }

    /// Listen for a chart event; `handler` receives `{ eventType, payload? }`
    #[wasm_bindgen]
    pub fn on(&self, event_type: &str, handler: Function) -> Result<HostSubscription, JsValue> {
        let tag = event_tag_from_str(event_type)?;

        let subscription = self.controller.on(tag, move |event| {
            let result = to_js(&event)
                .map_err(to_js_error)
                .and_then(|event| handler.call1(&JsValue::NULL, &event));
            if let Err(e) = result {
                log::warn!("Handler for {tag} failed: {}", js_error_message(&e));
            }
            async { Ok(AckPayload::empty()) }
        });

        Ok(HostSubscription {
            subscription: Some(subscription),
        })
    }

    #[wasm_bindgen]
    pub fn state(&self) -> String {
        format!("{:?}", self.controller.state())
    }

    #[wasm_bindgen]
    pub fn chart_model(&self) -> Result<JsValue, JsValue> {
        to_js(&self.controller.chart_model()).map_err(to_js_error)
    }

    #[wasm_bindgen]
    pub fn last_render_error(&self) -> Option<String> {
        self.controller.render_status().last_error
    }

    #[wasm_bindgen]
    pub fn reset(&self) {
        self.controller.reset();
    }

    #[wasm_bindgen]
    pub fn teardown(&self) {
        self.controller.close();
    }
}

#[wasm_bindgen]
pub struct HostSubscription {
    subscription: Option<Subscription>,
}

#[wasm_bindgen]
impl HostSubscription {
    #[wasm_bindgen]
    pub fn cancel(&mut self) -> bool {
        self.subscription
            .take()
            .map_or(false, |subscription| subscription.cancel())
    }
}
