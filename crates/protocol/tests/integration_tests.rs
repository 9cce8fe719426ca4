//! End-to-end tests: host controller and chart runtime over an in-memory pairing

use chart_frame_protocol::memory::{self, InboundStream, MemoryEndpoint};
use chart_frame_protocol::{
    AckPayload, ChartModel, ChartRenderer, ChartRuntimeContext, ContextMenuAction, Endpoint,
    EventTag, HandshakeState, HostController, HostOptions, HostState, MessageSource,
    ProtocolConfig, ProtocolError, RenderPhase, TokioTimer, Transport, VisualPropsDirective,
};
use chart_frame_shared::events::{Point, PointValue, PointerEvent};
use chart_frame_shared::{ChartColumn, ChartConfig, ColumnType};
use futures::channel::oneshot;
use futures::future::{self, Either, LocalBoxFuture};
use futures::Future;
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

const HOST: &str = "https://host.example";
const FRAME: &str = "https://frame.example";

#[derive(Default)]
struct TestRenderer {
    renders: Cell<u32>,
    releases: Cell<u32>,
    fail_with: Option<String>,
    gate: RefCell<Option<oneshot::Receiver<()>>>,
}

impl TestRenderer {
    fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// The first render waits until the returned sender fires or is dropped
    fn gated() -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let renderer = Self {
            gate: RefCell::new(Some(rx)),
            ..Self::default()
        };
        (renderer, tx)
    }
}

impl ChartRenderer for TestRenderer {
    fn render<'a>(&'a self, _context: &'a ChartRuntimeContext) -> LocalBoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.renders.set(self.renders.get() + 1);
            let gate = self.gate.borrow_mut().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            match &self.fail_with {
                Some(message) => Err(anyhow::anyhow!("{message}")),
                None => Ok(()),
            }
        })
    }

    fn default_chart_config(&self, _model: &ChartModel) -> Vec<ChartConfig> {
        vec![ChartConfig {
            key: "column".to_string(),
            dimensions: Vec::new(),
        }]
    }

    fn release(&self) {
        self.releases.set(self.releases.get() + 1);
    }
}

struct Pairing {
    host: HostController,
    frame: ChartRuntimeContext,
    renderer: Rc<TestRenderer>,
    host_end: Rc<MemoryEndpoint>,
    frame_end: Rc<MemoryEndpoint>,
    host_rx: InboundStream,
    frame_rx: InboundStream,
}

fn sample_model() -> ChartModel {
    ChartModel::new(vec![
        ChartColumn::new("region", "Region", ColumnType::Attribute),
        ChartColumn::new("revenue", "Revenue", ColumnType::Measure),
    ])
}

fn pairing_with(renderer: TestRenderer, frame_expects: &str) -> Pairing {
    let _ = env_logger::builder().is_test(true).try_init();

    let ((host_end, host_rx), (frame_end, frame_rx)) = memory::pair(HOST, FRAME);
    let host_end = Rc::new(host_end);
    let frame_end = Rc::new(frame_end);

    let host = HostController::new(
        Transport::new(
            host_end.clone(),
            MessageSource::Host,
            &ProtocolConfig::new(FRAME),
            Rc::new(TokioTimer),
        ),
        HostOptions::new("https://host.example/reports/7"),
        sample_model(),
    );

    let renderer = Rc::new(renderer);
    let frame = ChartRuntimeContext::create(
        Transport::new(
            frame_end.clone(),
            MessageSource::Frame,
            &ProtocolConfig::new(frame_expects),
            Rc::new(TokioTimer),
        ),
        renderer.clone(),
    );

    Pairing {
        host,
        frame,
        renderer,
        host_end,
        frame_end,
        host_rx,
        frame_rx,
    }
}

fn pairing(renderer: TestRenderer) -> Pairing {
    pairing_with(renderer, HOST)
}

/// Serve both sides while `driver` runs, then close the endpoints and let the
/// serve loops drain whatever is still queued
async fn drive<F: Future>(pairing: &mut Pairing, driver: F) -> F::Output {
    let host_rx = std::mem::replace(&mut pairing.host_rx, futures::channel::mpsc::unbounded().1);
    let frame_rx = std::mem::replace(&mut pairing.frame_rx, futures::channel::mpsc::unbounded().1);

    let serving = future::join(pairing.host.serve(host_rx), pairing.frame.serve(frame_rx));
    futures::pin_mut!(serving);
    let driver = Box::pin(driver);

    match future::select(driver, serving).await {
        Either::Left((output, serving)) => {
            pairing.host_end.close();
            pairing.frame_end.close();
            serving.await;
            output
        }
        Either::Right(_) => panic!("serve loops ended before the driver finished"),
    }
}

async fn wait_for_render_start(frame: &ChartRuntimeContext) {
    while frame.render_phase() != RenderPhase::Started {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_handshake_happy_path() {
    let mut p = pairing(TestRenderer::default());
    let host = p.host.clone();

    drive(&mut p, async { host.initialize().await.unwrap() }).await;

    assert_eq!(
        p.host_end.sent_tags(),
        vec![
            EventTag::Initialize,
            EventTag::ChartModelUpdate,
            EventTag::InitializeComplete,
            EventTag::TriggerRenderChart
        ]
    );
    assert_eq!(
        p.frame_end.sent_tags(),
        vec![EventTag::RenderStart, EventTag::RenderComplete]
    );

    assert_eq!(p.host.state(), HostState::Rendering);
    assert_eq!(p.frame.state(), HandshakeState::Ready);
    assert_eq!(p.renderer.renders.get(), 1);
    assert_eq!(p.renderer.releases.get(), 0);

    let status = p.host.render_status();
    assert_eq!(status.completed_cycles, 1);
    assert!(status.last_error.is_none());

    // Defaults from the Initialize ack were merged into the model
    assert_eq!(p.host.chart_model().config.chart_config[0].key, "column");
    assert_eq!(p.frame.chart_model().config.chart_config[0].key, "column");
    assert_eq!(p.frame.host_url().as_deref(), Some("https://host.example/reports/7"));
    assert_eq!(
        p.frame.component_id().as_deref(),
        Some(p.host.options().component_id.as_str())
    );
}

#[tokio::test]
async fn test_render_error_surfaces_between_start_and_complete() {
    let mut p = pairing(TestRenderer::failing("boom"));
    let host = p.host.clone();

    // A failed render is still a completed cycle; the trigger is acknowledged
    drive(&mut p, async { host.initialize().await.unwrap() }).await;

    assert_eq!(
        p.frame_end.sent_tags(),
        vec![
            EventTag::RenderStart,
            EventTag::RenderError,
            EventTag::RenderComplete
        ]
    );
    assert_eq!(
        p.frame_end.sent()[1]["payload"],
        json!({ "hasError": true, "error": "boom" })
    );

    let status = p.host.render_status();
    assert_eq!(status.last_error.as_deref(), Some("boom"));
    assert_eq!(status.completed_cycles, 1);
    assert!(!status.in_progress);
}

#[tokio::test(start_paused = true)]
async fn test_origin_mismatch_times_out_without_handler_calls() {
    let mut p = pairing_with(TestRenderer::default(), "https://someone-else.example");
    let host = p.host.clone();

    let result = drive(&mut p, async { host.initialize().await }).await;

    match result {
        Err(ProtocolError::HandshakeFailed { step, reason }) => {
            assert_eq!(step, EventTag::Initialize);
            assert!(reason.contains("No acknowledgment"), "{reason}");
        }
        other => panic!("Unexpected result: {other:?}"),
    }
    assert_eq!(p.host.state(), HostState::Failed);
    assert_eq!(p.host_end.sent_tags(), vec![EventTag::Initialize]);
    assert_eq!(p.frame.state(), HandshakeState::Uninitialized);
    assert_eq!(p.renderer.renders.get(), 0);
    assert!(p.frame_end.sent().is_empty());
}

#[tokio::test]
async fn test_concurrent_trigger_is_rejected() {
    let (renderer, gate) = TestRenderer::gated();
    let mut p = pairing(renderer);
    let host = p.host.clone();
    let frame = p.frame.clone();

    let (first, second) = drive(&mut p, async {
        let second = async {
            wait_for_render_start(&frame).await;
            let result = host.trigger_render().await;
            let _ = gate.send(());
            result
        };
        futures::join!(host.initialize(), second)
    })
    .await;

    first.unwrap();
    assert_eq!(
        second,
        Err(ProtocolError::Rejected {
            event: EventTag::TriggerRenderChart,
            message: ProtocolError::RenderInProgress.to_string()
        })
    );
    assert_eq!(p.renderer.renders.get(), 1);
    assert_eq!(
        p.frame_end.sent_tags(),
        vec![EventTag::RenderStart, EventTag::RenderComplete]
    );
}

#[tokio::test]
async fn test_model_update_supersedes_inflight_render() {
    let (renderer, _gate) = TestRenderer::gated();
    let mut p = pairing(renderer);
    let host = p.host.clone();
    let frame = p.frame.clone();

    let mut updated = sample_model();
    updated.columns.push(ChartColumn::new("margin", "Margin", ColumnType::Measure));
    let expected = updated.clone();

    let (first, second) = drive(&mut p, async {
        let update = async {
            wait_for_render_start(&frame).await;
            host.update_chart_model(updated).await
        };
        futures::join!(host.initialize(), update)
    })
    .await;

    first.unwrap();
    second.unwrap();

    assert_eq!(*p.frame.chart_model(), expected);
    assert_eq!(p.frame.render_stats().superseded, 1);
    assert_eq!(p.renderer.renders.get(), 2);
    assert_eq!(p.renderer.releases.get(), 1);
    assert_eq!(
        p.frame_end.sent_tags(),
        vec![
            EventTag::RenderStart,
            EventTag::RenderComplete,
            EventTag::RenderStart,
            EventTag::RenderComplete
        ]
    );
}

#[tokio::test]
async fn test_model_update_during_handshake_is_refused() {
    let mut p = pairing(TestRenderer::default());
    let host = p.host.clone();

    let mut recolored = sample_model();
    recolored.visual_props = json!({ "color": "red" });

    let (init, update) = drive(&mut p, async {
        let update = async {
            tokio::task::yield_now().await;
            host.update_chart_model(recolored).await
        };
        futures::join!(host.initialize(), update)
    })
    .await;

    init.unwrap();
    assert!(matches!(update, Err(ProtocolError::HandshakeInProgress { .. })));
    assert_eq!(*p.frame.chart_model(), p.host.chart_model());
    assert!(p.host.chart_model().visual_props.is_null());
}

#[tokio::test]
async fn test_visual_props_subscription_and_cancel() {
    let mut p = pairing(TestRenderer::default());
    let host = p.host.clone();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let subscription = p.frame.on_visual_props_update(move |props| {
        sink.borrow_mut().push(props.clone());
        VisualPropsDirective::rerender()
    });

    drive(&mut p, async {
        host.initialize().await.unwrap();
        host.update_visual_props(json!({ "palette": "warm" })).await.unwrap();
        assert!(subscription.cancel());
        host.update_visual_props(json!({ "palette": "cool" })).await.unwrap();
    })
    .await;

    assert_eq!(*seen.borrow(), vec![json!({ "palette": "warm" })]);
    assert_eq!(p.frame.chart_model().visual_props, json!({ "palette": "cool" }));
    // Handshake render plus the one requested by the subscriber
    assert_eq!(p.renderer.renders.get(), 2);
}

#[tokio::test]
async fn test_frame_requested_visual_props_echo_back() {
    let mut p = pairing(TestRenderer::default());
    let host = p.host.clone();
    let frame = p.frame.clone();

    drive(&mut p, async {
        host.initialize().await.unwrap();
        frame
            .emit_update_visual_props(json!({ "showLegend": false }))
            .unwrap();
        while frame.chart_model().visual_props.is_null() {
            tokio::task::yield_now().await;
        }
    })
    .await;

    assert_eq!(p.host.chart_model().visual_props, json!({ "showLegend": false }));
    assert_eq!(p.frame.chart_model().visual_props, json!({ "showLegend": false }));
    assert_eq!(p.host_end.sent_tags().last(), Some(&EventTag::VisualPropsUpdate));
}

#[tokio::test]
async fn test_context_menu_round_trip() {
    let mut p = pairing(TestRenderer::default());
    let host = p.host.clone();
    let frame = p.frame.clone();

    let menus = Rc::new(RefCell::new(Vec::new()));
    let sink = menus.clone();
    let _subscription = p.host.on(EventTag::OpenContextMenu, move |event| {
        if let chart_frame_protocol::Event::OpenContextMenu(payload) = event {
            sink.borrow_mut().push(payload);
        }
        async { Ok(AckPayload::empty()) }
    });

    let clicked = Rc::new(RefCell::new(Vec::new()));
    let clicks = clicked.clone();

    let (known, unknown) = drive(&mut p, async {
        host.initialize().await.unwrap();

        let point = Point {
            tuple: vec![PointValue {
                column_id: "region".to_string(),
                value: json!("EMEA"),
            }],
        };
        frame
            .emit_open_context_menu(
                PointerEvent {
                    client_x: 120.0,
                    client_y: 48.0,
                },
                Some(point.clone()),
                vec![ContextMenuAction::new("drill", "Drill down", move |payload| {
                    clicks.borrow_mut().push(payload.custom_action_id.clone())
                })],
            )
            .unwrap();

        let known = host.click_context_menu_action("drill", Some(point)).await;
        let unknown = host.click_context_menu_action("export", None).await;
        (known, unknown)
    })
    .await;

    known.unwrap();
    assert!(matches!(
        unknown,
        Err(ProtocolError::Rejected {
            event: EventTag::ContextMenuActionClick,
            ..
        })
    ));
    assert_eq!(*clicked.borrow(), vec!["drill".to_string()]);

    let menus = menus.borrow();
    assert_eq!(menus.len(), 1);
    assert_eq!(menus[0].custom_actions[0].label, "Drill down");
    assert_eq!(menus[0].event.client_x, 120.0);
}

#[tokio::test]
async fn test_teardown_closes_frame_side() {
    let mut p = pairing(TestRenderer::default());
    let host = p.host.clone();
    let frame = p.frame.clone();

    let after_teardown = drive(&mut p, async {
        host.initialize().await.unwrap();
        frame.teardown();
        host.trigger_render().await
    })
    .await;

    assert!(matches!(after_teardown, Err(ProtocolError::Transport { .. })));
    assert!(p.frame.is_torn_down());
    assert_eq!(p.renderer.releases.get(), 1);
    assert_eq!(p.frame.state(), HandshakeState::Uninitialized);
}

#[tokio::test]
async fn test_reinitialize_after_reset() {
    let mut p = pairing(TestRenderer::default());
    let host = p.host.clone();

    let refused = drive(&mut p, async {
        host.initialize().await.unwrap();
        let refused = host.initialize().await;
        host.reset();
        host.initialize().await.unwrap();
        refused
    })
    .await;

    assert_eq!(
        refused,
        Err(ProtocolError::HandshakeInProgress {
            state: "Rendering".to_string()
        })
    );
    assert_eq!(p.renderer.renders.get(), 2);
    assert_eq!(p.renderer.releases.get(), 1);
    assert_eq!(p.frame.state(), HandshakeState::Ready);
}
