//! Host ↔ chart frame event protocol
//!
//! Both sides of the pairing run on a single thread. The host drives the
//! handshake through [`HostController`]; the embedded chart answers through a
//! [`ChartRuntimeContext`]. Messages travel over a [`Transport`] wrapping a
//! platform [`Endpoint`](transport::Endpoint): a browser window in the wasm
//! bridge, or the in-memory pair from [`memory`] in tests.

pub mod config;
pub mod host;
pub mod memory;
pub mod registry;
pub mod render_lifecycle;
pub mod runtime;
pub mod timer;
pub mod transport;

pub use chart_frame_shared::{
    AckPayload, ChartModel, Event, EventTag, Message, MessageSource, ProtocolError,
    ProtocolResult,
};
pub use config::{HostOptions, ProtocolConfig, DEFAULT_ACK_TIMEOUT_MS};
pub use host::{HostController, HostRenderStatus, HostState};
pub use registry::{EventRegistry, HandlerId, Subscription};
pub use render_lifecycle::{RenderCycle, RenderLifecycleTracker, RenderPhase, RenderStats};
pub use runtime::{
    ChartRenderer, ChartRuntimeContext, ContextMenuAction, HandshakeState, VisualPropsDirective,
    VisualPropsSubscription,
};
pub use timer::Timer;
#[cfg(not(target_arch = "wasm32"))]
pub use timer::TokioTimer;
pub use transport::{Endpoint, RawInbound, ResponseChannel, Transport};
