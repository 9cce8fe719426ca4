//! Event tags, payloads and the message envelope exchanged across the iframe boundary

use crate::{ChartConfig, ChartModel};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which window a message was written by
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageSource {
    #[serde(rename = "ts-host-app")]
    Host,
    #[serde(rename = "ts-chart-sdk")]
    Frame,
}

/// Direction an event flows in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HostToFrame,
    FrameToHost,
}

impl Direction {
    /// Side that is allowed to send events flowing in this direction
    pub fn sender(self) -> MessageSource {
        match self {
            Direction::HostToFrame => MessageSource::Host,
            Direction::FrameToHost => MessageSource::Frame,
        }
    }
}

/// Closed set of event tags
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventTag {
    // Host -> frame
    Initialize,
    ChartModelUpdate,
    InitializeComplete,
    TriggerRenderChart,
    VisualPropsUpdate,
    ContextMenuActionClick,

    // Frame -> host
    RenderStart,
    RenderError,
    RenderComplete,
    OpenContextMenu,
    CloseContextMenu,
    ShowToolTip,
    HideToolTip,
    UpdateVisualProps,
}

impl EventTag {
    pub fn direction(self) -> Direction {
        use EventTag::*;

        match self {
            Initialize
            | ChartModelUpdate
            | InitializeComplete
            | TriggerRenderChart
            | VisualPropsUpdate
            | ContextMenuActionClick => Direction::HostToFrame,
            RenderStart | RenderError | RenderComplete | OpenContextMenu | CloseContextMenu
            | ShowToolTip | HideToolTip | UpdateVisualProps => Direction::FrameToHost,
        }
    }

    /// Whether the sender waits for a reply on a response channel
    pub fn expects_ack(self) -> bool {
        self.direction() == Direction::HostToFrame
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializePayload {
    pub component_id: String,
    pub chart_model: ChartModel,
    pub host_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartModelUpdatePayload {
    pub chart_model: ChartModel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VisualPropsPayload {
    pub visual_props: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenderErrorPayload {
    pub has_error: bool,
    pub error: String,
}

/// Pointer position relative to the chart frame's viewport
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PointerEvent {
    pub client_x: f64,
    pub client_y: f64,
}

/// Column id / value pair of a data point
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PointValue {
    pub column_id: String,
    pub value: serde_json::Value,
}

/// The data tuple under the pointer
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Point {
    pub tuple: Vec<PointValue>,
}

/// Extra entry the chart adds to the host's context menu
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomAction {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenContextMenuPayload {
    pub event: PointerEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clicked_point: Option<Point>,
    #[serde(default)]
    pub custom_actions: Vec<CustomAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShowToolTipPayload {
    pub event: PointerEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<Point>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_tooltip_content: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextMenuActionClickPayload {
    pub custom_action_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clicked_point: Option<Point>,
}

/// Tagged union of every event; the tag fixes the payload schema
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "eventType", content = "payload")]
pub enum Event {
    Initialize(InitializePayload),
    ChartModelUpdate(ChartModelUpdatePayload),
    InitializeComplete,
    TriggerRenderChart,
    VisualPropsUpdate(VisualPropsPayload),
    ContextMenuActionClick(ContextMenuActionClickPayload),

    RenderStart,
    RenderError(RenderErrorPayload),
    RenderComplete,
    OpenContextMenu(OpenContextMenuPayload),
    CloseContextMenu,
    ShowToolTip(ShowToolTipPayload),
    HideToolTip,
    UpdateVisualProps(VisualPropsPayload),
}

impl Event {
    pub fn tag(&self) -> EventTag {
        match self {
            Event::Initialize(_) => EventTag::Initialize,
            Event::ChartModelUpdate(_) => EventTag::ChartModelUpdate,
            Event::InitializeComplete => EventTag::InitializeComplete,
            Event::TriggerRenderChart => EventTag::TriggerRenderChart,
            Event::VisualPropsUpdate(_) => EventTag::VisualPropsUpdate,
            Event::ContextMenuActionClick(_) => EventTag::ContextMenuActionClick,
            Event::RenderStart => EventTag::RenderStart,
            Event::RenderError(_) => EventTag::RenderError,
            Event::RenderComplete => EventTag::RenderComplete,
            Event::OpenContextMenu(_) => EventTag::OpenContextMenu,
            Event::CloseContextMenu => EventTag::CloseContextMenu,
            Event::ShowToolTip(_) => EventTag::ShowToolTip,
            Event::HideToolTip => EventTag::HideToolTip,
            Event::UpdateVisualProps(_) => EventTag::UpdateVisualProps,
        }
    }
}

/// Message envelope: `{ eventType, payload, source }`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    #[serde(flatten)]
    pub event: Event,
    pub source: MessageSource,
}

impl Message {
    pub fn new(event: Event, source: MessageSource) -> Self {
        Self { event, source }
    }

    pub fn tag(&self) -> EventTag {
        self.event.tag()
    }
}

/// Reply written onto a response channel
///
/// An empty ack (all fields `None`) is the default reply when the receiver has
/// nothing to report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_config_valid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_chart_config: Option<Vec<ChartConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AckPayload {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shape() {
        let message = Message::new(
            Event::RenderError(RenderErrorPayload {
                has_error: true,
                error: "boom".to_string(),
            }),
            MessageSource::Frame,
        );

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            json!({
                "eventType": "RenderError",
                "payload": { "hasError": true, "error": "boom" },
                "source": "ts-chart-sdk"
            })
        );
    }

    #[test]
    fn test_unit_event_without_payload() {
        let message: Message = serde_json::from_value(json!({
            "eventType": "InitializeComplete",
            "source": "ts-host-app"
        }))
        .unwrap();

        assert_eq!(message.event, Event::InitializeComplete);
        assert_eq!(message.source, MessageSource::Host);
    }

    #[test]
    fn test_initialize_from_host_json() {
        let message: Message = serde_json::from_value(json!({
            "eventType": "Initialize",
            "payload": {
                "componentId": "c1",
                "chartModel": { "columns": [] },
                "hostUrl": "https://host"
            },
            "source": "ts-host-app"
        }))
        .unwrap();

        match message.event {
            Event::Initialize(payload) => {
                assert_eq!(payload.component_id, "c1");
                assert_eq!(payload.host_url, "https://host");
            }
            other => panic!("Wrong event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let result = serde_json::from_value::<Message>(json!({
            "eventType": "DoSomethingElse",
            "source": "ts-host-app"
        }));
        assert!(result.is_err());

        let result = serde_json::from_value::<Message>(json!({ "source": "ts-host-app" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_directions() {
        assert!(EventTag::Initialize.expects_ack());
        assert!(EventTag::TriggerRenderChart.expects_ack());
        assert!(!EventTag::RenderStart.expects_ack());
        assert_eq!(
            EventTag::OpenContextMenu.direction().sender(),
            MessageSource::Frame
        );
    }

    #[test]
    fn test_empty_ack_serializes_to_empty_object() {
        assert_eq!(serde_json::to_value(AckPayload::empty()).unwrap(), json!({}));
        assert!(AckPayload::error("nope").is_error());
    }
}
