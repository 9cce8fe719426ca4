//! Shared types for the chart-frame protocol
//!
//! This crate contains everything that crosses the iframe boundary: the chart
//! model owned by the host, the tagged event union and its payloads, and the
//! error type both sides report. Field names serialize in camelCase so the
//! JSON matches what the JavaScript side of either window expects.

use serde::{Deserialize, Serialize};

pub mod errors;
pub mod events;

pub use errors::{ProtocolError, ProtocolResult};
pub use events::{AckPayload, Event, EventTag, Message, MessageSource};

/// Column role within a chart query
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Measure,
    Attribute,
    /// Also absorbs roles this crate does not know yet
    #[serde(other)]
    Unknown,
}

impl Default for ColumnType {
    fn default() -> Self {
        ColumnType::Unknown
    }
}

/// Data type of the values stored in a column
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Bool,
    Char,
    Varchar,
    Int32,
    Int64,
    Float,
    Double,
    Date,
    DateTime,
    Time,
    #[serde(other)]
    Unknown,
}

impl Default for DataType {
    fn default() -> Self {
        DataType::Unknown
    }
}

/// A single column the host exposes to the chart
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartColumn {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub column_type: ColumnType,
    #[serde(default)]
    pub data_type: DataType,
}

impl ChartColumn {
    pub fn new(id: impl Into<String>, name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            column_type,
            data_type: DataType::Unknown,
        }
    }
}

/// Rows of values for one query, column ids in `columns` order
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataPointsArray {
    pub columns: Vec<String>,
    pub data_value: Vec<Vec<serde_json::Value>>,
}

/// Result of one data query
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryData {
    pub data: DataPointsArray,
}

/// Columns assigned to one chart dimension (x axis, y axis, color...)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfigDimension {
    pub key: String,
    pub columns: Vec<ChartColumn>,
}

/// One chart configuration: which columns go to which dimension
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    pub key: String,
    pub dimensions: Vec<ChartConfigDimension>,
}

/// Configuration section of the chart model
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartModelConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chart_config: Vec<ChartConfig>,
}

impl ChartModelConfig {
    pub fn is_empty(&self) -> bool {
        self.chart_config.is_empty()
    }
}

/// Data and configuration snapshot owned by the host
///
/// The frame receives this read-only and replaces it wholesale on every
/// `ChartModelUpdate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartModel {
    #[serde(default)]
    pub columns: Vec<ChartColumn>,
    #[serde(default)]
    pub data: Vec<QueryData>,
    #[serde(default)]
    pub config: ChartModelConfig,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub visual_props: serde_json::Value,
}

impl ChartModel {
    pub fn new(columns: Vec<ChartColumn>) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    /// Whether the host supplied its own chart configuration
    pub fn has_chart_config(&self) -> bool {
        !self.config.is_empty()
    }

    /// Copy of this model using `defaults` when it carries no chart config
    pub fn merged_with_default_config(&self, defaults: &[ChartConfig]) -> Self {
        let mut merged = self.clone();
        if !merged.has_chart_config() {
            merged.config.chart_config = defaults.to_vec();
        }
        merged
    }

    /// Copy of this model with new visual props
    pub fn with_visual_props(&self, visual_props: serde_json::Value) -> Self {
        Self {
            visual_props,
            ..self.clone()
        }
    }
}
