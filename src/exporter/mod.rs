//! Exporter protocol boundary.
//!
//! The device-control server speaks a simple name/value protocol: named
//! attributes ("channels") support read, write and change subscription,
//! and named procedures ("commands") are invoked as a single round-trip.
//! This module defines the client-side traits for that boundary; the
//! actual network transport lives behind them.
//!
//! A remote attribute that does not exist resolves to `None` rather than
//! an error; the adapters treat it as "feature unavailable" and disable
//! the dependent operation.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

pub mod mock;

pub use mock::MockExporter;

/// A value carried over the exporter wire.
///
/// The protocol is weakly typed; numeric attributes frequently arrive as
/// strings, so the accessors parse where that is lossless.
#[derive(Clone, Debug, PartialEq)]
pub enum ExporterValue {
    /// No value / void reply.
    Null,
    /// Boolean attribute.
    Bool(bool),
    /// Integer attribute.
    Int(i64),
    /// Floating-point attribute.
    Float(f64),
    /// String attribute.
    Str(String),
    /// Sequence of strings, e.g. the aggregate motor-state payload.
    StrList(Vec<String>),
}

impl ExporterValue {
    /// Numeric view of this value, parsing strings where possible.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ExporterValue::Float(v) => Some(*v),
            ExporterValue::Int(v) => Some(*v as f64),
            ExporterValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// String-list view of this value.
    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            ExporterValue::StrList(entries) => Some(entries),
            _ => None,
        }
    }
}

impl From<f64> for ExporterValue {
    fn from(value: f64) -> Self {
        ExporterValue::Float(value)
    }
}

impl From<i64> for ExporterValue {
    fn from(value: i64) -> Self {
        ExporterValue::Int(value)
    }
}

impl From<&str> for ExporterValue {
    fn from(value: &str) -> Self {
        ExporterValue::Str(value.to_string())
    }
}

impl From<Vec<String>> for ExporterValue {
    fn from(entries: Vec<String>) -> Self {
        ExporterValue::StrList(entries)
    }
}

/// A remote attribute supporting read, write and change subscription.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Read the attribute's current value from the server.
    async fn read(&self) -> Result<ExporterValue>;

    /// Write the attribute. For position attributes this starts a motion;
    /// the write returns as soon as the server accepts it.
    async fn write(&self, value: ExporterValue) -> Result<()>;

    /// Subscribe to server-initiated pushes for this attribute.
    fn subscribe(&self) -> broadcast::Receiver<ExporterValue>;
}

/// A remote procedure with no subscription semantics.
#[async_trait]
pub trait Command: Send + Sync {
    /// Invoke the procedure and return its reply.
    async fn invoke(&self, args: &[ExporterValue]) -> Result<ExporterValue>;
}

/// Resolves remote names to channel and command handles.
#[async_trait]
pub trait ExporterBinding: Send + Sync {
    /// Bind a channel by remote name. Returns `None` when the attribute is
    /// not exported by the device; callers must treat that as a missing
    /// feature, not a fault.
    async fn bind_channel(&self, name: &str) -> Result<Option<Arc<dyn Channel>>>;

    /// Bind a command by remote name. Fails when the procedure is not
    /// exported.
    async fn bind_command(&self, name: &str) -> Result<Arc<dyn Command>>;
}
