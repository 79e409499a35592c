//! Event transport: serialize a captured session and hand it off.
//!
//! Fire-and-forget with success reporting: whatever the sink answers, the
//! capture buffer is already drained and the machine is back in IDLE. A
//! retransmit queue is deliberately absent.

use autoscale_core::Sample;
use serde::Serialize;

use crate::error::DeviceError;

/// Uniform wire shape for one captured event.
#[derive(Debug, Serialize)]
pub struct WireEvent<'a> {
    pub scale_id: &'a str,
    /// Advisory wall-clock (or uptime) anchor; consumers must not trust it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t0_epoch_ms: Option<u64>,
    pub samples: &'a [Sample],
}

/// Where finished events go. Implementations must not retry internally;
/// the device treats any error as "event lost by design".
pub trait EventSink {
    fn submit(&mut self, event: &WireEvent<'_>) -> Result<(), DeviceError>;
}

/// Sink for benches and unconfigured devices: logs and drops.
#[derive(Debug, Default)]
pub struct DiscardSink;

impl EventSink for DiscardSink {
    fn submit(&mut self, event: &WireEvent<'_>) -> Result<(), DeviceError> {
        tracing::info!(
            scale_id = event.scale_id,
            samples = event.samples.len(),
            "event discarded (no transport configured)"
        );
        Ok(())
    }
}

/// Test sink collecting serialized payloads.
#[derive(Debug, Default)]
pub struct CollectSink {
    pub payloads: Vec<serde_json::Value>,
}

impl EventSink for CollectSink {
    fn submit(&mut self, event: &WireEvent<'_>) -> Result<(), DeviceError> {
        let value = serde_json::to_value(event)
            .map_err(|e| DeviceError::Upload(e.to_string()))?;
        self.payloads.push(value);
        Ok(())
    }
}

/// HTTPS upload to the ingest endpoint with the shared-secret header.
#[cfg(feature = "upload")]
pub struct HttpSink {
    client: reqwest::blocking::Client,
    url: String,
    secret: String,
}

#[cfg(feature = "upload")]
impl HttpSink {
    pub fn new(url: impl Into<String>, secret: impl Into<String>) -> Result<Self, DeviceError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| DeviceError::Upload(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            secret: secret.into(),
        })
    }
}

#[cfg(feature = "upload")]
impl EventSink for HttpSink {
    fn submit(&mut self, event: &WireEvent<'_>) -> Result<(), DeviceError> {
        let resp = self
            .client
            .post(&self.url)
            .header("x-function-secret", &self.secret)
            .json(event)
            .send()
            .map_err(|e| DeviceError::Upload(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(DeviceError::Upload(format!("{status}: {body}")));
        }
        Ok(())
    }
}

/// Round sample weights to 5 decimals before upload, bounding payload size
/// the way the firmware's fixed-precision formatter did.
pub fn quantize_for_wire(samples: &mut [Sample]) {
    for s in samples.iter_mut() {
        s.kg = (s.kg * 100_000.0).round() / 100_000.0;
    }
}
