//! Sample envelopes and their JSON wire shape.
//!
//! Every request body is one flat JSON object carrying `time`, `pid`, `type`,
//! `service` and `_hostname`, followed by the profile or metrics fields.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::ser::Error as _;
use serde::{Serialize, Serializer};
use serde_json::value::RawValue;

use crate::identity::Identity;
use crate::kind::ProfileKind;

/// `type` value of profile bodies.
pub const PROFILE_TYPE: &str = "profile";
/// `type` value of metrics bodies.
pub const METRICS_TYPE: &str = "metrics";
/// `_documentType` value of metrics bodies.
pub const RUNTIME_METRICS_DOCUMENT: &str = "runtime_metrics";
/// `_plugin` value of every body.
pub const PLUGIN: &str = "rust_profiler";

/// Identification shared by every sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleHeader {
    /// Capture time in ms since epoch.
    pub timestamp_ms: i64,
    pub identity: Arc<Identity>,
}

/// Metadata of a profile capture, without its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileMeta {
    pub header: SampleHeader,
    pub kind: ProfileKind,
    /// Capture window, set for cpu only.
    pub duration: Option<Duration>,
    /// Collection interval the sample belongs to.
    pub interval: Duration,
}

/// A profile sample owning its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSample {
    pub meta: ProfileMeta,
    pub payload: Vec<u8>,
}

/// Runtime counters derived for one metrics tick.
///
/// Memory figures are in MiB, pause figures in ms. Fields described as "since
/// last tick" are deltas against the previous reading; on the first tick the
/// previous reading is all zeros, so they carry the cumulative counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeMetrics {
    pub num_cpu: u32,
    pub num_tasks: u64,
    pub alloc_mb: f64,
    /// Allocated since last tick.
    pub total_alloc_mb: f64,
    pub sys_mb: f64,
    /// Allocations since last tick.
    pub mallocs: u64,
    /// Frees since last tick.
    pub frees: u64,
    pub live_objects: u64,
    /// GC cycles since last tick.
    pub num_gc: u32,
    /// Forced GC cycles since last tick.
    pub num_forced_gc: u32,
    /// End of the last GC in ms since epoch.
    pub last_gc_ms: u64,
    /// Pause time since last tick.
    pub total_pause_gc_ms: f64,
    pub max_pause_gc_ms: f64,
    pub min_pause_gc_ms: f64,
    pub gc_cpu_fraction: f64,
}

/// A metrics sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSample {
    pub header: SampleHeader,
    pub metrics: RuntimeMetrics,
}

/// One unit of published data.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Profile(ProfileSample),
    Metrics(MetricsSample),
}

impl Envelope {
    #[must_use]
    pub const fn header(&self) -> &SampleHeader {
        match self {
            Self::Profile(p) => &p.meta.header,
            Self::Metrics(m) => &m.header,
        }
    }

    /// Short label for logs: the profile kind or `metrics`.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Profile(p) => p.meta.kind.as_str(),
            Self::Metrics(_) => METRICS_TYPE,
        }
    }
}

impl ProfileSample {
    /// JSON request body with the payload base64 encoded.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&ProfileBody::new(self))
    }
}

impl MetricsSample {
    /// Compact JSON request body.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&MetricsBody::new(self))
    }

    /// Indented JSON, as stored by the file sink.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(&MetricsBody::new(self))
    }
}

/// Float rendered with one decimal when whole and four otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HumanFloat(pub f64);

impl HumanFloat {
    /// JSON text of the value. Non-finite values render as `0.0`.
    #[must_use]
    pub fn render(self) -> String {
        let v = self.0;
        if !v.is_finite() {
            return "0.0".to_string();
        }
        if v.fract() == 0.0 {
            format!("{v:.1}")
        } else {
            format!("{v:.4}")
        }
    }
}

impl Serialize for HumanFloat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = RawValue::from_string(self.render()).map_err(S::Error::custom)?;
        raw.serialize(serializer)
    }
}

#[derive(Serialize)]
struct ProfileBody<'a> {
    time: i64,
    pid: u32,
    #[serde(rename = "type")]
    doc_type: &'static str,
    service: &'a str,
    #[serde(rename = "_hostname")]
    hostname: &'a str,
    #[serde(rename = "_documentType")]
    document_type: &'static str,
    #[serde(rename = "_plugin")]
    plugin: &'static str,
    profile_type: ProfileKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<u64>,
    interval: u64,
    pprof: String,
}

impl<'a> ProfileBody<'a> {
    fn new(sample: &'a ProfileSample) -> Self {
        let meta = &sample.meta;
        let identity = &meta.header.identity;
        Self {
            time: meta.header.timestamp_ms,
            pid: identity.pid,
            doc_type: PROFILE_TYPE,
            service: &identity.service,
            hostname: &identity.hostname,
            document_type: PROFILE_TYPE,
            plugin: PLUGIN,
            profile_type: meta.kind,
            duration: meta.duration.map(|d| d.as_secs()),
            interval: meta.interval.as_secs(),
            pprof: BASE64.encode(&sample.payload),
        }
    }
}

#[derive(Serialize)]
struct MetricsBody<'a> {
    time: i64,
    pid: u32,
    #[serde(rename = "type")]
    doc_type: &'static str,
    service: &'a str,
    #[serde(rename = "_hostname")]
    hostname: &'a str,
    #[serde(rename = "_documentType")]
    document_type: &'static str,
    #[serde(rename = "_plugin")]
    plugin: &'static str,
    num_cpu: u32,
    num_goroutines: u64,
    alloc_mb: HumanFloat,
    total_alloc_mb: HumanFloat,
    sys_mb: HumanFloat,
    mallocs: u64,
    frees: u64,
    live_objects: u64,
    num_gc: u32,
    num_forced_gc: u32,
    last_gc: u64,
    total_pause_gc_ms: HumanFloat,
    max_pause_gc_ms: HumanFloat,
    min_pause_gc_ms: HumanFloat,
    gc_cpu_fraction: HumanFloat,
}

impl<'a> MetricsBody<'a> {
    fn new(sample: &'a MetricsSample) -> Self {
        let m = &sample.metrics;
        let identity = &sample.header.identity;
        Self {
            time: sample.header.timestamp_ms,
            pid: identity.pid,
            doc_type: METRICS_TYPE,
            service: &identity.service,
            hostname: &identity.hostname,
            document_type: RUNTIME_METRICS_DOCUMENT,
            plugin: PLUGIN,
            num_cpu: m.num_cpu,
            num_goroutines: m.num_tasks,
            alloc_mb: HumanFloat(m.alloc_mb),
            total_alloc_mb: HumanFloat(m.total_alloc_mb),
            sys_mb: HumanFloat(m.sys_mb),
            mallocs: m.mallocs,
            frees: m.frees,
            live_objects: m.live_objects,
            num_gc: m.num_gc,
            num_forced_gc: m.num_forced_gc,
            last_gc: m.last_gc_ms,
            total_pause_gc_ms: HumanFloat(m.total_pause_gc_ms),
            max_pause_gc_ms: HumanFloat(m.max_pause_gc_ms),
            min_pause_gc_ms: HumanFloat(m.min_pause_gc_ms),
            gc_cpu_fraction: HumanFloat(m.gc_cpu_fraction),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use proptest::prelude::*;
    use serde_json::Value;

    use super::*;

    fn header() -> SampleHeader {
        SampleHeader {
            timestamp_ms: 1_700_000_000_123,
            identity: Arc::new(Identity {
                service: "svc".to_string(),
                pid: 42,
                hostname: "host-a".to_string(),
            }),
        }
    }

    fn profile(kind: ProfileKind, duration: Option<Duration>) -> ProfileSample {
        ProfileSample {
            meta: ProfileMeta {
                header: header(),
                kind,
                duration,
                interval: Duration::from_secs(60),
            },
            payload: vec![0, 159, 146, 150, 255],
        }
    }

    fn field<'a>(body: &'a Value, name: &str) -> &'a Value {
        body.get(name).unwrap_or(&Value::Null)
    }

    #[test]
    fn test_human_float_render() {
        assert_eq!(HumanFloat(12.0).render(), "12.0");
        assert_eq!(HumanFloat(0.0).render(), "0.0");
        assert_eq!(HumanFloat(0.5).render(), "0.5000");
        assert_eq!(HumanFloat(1.234_56).render(), "1.2346");
        assert_eq!(HumanFloat(f64::NAN).render(), "0.0");
    }

    #[test]
    fn test_profile_body_shape() -> Result<(), Box<dyn Error>> {
        let json = profile(ProfileKind::Heap, None).to_json()?;
        let body: Value = serde_json::from_slice(&json)?;

        assert_eq!(field(&body, "time"), 1_700_000_000_123_i64);
        assert_eq!(field(&body, "pid"), 42);
        assert_eq!(field(&body, "type"), "profile");
        assert_eq!(field(&body, "service"), "svc");
        assert_eq!(field(&body, "_hostname"), "host-a");
        assert_eq!(field(&body, "profile_type"), "heap");
        assert_eq!(field(&body, "interval"), 60);
        assert!(body.get("duration").is_none());
        let pprof = field(&body, "pprof").as_str().ok_or("pprof is not a string")?;
        assert_eq!(BASE64.decode(pprof)?, vec![0, 159, 146, 150, 255]);
        Ok(())
    }

    #[test]
    fn test_cpu_body_carries_duration() -> Result<(), Box<dyn Error>> {
        let sample = profile(ProfileKind::Cpu, Some(Duration::from_secs(10)));
        let body: Value = serde_json::from_slice(&sample.to_json()?)?;
        assert_eq!(field(&body, "duration"), 10);
        assert_eq!(field(&body, "profile_type"), "cpu");
        Ok(())
    }

    #[test]
    fn test_metrics_body_float_text() -> Result<(), Box<dyn Error>> {
        let sample = MetricsSample {
            header: header(),
            metrics: RuntimeMetrics {
                num_cpu: 8,
                alloc_mb: 3.0,
                max_pause_gc_ms: 0.125,
                ..RuntimeMetrics::default()
            },
        };
        let text = String::from_utf8(sample.to_json()?)?;

        assert!(text.contains("\"alloc_mb\":3.0"), "{text}");
        assert!(text.contains("\"max_pause_gc_ms\":0.1250"), "{text}");
        assert!(text.contains("\"type\":\"metrics\""), "{text}");
        assert!(text.contains("\"_documentType\":\"runtime_metrics\""), "{text}");
        Ok(())
    }

    #[test]
    fn test_metrics_pretty_is_indented() -> Result<(), Box<dyn Error>> {
        let sample = MetricsSample {
            header: header(),
            metrics: RuntimeMetrics::default(),
        };
        let text = String::from_utf8(sample.to_json_pretty()?)?;
        assert!(text.contains("\n  \"num_cpu\": 0"));
        assert!(serde_json::from_str::<Value>(&text).is_ok());
        Ok(())
    }

    #[test]
    fn test_envelope_label_and_header() {
        let profile = Envelope::Profile(profile(ProfileKind::ThreadCreate, None));
        let metrics = Envelope::Metrics(MetricsSample {
            header: header(),
            metrics: RuntimeMetrics::default(),
        });

        assert_eq!(profile.label(), "threadcreate");
        assert_eq!(metrics.label(), "metrics");
        assert_eq!(profile.header(), &header());
        assert_eq!(metrics.header().identity.service, "svc");
    }

    proptest! {
        #[test]
        fn prop_human_float_is_valid_json(v in -1.0e9_f64..1.0e9) {
            let text = HumanFloat(v).render();
            let parsed: f64 = serde_json::from_str(&text)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert!((parsed - v).abs() <= 1e-4 + v.abs() * 1e-12);
            let decimals = text.split('.').nth(1).map_or(0, str::len);
            prop_assert!(decimals == 1 || decimals == 4);
        }
    }
}
