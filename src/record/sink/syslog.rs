use std::io::Write;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use ::syslog::{Facility, Formatter3164, Logger, LoggerBackend};
use url::Url;

use super::{Sink, SinkError};
use crate::record::Record;

/// Writer age after which it is replaced, and the minimum gap between
/// reconnect attempts after a failure.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

const NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Syslog tag: `<app>` or `<app>.<namespace>`.
///
/// An empty namespace is read from the service account file when running
/// inside Kubernetes.
pub fn tag(app_name: &str, namespace: &str) -> String {
    let namespace = if namespace.is_empty() {
        std::fs::read_to_string(NAMESPACE_FILE)
            .map(|ns| ns.trim().to_string())
            .unwrap_or_default()
    } else {
        namespace.to_string()
    };

    if namespace.is_empty() {
        app_name.to_string()
    } else {
        format!("{app_name}.{namespace}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Udp,
    Tcp,
}

/// Where to dial, parsed from `udp://host:port` or `tcp://host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    transport: Transport,
    addr: String,
}

impl Endpoint {
    fn parse(raw: &str) -> Result<Self, SinkError> {
        let url = Url::parse(raw).map_err(|_| SinkError::Url(raw.to_string()))?;
        let transport = match url.scheme() {
            "udp" => Transport::Udp,
            "tcp" => Transport::Tcp,
            _ => return Err(SinkError::Url(raw.to_string())),
        };
        let host = url.host_str().ok_or_else(|| SinkError::Url(raw.to_string()))?;
        let port = url.port().ok_or_else(|| SinkError::Url(raw.to_string()))?;
        Ok(Self {
            transport,
            addr: format!("{host}:{port}"),
        })
    }
}

struct State {
    writer: Option<Logger<LoggerBackend, Formatter3164>>,
    connected_at: Instant,
    last_attempt: Option<Instant>,
}

/// Ships records to a syslog collector at `LOG_LOCAL0 | LOG_INFO`.
///
/// UDP gives no signal when the collector goes away, so the writer is
/// replaced every five seconds whether or not a write failed.
pub struct SyslogSink {
    endpoint: Endpoint,
    formatter: Formatter3164,
    mirror_stdout: bool,
    state: Mutex<State>,
}

impl SyslogSink {
    /// Parse the endpoint and dial once. A failed first dial is retried on
    /// publish.
    pub fn connect(url: &str, tag: &str, mirror_stdout: bool) -> Result<Self, SinkError> {
        let endpoint = Endpoint::parse(url)?;
        let formatter = Formatter3164 {
            facility: Facility::LOG_LOCAL0,
            hostname: None,
            process: tag.to_string(),
            pid: std::process::id(),
        };

        let now = Instant::now();
        let writer = match dial(&endpoint, &formatter) {
            Ok(writer) => Some(writer),
            Err(e) => {
                tracing::warn!(endpoint = %endpoint.addr, error = %e, "Syslog dial failed, will retry");
                None
            }
        };

        tracing::info!(endpoint = %endpoint.addr, tag = %tag, "Syslog sink configured");
        Ok(Self {
            endpoint,
            formatter,
            mirror_stdout,
            state: Mutex::new(State {
                connected_at: now,
                last_attempt: writer.is_none().then_some(now),
                writer,
            }),
        })
    }

    /// Swap in a fresh writer when the current one is stale or missing,
    /// never dialing more than once per interval after a failure.
    fn refresh(&self, state: &mut State) {
        let stale = state.connected_at.elapsed() >= RECONNECT_INTERVAL;
        if state.writer.is_some() && !stale {
            return;
        }
        if state.writer.is_none()
            && state
                .last_attempt
                .is_some_and(|t| t.elapsed() < RECONNECT_INTERVAL)
        {
            return;
        }

        match dial(&self.endpoint, &self.formatter) {
            Ok(writer) => {
                state.writer = Some(writer);
                state.connected_at = Instant::now();
                state.last_attempt = None;
            }
            Err(e) => {
                tracing::warn!(endpoint = %self.endpoint.addr, error = %e, "Syslog reconnect failed");
                state.last_attempt = Some(Instant::now());
            }
        }
    }
}

fn dial(
    endpoint: &Endpoint,
    formatter: &Formatter3164,
) -> Result<Logger<LoggerBackend, Formatter3164>, SinkError> {
    let result = match endpoint.transport {
        Transport::Udp => ::syslog::udp(formatter.clone(), "0.0.0.0:0", endpoint.addr.as_str()),
        Transport::Tcp => ::syslog::tcp(formatter.clone(), endpoint.addr.as_str()),
    };
    result.map_err(|e| SinkError::Syslog(e.to_string()))
}

impl Sink for SyslogSink {
    fn name(&self) -> &'static str {
        "syslog"
    }

    fn publish(&self, record: &Record) -> Result<(), SinkError> {
        let line = record.to_json()?;
        if self.mirror_stdout {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "{line}");
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| SinkError::Syslog("syslog sink lock poisoned".into()))?;
        self.refresh(&mut state);

        let Some(writer) = state.writer.as_mut() else {
            return Err(SinkError::Syslog(format!("not connected to {}", self.endpoint.addr)));
        };
        if let Err(e) = writer.info(&line) {
            state.writer = None;
            state.last_attempt = Some(Instant::now());
            return Err(SinkError::Syslog(e.to_string()));
        }
        Ok(())
    }
}
