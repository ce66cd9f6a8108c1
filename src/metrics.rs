//! Prometheus-compatible metrics endpoint
//!
//! Counters are plain atomics updated from field threads and tick drivers.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Number of field step durations kept for percentiles
const TICK_HISTORY_LEN: usize = 1000;

/// Metrics registry for the field server
#[derive(Debug)]
pub struct Metrics {
    // Fields and population
    pub fields_active: AtomicU64,
    pub players_active: AtomicU64,
    pub npcs_alive: AtomicU64,

    // Actor queues
    pub messages_pushed: AtomicU64,
    pub messages_processed: AtomicU64,
    pub messages_rejected: AtomicU64,
    pub messages_malformed: AtomicU64,
    pub handler_panics: AtomicU64,

    // AOI
    pub aoi_events: AtomicU64,

    // Sessions
    pub events_delivered: AtomicU64,
    pub events_dropped: AtomicU64,

    // Field step timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    start_time: Instant,

    // Rolling step times for percentile calculation
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            fields_active: AtomicU64::new(0),
            players_active: AtomicU64::new(0),
            npcs_alive: AtomicU64::new(0),
            messages_pushed: AtomicU64::new(0),
            messages_processed: AtomicU64::new(0),
            messages_rejected: AtomicU64::new(0),
            messages_malformed: AtomicU64::new(0),
            handler_panics: AtomicU64::new(0),
            aoi_events: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY_LEN)),
        }
    }

    /// Record one field step duration and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics_extended")]
        {
            let mut history = self.tick_history.write();
            history.push_back(us);
            while history.len() > TICK_HISTORY_LEN {
                history.pop_front();
            }

            if history.len() >= 10 {
                let mut sorted: Vec<u64> = history.iter().copied().collect();
                sorted.sort_unstable();

                let p95_idx = (sorted.len() as f32 * 0.95) as usize;
                let p99_idx = (sorted.len() as f32 * 0.99) as usize;

                self.tick_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
                self.tick_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
                self.tick_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
            }
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("field_server_fields_active", "Number of running field actors", "gauge",
            self.fields_active.load(Ordering::Relaxed));
        metric!("field_server_players_active", "Players currently inside a field", "gauge",
            self.players_active.load(Ordering::Relaxed));
        metric!("field_server_npcs_alive", "Live NPCs across all fields", "gauge",
            self.npcs_alive.load(Ordering::Relaxed));

        metric!("field_server_messages_pushed_total", "Messages accepted into field queues", "counter",
            self.messages_pushed.load(Ordering::Relaxed));
        metric!("field_server_messages_processed_total", "Messages applied by field actors", "counter",
            self.messages_processed.load(Ordering::Relaxed));
        metric!("field_server_messages_rejected_total", "Messages rejected by a full or stopped queue", "counter",
            self.messages_rejected.load(Ordering::Relaxed));
        metric!("field_server_messages_malformed_total", "Payloads dropped as malformed", "counter",
            self.messages_malformed.load(Ordering::Relaxed));
        metric!("field_server_handler_panics_total", "Message handlers that panicked", "counter",
            self.handler_panics.load(Ordering::Relaxed));

        metric!("field_server_aoi_events_total", "Visibility events emitted", "counter",
            self.aoi_events.load(Ordering::Relaxed));
        metric!("field_server_events_delivered_total", "Events queued to sessions", "counter",
            self.events_delivered.load(Ordering::Relaxed));
        metric!("field_server_events_dropped_total", "Events dropped for full or closed sessions", "counter",
            self.events_dropped.load(Ordering::Relaxed));

        metric!("field_server_tick_time_microseconds", "Last field step time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("field_server_tick_time_p95_microseconds", "95th percentile field step time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("field_server_tick_time_p99_microseconds", "99th percentile field step time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("field_server_tick_time_max_microseconds", "Maximum field step time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("field_server_tick_count", "Total field steps processed", "counter",
            self.tick_count.load(Ordering::Relaxed));

        metric!("field_server_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics
    pub fn to_json(&self) -> String {
        format!(r#"{{
  "fields": {{
    "active": {},
    "players": {},
    "npcs_alive": {}
  }},
  "queues": {{
    "pushed": {},
    "processed": {},
    "rejected": {},
    "malformed": {},
    "panics": {}
  }},
  "aoi": {{
    "events": {},
    "delivered": {},
    "dropped": {}
  }},
  "performance": {{
    "tick_time_us": {},
    "tick_time_p95_us": {},
    "tick_time_p99_us": {},
    "tick_time_max_us": {},
    "tick_count": {}
  }},
  "uptime_seconds": {}
}}"#,
            self.fields_active.load(Ordering::Relaxed),
            self.players_active.load(Ordering::Relaxed),
            self.npcs_alive.load(Ordering::Relaxed),
            self.messages_pushed.load(Ordering::Relaxed),
            self.messages_processed.load(Ordering::Relaxed),
            self.messages_rejected.load(Ordering::Relaxed),
            self.messages_malformed.load(Ordering::Relaxed),
            self.handler_panics.load(Ordering::Relaxed),
            self.aoi_events.load(Ordering::Relaxed),
            self.events_delivered.load(Ordering::Relaxed),
            self.events_dropped.load(Ordering::Relaxed),
            self.tick_time_us.load(Ordering::Relaxed),
            self.tick_time_p95_us.load(Ordering::Relaxed),
            self.tick_time_p99_us.load(Ordering::Relaxed),
            self.tick_time_max_us.load(Ordering::Relaxed),
            self.tick_count.load(Ordering::Relaxed),
            self.uptime_seconds(),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    )
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);

                    // Most specific paths first
                    let response = if request.starts_with("GET /metrics/json") {
                        http_response("200 OK", "application/json", &metrics.to_json())
                    } else if request.starts_with("GET /metrics") {
                        http_response("200 OK", "text/plain; version=0.0.4", &metrics.to_prometheus())
                    } else if request.starts_with("GET /health") {
                        http_response("200 OK", "text/plain", "OK")
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.fields_active.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_tick_time() {
        let metrics = Metrics::new();

        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        assert_eq!(metrics.tick_time_us.load(Ordering::Relaxed), 1090);
        #[cfg(feature = "metrics_extended")]
        {
            assert!(metrics.tick_time_p95_us.load(Ordering::Relaxed) >= 1000);
            assert_eq!(metrics.tick_time_max_us.load(Ordering::Relaxed), 1090);
        }
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.fields_active.store(3, Ordering::Relaxed);
        metrics.messages_rejected.store(7, Ordering::Relaxed);

        let output = metrics.to_prometheus();

        assert!(output.contains("field_server_fields_active 3"));
        assert!(output.contains("field_server_messages_rejected_total 7"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_json_format() {
        let metrics = Metrics::new();
        metrics.aoi_events.store(42, Ordering::Relaxed);

        let output = metrics.to_json();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(parsed["aoi"]["events"], 42);
        assert!(parsed["performance"].is_object());
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_prometheus() {
        use tokio::net::TcpStream;

        let metrics = Arc::new(Metrics::new());
        metrics.fields_active.store(2, Ordering::Relaxed);

        // Find a free port, then hand it to the server
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        tokio::spawn(start_metrics_server(metrics.clone(), port));

        let mut stream = None;
        for _ in 0..50 {
            if let Ok(s) = TcpStream::connect(("127.0.0.1", port)).await {
                stream = Some(s);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let mut stream = stream.expect("metrics server accepted a connection");

        stream.write_all(b"GET /metrics HTTP/1.1\r\n\r\n").await.unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();

        assert!(body.starts_with("HTTP/1.1 200 OK"));
        assert!(body.contains("field_server_fields_active 2"));
    }
}
