use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::models::{OutboxStatus, StatusCounts};

#[derive(Clone)]
pub struct OutboxMetrics {
    registry: Registry,

    // Counters
    pub delivery_total: IntCounterVec,
    pub swept_total: IntCounter,
    pub redriven_total: IntCounter,

    // Histograms
    pub publish_duration_seconds: HistogramVec,

    // Gauges
    pub records: IntGaugeVec,
}

impl OutboxMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let delivery_total = IntCounterVec::new(
            Opts::new("outbox_delivery_total", "Outcomes of outbox delivery attempts"),
            &["result", "event_type"], // published|retry|dead_letter|conflict
        )?;

        let swept_total = IntCounter::new(
            "outbox_swept_total",
            "Published records deleted by the retention sweeper",
        )?;

        let redriven_total = IntCounter::new(
            "outbox_redriven_total",
            "Dead-lettered records returned to the queue",
        )?;

        let publish_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "outbox_publish_duration_seconds",
                "Broker publish duration seconds",
            ),
            &["result"], // ok|error|timeout
        )?;

        let records = IntGaugeVec::new(
            Opts::new("outbox_records", "Outbox records per status"),
            &["status"],
        )?;

        registry.register(Box::new(delivery_total.clone()))?;
        registry.register(Box::new(swept_total.clone()))?;
        registry.register(Box::new(redriven_total.clone()))?;
        registry.register(Box::new(publish_duration_seconds.clone()))?;
        registry.register(Box::new(records.clone()))?;

        Ok(Self {
            registry,
            delivery_total,
            swept_total,
            redriven_total,
            publish_duration_seconds,
            records,
        })
    }

    pub fn record_delivery(&self, result: &str, event_type: &str) {
        self.delivery_total
            .with_label_values(&[result, event_type])
            .inc();
    }

    pub fn set_status_counts(&self, counts: &StatusCounts) {
        for status in OutboxStatus::ALL {
            self.records
                .with_label_values(&[status.as_str()])
                .set(counts.get(status));
        }
    }

    pub fn render(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        encoder
            .encode(&mf, &mut buf)
            .map_err(|e| e.to_string())?;
        String::from_utf8(buf).map_err(|e| e.to_string())
    }
}
