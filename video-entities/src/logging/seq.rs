//! Shipping of log events to a Seq server.
//!
//! Events are rendered as CLEF (one JSON object per line) by [`SeqLayer`] and
//! handed over a channel to a background task that posts them in batches to
//! `<seq url>/api/events/raw?clef`.
//!
//! Fields of the enclosing spans are copied onto each event, so run-wide
//! properties such as the environment and machine travel with every line.

use super::{LogError, Result};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{mpsc, oneshot};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

const MAX_BATCH: usize = 500;
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
const CLEF_CONTENT_TYPE: &str = "application/vnd.serilog.clef";

/// Targets whose events would be produced by shipping itself.
const IGNORED_TARGETS: &[&str] = &["hyper", "reqwest", "h2", "rustls"];

enum SeqMessage {
    Event(String),
    Flush(oneshot::Sender<()>),
}

/// Layer rendering events as CLEF lines.
pub struct SeqLayer {
    sender: mpsc::UnboundedSender<SeqMessage>,
}

impl fmt::Debug for SeqLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeqLayer").finish_non_exhaustive()
    }
}

/// Handle to the background shipping task.
#[derive(Debug)]
pub struct SeqHandle {
    sender: mpsc::UnboundedSender<SeqMessage>,
}

impl fmt::Debug for SeqMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeqMessage::Event(line) => f.debug_tuple("Event").field(line).finish(),
            SeqMessage::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl SeqHandle {
    /// Post buffered events and wait for the request to complete.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(SeqMessage::Flush(done)).is_err() {
            return;
        }
        let _ = tokio::time::timeout(FLUSH_TIMEOUT, wait).await;
    }
}

/// Start the shipping task for `seq_url` and return the layer feeding it.
pub fn spawn(seq_url: &str) -> Result<(SeqLayer, SeqHandle)> {
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| LogError::Other(format!("Seq logging needs a tokio runtime: {}", e)))?;

    let endpoint = clef_endpoint(seq_url);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| LogError::SubscriberError(Box::new(e)))?;

    let (sender, receiver) = mpsc::unbounded_channel();
    runtime.spawn(ship(client, endpoint, receiver));

    Ok((
        SeqLayer {
            sender: sender.clone(),
        },
        SeqHandle { sender },
    ))
}

/// Raw ingestion endpoint for `seq_url`.
pub(crate) fn clef_endpoint(seq_url: &str) -> String {
    format!("{}/api/events/raw?clef", seq_url.trim_end_matches('/'))
}

async fn ship(
    client: reqwest::Client,
    endpoint: String,
    mut receiver: mpsc::UnboundedReceiver<SeqMessage>,
) {
    let mut batch: Vec<String> = Vec::new();
    loop {
        match tokio::time::timeout(FLUSH_INTERVAL, receiver.recv()).await {
            Ok(Some(SeqMessage::Event(line))) => {
                batch.push(line);
                if batch.len() >= MAX_BATCH {
                    post(&client, &endpoint, &mut batch).await;
                }
            }
            Ok(Some(SeqMessage::Flush(done))) => {
                post(&client, &endpoint, &mut batch).await;
                let _ = done.send(());
            }
            Ok(None) => {
                post(&client, &endpoint, &mut batch).await;
                break;
            }
            Err(_) => post(&client, &endpoint, &mut batch).await,
        }
    }
}

async fn post(client: &reqwest::Client, endpoint: &str, batch: &mut Vec<String>) {
    if batch.is_empty() {
        return;
    }
    let body = batch.join("\n");
    batch.clear();

    let result = client
        .post(endpoint)
        .header(reqwest::header::CONTENT_TYPE, CLEF_CONTENT_TYPE)
        .body(body)
        .send()
        .await
        .and_then(|r| r.error_for_status());

    // tracing here would feed back into this task
    if let Err(e) = result {
        eprintln!("seq: failed to ship log events: {}", e);
    }
}

/// Fields recorded on a span, kept in its extensions.
#[derive(Debug, Default)]
struct SpanFields(Map<String, Value>);

impl<S> Layer<S> for SeqLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = ClefVisitor::default();
        attrs.record(&mut visitor);
        span.extensions_mut().insert(SpanFields(visitor.fields));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = ClefVisitor::default();
        values.record(&mut visitor);

        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<SpanFields>() {
            Some(fields) => fields.0.extend(visitor.fields),
            None => extensions.insert(SpanFields(visitor.fields)),
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if IGNORED_TARGETS
            .iter()
            .any(|target| metadata.target().starts_with(target))
        {
            return;
        }

        let mut visitor = ClefVisitor::default();
        event.record(&mut visitor);

        // innermost span wins; event fields win over all spans
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(fields) = span.extensions().get::<SpanFields>() {
                    for (key, value) in &fields.0 {
                        visitor
                            .fields
                            .entry(key.clone())
                            .or_insert_with(|| value.clone());
                    }
                }
            }
        }

        let line = render_clef(
            OffsetDateTime::now_utc(),
            metadata.level(),
            metadata.target(),
            visitor,
        );
        let _ = self.sender.send(SeqMessage::Event(line));
    }
}

/// Collects event fields into a JSON map.
#[derive(Debug, Default)]
pub(crate) struct ClefVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl ClefVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for ClefVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::from(format!("{:?}", value)));
    }
}

/// Render one CLEF line. `@m` carries the already rendered message.
pub(crate) fn render_clef(
    timestamp: OffsetDateTime,
    level: &tracing::Level,
    target: &str,
    visitor: ClefVisitor,
) -> String {
    let mut record = Map::new();
    record.insert(
        "@t".to_string(),
        Value::from(timestamp.format(&Rfc3339).unwrap_or_default()),
    );
    record.insert(
        "@m".to_string(),
        Value::from(visitor.message.unwrap_or_default()),
    );
    record.insert("@l".to_string(), Value::from(seq_level(level)));
    record.insert("SourceContext".to_string(), Value::from(target));
    for (key, value) in visitor.fields {
        record.entry(key).or_insert(value);
    }
    Value::Object(record).to_string()
}

fn seq_level(level: &tracing::Level) -> &'static str {
    match *level {
        tracing::Level::TRACE => "Verbose",
        tracing::Level::DEBUG => "Debug",
        tracing::Level::INFO => "Information",
        tracing::Level::WARN => "Warning",
        tracing::Level::ERROR => "Error",
    }
}
