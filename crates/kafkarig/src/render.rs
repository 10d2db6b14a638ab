//! Rendering of member and probe configuration files.
//!
//! Full templating is left to callers: anything implementing [`ConfigRenderer`]
//! can be handed to the service or probe. [`DefaultRenderer`] emits the minimal
//! properties a broker or console consumer needs to run.

use std::time::Duration;

use crate::types::BrokerId;

/// Values available when rendering one broker's configuration.
#[derive(Debug, Clone)]
pub struct BrokerContext<'a> {
    pub broker_id: BrokerId,
    pub hostname: &'a str,
    pub port: u16,
    pub coordination_connect: &'a str,
    pub data_dir: &'a str,
}

pub trait ConfigRenderer: Send + Sync {
    /// Contents of the broker's properties file.
    fn broker_properties(&self, ctx: &BrokerContext<'_>) -> String;

    /// Contents of a console consumer's properties file.
    fn consumer_properties(&self, idle_timeout: Option<Duration>) -> String;

    /// log4j configuration routing tool logging into `log_file`.
    fn log4j(&self, log_file: &str) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRenderer;

impl ConfigRenderer for DefaultRenderer {
    fn broker_properties(&self, ctx: &BrokerContext<'_>) -> String {
        render_properties(&[
            ("broker.id", ctx.broker_id.0.to_string()),
            ("port", ctx.port.to_string()),
            ("advertised.host.name", ctx.hostname.to_string()),
            ("zookeeper.connect", ctx.coordination_connect.to_string()),
            ("log.dirs", ctx.data_dir.to_string()),
            ("num.partitions", "1".to_string()),
        ])
    }

    fn consumer_properties(&self, idle_timeout: Option<Duration>) -> String {
        let mut entries = vec![("group.id", "console-consumer-probe".to_string())];
        if let Some(timeout) = idle_timeout {
            entries.push(("consumer.timeout.ms", timeout.as_millis().to_string()));
        }
        render_properties(&entries)
    }

    fn log4j(&self, log_file: &str) -> String {
        render_properties(&[
            ("log4j.rootLogger", "INFO, FILE".to_string()),
            ("log4j.appender.FILE", "org.apache.log4j.FileAppender".to_string()),
            ("log4j.appender.FILE.File", log_file.to_string()),
            ("log4j.appender.FILE.layout", "org.apache.log4j.PatternLayout".to_string()),
            (
                "log4j.appender.FILE.layout.ConversionPattern",
                "[%d] %p %m (%c)%n".to_string(),
            ),
        ])
    }
}

/// Render `key=value` lines in the given order.
pub fn render_properties(entries: &[(&str, String)]) -> String {
    entries
        .iter()
        .map(|(key, value)| format!("{key}={value}\n"))
        .collect()
}
