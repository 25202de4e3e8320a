use config::{Config, ConfigError, Environment, File};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use shovel_relay::RelayRuntimeConfig;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ShovelConfig {
    pub http_bind: String,
    pub http_port: u16,
    pub max_concurrency: usize,
    pub max_outstanding: usize,
    pub unbounded_ceiling: u64,
    #[serde(with = "humantime_serde")]
    pub bounded_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub unbounded_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
    #[serde(with = "humantime_serde")]
    pub publish_timeout: Duration,
    pub log_buffer_size: usize,
    /// Finished jobs kept for `/jobs/{requestId}` lookups.
    pub job_retention: usize,
    /// Published messages each in-process topic keeps for inspection.
    pub topic_retention: usize,
    /// Topics created in the in-process broker at startup.
    #[serde(deserialize_with = "deserialize_list")]
    pub topics: Vec<String>,
    /// Subscriptions as `subscription=topic` pairs.
    #[serde(deserialize_with = "deserialize_list")]
    pub subscriptions: Vec<String>,
}

fn deserialize_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ListVisitor;

    impl<'de> Visitor<'de> for ListVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or a sequence of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(split_list(value))
        }

        fn visit_seq<S>(self, mut seq: S) -> Result<Self::Value, S::Error>
        where
            S: de::SeqAccess<'de>,
        {
            let mut vec = Vec::new();
            while let Some(element) = seq.next_element()? {
                vec.push(element);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(ListVisitor)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c| c == ',' || c == ';')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl ShovelConfig {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("http_bind", "0.0.0.0")?
            .set_default("http_port", 8080)?
            .set_default("max_concurrency", 10)?
            .set_default("max_outstanding", 100)?
            .set_default("unbounded_ceiling", 10_000)?
            .set_default("bounded_timeout", "5m")?
            .set_default("unbounded_timeout", "10m")?
            .set_default("grace_period", "2s")?
            .set_default("publish_timeout", "60s")?
            .set_default("log_buffer_size", 500)?
            .set_default("job_retention", 1000)?
            .set_default("topic_retention", 1024)?
            .set_default("topics", Vec::<String>::new())?
            .set_default("subscriptions", Vec::<String>::new())?;

        if let Some(path) = config_path {
            if path.extension().and_then(|ext| ext.to_str()) == Some("env") {
                // .env files feed the SHOVEL_* environment source below.
                match dotenvy::from_path(&path) {
                    Ok(_) => tracing::info!("loaded environment from {}", path.display()),
                    Err(err) => {
                        tracing::warn!("failed to load .env from {}: {}", path.display(), err)
                    }
                }
            } else {
                builder = builder.add_source(File::from(path));
            }
        }

        // Plain PORT is what most container platforms inject.
        if let Ok(port) = std::env::var("PORT") {
            if !port.trim().is_empty() {
                builder = builder.set_override("http_port", port.trim().to_string())?;
            }
        }

        builder = builder.add_source(Environment::with_prefix("SHOVEL").try_parsing(true));

        builder.build()?.try_deserialize()
    }

    pub fn relay(&self) -> RelayRuntimeConfig {
        RelayRuntimeConfig {
            max_concurrency: self.max_concurrency,
            max_outstanding: self.max_outstanding,
            unbounded_ceiling: self.unbounded_ceiling,
            bounded_timeout: self.bounded_timeout,
            unbounded_timeout: self.unbounded_timeout,
            grace_period: self.grace_period,
            publish_timeout: self.publish_timeout,
        }
    }

    /// Parsed `subscription=topic` pairs. Entries without `=` are skipped.
    pub fn subscription_bindings(&self) -> Vec<(String, String)> {
        self.subscriptions
            .iter()
            .filter_map(|entry| {
                let (sub, topic) = entry.split_once('=')?;
                let (sub, topic) = (sub.trim(), topic.trim());
                if sub.is_empty() || topic.is_empty() {
                    return None;
                }
                Some((sub.to_string(), topic.to_string()))
            })
            .collect()
    }
}
