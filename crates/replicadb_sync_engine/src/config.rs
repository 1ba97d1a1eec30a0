//! Configuration for a replica.

use crate::error::{SyncError, SyncResult};
use crate::handler::Producer;
use replicadb_core::flatten::FlattenMode;
use replicadb_core::schema::CollectionSchema;
use std::str::FromStr;
use std::time::Duration;

/// Configuration of one replica namespace.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Namespace name, used in logs.
    pub name: String,
    /// Declared collections; `None` discovers them from producer data.
    pub schema: Option<Vec<CollectionSchema>>,
    /// How nested records are split into tables.
    pub flatten_mode: FlattenMode,
    /// Pull a full dump every time the replica starts.
    pub pull_dump_on_restart: bool,
    /// Pull a delta every time the replica starts.
    pub pull_delta_on_restart: bool,
    /// Pull a delta before every list or aggregate.
    pub pull_delta_on_before_access: bool,
    /// Pull a delta after every write.
    pub pull_delta_on_after_write: bool,
    /// Window collecting before-access requests into one delta.
    pub before_access_delay: Option<Duration>,
    /// Cron patterns triggering dumps.
    pub pull_dump_schedules: Vec<String>,
    /// Cron patterns triggering deltas.
    pub pull_delta_schedules: Vec<String>,
}

impl ReplicaConfig {
    /// Creates a configuration that discovers its schema and does not
    /// flatten.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            flatten_mode: FlattenMode::None,
            pull_dump_on_restart: false,
            pull_delta_on_restart: false,
            pull_delta_on_before_access: false,
            pull_delta_on_after_write: false,
            before_access_delay: None,
            pull_dump_schedules: Vec::new(),
            pull_delta_schedules: Vec::new(),
        }
    }

    /// Declares the collections instead of discovering them.
    #[must_use]
    pub fn with_schema(mut self, schema: Vec<CollectionSchema>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Sets the flatten mode.
    #[must_use]
    pub fn with_flatten_mode(mut self, mode: FlattenMode) -> Self {
        self.flatten_mode = mode;
        self
    }

    /// Pulls a dump on every start.
    #[must_use]
    pub fn with_pull_dump_on_restart(mut self, enabled: bool) -> Self {
        self.pull_dump_on_restart = enabled;
        self
    }

    /// Pulls a delta on every start.
    #[must_use]
    pub fn with_pull_delta_on_restart(mut self, enabled: bool) -> Self {
        self.pull_delta_on_restart = enabled;
        self
    }

    /// Pulls a delta before reads.
    #[must_use]
    pub fn with_pull_delta_on_before_access(mut self, enabled: bool) -> Self {
        self.pull_delta_on_before_access = enabled;
        self
    }

    /// Pulls a delta after writes.
    #[must_use]
    pub fn with_pull_delta_on_after_write(mut self, enabled: bool) -> Self {
        self.pull_delta_on_after_write = enabled;
        self
    }

    /// Debounces before-access deltas by `delay`.
    #[must_use]
    pub fn with_before_access_delay(mut self, delay: Duration) -> Self {
        self.before_access_delay = Some(delay);
        self
    }

    /// Adds a cron pattern triggering dumps.
    #[must_use]
    pub fn with_dump_schedule(mut self, pattern: impl Into<String>) -> Self {
        self.pull_dump_schedules.push(pattern.into());
        self
    }

    /// Adds a cron pattern triggering deltas.
    #[must_use]
    pub fn with_delta_schedule(mut self, pattern: impl Into<String>) -> Self {
        self.pull_delta_schedules.push(pattern.into());
        self
    }

    /// Checks the configuration against the producer's capabilities.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a flag needs a handler the
    /// producer lacks, when writes are combined with flattening, when a
    /// declared schema is invalid or when a cron pattern does not parse.
    pub fn validate(&self, producer: &Producer) -> SyncResult<()> {
        if !producer.has_dump() && !producer.has_delta() && !producer.has_push() {
            return Err(SyncError::invalid_config(
                "the producer must support dump, delta or push",
            ));
        }
        if self.pull_dump_on_restart && !producer.has_dump() {
            return Err(SyncError::invalid_config(
                "pull_dump_on_restart requires a dump handler",
            ));
        }
        if !producer.has_delta() {
            let flags = [
                (self.pull_delta_on_restart, "pull_delta_on_restart"),
                (self.pull_delta_on_before_access, "pull_delta_on_before_access"),
                (self.pull_delta_on_after_write, "pull_delta_on_after_write"),
                (!self.pull_delta_schedules.is_empty(), "pull_delta_schedules"),
            ];
            if let Some((_, flag)) = flags.iter().find(|(set, _)| *set) {
                return Err(SyncError::invalid_config(format!(
                    "{flag} requires a delta handler"
                )));
            }
        }
        if !self.pull_dump_schedules.is_empty() && !producer.has_dump() {
            return Err(SyncError::invalid_config(
                "pull_dump_schedules requires a dump handler",
            ));
        }
        if self.schema.is_none() && !producer.has_dump() && !producer.has_delta() {
            return Err(SyncError::invalid_config(
                "schema discovery requires a dump or delta handler",
            ));
        }
        if producer.has_write() && self.flatten_mode.flattens() {
            return Err(SyncError::invalid_config(
                "write handlers cannot be combined with flatten options",
            ));
        }
        if let Some(schema) = &self.schema {
            for collection in schema {
                collection.validate()?;
            }
        }
        for pattern in self.pull_dump_schedules.iter().chain(&self.pull_delta_schedules) {
            parse_schedule(pattern)?;
        }
        Ok(())
    }
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

/// Parses a cron pattern.
///
/// Five-field patterns (minute precision) are accepted and fire at second
/// zero; six and seven-field patterns are passed through.
///
/// # Errors
///
/// Returns [`SyncError::InvalidSchedule`] when the pattern does not parse.
pub fn parse_schedule(pattern: &str) -> SyncResult<cron::Schedule> {
    let normalized = match pattern.split_whitespace().count() {
        5 => format!("0 {pattern}"),
        _ => pattern.to_string(),
    };
    cron::Schedule::from_str(&normalized).map_err(|e| SyncError::InvalidSchedule {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{
        CreateHandler, DeltaHandler, DeltaRequest, DumpHandler, DumpRequest, HandlerResult,
    };
    use async_trait::async_trait;
    use replicadb_sync_protocol::{PullDeltaResponse, PullDumpResponse, Record};
    use std::sync::Arc;

    struct Stub;

    #[async_trait]
    impl DumpHandler for Stub {
        async fn pull_dump(&self, _request: DumpRequest) -> HandlerResult<PullDumpResponse> {
            Ok(PullDumpResponse::done(vec![], None))
        }
    }

    #[async_trait]
    impl DeltaHandler for Stub {
        async fn pull_delta(&self, _request: DeltaRequest) -> HandlerResult<PullDeltaResponse> {
            Ok(PullDeltaResponse::unchanged(serde_json::Value::Null))
        }
    }

    #[async_trait]
    impl CreateHandler for Stub {
        async fn create_record(
            &self,
            _collection: &str,
            _record: &Record,
        ) -> HandlerResult<Option<Record>> {
            Ok(None)
        }
    }

    fn dump_only() -> Producer {
        Producer::new().with_dump(Arc::new(Stub))
    }

    #[test]
    fn replica_config_builder() {
        let config = ReplicaConfig::new("crm")
            .with_flatten_mode(FlattenMode::Auto)
            .with_pull_delta_on_before_access(true)
            .with_before_access_delay(Duration::from_millis(250))
            .with_delta_schedule("*/5 * * * *");

        assert_eq!(config.name, "crm");
        assert_eq!(config.flatten_mode, FlattenMode::Auto);
        assert!(config.pull_delta_on_before_access);
        assert_eq!(config.before_access_delay, Some(Duration::from_millis(250)));
        assert_eq!(config.pull_delta_schedules, vec!["*/5 * * * *"]);
    }

    #[test]
    fn producer_without_sources_is_rejected() {
        let err = ReplicaConfig::new("x").validate(&Producer::new()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn delta_flags_require_delta_handler() {
        let config = ReplicaConfig::new("x").with_pull_delta_on_after_write(true);
        let err = config.validate(&dump_only()).unwrap_err();
        assert!(err.to_string().contains("pull_delta_on_after_write"));

        let producer = dump_only().with_delta(Arc::new(Stub));
        config.validate(&producer).unwrap();
    }

    #[test]
    fn writes_cannot_be_flattened() {
        let producer = dump_only().with_create(Arc::new(Stub));
        let config = ReplicaConfig::new("x").with_flatten_mode(FlattenMode::Auto);
        assert!(config.validate(&producer).is_err());

        ReplicaConfig::new("x").validate(&producer).unwrap();
    }

    #[test]
    fn invalid_schema_is_a_configuration_error() {
        let config =
            ReplicaConfig::new("x").with_schema(vec![CollectionSchema::new("t", Default::default())]);
        let err = config.validate(&dump_only()).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn cron_patterns() {
        assert!(parse_schedule("*/5 * * * *").is_ok());
        assert!(parse_schedule("0 30 9 * * Mon-Fri").is_ok());
        assert!(matches!(
            parse_schedule("every five minutes"),
            Err(SyncError::InvalidSchedule { .. })
        ));

        let config = ReplicaConfig::new("x").with_dump_schedule("not a cron");
        assert!(config.validate(&dump_only()).is_err());
    }
}
