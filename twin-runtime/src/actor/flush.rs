//! Durable write-out of an entity
//!
//! A flush writes the state store, the search index and the time-series
//! sink independently. A failing sink is logged and the others are still
//! written; the caller sees the first failure.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};
use twin_types::{Entity, Node};

use crate::error::FlushError;
use crate::repository::Repository;
use crate::sink::{NoopSink, Point, SearchIndex, TimeSeries};

/// Measurement every entity telemetry point is written under
pub const MEASUREMENT: &str = "core-default";

/// Property holding telemetry samples
pub const TELEMETRY_PROPERTY: &str = "telemetry";

/// The three sinks a flush writes to
#[derive(Clone)]
pub struct FlushSinks {
    pub state: Arc<dyn Repository>,
    pub search: Arc<dyn SearchIndex>,
    pub series: Arc<dyn TimeSeries>,
}

impl FlushSinks {
    pub fn new(state: Arc<dyn Repository>, search: Arc<dyn SearchIndex>, series: Arc<dyn TimeSeries>) -> Self {
        Self { state, search, series }
    }

    /// Only the state store; search and telemetry are discarded
    pub fn state_only(state: Arc<dyn Repository>) -> Self {
        Self::new(state, Arc::new(NoopSink), Arc::new(NoopSink))
    }

    pub async fn flush(&self, entity: &Entity) -> Result<(), FlushError> {
        debug!(entity_id = %entity.id, version = entity.version, "flush entity");
        let mut first: Option<FlushError> = None;

        if let Err(err) = self.state.put_entity(entity).await {
            error!(entity_id = %entity.id, error = %err, "flush entity state storage");
            first.get_or_insert(FlushError::State(err));
        }

        if let Err(err) = self.search.index(&entity.id, &search_document(entity)).await {
            error!(entity_id = %entity.id, error = %err, "flush entity search engine");
            first.get_or_insert(FlushError::Search(err));
        }

        let points = series_points(entity);
        if !points.is_empty() {
            if let Err(err) = self.series.write(&points).await {
                error!(entity_id = %entity.id, error = %err, "flush entity timeseries database");
                first.get_or_insert(FlushError::TimeSeries(err));
            }
        }

        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Remove the entity from the state store and the search index
    pub async fn remove(&self, entity: &Entity) -> Result<(), FlushError> {
        self.state
            .del_entity(&entity.id)
            .await
            .map_err(FlushError::State)?;
        self.search
            .delete(&entity.id)
            .await
            .map_err(FlushError::Search)
    }
}

/// Search document: the properties plus the entity's basic fields
pub fn search_document(entity: &Entity) -> Node {
    let mut doc = entity.properties.clone();
    doc.insert("id".into(), Node::from(entity.id.as_str()));
    doc.insert("type".into(), Node::from(entity.entity_type.as_str()));
    doc.insert("owner".into(), Node::from(entity.owner.as_str()));
    doc.insert("source".into(), Node::from(entity.source.as_str()));
    doc.insert("version".into(), Node::from(entity.version));
    doc.insert("last_time".into(), Node::from(entity.last_time));
    Node::Object(doc)
}

/// Time-series points for the entity's `telemetry` property.
///
/// Entries are `{"value": number, "ts": millis}` objects, giving one point
/// each, or plain numbers, collected into one point stamped with the
/// entity's `last_time`. Anything else is ignored.
pub fn series_points(entity: &Entity) -> Vec<Point> {
    let Some(Node::Object(telemetry)) = entity.properties.get(TELEMETRY_PROPERTY) else {
        return Vec::new();
    };

    let tags = BTreeMap::from([
        ("app".to_string(), "core".to_string()),
        ("id".to_string(), entity.id.clone()),
        ("type".to_string(), entity.entity_type.clone()),
        ("owner".to_string(), entity.owner.clone()),
        ("source".to_string(), entity.source.clone()),
    ]);
    let point = |fields: BTreeMap<String, f64>, timestamp: i64| Point {
        measurement: MEASUREMENT.to_string(),
        tags: tags.clone(),
        fields,
        timestamp,
    };

    let mut points = Vec::new();
    let mut plain = BTreeMap::new();
    for (key, entry) in telemetry {
        match entry {
            Node::Number(n) => {
                if let Some(v) = n.as_f64() {
                    plain.insert(key.clone(), v);
                }
            }
            Node::Object(sample) => {
                let value = sample.get("value").and_then(Node::as_f64);
                let ts = sample.get("ts").and_then(Node::as_i64);
                if let (Some(value), Some(ts)) = (value, ts) {
                    points.push(point(BTreeMap::from([(key.clone(), value)]), ts));
                }
            }
            _ => {}
        }
    }
    if !plain.is_empty() {
        points.push(point(plain, entity.last_time));
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::repository::MemoryRepository;
    use crate::sink::{MemorySearch, MemoryTimeSeries};
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingSearch;

    #[async_trait]
    impl SearchIndex for FailingSearch {
        async fn index(&self, _id: &str, _document: &Node) -> Result<(), SinkError> {
            Err(SinkError("search offline".into()))
        }

        async fn delete(&self, _id: &str) -> Result<(), SinkError> {
            Err(SinkError("search offline".into()))
        }
    }

    fn device() -> Entity {
        let mut entity = Entity::new("device1")
            .with_type("device")
            .with_owner("admin")
            .with_source("dm");
        entity.version = 3;
        entity.last_time = 1_700_000_000_000;
        entity.properties.insert(
            TELEMETRY_PROPERTY.into(),
            json!({
                "temp": {"value": 21.5, "ts": 1_700_000_000_123_i64},
                "hum": 40,
                "label": "ignored"
            }),
        );
        entity
    }

    #[test]
    fn test_search_document() {
        let doc = search_document(&device());
        assert_eq!(doc["id"], json!("device1"));
        assert_eq!(doc["type"], json!("device"));
        assert_eq!(doc["version"], json!(3));
        assert_eq!(doc["last_time"], json!(1_700_000_000_000_i64));
        assert!(doc.get("telemetry").is_some());
    }

    #[test]
    fn test_series_points() {
        let points = series_points(&device());
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].fields["temp"], 21.5);
        assert_eq!(points[0].timestamp, 1_700_000_000_123);
        assert_eq!(points[1].fields["hum"], 40.0);
        assert_eq!(points[1].timestamp, 1_700_000_000_000);
        assert_eq!(points[0].measurement, MEASUREMENT);
        assert_eq!(points[0].tags["app"], "core");
        assert_eq!(points[0].tags["owner"], "admin");

        assert!(series_points(&Entity::new("bare")).is_empty());
    }

    #[tokio::test]
    async fn test_flush_writes_every_sink() {
        let repo = Arc::new(MemoryRepository::new());
        let search = Arc::new(MemorySearch::new());
        let series = Arc::new(MemoryTimeSeries::new());
        let sinks = FlushSinks::new(repo.clone(), search.clone(), series.clone());

        sinks.flush(&device()).await.unwrap();
        assert!(repo.get_entity("device1").await.unwrap().is_some());
        assert!(search.get("device1").is_some());
        assert_eq!(series.points().len(), 2);

        sinks.remove(&device()).await.unwrap();
        assert!(repo.get_entity("device1").await.unwrap().is_none());
        assert!(search.is_empty());
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_stop_others() {
        let repo = Arc::new(MemoryRepository::new());
        let series = Arc::new(MemoryTimeSeries::new());
        let sinks = FlushSinks::new(repo.clone(), Arc::new(FailingSearch), series.clone());

        let err = sinks.flush(&device()).await.unwrap_err();
        assert!(matches!(err, FlushError::Search(_)));
        assert!(repo.get_entity("device1").await.unwrap().is_some());
        assert_eq!(series.points().len(), 2);
    }
}
