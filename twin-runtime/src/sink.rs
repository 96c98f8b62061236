//! Search and time-series sinks written by actor flushes

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use twin_types::Node;

use crate::error::SinkError;

/// Full-text/structured search index
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn index(&self, id: &str, document: &Node) -> Result<(), SinkError>;

    async fn delete(&self, id: &str) -> Result<(), SinkError>;
}

/// Telemetry store
#[async_trait]
pub trait TimeSeries: Send + Sync {
    async fn write(&self, points: &[Point]) -> Result<(), SinkError>;
}

/// One time-series sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, f64>,
    /// Milliseconds since the epoch
    pub timestamp: i64,
}

/// Search index kept in memory, last write wins per id
#[derive(Debug, Default)]
pub struct MemorySearch {
    documents: Mutex<HashMap<String, Node>>,
}

impl MemorySearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Node> {
        self.documents.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SearchIndex for MemorySearch {
    async fn index(&self, id: &str, document: &Node) -> Result<(), SinkError> {
        self.documents.lock().insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), SinkError> {
        self.documents.lock().remove(id);
        Ok(())
    }
}

/// Time-series store kept in memory, append only
#[derive(Debug, Default)]
pub struct MemoryTimeSeries {
    points: Mutex<Vec<Point>>,
}

impl MemoryTimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> Vec<Point> {
        self.points.lock().clone()
    }
}

#[async_trait]
impl TimeSeries for MemoryTimeSeries {
    async fn write(&self, points: &[Point]) -> Result<(), SinkError> {
        self.points.lock().extend_from_slice(points);
        Ok(())
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl SearchIndex for NoopSink {
    async fn index(&self, _id: &str, _document: &Node) -> Result<(), SinkError> {
        Ok(())
    }

    async fn delete(&self, _id: &str) -> Result<(), SinkError> {
        Ok(())
    }
}

#[async_trait]
impl TimeSeries for NoopSink {
    async fn write(&self, _points: &[Point]) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_search_overwrites() {
        let search = MemorySearch::new();
        search.index("a", &json!({"v": 1})).await.unwrap();
        search.index("a", &json!({"v": 2})).await.unwrap();
        assert_eq!(search.len(), 1);
        assert_eq!(search.get("a"), Some(json!({"v": 2})));
        search.delete("a").await.unwrap();
        assert!(search.is_empty());
    }

    #[tokio::test]
    async fn test_memory_time_series_appends() {
        let series = MemoryTimeSeries::new();
        let point = Point {
            measurement: "m".into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::from([("temp".to_string(), 1.0)]),
            timestamp: 1,
        };
        series.write(&[point.clone()]).await.unwrap();
        series.write(&[point]).await.unwrap();
        assert_eq!(series.points().len(), 2);
        NoopSink.write(&[]).await.unwrap();
    }
}
