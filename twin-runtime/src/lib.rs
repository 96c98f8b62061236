//! twin-runtime - entity actors and reactive property propagation
//!
//! Every managed thing (a device, a space, a user) is an *entity*: a JSON
//! property document owned by exactly one *actor*. Actors react to property
//! messages, and mappers written in TQL derive properties of one entity from
//! properties of others.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Manager                            │
//! │  (containers keyed by channel, actor creation, mapper watch) │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │   ┌──────────────┐   ┌──────────────┐                        │
//! │   │   Actor A    │   │   Actor B    │  ...                   │
//! │   │ ┌──────────┐ │   │ ┌──────────┐ │                        │
//! │   │ │ Mailbox  │ │   │ │ Mailbox  │ │     ┌───────────────┐  │
//! │   │ ├──────────┤ │   │ ├──────────┤ │ ◄── │  Environment  │  │
//! │   │ │  State   │ │   │ │  State   │ │     │ (mappers and  │  │
//! │   │ │ mappers  │ │   │ │ mappers  │ │     │  tentacles)   │  │
//! │   │ │tentacles │ │   │ │tentacles │ │     └───────────────┘  │
//! │   │ └──────────┘ │   │ └──────────┘ │                        │
//! │   └──────┬───────┘   └──────▲───────┘                        │
//! │          │ PropertyMessage  │                                │
//! │          ▼                  │                                │
//! │   ┌─────────────────────────┴──────┐    ┌────────────────┐   │
//! │   │ Dispatcher (placement, queues) │ ─► │ PubSub (queue) │   │
//! │   └────────────────────────────────┘    └────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Core Concepts
//!
//! ## Tentacles
//!
//! A **tentacle** is a subscription edge installed on a source entity. When
//! a watched property changes, the source actor either forwards the value to
//! the entity that needs it or runs a local mapper.
//!
//! ## Mappers
//!
//! A **mapper** is a compiled TQL rule `insert into T select ...`. It runs on
//! the actor of its target entity over the cached properties of its sources.
//! Propagation is one hop per message.
//!
//! ## Attach protocol
//!
//! At most one message loop runs per actor. See [`actor`] for the details.
//!
//! # Customization Points
//!
//! - `Repository`: entity, mapper and queue storage (default: `MemoryRepository`)
//! - `SearchIndex` / `TimeSeries`: flush sinks (default: in-memory)
//! - `PubSub` / `PubSubFactory`: transport (default: loopback)
//! - `MessageRouter`: where outbound messages go (default: `Dispatcher`)
//! - `MessageHandler`: how a message mutates the state (default: `PropertyHandler`)
//! - `TqlCompiler`: rule compiler (provided by `twin-tql`)
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use twin_runtime::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let repository = Arc::new(MemoryRepository::new());
//! let env = Arc::new(Environment::new(Arc::new(twin_tql::TqlEngine)));
//!
//! let dispatcher = Arc::new(Dispatcher::new(Arc::new(Placement::new()), Arc::new(LoopbackFactory)));
//! let manager = ManagerBuilder::new(config.clone(), env, repository.clone(), dispatcher.clone()).build();
//! dispatcher.set_consumer(manager.event_handler()).await?;
//! dispatcher.load_queues(&config.queues).await?;
//!
//! repository
//!     .put_mapper(&MapperDef::new("m1", "room", "insert into room select sensor.temp as temp"))
//!     .await?;
//! manager.start().await?;
//!
//! let properties = serde_json::json!({"temp": 21}).as_object().cloned().unwrap_or_default();
//! manager.handle_message(MessageContext::property("sensor", PropertyMessage::new(properties))).await?;
//! manager.wait_idle(Duration::from_secs(5)).await;
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod config;
pub mod dispatch;
pub mod environment;
pub mod error;
pub mod mailbox;
pub mod manager;
pub mod mapper;
pub mod patch;
pub mod placement;
pub mod pool;
pub mod pubsub;
pub mod repository;
pub mod sink;
pub mod stats;

pub use actor::{
    Actor, ActorContext, ActorState, CollectingRouter, FlushSinks, Headers, Message, MessageContext, MessageHandler,
    MessageRouter, NoopRouter, PropertyHandler, PropertyMessage,
};
pub use config::{ActorConfig, Config, PoolConfig};
pub use dispatch::Dispatcher;
pub use environment::{ActorEnv, Environment};
pub use error::{
    ActorError, ConfigError, DispatchError, FlushError, MailboxError, MapperError, PatchError, RepositoryError, Result,
    RuntimeError, SinkError,
};
pub use mailbox::Mailbox;
pub use manager::{Manager, ManagerBuilder};
pub use mapper::{Mapper, Tentacle, TentacleKind};
pub use placement::Placement;
pub use pool::WorkerPool;
pub use pubsub::{Event, EventHandler, LoopbackFactory, LoopbackPubSub, PubSub, PubSubFactory};
pub use repository::{MemoryRepository, Repository};
pub use sink::{MemorySearch, MemoryTimeSeries, NoopSink, Point, SearchIndex, TimeSeries};
pub use stats::{RuntimeStats, StatsSnapshot};

/// Everything needed to assemble a node
pub mod prelude {
    pub use crate::actor::{Message, MessageContext, MessageRouter, PropertyMessage};
    pub use crate::config::Config;
    pub use crate::dispatch::Dispatcher;
    pub use crate::environment::Environment;
    pub use crate::manager::{Manager, ManagerBuilder};
    pub use crate::placement::Placement;
    pub use crate::pubsub::LoopbackFactory;
    pub use crate::repository::{MemoryRepository, Repository};
    pub use twin_types::{Entity, MapperDef, QueueInfo, WatchKey};
}
