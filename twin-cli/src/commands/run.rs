//! One-shot in-memory node: load mappers, feed messages, print entities.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use twin_runtime::actor::{HEADER_OWNER, HEADER_TYPE};
use twin_runtime::{
    Config, Dispatcher, Environment, FlushSinks, LoopbackFactory, ManagerBuilder, MemoryRepository, MemorySearch,
    MemoryTimeSeries, MessageContext, Placement, PropertyMessage, Repository,
};
use twin_tql::TqlEngine;
use twin_types::{MapperDef, PatchOperator, Properties};

pub struct RunOptions {
    pub mappers: PathBuf,
    pub input: PathBuf,
    pub timeout: Duration,
    pub mailbox_capacity: Option<usize>,
    pub pool_size: Option<usize>,
}

/// One line of the message file
#[derive(Debug, Deserialize)]
struct InputRecord {
    entity_id: String,
    #[serde(default)]
    owner: Option<String>,
    #[serde(rename = "type", default)]
    entity_type: Option<String>,
    #[serde(default)]
    operator: Option<String>,
    #[serde(default)]
    properties: Properties,
}

impl InputRecord {
    fn into_context(self) -> Result<MessageContext> {
        let operator = match self.operator.as_deref() {
            Some(op) => op.parse::<PatchOperator>()?,
            None => PatchOperator::default(),
        };
        let msg = PropertyMessage::new(self.properties).with_operator(operator);
        let mut ctx = MessageContext::property(self.entity_id, msg);
        if let Some(owner) = self.owner {
            ctx.headers.set(HEADER_OWNER, owner);
        }
        if let Some(entity_type) = self.entity_type {
            ctx.headers.set(HEADER_TYPE, entity_type);
        }
        Ok(ctx)
    }
}

fn load_config(path: Option<&Path>, opts: &RunOptions) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path).with_context(|| format!("load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(capacity) = opts.mailbox_capacity {
        config.actor.mailbox_capacity = capacity;
    }
    if let Some(size) = opts.pool_size {
        config.pool.size = size;
    }
    config.validate()?;
    Ok(config)
}

fn load_mappers(path: &Path) -> Result<Vec<MapperDef>> {
    let text = fs::read_to_string(path).with_context(|| format!("read mappers {}", path.display()))?;
    let defs: Vec<MapperDef> =
        serde_yaml::from_str(&text).with_context(|| format!("parse mappers {}", path.display()))?;
    Ok(defs)
}

fn load_input(path: &Path) -> Result<Vec<MessageContext>> {
    let text = fs::read_to_string(path).with_context(|| format!("read input {}", path.display()))?;
    let mut messages = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let ctx = serde_json::from_str::<InputRecord>(line)
            .map_err(anyhow::Error::from)
            .and_then(InputRecord::into_context)
            .with_context(|| format!("{}:{}", path.display(), lineno + 1))?;
        messages.push(ctx);
    }
    Ok(messages)
}

pub async fn run_node(config_path: Option<&Path>, opts: RunOptions) -> Result<()> {
    let config = load_config(config_path, &opts)?;
    let defs = load_mappers(&opts.mappers)?;
    let messages = load_input(&opts.input)?;

    let repository = Arc::new(MemoryRepository::new());
    let sinks = FlushSinks::new(
        repository.clone(),
        Arc::new(MemorySearch::new()),
        Arc::new(MemoryTimeSeries::new()),
    );
    let env = Arc::new(Environment::new(Arc::new(TqlEngine)));
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(Placement::new()), Arc::new(LoopbackFactory)));
    let manager = ManagerBuilder::new(config.clone(), env.clone(), repository.clone(), dispatcher.clone())
        .sinks(sinks)
        .build();

    dispatcher.set_consumer(manager.event_handler()).await?;
    dispatcher.load_queues(&config.queues).await?;
    for def in &defs {
        repository.put_mapper(def).await?;
    }
    manager.start().await?;
    let loaded = env.mapper_ids().len();
    if loaded < defs.len() {
        warn!(loaded, total = defs.len(), "some mappers failed to compile");
    }

    info!(messages = messages.len(), queues = config.queues.len(), "feed messages");
    for ctx in messages {
        manager.handle_message(ctx).await?;
    }

    if !manager.wait_idle(opts.timeout).await {
        bail!("node did not settle within {:?}", opts.timeout);
    }

    let entities = manager.entities().await?;
    println!("{}", serde_json::to_string_pretty(&entities)?);

    manager.shutdown(opts.timeout).await;
    dispatcher.close().await;
    info!(stats = ?manager.stats(), "node stopped");
    Ok(())
}
