//! Actor containers and the node-level message entry point

use dashmap::DashMap;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use twin_types::{Entity, MapperDef, WatchEvent};

use crate::actor::{Actor, ActorContext, FlushSinks, Headers, MessageContext, MessageHandler, MessageRouter};
use crate::config::Config;
use crate::dispatch;
use crate::environment::Environment;
use crate::error::{ActorError, DispatchError, MapperError, RepositoryError, RuntimeError};
use crate::pool::WorkerPool;
use crate::pubsub::{Event, EventHandler};
use crate::repository::Repository;
use crate::stats::{RuntimeStats, StatsSnapshot};

/// Consecutive idle polls required by [`Manager::wait_idle`]
const IDLE_POLLS: usize = 3;
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Actors of one channel
#[derive(Default)]
struct Container {
    actors: DashMap<String, Arc<Actor>>,
}

struct Inner {
    config: Config,
    env: Arc<Environment>,
    repository: Arc<dyn Repository>,
    actor_ctx: Arc<ActorContext>,
    pool: WorkerPool,
    containers: DashMap<String, Arc<Container>>,
    mapper_watch: Mutex<Option<JoinHandle<()>>>,
}

pub struct ManagerBuilder {
    config: Config,
    env: Arc<Environment>,
    repository: Arc<dyn Repository>,
    router: Arc<dyn MessageRouter>,
    sinks: Option<FlushSinks>,
    handler: Option<Arc<dyn MessageHandler>>,
    stats: Option<Arc<RuntimeStats>>,
}

impl ManagerBuilder {
    pub fn new(
        config: Config,
        env: Arc<Environment>,
        repository: Arc<dyn Repository>,
        router: Arc<dyn MessageRouter>,
    ) -> Self {
        Self {
            config,
            env,
            repository,
            router,
            sinks: None,
            handler: None,
            stats: None,
        }
    }

    /// Flush targets; the repository alone when unset
    pub fn sinks(mut self, sinks: FlushSinks) -> Self {
        self.sinks = Some(sinks);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn stats(mut self, stats: Arc<RuntimeStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn build(self) -> Manager {
        let sinks = self
            .sinks
            .unwrap_or_else(|| FlushSinks::state_only(self.repository.clone()));
        let mut actor_ctx = ActorContext::new(self.config.actor, self.router, sinks)
            .with_stats(self.stats.unwrap_or_default());
        if let Some(handler) = self.handler {
            actor_ctx = actor_ctx.with_handler(handler);
        }

        Manager {
            inner: Arc::new(Inner {
                pool: WorkerPool::new(self.config.pool.size),
                config: self.config,
                env: self.env,
                repository: self.repository,
                actor_ctx: Arc::new(actor_ctx),
                containers: DashMap::new(),
                mapper_watch: Mutex::new(None),
            }),
        }
    }
}

/// Owns every live actor of a node
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

impl Manager {
    pub fn env(&self) -> &Arc<Environment> {
        &self.inner.env
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.actor_ctx.stats.snapshot()
    }

    /// Load the stored mappers and follow their changes.
    ///
    /// The watch is subscribed before the initial range so no change is
    /// missed; a definition seen twice installs to the same result.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        let mut watch = self.inner.repository.watch_mappers();
        let defs = self.inner.repository.range_mappers().await?;
        let loaded = self.inner.env.store_mappers(&defs);
        info!(total = defs.len(), loaded = loaded.len(), "load mappers");

        let inner = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            loop {
                let event = match watch.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "mapper watch lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                // Errors are already logged by the environment.
                let _ = Manager { inner }.on_mapper_changed(&event);
            }
            debug!("mapper watch stopped");
        });

        if let Some(previous) = self.inner.mapper_watch.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Apply a mapper change and reload the affected actors
    pub fn on_mapper_changed(&self, event: &WatchEvent<MapperDef>) -> Result<Vec<String>, MapperError> {
        let effects = self.inner.env.on_mapper_changed(event)?;
        self.reload_actors(&effects);
        Ok(effects)
    }

    /// Inject a fresh environment copy into each live actor of `entity_ids`
    pub fn reload_actors(&self, entity_ids: &[String]) {
        for container in self.inner.containers.iter() {
            for id in entity_ids {
                if let Some(actor) = container.actors.get(id) {
                    actor.reload_env(&self.inner.env);
                    debug!(entity_id = %id, channel = %container.key(), "reload actor environment");
                }
            }
        }
    }

    /// Deliver a message to its target actor, creating the actor on demand
    pub async fn handle_message(&self, ctx: MessageContext) -> Result<(), RuntimeError> {
        let target = ctx.target().ok_or(ActorError::MissingTarget)?.to_string();
        let channel = ctx
            .headers
            .channel()
            .unwrap_or(&self.inner.config.default_channel)
            .to_string();

        let actor = self.load_or_create(&channel, &target, &ctx.headers).await?;
        match actor.on_message(ctx).await {
            Ok(true) => {
                self.schedule(actor);
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(err) => {
                self.evict(&actor);
                Err(err.into())
            }
        }
    }

    async fn load_or_create(&self, channel: &str, id: &str, headers: &Headers) -> Result<Arc<Actor>, RuntimeError> {
        let container = self
            .inner
            .containers
            .entry(channel.to_string())
            .or_default()
            .clone();
        let live = container.actors.get(id).map(|actor| actor.clone());
        if let Some(actor) = live {
            if !actor.is_deleted() {
                return Ok(actor);
            }
            self.evict(&actor);
        }

        let entity = match self.inner.repository.get_entity(id).await? {
            Some(entity) => {
                debug!(entity_id = %id, version = entity.version, "load entity");
                entity
            }
            None => {
                info!(entity_id = %id, channel = %channel, "create entity");
                Entity::new(id)
                    .with_owner(headers.owner().unwrap_or_default())
                    .with_type(headers.entity_type().unwrap_or_default())
                    .with_source(headers.source().unwrap_or_default())
            }
        };

        let created = Arc::new(Actor::new(entity, channel, self.inner.actor_ctx.clone()));
        created.with_context(self.inner.env.get_actor_env(id));
        // A concurrent creator may have won while the repository was read.
        let actor = container.actors.entry(id.to_string()).or_insert(created.clone()).clone();
        if Arc::ptr_eq(&actor, &created) {
            // Mapper changes applied before the insert could not reach it.
            actor.reload_env(&self.inner.env);
        }
        Ok(actor)
    }

    fn schedule(&self, actor: Arc<Actor>) {
        RuntimeStats::incr(&self.inner.actor_ctx.stats.loops_scheduled);
        let manager = self.clone();
        let rejected = actor.clone();
        self.inner.pool.submit_or(
            async move {
                if AssertUnwindSafe(actor.handle_loop()).catch_unwind().await.is_err() {
                    error!(entity_id = %actor.id(), "actor loop panicked");
                    actor.force_detach();
                    if actor.reattach_pending() {
                        manager.schedule(actor.clone());
                    }
                }
                if actor.is_deleted() {
                    manager.evict(&actor);
                }
            },
            move || {
                warn!(
                    entity_id = %rejected.id(),
                    pending = rejected.mailbox_size(),
                    "worker pool closed; actor loop dropped"
                );
                rejected.force_detach();
            },
        );
    }

    fn evict(&self, actor: &Arc<Actor>) {
        if let Some(container) = self.inner.containers.get(actor.channel()) {
            if container
                .actors
                .remove_if(actor.id(), |_, live| Arc::ptr_eq(live, actor))
                .is_some()
            {
                info!(entity_id = %actor.id(), channel = %actor.channel(), "evict actor");
            }
        }
    }

    /// Adapter for inbound pub/sub events
    pub fn event_handler(&self) -> EventHandler {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        Arc::new(move |event: Event| {
            let inner = inner.clone();
            async move {
                let inner = inner
                    .upgrade()
                    .ok_or_else(|| DispatchError::Delivery("manager stopped".to_string()))?;
                RuntimeStats::incr(&inner.actor_ctx.stats.events_received);
                let ctx = dispatch::decode(&event)?;
                Manager { inner }
                    .handle_message(ctx)
                    .await
                    .map_err(|err| DispatchError::Delivery(err.to_string()))
            }
            .boxed()
        })
    }

    /// Live actor for `id` in any channel
    pub fn actor(&self, id: &str) -> Option<Arc<Actor>> {
        self.inner
            .containers
            .iter()
            .find_map(|container| container.actors.get(id).map(|a| a.clone()))
    }

    pub fn actor_count(&self) -> usize {
        self.inner.containers.iter().map(|c| c.actors.len()).sum()
    }

    /// Current document of `id`: the live actor first, then the repository
    pub async fn entity(&self, id: &str) -> Result<Option<Entity>, RepositoryError> {
        match self.actor(id) {
            Some(actor) if !actor.is_deleted() => Ok(Some(actor.snapshot())),
            Some(_) => Ok(None),
            None => self.inner.repository.get_entity(id).await,
        }
    }

    /// Every known entity ordered by id, live documents taking precedence
    pub async fn entities(&self) -> Result<Vec<Entity>, RepositoryError> {
        let mut all: BTreeMap<String, Entity> = self
            .inner
            .repository
            .range_entities()
            .await?
            .into_iter()
            .map(|entity| (entity.id.clone(), entity))
            .collect();
        for actor in self.live_actors() {
            if actor.is_deleted() {
                all.remove(actor.id());
            } else {
                all.insert(actor.id().to_string(), actor.snapshot());
            }
        }
        Ok(all.into_values().collect())
    }

    fn live_actors(&self) -> Vec<Arc<Actor>> {
        self.inner
            .containers
            .iter()
            .flat_map(|container| {
                container
                    .actors
                    .iter()
                    .map(|a| a.value().clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn is_idle(&self) -> bool {
        self.stats().is_drained()
            && self.inner.actor_ctx.router.pending() == 0
            && self.live_actors().iter().all(|actor| !actor.is_attached())
    }

    /// Wait until every mailbox, loop and transport is quiet.
    ///
    /// Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let quiesce = async {
            let mut quiet = 0;
            while quiet < IDLE_POLLS {
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                quiet = if self.is_idle() { quiet + 1 } else { 0 };
            }
        };
        tokio::time::timeout(timeout, quiesce).await.is_ok()
    }

    /// Flush every live actor; returns the number of failures
    pub async fn flush_all(&self) -> usize {
        let mut failures = 0;
        for actor in self.live_actors() {
            if actor.is_deleted() {
                continue;
            }
            if let Err(err) = actor.flush().await {
                error!(entity_id = %actor.id(), error = %err, "flush state properties");
                failures += 1;
            }
        }
        failures
    }

    /// Stop watching, drain, flush and close the pool.
    ///
    /// Returns whether the node became idle within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        if let Some(watch) = self.inner.mapper_watch.lock().take() {
            watch.abort();
        }
        let idle = self.wait_idle(timeout).await;
        if !idle {
            warn!(stats = ?self.stats(), "shutdown before the node became idle");
        }
        let failures = self.flush_all().await;
        self.inner.pool.close();
        info!(actors = self.actor_count(), failures, "manager stopped");
        idle
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("channels", &self.inner.containers.len())
            .field("actors", &self.actor_count())
            .field("pool", &self.inner.pool)
            .finish()
    }
}
