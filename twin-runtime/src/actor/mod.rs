//! Entity actors
//!
//! This module provides the per-entity state machine:
//! - `Actor`: mailbox, attach flag and serialized message loop
//! - `ActorState`: the entity document, cached foreign properties and the
//!   loaded mapper/tentacle index
//! - `MessageHandler`: turns a message into changed watch keys
//! - `MessageRouter`: delivers messages emitted for other entities
//!
//! # Attach protocol
//!
//! Producers call [`Actor::on_message`], which enqueues and then tries the
//! Detached→Attached transition. Only the caller that wins the transition
//! schedules [`Actor::handle_loop`]; the loop performs Attached→Detached
//! itself once the mailbox stays empty. At most one loop therefore runs per
//! actor at any time.

mod activation;
mod flush;
mod message;
mod router;
mod state;

pub use activation::{Activation, MapperRun};
pub use flush::{search_document, series_points, FlushSinks, MEASUREMENT, TELEMETRY_PROPERTY};
pub use message::{
    Headers, Message, MessageContext, PropertyMessage, HEADER_CHANNEL, HEADER_OWNER, HEADER_PARTITION,
    HEADER_SENDER, HEADER_SOURCE, HEADER_TARGET, HEADER_TYPE,
};
pub use router::{CollectingRouter, MessageRouter, NoopRouter};
pub use state::{ActorState, MessageHandler, PropertyHandler};

use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use twin_types::{Entity, EntityStatus, Properties};

use crate::config::ActorConfig;
use crate::environment::{ActorEnv, Environment};
use crate::error::{ActorError, FlushError};
use crate::mailbox::Mailbox;
use crate::stats::RuntimeStats;

const DETACHED: u8 = 0;
const ATTACHED: u8 = 1;

/// Collaborators shared by every actor of a node
pub struct ActorContext {
    pub config: ActorConfig,
    pub router: Arc<dyn MessageRouter>,
    pub sinks: FlushSinks,
    pub handler: Arc<dyn MessageHandler>,
    pub stats: Arc<RuntimeStats>,
}

impl ActorContext {
    pub fn new(config: ActorConfig, router: Arc<dyn MessageRouter>, sinks: FlushSinks) -> Self {
        Self {
            config,
            router,
            sinks,
            handler: Arc::new(PropertyHandler),
            stats: Arc::new(RuntimeStats::new()),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_stats(mut self, stats: Arc<RuntimeStats>) -> Self {
        self.stats = stats;
        self
    }
}

/// The live actor of one entity
pub struct Actor {
    id: String,
    /// Container the actor lives in
    channel: String,
    attached: AtomicU8,
    status: AtomicU8,
    /// Messages consumed, for periodic flushes
    consumed: AtomicUsize,
    mailbox: Mailbox<MessageContext>,
    state: Mutex<ActorState>,
    ctx: Arc<ActorContext>,
}

impl Actor {
    pub fn new(entity: Entity, channel: impl Into<String>, ctx: Arc<ActorContext>) -> Self {
        Self {
            id: entity.id.clone(),
            channel: channel.into(),
            attached: AtomicU8::new(DETACHED),
            status: AtomicU8::new(EntityStatus::Active.as_u8()),
            consumed: AtomicUsize::new(0),
            mailbox: Mailbox::new(ctx.config.mailbox_capacity),
            state: Mutex::new(ActorState::new(entity)),
            ctx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn status(&self) -> EntityStatus {
        EntityStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_deleted(&self) -> bool {
        self.status() == EntityStatus::Deleted
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire) == ATTACHED
    }

    /// Clear the attach flag of a loop that did not finish
    pub(crate) fn force_detach(&self) {
        self.attached.store(DETACHED, Ordering::Release);
    }

    /// Attach again when messages are waiting; `true` means the caller must
    /// schedule [`handle_loop`](Self::handle_loop).
    pub(crate) fn reattach_pending(&self) -> bool {
        !self.mailbox.is_empty()
            && self
                .attached
                .compare_exchange(DETACHED, ATTACHED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    pub fn mailbox_size(&self) -> usize {
        self.mailbox.size()
    }

    /// Copy of the current entity document
    pub fn snapshot(&self) -> Entity {
        self.state.lock().entity().clone()
    }

    /// Run `f` against the state; for inspection only
    pub fn with_state<R>(&self, f: impl FnOnce(&ActorState) -> R) -> R {
        f(&self.state.lock())
    }

    /// Replace the loaded mappers and tentacles
    pub fn with_context(&self, env: ActorEnv) {
        self.state.lock().load_env(env);
    }

    /// Load the current mappers of this entity from `env`.
    ///
    /// The environment is read under the state lock, so of two concurrent
    /// reloads the later one installs the newer index.
    pub fn reload_env(&self, env: &Environment) {
        let mut state = self.state.lock();
        state.load_env(env.get_actor_env(&self.id));
    }

    /// Enqueue `ctx`; returns `true` when the caller must schedule
    /// [`handle_loop`](Self::handle_loop).
    ///
    /// A full mailbox is retried after yielding to the scheduler.
    pub async fn on_message(&self, ctx: MessageContext) -> Result<bool, ActorError> {
        if self.is_deleted() {
            RuntimeStats::incr(&self.ctx.stats.messages_rejected);
            return Err(ActorError::Deleted(self.id.clone()));
        }

        let mut pending = ctx;
        loop {
            match self.mailbox.put(pending) {
                Ok(()) => break,
                Err(overflow) => {
                    pending = overflow.into_inner();
                    tokio::task::yield_now().await;
                }
            }
        }
        RuntimeStats::incr(&self.ctx.stats.messages_enqueued);

        Ok(self
            .attached
            .compare_exchange(DETACHED, ATTACHED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok())
    }

    /// Drain the mailbox; must only run after winning the attach transition.
    pub async fn handle_loop(&self) {
        let retries = self.ctx.config.ensure_consume_retries;
        let flush_period = self.ctx.config.flush_period.max(1);
        let mut ensure = retries;
        debug!(entity_id = %self.id, "actor attached");

        loop {
            let Some(ctx) = self.mailbox.get() else {
                if ensure > 0 {
                    ensure -= 1;
                    tokio::task::yield_now().await;
                    continue;
                }

                if !self.is_deleted() {
                    if let Err(err) = self.flush().await {
                        error!(entity_id = %self.id, error = %err, "flush state properties");
                    }
                }

                if self
                    .attached
                    .compare_exchange(ATTACHED, DETACHED, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    error!(entity_id = %self.id, "mismatched actor runtime status");
                }

                // A producer may have enqueued after the last poll but before
                // the detach; take the loop back instead of stranding it.
                if !self.mailbox.is_empty()
                    && self
                        .attached
                        .compare_exchange(DETACHED, ATTACHED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    debug!(entity_id = %self.id, "reattach for late message");
                    ensure = retries;
                    continue;
                }
                break;
            };

            if AssertUnwindSafe(self.process(ctx)).catch_unwind().await.is_err() {
                error!(entity_id = %self.id, "message handling panicked");
                RuntimeStats::incr(&self.ctx.stats.messages_dropped);
            }
            ensure = retries;

            let consumed = self.consumed.fetch_add(1, Ordering::Relaxed) + 1;
            if consumed % flush_period == 0 && !self.is_deleted() {
                if let Err(err) = self.flush().await {
                    error!(entity_id = %self.id, error = %err, "flush state properties");
                }
            }
        }

        debug!(entity_id = %self.id, "actor detached");
    }

    /// Write the current document to every sink
    pub async fn flush(&self) -> Result<(), FlushError> {
        let entity = self.snapshot();
        let result = self.ctx.sinks.flush(&entity).await;
        RuntimeStats::incr(&self.ctx.stats.flushes);
        if result.is_err() {
            RuntimeStats::incr(&self.ctx.stats.flush_failures);
        }
        result
    }

    async fn process(&self, ctx: MessageContext) {
        let MessageContext {
            headers,
            message,
            promise,
        } = ctx;

        if self.is_deleted() {
            warn!(entity_id = %self.id, sender = ?headers.sender(), "drop message for deleted entity");
            RuntimeStats::incr(&self.ctx.stats.messages_dropped);
            return;
        }

        let snapshot = match message {
            Message::Delete => Some(self.delete().await),
            message => self.apply(&headers, &message, promise.is_some()).await,
        };
        RuntimeStats::incr(&self.ctx.stats.messages_handled);

        if let (Some(tx), Some(entity)) = (promise, snapshot) {
            // The requester may have stopped waiting.
            let _ = tx.send(entity);
        }
    }

    async fn apply(&self, headers: &Headers, message: &Message, want_snapshot: bool) -> Option<Entity> {
        let (outbound, snapshot) = {
            let mut state = self.state.lock();
            let keys = match self.ctx.handler.handle(&mut state, message) {
                Ok(keys) => keys,
                Err(err) => {
                    error!(entity_id = %self.id, sender = ?headers.sender(), error = %err, "handle message");
                    Vec::new()
                }
            };

            let activation = state.activate(&keys);
            let run = state.run_mappers(&activation.mappers);
            RuntimeStats::add(&self.ctx.stats.mapper_execs, run.executed);
            RuntimeStats::add(&self.ctx.stats.mapper_failures, run.failed);

            let outbound = self.outbound(state.entity(), activation.messages);
            (outbound, want_snapshot.then(|| state.entity().clone()))
        };

        for ctx in outbound {
            let target = ctx.target().unwrap_or_default().to_string();
            if let Err(err) = self.ctx.router.route(ctx).await {
                error!(entity_id = %self.id, target = %target, error = %err, "route property message");
            }
        }

        if matches!(message, Message::Flush(_)) {
            if let Err(err) = self.flush().await {
                error!(entity_id = %self.id, error = %err, "flush state properties");
            }
        }
        snapshot
    }

    /// One property message per target entity
    fn outbound(&self, entity: &Entity, messages: BTreeMap<String, Properties>) -> Vec<MessageContext> {
        messages
            .into_iter()
            .map(|(target, properties)| {
                let headers = Headers::new()
                    .with(HEADER_SENDER, entity.id.as_str())
                    .with(HEADER_TARGET, target)
                    .with(HEADER_TYPE, entity.entity_type.as_str())
                    .with(HEADER_OWNER, entity.owner.as_str())
                    .with(HEADER_SOURCE, entity.source.as_str())
                    .with(HEADER_CHANNEL, self.channel.as_str());
                let msg = PropertyMessage::new(properties).with_state_id(entity.id.as_str());
                MessageContext::new(headers, Message::Property(msg))
            })
            .collect()
    }

    async fn delete(&self) -> Entity {
        self.status
            .store(EntityStatus::Deleted.as_u8(), Ordering::Release);
        let entity = self.snapshot();
        info!(entity_id = %self.id, "delete entity");

        if let Err(err) = self.ctx.sinks.remove(&entity).await {
            error!(entity_id = %self.id, error = %err, "remove entity");
        }

        let mut dropped = 0;
        while self.mailbox.get().is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(entity_id = %self.id, dropped, "drop queued messages of deleted entity");
            RuntimeStats::add(&self.ctx.stats.messages_dropped, dropped);
        }
        entity
    }
}

impl std::fmt::Debug for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("status", &self.status())
            .field("attached", &self.is_attached())
            .field("mailbox", &self.mailbox)
            .finish()
    }
}
