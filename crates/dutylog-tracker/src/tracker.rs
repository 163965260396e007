//! Session tracker: turns activity events into accumulated time
//!
//! The tracker is what the host talks to. It gates events on subject
//! capabilities, drives the periodic reconciliation sweep, flushes live
//! sessions on shutdown and swaps storage backends on reload.

use dutylog_core::{
    Capability, Clock, LivenessCheck, OriginResolver, Result, SubjectDirectory, SubjectId,
    origin::warn_on_drift,
};
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::factory::create_handler;
use crate::handler::StorageHandler;
use crate::reconcile::ReconcileStats;
use crate::switch::HandlerSwitch;

pub struct SessionTracker {
    switch: Arc<HandlerSwitch>,
    config: RwLock<TrackerConfig>,
    directory: Arc<dyn SubjectDirectory>,
    liveness: Arc<dyn LivenessCheck>,
    origin: Arc<OriginResolver>,
    clock: Arc<dyn Clock>,
    shut_down: AtomicBool,
}

impl SessionTracker {
    /// Build the configured backend and a tracker over it
    pub async fn from_config(
        config: TrackerConfig,
        directory: Arc<dyn SubjectDirectory>,
        liveness: Arc<dyn LivenessCheck>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let origin = Arc::new(OriginResolver::with_policy(
            config.origin.clone(),
            warn_on_drift(),
        ));
        let handler = create_handler(&config, directory.clone(), origin.clone(), clock.clone()).await?;
        Ok(Self::new(config, handler, directory, liveness, origin, clock))
    }

    /// Tracker over an existing handler
    pub fn new(
        config: TrackerConfig,
        handler: Arc<StorageHandler>,
        directory: Arc<dyn SubjectDirectory>,
        liveness: Arc<dyn LivenessCheck>,
        origin: Arc<OriginResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            switch: Arc::new(HandlerSwitch::new(handler)),
            config: RwLock::new(config),
            directory,
            liveness,
            origin,
            clock,
            shut_down: AtomicBool::new(false),
        }
    }

    /// The active storage handler
    pub async fn handler(&self) -> Arc<StorageHandler> {
        self.switch.current().await
    }

    /// Shared slot holding the active handler, for jobs that outlive a reload
    pub fn switch(&self) -> &Arc<HandlerSwitch> {
        &self.switch
    }

    pub fn origin(&self) -> &Arc<OriginResolver> {
        &self.origin
    }

    pub async fn config(&self) -> TrackerConfig {
        self.config.read().await.clone()
    }

    /// Start background work for the active handler
    pub async fn start(&self) {
        let handler = self.handler().await;
        let config = self.config.read().await;
        self.start_reconciliation(&handler, &config).await;
    }

    async fn start_reconciliation(&self, handler: &Arc<StorageHandler>, config: &TrackerConfig) {
        if !config.reconciliation.enabled {
            info!("[{}] Periodic reconciliation disabled", handler.kind());
            return;
        }
        handler
            .start_periodic_reconciliation(self.liveness.clone(), config.reconciliation.interval())
            .await;
    }

    /// Subject came online; opens a session if the subject is tracked
    pub async fn on_activity_start(&self, subject_id: SubjectId, display_name: &str) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        if !self.has_capability(subject_id, Capability::TrackTime).await {
            return;
        }
        self.handler().await.open(subject_id, display_name).await;
    }

    /// Subject went offline
    pub async fn on_activity_end(&self, subject_id: SubjectId) {
        self.handler().await.close(subject_id).await;
    }

    /// A vote service reported a vote
    pub async fn on_vote(
        &self,
        subject_id: SubjectId,
        username: &str,
        service_name: &str,
        timestamp: &str,
    ) {
        if !self.config.read().await.track_votes {
            return;
        }
        if username.trim().is_empty() {
            debug!("Ignoring vote from {} with blank username", service_name);
            return;
        }
        if !self.has_capability(subject_id, Capability::TrackVotes).await {
            return;
        }
        self.handler()
            .await
            .record_vote(subject_id, username, service_name, timestamp)
            .await;
    }

    async fn has_capability(&self, subject_id: SubjectId, capability: Capability) -> bool {
        match self.directory.has_capability(subject_id, capability).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(
                    "{} lacks {}, not tracking",
                    subject_id,
                    capability.permission_node()
                );
                false
            }
            Err(e) => {
                warn!(
                    "Capability check {} failed for {}: {}",
                    capability.permission_node(),
                    subject_id,
                    e
                );
                false
            }
        }
    }

    /// Run one reconciliation sweep now
    pub async fn reconcile_now(&self) -> ReconcileStats {
        self.handler()
            .await
            .reconcile_once(self.liveness.as_ref())
            .await
    }

    /// Apply a new configuration, switching backends
    ///
    /// Live subjects keep their sessions in the old store's session table;
    /// callers flush them first when the database changes.
    pub async fn reload(&self, config: TrackerConfig) -> Result<()> {
        config
            .validate()
            .map_err(dutylog_core::Error::Config)?;

        let mut current_config = self.config.write().await;
        let handler = self
            .switch
            .replace(|| {
                create_handler(
                    &config,
                    self.directory.clone(),
                    self.origin.clone(),
                    self.clock.clone(),
                )
            })
            .await?;

        self.start_reconciliation(&handler, &config).await;
        *current_config = config;
        info!("[{}] Tracker configuration reloaded", handler.kind());
        Ok(())
    }

    /// Flush every live session within the configured deadline, then stop
    ///
    /// Sessions not flushed in time stay in the session table and are
    /// recovered by the first sweep after restart. Safe to call twice.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let handler = self.handler().await;
        let deadline = self.config.read().await.shutdown_timeout();
        let live = self.liveness.live_subjects().await;
        let count = live.len();

        let closes = join_all(live.into_iter().map(|id| {
            let handler = handler.clone();
            async move { handler.close(id).await }
        }));

        match tokio::time::timeout(deadline, closes).await {
            Ok(_) => info!(
                "[{}] Flushed {} live sessions on shutdown",
                handler.kind(),
                count
            ),
            Err(_) => warn!(
                "[{}] Shutdown deadline of {}s passed; unflushed sessions are left for reconciliation",
                handler.kind(),
                deadline.as_secs()
            ),
        }

        handler.shutdown().await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}
