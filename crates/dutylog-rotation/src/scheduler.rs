//! Rotation scheduler and operator exports
//!
//! A background task polls on a fixed interval. When the cadence says the
//! current day is a rotation day, the scheduler snapshots every tracked
//! subject, renders a report, hands it to the sinks and, once at least one
//! sink accepted it, optionally wipes the totals.

use chrono::NaiveDate;
use dutylog_core::{Capability, Clock, Error, Result, SubjectDirectory, SubjectId};
use dutylog_tracker::{HandlerSwitch, StorageHandler};
use futures::future::join_all;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::RotationConfig;
use crate::report::{ReportKind, SubjectReport, render_report, report_file_name};
use crate::sink::{ExportSink, FileSink};

/// A sink that accepted a report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub sink: String,
    pub locator: Option<String>,
}

/// What an export produced
#[derive(Debug, Clone, Default)]
pub struct ExportOutcome {
    pub file_name: String,
    pub subjects_exported: usize,
    /// Subjects left out because a lookup failed or no name resolved
    pub subjects_skipped: usize,
    pub delivered: Vec<Delivery>,
    pub failed_sinks: Vec<String>,
    pub wiped: bool,
}

enum Collected {
    Report(SubjectReport),
    /// Subject no longer holds the time-tracking capability
    Untracked,
    Skipped,
}

pub struct RotationScheduler {
    config: RotationConfig,
    switch: Arc<HandlerSwitch>,
    directory: Arc<dyn SubjectDirectory>,
    clock: Arc<dyn Clock>,
    staging: FileSink,
    sinks: Vec<Arc<dyn ExportSink>>,
    include_votes: bool,
    last_run: Mutex<Option<NaiveDate>>,
    task: Mutex<Option<RotationTask>>,
}

impl RotationScheduler {
    pub fn new(
        config: RotationConfig,
        switch: Arc<HandlerSwitch>,
        directory: Arc<dyn SubjectDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let staging = FileSink::new(config.export_folder.clone());
        Self {
            config,
            switch,
            directory,
            clock,
            staging,
            sinks: Vec::new(),
            include_votes: false,
            last_run: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Deliver reports to `sink` as well
    pub fn with_sink(mut self, sink: Arc<dyn ExportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Report vote counts for subjects allowed to collect votes
    pub fn with_votes(mut self, include_votes: bool) -> Self {
        self.include_votes = include_votes;
        self
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Start polling; does nothing when rotation is disabled
    pub async fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            info!("Rotation disabled");
            return;
        }

        let task = spawn_rotation_task(Arc::downgrade(self));
        let previous = self.task.lock().await.replace(task);
        if let Some(previous) = previous {
            previous.shutdown().await;
        }
    }

    pub async fn stop(&self) {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            task.shutdown().await;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }

    /// Run the rotation if today is due and it has not run today
    ///
    /// A day whose rotation could not start because the backend was
    /// unreachable stays eligible for a later poll.
    pub async fn poll(&self) -> Option<ExportOutcome> {
        let today = self.clock.now_local().date_naive();
        if !self.config.frequency.is_due(self.config.start_day, today) {
            return None;
        }

        let mut last_run = self.last_run.lock().await;
        if *last_run == Some(today) {
            return None;
        }

        match self.run_rotation().await {
            Ok(outcome) => {
                *last_run = Some(today);
                Some(outcome)
            }
            Err(Error::Database(e)) => {
                error!("[Rotation] Not started: {}", e);
                None
            }
            Err(e) => {
                *last_run = Some(today);
                error!("[Rotation] Failed: {}", e);
                None
            }
        }
    }

    /// Export, deliver and, if configured, wipe
    pub async fn run_rotation(&self) -> Result<ExportOutcome> {
        debug!("[Rotation] Starting export");
        self.export(ReportKind::Rotation).await
    }

    /// Operator-triggered export; keeps the local copy and never wipes
    pub async fn export_now(&self) -> Result<ExportOutcome> {
        self.export(ReportKind::Manual).await
    }

    async fn export(&self, kind: ReportKind) -> Result<ExportOutcome> {
        let handler = self.switch.current().await;
        if !handler.is_available().await {
            return Err(Error::Database(format!(
                "{} backend unreachable",
                handler.kind()
            )));
        }

        let generated_at = self.clock.now_local();
        let (subjects, skipped) = self.collect(&handler).await;
        let contents = render_report(&self.config.header, kind, generated_at, &subjects);
        let prefix = match kind {
            ReportKind::Rotation => self.config.file_prefix.as_str(),
            ReportKind::Manual => kind.file_prefix(),
        };
        let file_name = report_file_name(prefix, generated_at);

        let mut outcome = ExportOutcome {
            file_name: file_name.clone(),
            subjects_exported: subjects.len(),
            subjects_skipped: skipped,
            ..Default::default()
        };

        // The file sink always stages the report
        let keep_local = kind == ReportKind::Manual || self.config.save_local;
        let staged = match self.staging.deliver(&file_name, &contents).await {
            Ok(locator) => {
                if keep_local {
                    outcome.delivered.push(Delivery {
                        sink: self.staging.name().to_string(),
                        locator,
                    });
                }
                true
            }
            Err(e) => {
                warn!("[Rotation] Could not write {}: {}", file_name, e);
                if keep_local {
                    outcome.failed_sinks.push(self.staging.name().to_string());
                }
                false
            }
        };

        for sink in &self.sinks {
            match sink.deliver(&file_name, &contents).await {
                Ok(locator) => outcome.delivered.push(Delivery {
                    sink: sink.name().to_string(),
                    locator,
                }),
                Err(e) => {
                    warn!("[Rotation] Sink {} failed: {}", sink.name(), e);
                    outcome.failed_sinks.push(sink.name().to_string());
                }
            }
        }

        if staged && !keep_local {
            match self.staging.remove(&file_name).await {
                Ok(()) => debug!("[Rotation] Temporary export file removed"),
                Err(e) => warn!("[Rotation] Could not remove {}: {}", file_name, e),
            }
        }

        if outcome.delivered.is_empty() {
            return Err(Error::Sink(format!("no sink accepted {}", file_name)));
        }

        if kind == ReportKind::Rotation && self.config.clean_after_export {
            outcome.wiped = handler.wipe().await;
        }

        info!(
            "[Rotation] Exported {} subjects ({} skipped) to {} sink(s){}",
            outcome.subjects_exported,
            outcome.subjects_skipped,
            outcome.delivered.len(),
            if outcome.wiped { ", totals wiped" } else { "" }
        );
        Ok(outcome)
    }

    /// Resolve every tracked subject in batches; returns reports and the skip count
    async fn collect(&self, handler: &StorageHandler) -> (Vec<SubjectReport>, usize) {
        let subjects: Vec<SubjectId> = handler.all_tracked_subjects().await.into_iter().collect();
        debug!("[Rotation] {} tracked subjects", subjects.len());

        let mut reports = Vec::with_capacity(subjects.len());
        let mut skipped = 0;
        for (index, batch) in subjects.chunks(self.config.batch_size.max(1)).enumerate() {
            debug!(
                "[Rotation] Processing batch {} ({} subjects)",
                index + 1,
                batch.len()
            );
            let results = join_all(batch.iter().map(|id| self.collect_subject(handler, *id))).await;
            for result in results {
                match result {
                    Collected::Report(report) => reports.push(report),
                    Collected::Untracked => {}
                    Collected::Skipped => skipped += 1,
                }
            }
        }
        (reports, skipped)
    }

    async fn collect_subject(&self, handler: &StorageHandler, subject_id: SubjectId) -> Collected {
        match self
            .directory
            .has_capability(subject_id, Capability::TrackTime)
            .await
        {
            Ok(true) => {}
            Ok(false) => return Collected::Untracked,
            Err(e) => {
                warn!("[Rotation] Skipping {}: {}", subject_id, e);
                return Collected::Skipped;
            }
        }

        let live_name = match self.directory.display_name(subject_id).await {
            Ok(name) => name.filter(|n| !n.trim().is_empty()),
            Err(e) => {
                warn!("[Rotation] Skipping {}: {}", subject_id, e);
                return Collected::Skipped;
            }
        };
        let display_name = match live_name {
            Some(name) => name,
            None => match handler.last_known_name(subject_id).await {
                Some(name) => name,
                None => {
                    warn!("[Rotation] Skipping {}: no display name", subject_id);
                    return Collected::Skipped;
                }
            },
        };

        let by_origin = handler.duration_by_origin(subject_id).await;
        let total_duration_ms = by_origin.values().sum();

        let votes = if self.include_votes {
            match self
                .directory
                .has_capability(subject_id, Capability::TrackVotes)
                .await
            {
                Ok(true) => Some(handler.total_votes(subject_id).await),
                Ok(false) => None,
                Err(e) => {
                    debug!("[Rotation] Vote capability check failed for {}: {}", subject_id, e);
                    None
                }
            }
        } else {
            None
        };

        Collected::Report(SubjectReport {
            display_name,
            total_duration_ms,
            votes,
            by_origin,
        })
    }
}

/// Handle for the background polling task
pub struct RotationTask {
    shutdown_tx: tokio::sync::mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl RotationTask {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            error!("Rotation task ended abnormally: {}", e);
        }
    }
}

fn spawn_rotation_task(scheduler: Weak<RotationScheduler>) -> RotationTask {
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    let handle = tokio::spawn(async move {
        let Some(interval) = scheduler.upgrade().map(|s| s.config.poll_interval()) else {
            return;
        };
        info!(
            "Starting rotation task (poll interval: {}s)",
            interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Rotation task shutting down");
                    break;
                }
                _ = sleep(interval) => {
                    let Some(scheduler) = scheduler.upgrade() else {
                        break;
                    };
                    scheduler.poll().await;
                }
            }
        }
    });

    RotationTask {
        shutdown_tx,
        handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Local, TimeZone};
    use dutylog_core::{ManualClock, OriginResolver, StorageBackend, VoteRecord};
    use dutylog_storage_sqlite::SqliteBackend;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeDirectory {
        names: StdMutex<HashMap<SubjectId, String>>,
        failing: StdMutex<HashSet<SubjectId>>,
        untracked: StdMutex<HashSet<SubjectId>>,
    }

    #[async_trait]
    impl SubjectDirectory for FakeDirectory {
        async fn display_name(&self, subject_id: SubjectId) -> Result<Option<String>> {
            if self.failing.lock().unwrap().contains(&subject_id) {
                return Err(Error::Directory("lookup timed out".to_string()));
            }
            Ok(self.names.lock().unwrap().get(&subject_id).cloned())
        }

        async fn has_capability(
            &self,
            subject_id: SubjectId,
            capability: Capability,
        ) -> Result<bool> {
            if capability == Capability::TrackTime
                && self.untracked.lock().unwrap().contains(&subject_id)
            {
                return Ok(false);
            }
            Ok(true)
        }
    }

    struct RecordingSink {
        fail: bool,
        received: StdMutex<Vec<(String, String)>>,
    }

    impl RecordingSink {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail,
                received: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ExportSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn deliver(&self, file_name: &str, contents: &str) -> Result<Option<String>> {
            if self.fail {
                return Err(Error::Sink("upload refused".to_string()));
            }
            self.received
                .lock()
                .unwrap()
                .push((file_name.to_string(), contents.to_string()));
            Ok(Some(format!("memory://{}", file_name)))
        }
    }

    struct Fixture {
        backend: Arc<SqliteBackend>,
        handler: Arc<StorageHandler>,
        directory: Arc<FakeDirectory>,
        clock: Arc<ManualClock>,
        temp_dir: TempDir,
    }

    impl Fixture {
        fn scheduler(&self, config: RotationConfig) -> RotationScheduler {
            RotationScheduler::new(
                RotationConfig {
                    export_folder: self.temp_dir.path().join("exports"),
                    ..config
                },
                Arc::new(HandlerSwitch::new(self.handler.clone())),
                self.directory.clone(),
                self.clock.clone(),
            )
        }

        async fn track(&self, name: &str, origin: &str, duration_ms: i64) -> SubjectId {
            let id = SubjectId::new();
            self.directory
                .names
                .lock()
                .unwrap()
                .insert(id, name.to_string());
            self.backend
                .add_duration(id, name, origin, duration_ms)
                .await
                .unwrap();
            id
        }

        fn exported_files(&self) -> Vec<String> {
            match std::fs::read_dir(self.temp_dir.path().join("exports")) {
                Ok(entries) => entries
                    .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                    .collect(),
                Err(_) => Vec::new(),
            }
        }
    }

    /// 2024-03-01 12:00 local, a Friday
    fn rotation_day_millis() -> i64 {
        Local
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .unwrap()
            .timestamp_millis()
    }

    async fn fixture() -> Fixture {
        let backend = Arc::new(SqliteBackend::in_memory().await.unwrap());
        let directory = Arc::new(FakeDirectory::default());
        let clock = Arc::new(ManualClock::new(rotation_day_millis()));
        let handler = Arc::new(StorageHandler::new(
            backend.clone(),
            directory.clone(),
            Arc::new(OriginResolver::fixed("Hub")),
            clock.clone(),
        ));
        Fixture {
            backend,
            handler,
            directory,
            clock,
            temp_dir: TempDir::new().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_export_survives_one_failing_lookup() {
        let f = fixture().await;
        let mut ids = Vec::new();
        for i in 0..50 {
            ids.push(f.track(&format!("Staff{:02}", i), "Hub", 60_000).await);
        }
        f.directory.failing.lock().unwrap().insert(ids[17]);

        let sink = RecordingSink::new(false);
        let scheduler = f
            .scheduler(RotationConfig {
                batch_size: 8,
                ..Default::default()
            })
            .with_sink(sink.clone());

        let outcome = scheduler.export_now().await.unwrap();
        assert_eq!(outcome.subjects_exported, 49);
        assert_eq!(outcome.subjects_skipped, 1);
        assert!(!outcome.wiped);

        let received = sink.received.lock().unwrap();
        let (file_name, contents) = &received[0];
        assert!(file_name.starts_with("staff_activity_03_01_2024_12_00"));
        assert_eq!(contents.lines().count(), 49);
        assert!(!contents.contains("Staff17"));
        assert!(contents.contains("Staff18 has a total time of 1m."));
    }

    #[tokio::test]
    async fn test_rotation_report_and_wipe() {
        let f = fixture().await;
        let alex = f.track("Alex", "Hub", 2_000).await;
        f.backend
            .add_duration(alex, "Alex", "Survival", 3_000)
            .await
            .unwrap();
        let gone = f.track("Gone", "Hub", 1_000).await;
        f.directory.untracked.lock().unwrap().insert(gone);

        let scheduler = f.scheduler(RotationConfig {
            header: vec!["# Staff report".to_string()],
            ..Default::default()
        });
        let outcome = scheduler.run_rotation().await.unwrap();

        assert_eq!(outcome.subjects_exported, 1);
        assert_eq!(outcome.subjects_skipped, 0);
        assert!(outcome.wiped);
        assert_eq!(outcome.delivered[0].sink, "file");

        let locator = outcome.delivered[0].locator.clone().unwrap();
        let contents = std::fs::read_to_string(locator).unwrap();
        assert_eq!(
            contents,
            "# Staff report\n# Automatic Rotation Export\n# Generated: 2024-03-01 12:00:00\n\n\
             Alex has a total time of 5s.\n  - Hub: 2s\n  - Survival: 3s\n"
        );
        assert!(outcome.file_name.starts_with("rotation_export_"));

        assert_eq!(f.handler.total_duration(alex).await, 0);
        assert!(f.handler.all_tracked_subjects().await.is_empty());
    }

    #[tokio::test]
    async fn test_votes_reported_when_enabled() {
        let f = fixture().await;
        let id = f.track("Alex", "Hub", 1_000).await;
        for _ in 0..3 {
            f.backend
                .insert_vote(&VoteRecord {
                    subject_id: id,
                    display_name: "Alex".to_string(),
                    service_name: "ServiceX".to_string(),
                    vote_time: "2024-02-29 10:00:00".to_string(),
                })
                .await
                .unwrap();
        }

        let sink = RecordingSink::new(false);
        let scheduler = f
            .scheduler(RotationConfig::default())
            .with_sink(sink.clone())
            .with_votes(true);
        scheduler.export_now().await.unwrap();

        let received = sink.received.lock().unwrap();
        assert_eq!(received[0].1, "Alex has a total time of 1s and has 3 votes.\n");
    }

    #[tokio::test]
    async fn test_name_falls_back_to_stored_name() {
        let f = fixture().await;
        let id = f.track("Stored", "Hub", 1_000).await;
        f.directory.names.lock().unwrap().remove(&id);

        let sink = RecordingSink::new(false);
        let scheduler = f.scheduler(RotationConfig::default()).with_sink(sink.clone());
        let outcome = scheduler.export_now().await.unwrap();

        assert_eq!(outcome.subjects_exported, 1);
        assert!(sink.received.lock().unwrap()[0].1.starts_with("Stored has"));
    }

    #[tokio::test]
    async fn test_no_wipe_when_every_sink_fails() {
        let f = fixture().await;
        let id = f.track("Alex", "Hub", 1_000).await;

        let scheduler = f
            .scheduler(RotationConfig {
                save_local: false,
                ..Default::default()
            })
            .with_sink(RecordingSink::new(true));

        let result = scheduler.run_rotation().await;
        assert!(matches!(result, Err(Error::Sink(_))));
        assert_eq!(f.handler.total_duration(id).await, 1_000);
        // Staged copy is cleaned up even though delivery failed
        assert!(f.exported_files().is_empty());
    }

    #[tokio::test]
    async fn test_remote_only_delivery_removes_staged_file() {
        let f = fixture().await;
        f.track("Alex", "Hub", 1_000).await;

        let sink = RecordingSink::new(false);
        let scheduler = f
            .scheduler(RotationConfig {
                save_local: false,
                clean_after_export: false,
                ..Default::default()
            })
            .with_sink(sink.clone());

        let outcome = scheduler.run_rotation().await.unwrap();
        assert_eq!(outcome.delivered.len(), 1);
        assert_eq!(outcome.delivered[0].sink, "recording");
        assert!(!outcome.wiped);
        assert!(f.exported_files().is_empty());
    }

    #[tokio::test]
    async fn test_one_failing_sink_does_not_block_others() {
        let f = fixture().await;
        f.track("Alex", "Hub", 1_000).await;

        let good = RecordingSink::new(false);
        let scheduler = f
            .scheduler(RotationConfig::default())
            .with_sink(RecordingSink::new(true))
            .with_sink(good.clone());

        let outcome = scheduler.run_rotation().await.unwrap();
        assert_eq!(outcome.failed_sinks, vec!["recording".to_string()]);
        assert_eq!(outcome.delivered.len(), 2);
        assert_eq!(good.received.lock().unwrap().len(), 1);
        assert!(outcome.wiped);
    }

    #[tokio::test]
    async fn test_unreachable_backend_blocks_export() {
        let f = fixture().await;
        f.track("Alex", "Hub", 1_000).await;
        f.backend.close().await;

        let scheduler = f.scheduler(RotationConfig::default());
        assert!(matches!(
            scheduler.export_now().await,
            Err(Error::Database(_))
        ));
        assert!(scheduler.poll().await.is_none());
        assert!(f.exported_files().is_empty());
    }

    #[tokio::test]
    async fn test_poll_runs_once_per_due_day() {
        let f = fixture().await;
        f.track("Alex", "Hub", 1_000).await;

        let scheduler = f.scheduler(RotationConfig {
            enabled: true,
            start_day: 1,
            clean_after_export: false,
            ..Default::default()
        });

        assert!(scheduler.poll().await.is_some());
        assert!(scheduler.poll().await.is_none());

        // Not the first of the month
        f.clock.advance(86_400_000);
        assert!(scheduler.poll().await.is_none());

        // 2024-04-01
        f.clock.set(
            Local
                .with_ymd_and_hms(2024, 4, 1, 9, 0, 0)
                .unwrap()
                .timestamp_millis(),
        );
        assert!(scheduler.poll().await.is_some());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let f = fixture().await;

        let disabled = Arc::new(f.scheduler(RotationConfig::default()));
        disabled.start().await;
        assert!(!disabled.is_running().await);

        let scheduler = Arc::new(f.scheduler(RotationConfig {
            enabled: true,
            ..Default::default()
        }));
        scheduler.start().await;
        assert!(scheduler.is_running().await);
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }
}
