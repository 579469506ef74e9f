// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! The supervision engine: owns the registry, reacts to exits and keeps the
//! on-disk state in sync.

use crate::config::MasterSettings;
use crate::error::{Result, SupervisorError};
use crate::preparable::{Language, Preparable, PreparableKind, Prepared};
use crate::process::{ProcessEntity, ProcessSnapshot};
use crate::sampler::ResourceSampler;
use crate::status::ProcessState;
use crate::store::{RegistryState, Store};
use crate::watcher::{RestartCandidate, RestartEvents, Watcher};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use time::macros::format_description;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// Registered entities plus their registration order.
#[derive(Default)]
struct Registry {
    procs: HashMap<String, ProcessEntity>,
    order: Vec<String>,
}

impl Registry {
    fn contains(&self, name: &str) -> bool {
        self.procs.contains_key(name)
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut ProcessEntity> {
        self.procs
            .get_mut(name)
            .ok_or_else(|| SupervisorError::UnknownProcess(name.to_string()))
    }

    fn insert(&mut self, entity: ProcessEntity) {
        let name = entity.name().to_string();
        self.order.push(name.clone());
        self.procs.insert(name, entity);
    }

    fn remove(&mut self, name: &str) -> Option<ProcessEntity> {
        self.order.retain(|n| n != name);
        self.procs.remove(name)
    }

    fn ordered_mut(&mut self) -> impl Iterator<Item = &mut ProcessEntity> {
        let Registry { procs, order } = self;
        let mut by_name: HashMap<&str, &mut ProcessEntity> =
            procs.iter_mut().map(|(k, v)| (k.as_str(), v)).collect();
        order.iter().filter_map(move |name| by_name.remove(name.as_str()))
    }

    fn state(&self, sys_folder: &Path) -> RegistryState {
        RegistryState {
            sys_folder: sys_folder.to_path_buf(),
            processes: self
                .order
                .iter()
                .filter_map(|name| self.procs.get(name))
                .map(|entity| entity.spec().clone())
                .collect(),
        }
    }
}

pub struct Master {
    sys_folder: PathBuf,
    registry: Mutex<Registry>,
    watcher: Watcher,
    store: Arc<dyn Store>,
    sampler: Arc<dyn ResourceSampler>,
    settings: MasterSettings,
    shutdown: CancellationToken,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Master {
    /// Restore the registry from `store` (every entity stopped) and start the
    /// background loops.
    pub async fn start(
        sys_folder: impl Into<PathBuf>,
        store: Arc<dyn Store>,
        sampler: Arc<dyn ResourceSampler>,
        settings: MasterSettings,
    ) -> Result<Arc<Self>> {
        let sys_folder = sys_folder.into();
        std::fs::create_dir_all(&sys_folder).map_err(|e| {
            SupervisorError::Persistence(format!("creating {}: {e}", sys_folder.display()))
        })?;

        let saved = store.load()?;
        if !saved.sys_folder.as_os_str().is_empty() && saved.sys_folder != sys_folder {
            warn!(
                "state was saved for {}, now running in {}",
                saved.sys_folder.display(),
                sys_folder.display()
            );
        }
        let mut registry = Registry::default();
        for spec in saved.processes {
            if registry.contains(&spec.name) {
                warn!("[{}] duplicate entry in saved state, skipping", spec.name);
                continue;
            }
            registry.insert(ProcessEntity::new(spec));
        }
        info!("restored {} process(es) from state", registry.order.len());

        let (watcher, events) = Watcher::new();
        let master = Arc::new(Self {
            sys_folder,
            registry: Mutex::new(registry),
            watcher,
            store,
            sampler,
            settings,
            shutdown: CancellationToken::new(),
            tasks: std::sync::Mutex::new(Vec::new()),
        });

        let handles = vec![
            tokio::spawn(master.clone().consume_restart_events(events)),
            tokio::spawn(master.clone().status_loop()),
            tokio::spawn(master.clone().save_loop()),
        ];
        master.lock_tasks().extend(handles);
        Ok(master)
    }

    /// Build or validate a start request without registering anything.
    pub async fn prepare(
        &self,
        source_path: &Path,
        name: &str,
        language: Language,
        keep_alive: bool,
        args: Vec<String>,
        is_binary: bool,
    ) -> Result<Prepared> {
        // Advisory only; run_preparable re-checks under the lock.
        if self.registry.lock().await.contains(name) {
            return Err(SupervisorError::AlreadyExists(name.to_string()));
        }
        let kind = if is_binary {
            PreparableKind::PrebuiltBinary
        } else {
            PreparableKind::SourceBuild(language)
        };
        Preparable {
            name: name.to_string(),
            source_path: source_path.to_path_buf(),
            keep_alive,
            args,
            sys_folder: self.sys_folder.clone(),
            kind,
        }
        .prepare()
        .await
    }

    /// The only way a new entity enters the registry.
    pub async fn run_preparable(&self, prepared: Prepared) -> Result<()> {
        let mut registry = self.registry.lock().await;
        if registry.contains(prepared.name()) {
            return Err(SupervisorError::AlreadyExists(prepared.name().to_string()));
        }
        let mut entity = prepared.start()?;
        self.watch_started(&mut entity).await?;
        info!("[{}] registered (pid={})", entity.name(), entity.pid());
        registry.insert(entity);
        self.persist_logged(&registry);
        Ok(())
    }

    /// Launch a registered entity. A live one is left alone.
    pub async fn start_process(&self, name: &str) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let entity = registry.get_mut(name)?;
        if entity.is_alive() {
            debug!("[{name}] already running (pid={})", entity.pid());
            return Ok(());
        }
        self.launch(entity).await
    }

    pub async fn stop_process(&self, name: &str) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let entity = registry.get_mut(name)?;
        self.stop_entity(entity).await
    }

    /// Operator restart; does not count towards `restarts`.
    pub async fn restart_process(&self, name: &str) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let entity = registry.get_mut(name)?;
        self.stop_entity(entity).await?;
        self.launch(entity).await
    }

    pub async fn delete_process(&self, name: &str) -> Result<()> {
        let mut registry = self.registry.lock().await;
        self.stop_entity(registry.get_mut(name)?).await?;
        let Some(mut entity) = registry.remove(name) else {
            return Err(SupervisorError::UnknownProcess(name.to_string()));
        };
        self.persist_logged(&registry);
        drop(registry);

        entity.delete()?;
        info!("[{name}] deleted");
        Ok(())
    }

    /// Registration-ordered snapshot with fresh uptime and resource samples.
    pub async fn list_procs(&self) -> Vec<ProcessSnapshot> {
        let mut registry = self.registry.lock().await;
        registry
            .ordered_mut()
            .map(|entity| {
                entity.refresh(self.sampler.as_ref());
                entity.snapshot()
            })
            .collect()
    }

    /// Every field of one entity formatted for display. Empty if unknown.
    pub async fn proc_info(&self, name: &str) -> BTreeMap<String, String> {
        let mut registry = self.registry.lock().await;
        match registry.get_mut(name) {
            Ok(entity) => {
                entity.refresh(self.sampler.as_ref());
                describe(&entity.snapshot())
            }
            Err(_) => BTreeMap::new(),
        }
    }

    /// Launch every registered entity that is not alive. Returns how many
    /// were started; individual failures are logged and skipped.
    pub async fn resurrect(&self) -> usize {
        let mut registry = self.registry.lock().await;
        let mut started = 0;
        for entity in registry.ordered_mut() {
            if entity.is_alive() {
                continue;
            }
            match self.launch(entity).await {
                Ok(()) => started += 1,
                Err(e) => error!("[{}] resurrect failed: {e}", entity.name()),
            }
        }
        info!("resurrected {started} process(es)");
        started
    }

    pub async fn save(&self) -> Result<()> {
        let registry = self.registry.lock().await;
        self.store.persist(&registry.state(&self.sys_folder))
    }

    /// Cancel the loops, stop every live process and persist one last time.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("master shutting down");
        self.shutdown.cancel();

        let mut registry = self.registry.lock().await;
        let names: Vec<String> = registry.order.clone();
        for name in names {
            if let Ok(entity) = registry.get_mut(&name) {
                if let Err(e) = self.stop_entity(entity).await {
                    warn!("[{name}] stop during shutdown failed: {e}");
                }
            }
        }
        self.persist_logged(&registry);
        drop(registry);

        let handles: Vec<JoinHandle<()>> = self.lock_tasks().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("background loop ended abnormally: {e}");
            }
        }
    }

    async fn launch(&self, entity: &mut ProcessEntity) -> Result<()> {
        entity.start()?;
        self.watch_started(entity).await
    }

    /// A freshly started entity that cannot be watched is killed and reaped.
    async fn watch_started(&self, entity: &mut ProcessEntity) -> Result<()> {
        if let Err(e) = self.watcher.add_proc_watcher(entity) {
            warn!("[{}] cannot watch pid {}, killing it: {e}", entity.name(), entity.pid());
            let handle = entity.watch();
            if let Err(kill_err) = entity.force_stop() {
                debug!("[{}] {kill_err}", entity.name());
            }
            if let Ok(handle) = handle {
                if tokio::time::timeout(KILL_CONFIRM_TIMEOUT, handle.wait()).await.is_err() {
                    warn!("[{}] killed process not reaped in time", entity.name());
                }
            }
            return Err(e);
        }
        entity.status_mut().set_state(ProcessState::Running);
        Ok(())
    }

    /// SIGTERM, then wait for the exit the watcher reports. Past
    /// `stop_timeout` the process is killed.
    async fn stop_entity(&self, entity: &mut ProcessEntity) -> Result<()> {
        let name = entity.name().to_string();
        if !entity.is_alive() {
            if entity.status().state != ProcessState::Stopped {
                entity.mark_stopped();
            }
            return Ok(());
        }

        let mut done = self.watcher.stop_watcher(&name);
        if let Err(e) = entity.gracefully_stop() {
            debug!("[{name}] exited before stop: {e}");
            entity.mark_stopped();
            return Ok(());
        }

        let timeout = self.settings.stop_timeout;
        let exited = match done.as_mut() {
            Some(done) => matches!(tokio::time::timeout(timeout, done).await, Ok(Ok(_))),
            None => wait_until_dead(entity, timeout).await,
        };
        if !exited {
            warn!("[{name}] did not exit within {timeout:?}, killing");
            entity.force_stop()?;
            // The observation must retire before the name can be watched again.
            if let Some(done) = done {
                if tokio::time::timeout(KILL_CONFIRM_TIMEOUT, done).await.is_err() {
                    warn!("[{name}] exit not confirmed {KILL_CONFIRM_TIMEOUT:?} after SIGKILL");
                }
            }
        }
        entity.mark_stopped();
        info!("[{name}] stopped");
        Ok(())
    }

    async fn consume_restart_events(self: Arc<Self>, mut events: RestartEvents) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.next() => match event {
                    Some(event) => self.handle_exit(event).await,
                    None => break,
                },
            }
        }
        debug!("restart consumer stopped");
    }

    async fn handle_exit(&self, event: RestartCandidate) {
        let mut registry = self.registry.lock().await;
        self.watcher.release(&event.name, event.watch_id);

        let Ok(entity) = registry.get_mut(&event.name) else {
            debug!("[{}] exit event for unregistered process", event.name);
            return;
        };
        if entity.pid() != event.pid {
            debug!(
                "[{}] stale exit event for pid {} (current pid {})",
                event.name,
                event.pid,
                entity.pid()
            );
            return;
        }

        entity.mark_stopped();
        if !entity.keep_alive() {
            info!(
                "[{}] exited ({}) and does not have keep alive set, not restarting",
                event.name, event.exit
            );
            return;
        }
        if self.shutdown.is_cancelled() {
            return;
        }

        entity.status_mut().add_restart();
        info!(
            "[{}] exited ({}), restarting (restarts={})",
            event.name,
            event.exit,
            entity.status().restarts
        );
        if let Err(e) = self.launch(entity).await {
            error!("[{}] restart failed: {e}", event.name);
        }
    }

    async fn status_loop(self: Arc<Self>) {
        let period = self.settings.status_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.update_status().await,
            }
        }
        debug!("status loop stopped");
    }

    async fn update_status(&self) {
        let mut registry = self.registry.lock().await;
        for entity in registry.ordered_mut() {
            if entity.is_alive() {
                if entity.status().state == ProcessState::Started {
                    entity.status_mut().set_state(ProcessState::Running);
                }
                entity.refresh(self.sampler.as_ref());
            } else if entity.status().state != ProcessState::Stopped
                && !self.watcher.is_watching(entity.name())
            {
                info!("[{}] no longer alive, marking stopped", entity.name());
                entity.mark_stopped();
            }
        }
    }

    async fn save_loop(self: Arc<Self>) {
        let period = self.settings.save_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.save().await {
                        error!("periodic save failed: {e}");
                    }
                }
            }
        }
        debug!("save loop stopped");
    }

    fn persist_logged(&self, registry: &Registry) {
        if let Err(e) = self.store.persist(&registry.state(&self.sys_folder)) {
            error!("{e}");
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn wait_until_dead(entity: &ProcessEntity, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if !entity.is_alive() {
            return true;
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }
    !entity.is_alive()
}

fn describe(snapshot: &ProcessSnapshot) -> BTreeMap<String, String> {
    let spec = &snapshot.spec;
    let status = &snapshot.status;
    let path = |p: &Path| p.display().to_string();
    let fields = [
        ("name", spec.name.clone()),
        ("pid", snapshot.pid.to_string()),
        ("status", status.state.to_string()),
        ("keep_alive", spec.keep_alive.to_string()),
        ("restarts", status.restarts.to_string()),
        ("uptime", status.uptime.clone()),
        ("start_time", format_start_time(status.start_time)),
        ("cpu", format!("{:.1}%", status.sample.cpu_percent)),
        ("memory", crate::format::human_bytes(status.sample.memory_bytes)),
        ("command", path(&spec.command)),
        ("args", spec.args.join(" ")),
        ("source_path", path(&spec.source_path)),
        ("working_path", path(&spec.working_path)),
        ("pid_file", path(&spec.pid_file)),
        ("stdout_file", path(&spec.stdout_file)),
        ("stderr_file", path(&spec.stderr_file)),
    ];
    fields
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn format_start_time(unix: i64) -> String {
    if unix <= 0 {
        return "-".to_string();
    }
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second] UTC");
    OffsetDateTime::from_unix_timestamp(unix)
        .ok()
        .and_then(|t| t.format(&format).ok())
        .unwrap_or_else(|| unix.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::process::NO_PID;
    use crate::sampler::tests::FixedSampler;
    use crate::status::ResourceSample;
    use crate::store::YamlStore;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    fn fast_settings() -> MasterSettings {
        MasterSettings {
            status_interval: Duration::from_millis(100),
            save_interval: Duration::from_secs(60),
            stop_timeout: Duration::from_secs(5),
        }
    }

    async fn master_in(dir: &Path) -> Arc<Master> {
        let sampler = FixedSampler(ResourceSample {
            cpu_percent: 2.5,
            memory_bytes: 3 * 1024 * 1024,
        });
        Master::start(
            dir,
            Arc::new(YamlStore::in_sys_folder(dir)),
            Arc::new(sampler),
            fast_settings(),
        )
        .await
        .unwrap()
    }

    async fn start_sleeper(master: &Master, name: &str, keep_alive: bool) {
        let prepared = master
            .prepare(
                Path::new("/bin/sleep"),
                name,
                Language::Go,
                keep_alive,
                vec!["60".into()],
                true,
            )
            .await
            .unwrap();
        master.run_preparable(prepared).await.unwrap();
    }

    async fn snapshot(master: &Master, name: &str) -> ProcessSnapshot {
        master
            .list_procs()
            .await
            .into_iter()
            .find(|s| s.spec.name == name)
            .unwrap()
    }

    async fn wait_for<F>(master: &Master, name: &str, timeout: Duration, cond: F) -> ProcessSnapshot
    where
        F: Fn(&ProcessSnapshot) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let snap = snapshot(master, name).await;
            if cond(&snap) || tokio::time::Instant::now() >= deadline {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn test_run_preparable_registers_running() {
        let dir = tempfile::tempdir().unwrap();
        let master = master_in(dir.path()).await;
        start_sleeper(&master, "web1", false).await;

        let snap = snapshot(&master, "web1").await;
        assert!(snap.pid > 0);
        assert_eq!(snap.status.state, ProcessState::Running);
        assert_eq!(snap.status.restarts, 0);
        assert_eq!(snap.status.sample.memory_bytes, 3 * 1024 * 1024);
        assert!(dir.path().join("state.yaml").exists());

        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_name_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let master = master_in(dir.path()).await;
        start_sleeper(&master, "web1", false).await;
        let first_pid = snapshot(&master, "web1").await.pid;

        let err = master
            .prepare(Path::new("/bin/sleep"), "web1", Language::Go, true, vec![], true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        assert_eq!(master.list_procs().await.len(), 1);
        assert_eq!(snapshot(&master, "web1").await.pid, first_pid);
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_preparable_rechecks_under_lock() {
        let dir = tempfile::tempdir().unwrap();
        let master = master_in(dir.path()).await;
        let prepare = || {
            master.prepare(
                Path::new("/bin/sleep"),
                "race",
                Language::Go,
                false,
                vec!["60".into()],
                true,
            )
        };
        let a = prepare().await.unwrap();
        let b = prepare().await.unwrap();
        master.run_preparable(a).await.unwrap();
        let err = master.run_preparable(b).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(master.list_procs().await.len(), 1);
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_keep_alive_restarts_once() {
        let dir = tempfile::tempdir().unwrap();
        let master = master_in(dir.path()).await;
        start_sleeper(&master, "web1", true).await;
        let old_pid = snapshot(&master, "web1").await.pid;

        kill(Pid::from_raw(old_pid), Signal::SIGKILL).unwrap();

        let snap = wait_for(&master, "web1", Duration::from_secs(5), |s| {
            s.pid > 0 && s.pid != old_pid && s.status.state == ProcessState::Running
        })
        .await;
        assert_ne!(snap.pid, old_pid);
        assert_eq!(snap.status.state, ProcessState::Running);
        assert_eq!(snap.status.restarts, 1);
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_keep_alive_stays_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let master = master_in(dir.path()).await;
        start_sleeper(&master, "batch", false).await;
        let pid = snapshot(&master, "batch").await.pid;

        kill(Pid::from_raw(pid), Signal::SIGKILL).unwrap();

        let snap = wait_for(&master, "batch", Duration::from_secs(5), |s| {
            s.status.state == ProcessState::Stopped
        })
        .await;
        assert_eq!(snap.pid, NO_PID);
        assert_eq!(snap.status.state, ProcessState::Stopped);
        assert_eq!(snap.status.restarts, 0);
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_operator_stop_does_not_restart() {
        let dir = tempfile::tempdir().unwrap();
        let master = master_in(dir.path()).await;
        start_sleeper(&master, "web1", true).await;
        let pid = snapshot(&master, "web1").await.pid;

        master.stop_process("web1").await.unwrap();
        let snap = snapshot(&master, "web1").await;
        assert_eq!(snap.pid, NO_PID);
        assert_eq!(snap.status.state, ProcessState::Stopped);
        assert!(kill(Pid::from_raw(pid), None).is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        let snap = snapshot(&master, "web1").await;
        assert_eq!(snap.status.state, ProcessState::Stopped);
        assert_eq!(snap.status.restarts, 0);

        master.start_process("web1").await.unwrap();
        let snap = snapshot(&master, "web1").await;
        assert!(snap.pid > 0);
        assert_eq!(snap.status.state, ProcessState::Running);
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_is_bounded_and_kills() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(YamlStore::in_sys_folder(dir.path()));
        let settings = MasterSettings {
            stop_timeout: Duration::from_millis(300),
            ..fast_settings()
        };
        let master = Master::start(
            dir.path(),
            store,
            Arc::new(crate::sampler::SysinfoSampler::default()),
            settings,
        )
        .await
        .unwrap();
        let prepared = master
            .prepare(
                Path::new("/bin/sh"),
                "stubborn",
                Language::Go,
                true,
                vec!["-c".into(), "trap '' TERM; exec sleep 60".into()],
                true,
            )
            .await
            .unwrap();
        master.run_preparable(prepared).await.unwrap();
        // Let the shell install its trap.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let pid = snapshot(&master, "stubborn").await.pid;

        let started = tokio::time::Instant::now();
        master.stop_process("stubborn").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
        let snap = snapshot(&master, "stubborn").await;
        assert_eq!(snap.status.state, ProcessState::Stopped);
        assert_eq!(snap.status.restarts, 0);
        // Reaped by the time the stop returns.
        assert!(kill(Pid::from_raw(pid), None).is_err());
        assert!(!master.watcher.is_watching("stubborn"));
        master.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_keep_alive_after_forced_restart() {
        let dir = tempfile::tempdir().unwrap();
        let settings = MasterSettings {
            stop_timeout: Duration::from_millis(300),
            ..fast_settings()
        };
        let sampler = FixedSampler(ResourceSample::default());
        let master = Master::start(
            dir.path(),
            Arc::new(YamlStore::in_sys_folder(dir.path())),
            Arc::new(sampler),
            settings,
        )
        .await
        .unwrap();
        let prepared = master
            .prepare(
                Path::new("/bin/sh"),
                "stubborn",
                Language::Go,
                true,
                vec!["-c".into(), "trap '' TERM; while true; do sleep 1; done".into()],
                true,
            )
            .await
            .unwrap();
        master.run_preparable(prepared).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let first = snapshot(&master, "stubborn").await.pid;

        master.restart_process("stubborn").await.unwrap();
        let restarted = snapshot(&master, "stubborn").await;
        assert_ne!(restarted.pid, first);
        assert_eq!(restarted.status.state, ProcessState::Running);
        assert!(master.watcher.is_watching("stubborn"));

        kill(Pid::from_raw(restarted.pid), Signal::SIGKILL).unwrap();
        let snap = wait_for(&master, "stubborn", Duration::from_secs(5), |s| {
            s.pid > 0 && s.pid != restarted.pid
        })
        .await;
        assert_ne!(snap.pid, restarted.pid);
        assert_eq!(snap.status.state, ProcessState::Running);
        assert_eq!(snap.status.restarts, 1);
        assert!(kill(Pid::from_raw(restarted.pid), None).is_err());
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_unwatchable_launch_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let master = master_in(dir.path()).await;
        start_sleeper(&master, "web1", true).await;
        let live = snapshot(&master, "web1").await.pid;

        // A second entity under a name that is still observed.
        let prepared = Preparable {
            name: "web1".into(),
            source_path: "/bin/sleep".into(),
            keep_alive: false,
            args: vec!["60".into()],
            sys_folder: dir.path().join("other"),
            kind: PreparableKind::PrebuiltBinary,
        }
        .prepare()
        .await
        .unwrap();
        let mut entity = prepared.start().unwrap();
        let orphan = entity.pid();

        let err = master.watch_started(&mut entity).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyWatched);
        assert_eq!(entity.pid(), NO_PID);
        assert_eq!(entity.status().state, ProcessState::Stopped);
        assert!(kill(Pid::from_raw(orphan), None).is_err());

        assert_eq!(snapshot(&master, "web1").await.pid, live);
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_process_errors() {
        let dir = tempfile::tempdir().unwrap();
        let master = master_in(dir.path()).await;
        start_sleeper(&master, "web1", false).await;

        for result in [
            master.stop_process("ghost").await,
            master.start_process("ghost").await,
            master.restart_process("ghost").await,
            master.delete_process("ghost").await,
        ] {
            assert_eq!(result.unwrap_err().kind(), ErrorKind::UnknownProcess);
        }
        assert!(master.proc_info("ghost").await.is_empty());
        assert_eq!(
            snapshot(&master, "web1").await.status.state,
            ProcessState::Running
        );
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_live_process_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let master = master_in(dir.path()).await;
        start_sleeper(&master, "web1", false).await;
        let pid = snapshot(&master, "web1").await.pid;

        master.start_process("web1").await.unwrap();
        assert_eq!(snapshot(&master, "web1").await.pid, pid);
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_restart_keeps_counter() {
        let dir = tempfile::tempdir().unwrap();
        let master = master_in(dir.path()).await;
        start_sleeper(&master, "web1", true).await;
        let pid = snapshot(&master, "web1").await.pid;

        master.restart_process("web1").await.unwrap();
        let snap = snapshot(&master, "web1").await;
        assert_ne!(snap.pid, pid);
        assert_eq!(snap.status.state, ProcessState::Running);
        assert_eq!(snap.status.restarts, 0);

        // The old pid's exit was operator-requested; no restart follows.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let later = snapshot(&master, "web1").await;
        assert_eq!(later.pid, snap.pid);
        assert_eq!(later.status.restarts, 0);
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let dir = tempfile::tempdir().unwrap();
        let master = master_in(dir.path()).await;
        start_sleeper(&master, "web1", true).await;
        let working = dir.path().join("web1");
        assert!(working.is_dir());

        master.delete_process("web1").await.unwrap();
        assert!(!working.exists());
        assert!(master.list_procs().await.is_empty());

        let err = master.delete_process("web1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownProcess);

        let saved = YamlStore::in_sys_folder(dir.path()).load().unwrap();
        assert!(saved.processes.is_empty());
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_registration_order_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let master = master_in(dir.path()).await;
        for name in ["zeta", "alpha", "mid"] {
            start_sleeper(&master, name, false).await;
        }
        let names: Vec<String> = master
            .list_procs()
            .await
            .into_iter()
            .map(|s| s.spec.name)
            .collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_proc_info_fields() {
        let dir = tempfile::tempdir().unwrap();
        let master = master_in(dir.path()).await;
        start_sleeper(&master, "web1", true).await;

        let info = master.proc_info("web1").await;
        assert_eq!(info["name"], "web1");
        assert_eq!(info["status"], "running");
        assert_eq!(info["keep_alive"], "true");
        assert_eq!(info["restarts"], "0");
        assert_eq!(info["args"], "60");
        assert_eq!(info["cpu"], "2.5%");
        assert_eq!(info["memory"], "3.0 MiB");
        assert_eq!(info["command"], "/bin/sleep");
        assert!(info["start_time"].ends_with(" UTC"));
        assert!(info["pid"].parse::<i32>().unwrap() > 0);
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_restore_and_resurrect() {
        let dir = tempfile::tempdir().unwrap();
        {
            let master = master_in(dir.path()).await;
            start_sleeper(&master, "web1", true).await;
            start_sleeper(&master, "web2", false).await;
            master.save().await.unwrap();
            master.shutdown().await;
        }

        let master = master_in(dir.path()).await;
        let snaps = master.list_procs().await;
        assert_eq!(snaps.len(), 2);
        assert!(snaps.iter().all(|s| s.pid == NO_PID));
        assert!(snaps.iter().all(|s| s.status.state == ProcessState::Stopped));
        let web1 = &snaps[0].spec;
        assert_eq!(web1.name, "web1");
        assert!(web1.keep_alive);
        assert_eq!(web1.args, vec!["60".to_string()]);
        assert_eq!(web1.source_path, PathBuf::from("/bin/sleep"));

        assert_eq!(master.resurrect().await, 2);
        assert!(master.list_procs().await.iter().all(|s| s.pid > 0));
        assert_eq!(master.resurrect().await, 0);
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_live_processes() {
        let dir = tempfile::tempdir().unwrap();
        let master = master_in(dir.path()).await;
        start_sleeper(&master, "web1", true).await;
        let pid = snapshot(&master, "web1").await.pid;

        master.shutdown().await;
        assert!(kill(Pid::from_raw(pid), None).is_err());
        let saved = YamlStore::in_sys_folder(dir.path()).load().unwrap();
        assert_eq!(saved.processes.len(), 1);
        // Second call is a no-op.
        master.shutdown().await;
    }

    #[test]
    fn test_format_start_time() {
        assert_eq!(format_start_time(0), "-");
        assert_eq!(format_start_time(1_760_000_000), "2025-10-09 08:53:20 UTC");
    }
}
