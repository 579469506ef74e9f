// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Process exit observation.
//!
//! One tokio task per live entity awaits the OS wait primitive. Unexpected
//! exits become [`RestartCandidate`] events on a single bounded channel;
//! exits the operator asked for are delivered to the stopper instead and never
//! reach the channel. Restart policy lives in the consumer, not here.

use crate::error::{Result, SupervisorError};
use crate::process::{ExitInfo, ExitWatch, ProcessEntity};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};

const EVENT_QUEUE_CAPACITY: usize = 64;

/// An observed process exited without an operator stop.
#[derive(Debug, Clone)]
pub struct RestartCandidate {
    pub name: String,
    pub pid: i32,
    pub exit: ExitInfo,
    pub watch_id: u64,
}

/// Receiving end of the restart channel. There is exactly one.
pub struct RestartEvents {
    rx: mpsc::Receiver<RestartCandidate>,
}

impl RestartEvents {
    pub async fn next(&mut self) -> Option<RestartCandidate> {
        self.rx.recv().await
    }
}

struct Observation {
    id: u64,
    /// The task saw the exit and emitted an event that has not been consumed.
    exited: bool,
    stop_requested: Option<oneshot::Sender<ExitInfo>>,
}

type Observations = Arc<Mutex<HashMap<String, Observation>>>;

pub struct Watcher {
    events_tx: mpsc::Sender<RestartCandidate>,
    observations: Observations,
    next_id: AtomicU64,
}

enum Outcome {
    Stopped(oneshot::Sender<ExitInfo>),
    Exited,
    Released,
}

impl Watcher {
    pub fn new() -> (Self, RestartEvents) {
        let (events_tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let watcher = Self {
            events_tx,
            observations: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        };
        (watcher, RestartEvents { rx })
    }

    /// Start observing a freshly started entity. Returns the observation id.
    pub fn add_proc_watcher(&self, entity: &mut ProcessEntity) -> Result<u64> {
        let mut observations = lock(&self.observations);
        if observations
            .get(entity.name())
            .is_some_and(|obs| !obs.exited)
        {
            return Err(SupervisorError::AlreadyWatched(entity.name().to_string()));
        }

        let watch = entity.watch()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        observations.insert(
            entity.name().to_string(),
            Observation {
                id,
                exited: false,
                stop_requested: None,
            },
        );
        drop(observations);

        debug!("[{}] watching pid {}", watch.name(), watch.pid());
        tokio::spawn(observe(
            watch,
            id,
            self.observations.clone(),
            self.events_tx.clone(),
        ));
        Ok(id)
    }

    /// Mark the next exit of `name` as operator-requested. The returned
    /// receiver completes once the process is gone. `None` when there is no
    /// live observation to cancel.
    pub fn stop_watcher(&self, name: &str) -> Option<oneshot::Receiver<ExitInfo>> {
        let mut observations = lock(&self.observations);
        let obs = observations.get_mut(name).filter(|obs| !obs.exited)?;
        let (tx, rx) = oneshot::channel();
        obs.stop_requested = Some(tx);
        Some(rx)
    }

    /// Drop the bookkeeping of a consumed event.
    pub fn release(&self, name: &str, watch_id: u64) {
        let mut observations = lock(&self.observations);
        if observations.get(name).is_some_and(|obs| obs.id == watch_id) {
            observations.remove(name);
        }
    }

    /// True while an observation exists, including an exit not consumed yet.
    pub fn is_watching(&self, name: &str) -> bool {
        lock(&self.observations).contains_key(name)
    }
}

async fn observe(
    watch: ExitWatch,
    id: u64,
    observations: Observations,
    events_tx: mpsc::Sender<RestartCandidate>,
) {
    let name = watch.name().to_string();
    let pid = watch.pid();
    let exit = match watch.wait().await {
        Ok(exit) => exit,
        Err(e) => {
            warn!("[{name}] error waiting for pid {pid}, treating as exited: {e}");
            ExitInfo {
                code: None,
                signal: None,
            }
        }
    };

    let outcome = {
        let mut observations = lock(&observations);
        match observations.get_mut(&name) {
            Some(obs) if obs.id == id => match obs.stop_requested.take() {
                Some(done) => {
                    observations.remove(&name);
                    Outcome::Stopped(done)
                }
                None => {
                    obs.exited = true;
                    Outcome::Exited
                }
            },
            _ => Outcome::Released,
        }
    };

    match outcome {
        Outcome::Stopped(done) => {
            debug!("[{name}] stopped on request ({exit})");
            let _ = done.send(exit);
        }
        Outcome::Exited => {
            info!("[{name}] pid {pid} exited ({exit})");
            let event = RestartCandidate {
                name: name.clone(),
                pid,
                exit,
                watch_id: id,
            };
            if events_tx.send(event).await.is_err() {
                debug!("[{name}] restart channel closed, dropping exit event");
            }
        }
        Outcome::Released => debug!("[{name}] observation {id} already released"),
    }
}

fn lock(observations: &Observations) -> MutexGuard<'_, HashMap<String, Observation>> {
    observations.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
