use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::data::dataset::DatasetSource;
use crate::data::partition::partition;
use crate::error::{Result, TrainError};
use crate::model::ModelFactory;
use crate::session::record::{
    lock_session, MetricsSnapshot, SamplePredictions, SessionHandle, SessionState, SharedSession,
    TrainingSession,
};
use crate::train::progress::{ProgressChannel, Subscription};
use crate::train::train_config::TrainConfig;
use crate::train::worker::{CancelToken, TerminalOutcome, TrainingWorker};

/// Reply to `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartStatus {
    Started,
    AlreadyRunning,
}

/// Reply to `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StopStatus {
    Stopped,
    NotRunning,
}

/// Set once by the worker thread on exit; any number of waiters may block
/// on it without owning the thread handle.
#[derive(Clone, Default)]
struct DoneSignal(Arc<(Mutex<bool>, Condvar)>);

impl DoneSignal {
    fn set(&self) {
        let (done, cvar) = &*self.0;
        *done.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    /// True once the worker has exited; false if `timeout` elapsed first.
    fn wait(&self, timeout: Duration) -> bool {
        let (done, cvar) = &*self.0;
        let guard = done.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |done| !*done)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Sets the signal when dropped, so waiters wake even if the thread unwinds.
struct DoneGuard(DoneSignal);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.0.set();
    }
}

/// The worker thread attached to the controller.
struct WorkerHandle {
    run_id: u64,
    thread: JoinHandle<TerminalOutcome>,
    done: DoneSignal,
}

impl WorkerHandle {
    fn wait(&self, timeout: Duration) -> bool {
        self.done.wait(timeout)
    }

    fn join(self) -> Option<TerminalOutcome> {
        self.thread.join().ok()
    }
}

/// Everything tied to the current run besides the session record.
struct Control {
    channel: ProgressChannel,
    cancel: CancelToken,
    worker: Option<WorkerHandle>,
}

/// State machine and control surface for the single training session.
///
/// All mutation goes through `start` / `stop`; `metrics` and `state` only
/// take the session mutex, which the worker holds for field updates and
/// never during compute.
pub struct SessionController {
    session: SharedSession,
    control: Mutex<Control>,
    source: Arc<DatasetSource>,
    factory: ModelFactory,
    store: Arc<dyn CheckpointStore>,
    config: TrainConfig,
}

impl SessionController {
    pub fn new(
        source: Arc<DatasetSource>,
        factory: ModelFactory,
        store: Arc<dyn CheckpointStore>,
        config: TrainConfig,
    ) -> Self {
        SessionController {
            session: Arc::new(Mutex::new(TrainingSession::default())),
            control: Mutex::new(Control {
                channel: ProgressChannel::closed(),
                cancel: CancelToken::new(),
                worker: None,
            }),
            source,
            factory,
            store,
            config,
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Starts a run unless one is active.
    ///
    /// Config and partition errors are returned before any worker exists;
    /// everything that goes wrong afterwards is reported through the
    /// progress channel and the session's `error_message`.
    pub fn start(&self) -> Result<StartStatus> {
        let mut control = self.control();
        if lock_session(&self.session).state.is_active() {
            debug!("start ignored: a run is already active");
            return Ok(StartStatus::AlreadyRunning);
        }

        self.config.validate()?;
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let split = partition(&self.source, &self.config.quota(), &mut rng)?;
        let model = (self.factory)(&mut rng)?;

        // A worker detached by a timed-out stop is left to exit on its own.
        if let Some(stale) = control.worker.take() {
            if !stale.wait(Duration::ZERO) {
                warn!("Previous worker still running; detaching it");
            }
        }

        let run_id = lock_session(&self.session).reset_for_run();
        let channel = ProgressChannel::new(self.config.channel_capacity);
        let cancel = CancelToken::new();
        let worker = TrainingWorker::new(
            Arc::clone(&self.source),
            split,
            self.config.clone(),
            channel.clone(),
            cancel.clone(),
            SessionHandle::new(Arc::clone(&self.session), run_id),
            Arc::clone(&self.store),
            rng,
        );

        let done = DoneSignal::default();
        let done_on_exit = DoneGuard(done.clone());
        let spawned = thread::Builder::new()
            .name(format!("training-worker-{}", run_id))
            .spawn(move || {
                // Locals drop in reverse order: the model is released before
                // the signal fires.
                let _done = done_on_exit;
                let mut model = model;
                worker.run(model.as_mut())
            });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                let mut session = lock_session(&self.session);
                session.state = SessionState::Failed;
                session.error_message = Some(format!("could not spawn training worker: {}", e));
                return Err(TrainError::Io(e));
            }
        };

        control.channel = channel;
        control.cancel = cancel;
        control.worker = Some(WorkerHandle { run_id, thread, done });
        info!(run_id, "Training started");
        Ok(StartStatus::Started)
    }

    /// Cancels the active run and waits up to `join_timeout` for the worker.
    ///
    /// The session ends in `Idle` whether or not the worker exited in time;
    /// a worker that is still computing exits at its next checkpoint.
    pub fn stop(&self) -> StopStatus {
        let mut control = self.control();
        let run_id = {
            let mut session = lock_session(&self.session);
            if session.state != SessionState::Running {
                return StopStatus::NotRunning;
            }
            session.state = SessionState::Stopping;
            control.cancel.cancel();
            session.run_id
        };
        let handle = control.worker.take();
        let channel = control.channel.clone();
        drop(control);

        let timeout = self.config.join_timeout();
        match handle {
            Some(handle) if handle.wait(timeout) => {
                let outcome = handle.join();
                debug!(run_id, ?outcome, "Worker joined");
            }
            Some(_) => {
                warn!(
                    run_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Worker did not exit within the join timeout; detaching"
                );
            }
            None => {}
        }
        channel.close();

        let mut session = lock_session(&self.session);
        if session.run_id == run_id && session.state == SessionState::Stopping {
            session.state = SessionState::Idle;
            session.elapsed_ms = session.started_at.map(|t| t.elapsed().as_millis() as u64);
        }
        info!(run_id, "Training stopped");
        StopStatus::Stopped
    }

    /// Blocks until the current worker exits or `timeout` elapses. Returns
    /// the outcome if this call joined the worker.
    ///
    /// The handle stays attached while waiting, so a concurrent `stop` still
    /// cancels and joins the same worker; whichever call gets there first
    /// owns the join.
    pub fn wait(&self, timeout: Duration) -> Option<TerminalOutcome> {
        let (run_id, done) = {
            let control = self.control();
            let handle = control.worker.as_ref()?;
            (handle.run_id, handle.done.clone())
        };
        if !done.wait(timeout) {
            return None;
        }
        let mut control = self.control();
        match control.worker.take() {
            Some(handle) if handle.run_id == run_id => handle.join(),
            other => {
                control.worker = other;
                None
            }
        }
    }

    pub fn state(&self) -> SessionState {
        lock_session(&self.session).state
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        lock_session(&self.session).snapshot()
    }

    /// Test-sample predictions of the last completed run.
    pub fn sample_predictions(&self) -> Option<SamplePredictions> {
        let session = lock_session(&self.session);
        if session.state == SessionState::Completed {
            session.sample.clone()
        } else {
            None
        }
    }

    /// Live stream of the current run. Replaces any previous subscriber;
    /// ends immediately when no run has been started.
    pub fn subscribe(&self) -> Subscription {
        self.control().channel.subscribe()
    }

    /// Stops an active run; used on process exit.
    pub fn shutdown(&self) {
        if self.stop() == StopStatus::Stopped {
            info!("Training worker cleaned up on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_serialize_as_status_objects() {
        assert_eq!(serde_json::to_string(&StartStatus::Started).unwrap(), r#"{"status":"started"}"#);
        assert_eq!(serde_json::to_string(&StartStatus::AlreadyRunning).unwrap(), r#"{"status":"already_running"}"#);
        assert_eq!(serde_json::to_string(&StopStatus::NotRunning).unwrap(), r#"{"status":"not_running"}"#);
    }
}
