use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;

use ferrite_trainer::checkpoint::JsonDirStore;
use ferrite_trainer::data::synthetic::blob_source;
use ferrite_trainer::data::DatasetSource;
use ferrite_trainer::error::{ModelError, TrainError};
use ferrite_trainer::model::{Batch, EvalMetrics, ForwardOutput, ModelFactory, TrainableModel};
use ferrite_trainer::network::NetworkSpec;
use ferrite_trainer::optim::Sgd;
use ferrite_trainer::session::{SessionController, SessionState, StartStatus, StopStatus};
use ferrite_trainer::train::{ProgressEvent, Recv, TerminalOutcome, TrainConfig};
use ferrite_trainer::MlpClassifier;

/// Sleeps in every forward pass, and blocks entirely while `gate` is closed.
struct SlowModel {
    gate: Arc<AtomicBool>,
    delay: Duration,
    fail: bool,
    live: Option<Arc<AtomicUsize>>,
}

impl Drop for SlowModel {
    fn drop(&mut self) {
        if let Some(live) = &self.live {
            live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl TrainableModel for SlowModel {
    fn forward(&mut self, batch: &Batch<'_>) -> Result<ForwardOutput, ModelError> {
        if self.fail {
            return Err(ModelError::Other("no gradient for you".into()));
        }
        while !self.gate.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(2));
        }
        thread::sleep(self.delay);
        Ok(ForwardOutput { loss: 0.7, predictions: batch.labels.clone() })
    }

    fn backward_and_step(&mut self, _output: &ForwardOutput) -> Result<(), ModelError> {
        Ok(())
    }

    fn evaluate(&mut self, batch: &Batch<'_>) -> Result<EvalMetrics, ModelError> {
        Ok(EvalMetrics { loss_sum: 0.5 * batch.len() as f64, correct: batch.len(), total: batch.len() })
    }

    fn predict(&mut self, inputs: &[&[f64]]) -> Result<Vec<usize>, ModelError> {
        Ok(vec![0; inputs.len()])
    }

    fn to_json(&self) -> Result<String, ModelError> {
        Ok("{}".into())
    }
}

fn slow_factory(gate: Arc<AtomicBool>, delay: Duration, fail: bool) -> ModelFactory {
    Arc::new(move |_rng: &mut StdRng| -> Result<Box<dyn TrainableModel>, ModelError> {
        Ok(Box::new(SlowModel { gate: gate.clone(), delay, fail, live: None }))
    })
}

/// Gives every model built for a run its own closed gate and counts the
/// models that have not been dropped yet.
#[derive(Clone, Default)]
struct RunModels {
    gates: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
    live: Arc<AtomicUsize>,
}

impl RunModels {
    fn factory(&self, delay: Duration) -> ModelFactory {
        let models = self.clone();
        Arc::new(move |_rng: &mut StdRng| -> Result<Box<dyn TrainableModel>, ModelError> {
            let gate = Arc::new(AtomicBool::new(false));
            models.gates.lock().unwrap().push(gate.clone());
            models.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(SlowModel { gate, delay, fail: false, live: Some(models.live.clone()) }))
        })
    }

    /// Opens the gate of the `run`-th model (0-based).
    fn open(&self, run: usize) {
        self.gates.lock().unwrap()[run].store(true, Ordering::SeqCst);
    }

    fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(2));
    }
}

fn blobs() -> Arc<DatasetSource> {
    let mut rng = StdRng::seed_from_u64(5);
    Arc::new(blob_source(30, 10, 3, 4, &mut rng).unwrap())
}

fn small_config() -> TrainConfig {
    TrainConfig {
        max_epochs: 3,
        min_epochs: 3,
        patience: 2,
        batch_size: 8,
        per_class_train: 20,
        per_class_val: 5,
        test_size: 10,
        sample_size: 5,
        join_timeout_ms: 2000,
        seed: Some(11),
        artifact_name: "blobs_mlp".into(),
        ..TrainConfig::default()
    }
}

fn controller(factory: ModelFactory, config: TrainConfig, dir: &tempfile::TempDir) -> SessionController {
    SessionController::new(blobs(), factory, Arc::new(JsonDirStore::new(dir.path())), config)
}

#[test]
fn full_run_completes_and_saves_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let spec = NetworkSpec::classifier("blobs", 4, &[8], 3);
    let ctl = controller(MlpClassifier::factory(spec, Sgd::new(0.1)), small_config(), &dir);
    assert_eq!(ctl.subscribe().recv(), None);

    assert_eq!(ctl.start().unwrap(), StartStatus::Started);
    let outcome = ctl.wait(Duration::from_secs(60)).expect("worker should finish");
    assert!(matches!(outcome, TerminalOutcome::Completed { epochs: 3, .. }));

    let metrics = ctl.metrics();
    assert_eq!(metrics.state, SessionState::Completed);
    assert!(metrics.is_completed);
    assert!(!metrics.is_training);
    assert_eq!(metrics.loss.len(), 3);
    assert_eq!(metrics.val_accuracy.len(), 3);
    assert!(metrics.accuracy.iter().all(|a| (0.0..=1.0).contains(a)));

    let artifact = dir.path().join("blobs_mlp.json");
    let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&artifact).unwrap()).unwrap();
    assert!(saved.get("layers").is_some());

    let sample = ctl.sample_predictions().unwrap();
    assert_eq!(sample.predictions.len(), 5);
    assert_eq!(sample.true_labels.len(), 5);
}

#[test]
fn subscriber_sees_every_epoch_then_the_sample() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(AtomicBool::new(false));
    let ctl = controller(slow_factory(gate.clone(), Duration::ZERO, false), small_config(), &dir);

    ctl.start().unwrap();
    let events = ctl.subscribe();
    gate.store(true, Ordering::SeqCst);
    let events: Vec<_> = events.collect();

    // 60 training samples in batches of 8.
    let batches = events.iter().filter(|e| e.kind() == "batch_update").count();
    assert_eq!(batches, 3 * 8);
    let epochs: Vec<usize> = events
        .iter()
        .filter(|e| e.kind() == "epoch_complete")
        .map(|e| e.epoch())
        .collect();
    assert_eq!(epochs, vec![1, 2, 3]);
    match events.last() {
        Some(ProgressEvent::TrainingComplete { epoch, predictions, true_labels, .. }) => {
            assert_eq!(*epoch, 3);
            assert_eq!(predictions.len(), 5);
            assert_eq!(true_labels.len(), 5);
        }
        other => panic!("unexpected last event {:?}", other),
    }
    assert!(ctl.wait(Duration::from_secs(5)).is_some());
    assert_eq!(ctl.state(), SessionState::Completed);
}

#[test]
fn start_while_running_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(AtomicBool::new(false));
    let ctl = controller(slow_factory(gate.clone(), Duration::from_millis(2), false), small_config(), &dir);

    assert_eq!(ctl.start().unwrap(), StartStatus::Started);
    let deadline = Instant::now() + Duration::from_secs(5);
    while ctl.metrics().current_epoch == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    let before = ctl.metrics();
    assert_eq!(before.current_epoch, 1);

    assert_eq!(ctl.start().unwrap(), StartStatus::AlreadyRunning);
    let after = ctl.metrics();
    assert_eq!(after.current_epoch, 1);
    assert_eq!(after.state, SessionState::Running);

    gate.store(true, Ordering::SeqCst);
    assert_eq!(ctl.stop(), StopStatus::Stopped);
}

#[test]
fn stop_when_idle_reports_not_running() {
    let dir = tempfile::tempdir().unwrap();
    let ctl = controller(slow_factory(Arc::new(AtomicBool::new(true)), Duration::ZERO, false), small_config(), &dir);
    assert_eq!(ctl.stop(), StopStatus::NotRunning);
    assert_eq!(ctl.state(), SessionState::Idle);
}

#[test]
fn stop_mid_run_returns_to_idle_and_ends_the_stream() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainConfig { max_epochs: 50, min_epochs: 50, ..small_config() };
    let ctl = controller(slow_factory(Arc::new(AtomicBool::new(true)), Duration::from_millis(5), false), config, &dir);

    ctl.start().unwrap();
    let events = ctl.subscribe();
    match events.recv_timeout(Duration::from_secs(5)) {
        Recv::Event(ProgressEvent::BatchUpdate { .. }) => {}
        other => panic!("expected a batch update, got {:?}", other),
    }

    let t = Instant::now();
    assert_eq!(ctl.stop(), StopStatus::Stopped);
    assert!(t.elapsed() < Duration::from_secs(2));
    assert_eq!(ctl.state(), SessionState::Idle);
    assert!(!ctl.metrics().is_training);

    // Whatever was buffered before the stop drains, then the stream ends
    // without a terminal event.
    let mut rest = Vec::new();
    loop {
        match events.recv_timeout(Duration::from_secs(1)) {
            Recv::Event(e) => rest.push(e),
            Recv::Closed => break,
            Recv::Timeout => panic!("stream did not end after stop"),
        }
    }
    assert!(rest.iter().all(|e| !e.is_terminal()));
    assert_eq!(ctl.stop(), StopStatus::NotRunning);
}

#[test]
fn insufficient_samples_is_reported_synchronously() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainConfig { per_class_train: 800, ..small_config() };
    let ctl = controller(slow_factory(Arc::new(AtomicBool::new(true)), Duration::ZERO, false), config, &dir);

    match ctl.start() {
        Err(TrainError::InsufficientSamples { available: 30, required: 805, .. }) => {}
        other => panic!("expected InsufficientSamples, got {:?}", other),
    }
    assert_eq!(ctl.state(), SessionState::Idle);
}

#[test]
fn invalid_config_is_rejected_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainConfig { batch_size: 0, ..small_config() };
    let ctl = controller(slow_factory(Arc::new(AtomicBool::new(true)), Duration::ZERO, false), config, &dir);
    assert!(matches!(ctl.start(), Err(TrainError::InvalidConfig(_))));
    assert_eq!(ctl.state(), SessionState::Idle);
}

#[test]
fn failed_run_can_be_restarted() {
    let dir = tempfile::tempdir().unwrap();
    let ctl = controller(slow_factory(Arc::new(AtomicBool::new(true)), Duration::ZERO, true), small_config(), &dir);

    assert_eq!(ctl.start().unwrap(), StartStatus::Started);
    let outcome = ctl.wait(Duration::from_secs(5)).expect("worker should finish");
    assert!(matches!(outcome, TerminalOutcome::Failed { epoch: 1, .. }));

    let metrics = ctl.metrics();
    assert_eq!(metrics.state, SessionState::Failed);
    assert!(metrics.error_message.unwrap().contains("no gradient for you"));
    assert!(ctl.sample_predictions().is_none());

    assert_eq!(ctl.start().unwrap(), StartStatus::Started);
    ctl.wait(Duration::from_secs(5));
    assert_eq!(ctl.state(), SessionState::Failed);
}

#[test]
fn stop_joins_the_worker_while_another_caller_waits() {
    let dir = tempfile::tempdir().unwrap();
    let models = RunModels::default();
    let config = TrainConfig { max_epochs: 50, min_epochs: 50, ..small_config() };
    let ctl = controller(models.factory(Duration::from_millis(200)), config, &dir);

    ctl.start().unwrap();
    models.open(0);
    wait_until("the first batch", || ctl.metrics().current_epoch == 1);

    thread::scope(|scope| {
        let waiter = scope.spawn(|| ctl.wait(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(50));

        assert_eq!(ctl.stop(), StopStatus::Stopped);
        // The worker and its model are gone by the time stop returns.
        assert_eq!(models.live(), 0);
        assert_eq!(ctl.state(), SessionState::Idle);

        // The waiter wakes without joining anything twice.
        assert_eq!(waiter.join().unwrap(), None);
    });

    assert_eq!(ctl.start().unwrap(), StartStatus::Started);
    assert_eq!(models.live(), 1);
    models.open(1);
    assert_eq!(ctl.stop(), StopStatus::Stopped);
    assert_eq!(models.live(), 0);
}

#[test]
fn worker_that_outlives_the_join_timeout_is_detached() {
    let dir = tempfile::tempdir().unwrap();
    let models = RunModels::default();
    let config = TrainConfig { join_timeout_ms: 50, ..small_config() };
    let ctl = controller(models.factory(Duration::ZERO), config, &dir);

    ctl.start().unwrap();
    wait_until("the first epoch", || ctl.metrics().current_epoch == 1);

    // The gate is closed, so the worker cannot reach a cancellation check.
    let t = Instant::now();
    assert_eq!(ctl.stop(), StopStatus::Stopped);
    assert!(t.elapsed() >= Duration::from_millis(50));
    assert!(t.elapsed() < Duration::from_secs(1));
    assert_eq!(ctl.state(), SessionState::Idle);
    assert_eq!(models.live(), 1);

    assert_eq!(ctl.start().unwrap(), StartStatus::Started);
    wait_until("the new run's first epoch", || ctl.metrics().current_epoch == 1);
    let events = ctl.subscribe();

    // Release the detached worker only; it must exit without writing.
    models.open(0);
    wait_until("the detached worker to exit", || models.live() == 1);
    let metrics = ctl.metrics();
    assert_eq!(metrics.state, SessionState::Running);
    assert_eq!(metrics.current_epoch, 1);
    assert!(metrics.loss.is_empty());
    assert!(metrics.val_loss.is_empty());
    assert!(matches!(events.recv_timeout(Duration::from_millis(20)), Recv::Timeout));

    models.open(1);
    let outcome = ctl.wait(Duration::from_secs(10)).expect("new run should finish");
    assert!(matches!(outcome, TerminalOutcome::Completed { epochs: 3, .. }));
    let metrics = ctl.metrics();
    assert_eq!(metrics.loss.len(), 3);
    assert_eq!(metrics.current_epoch, 3);
    assert_eq!(models.live(), 0);
}
