use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::data::dataset::DatasetSource;
use crate::data::partition::DatasetSplit;
use crate::error::{ModelError, Result};
use crate::model::{EvalMetrics, TrainableModel};
use crate::session::record::{SamplePredictions, SessionHandle};
use crate::train::policy::StoppingPolicy;
use crate::train::progress::{ProgressChannel, ProgressEvent};
use crate::train::scheduler::PlateauScheduler;
use crate::train::train_config::TrainConfig;

/// Cooperative cancellation flag shared by the controller and the worker.
///
/// The worker polls it at batch and epoch boundaries, so a stop takes
/// effect within one batch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a worker run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    /// Finished naturally or by early stopping; the model was saved.
    Completed { epochs: usize, artifact: PathBuf },
    /// Cancelled at a checkpoint; `epochs` fully completed epochs.
    Cancelled { epochs: usize },
    Failed { epoch: usize, message: String },
}

/// Running loss / accuracy since the start of the epoch.
#[derive(Debug, Default)]
struct RunningMetrics {
    loss_sum: f64,
    batches: usize,
    correct: usize,
    seen: usize,
}

impl RunningMetrics {
    fn add(&mut self, batch_loss: f64, correct: usize, batch_len: usize) {
        self.loss_sum += batch_loss;
        self.batches += 1;
        self.correct += correct;
        self.seen += batch_len;
    }

    fn loss(&self) -> f64 {
        if self.batches == 0 { 0.0 } else { self.loss_sum / self.batches as f64 }
    }

    fn accuracy(&self) -> f64 {
        if self.seen == 0 { 0.0 } else { self.correct as f64 / self.seen as f64 }
    }
}

/// Owns one training run: the epoch/batch loop, validation, learning-rate
/// scheduling, early stopping, the final test-sample inference and
/// checkpointing.
///
/// Everything the loop talks to is an interface (model capability, progress
/// channel, session handle, checkpoint store); it never sees the transport.
pub struct TrainingWorker {
    pub source: Arc<DatasetSource>,
    pub split: DatasetSplit,
    pub config: TrainConfig,
    pub policy: StoppingPolicy,
    pub scheduler: PlateauScheduler,
    pub channel: ProgressChannel,
    pub cancel: CancelToken,
    pub session: SessionHandle,
    pub store: Arc<dyn CheckpointStore>,
    pub rng: StdRng,
    epoch: usize,
}

impl TrainingWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<DatasetSource>,
        split: DatasetSplit,
        config: TrainConfig,
        channel: ProgressChannel,
        cancel: CancelToken,
        session: SessionHandle,
        store: Arc<dyn CheckpointStore>,
        rng: StdRng,
    ) -> Self {
        let policy = config.policy();
        let scheduler = config.scheduler();
        TrainingWorker { source, split, config, policy, scheduler, channel, cancel, session, store, rng, epoch: 0 }
    }

    /// Runs to a terminal outcome. Errors and panics raised by the model,
    /// the data or the checkpoint store end the run as `Failed` with an
    /// `error` event; they never propagate out of this call.
    pub fn run(mut self, model: &mut dyn TrainableModel) -> TerminalOutcome {
        let run_id = self.session.run_id();
        info!(run_id, max_epochs = self.config.max_epochs, train = self.split.train.len(), "Training worker started");

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute(model)));
        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => self.report_failure(err.to_string()),
            Err(payload) => self.report_failure(ModelError::Panicked(panic_message(payload.as_ref())).to_string()),
        };

        self.channel.close();
        info!(run_id, ?outcome, "Training worker finished");
        outcome
    }

    fn cancelled(&self, epochs: usize) -> TerminalOutcome {
        info!(run_id = self.session.run_id(), epochs, "Training cancelled");
        TerminalOutcome::Cancelled { epochs }
    }

    fn execute(&mut self, model: &mut dyn TrainableModel) -> Result<TerminalOutcome> {
        let source = Arc::clone(&self.source);
        let train_set = &source.train;
        let mut epochs_run = 0;

        for epoch in 1..=self.config.max_epochs {
            if self.cancel.is_cancelled() {
                return Ok(self.cancelled(epochs_run));
            }
            self.epoch = epoch;
            self.session.begin_epoch(epoch);
            let t_start = Instant::now();

            // ── One pass over the training split ───────────────────────────
            let mut order = self.split.train.clone();
            order.shuffle(&mut self.rng);
            let mut running = RunningMetrics::default();

            for (i, indices) in order.chunks(self.config.batch_size).enumerate() {
                if self.cancel.is_cancelled() {
                    return Ok(self.cancelled(epochs_run));
                }
                let batch = train_set.batch(indices);
                let output = model.forward(&batch)?;
                if !output.loss.is_finite() {
                    return Err(ModelError::Diverged { epoch, batch: i + 1, loss: output.loss }.into());
                }
                model.backward_and_step(&output)?;

                running.add(output.loss, output.correct(&batch.labels), batch.len());
                self.channel.publish(ProgressEvent::BatchUpdate {
                    epoch,
                    batch: i + 1,
                    loss: running.loss(),
                    accuracy: running.accuracy(),
                });
            }

            // ── Validation (no parameter updates) ─────────────────────────
            let val = self.validate(model)?;
            let elapsed_ms = t_start.elapsed().as_millis() as u64;
            epochs_run = epoch;

            self.session.record_epoch(running.loss(), running.accuracy(), val.mean_loss(), val.accuracy());
            self.channel.publish(ProgressEvent::EpochComplete {
                epoch,
                loss: running.loss(),
                accuracy: running.accuracy(),
                val_loss: val.mean_loss(),
                val_accuracy: val.accuracy(),
                elapsed_ms,
            });
            info!(
                epoch,
                loss = running.loss(),
                accuracy = running.accuracy(),
                val_loss = val.mean_loss(),
                val_accuracy = val.accuracy(),
                elapsed_ms,
                "Epoch complete"
            );

            if let Some(lr) = model.learning_rate() {
                if let Some(new_lr) = self.scheduler.step(val.mean_loss(), lr) {
                    model.set_learning_rate(new_lr);
                    info!(epoch, from = lr, to = new_lr, "Validation loss plateaued; reducing learning rate");
                }
            }

            let policy = self.policy;
            let stop = self.session
                .update(|s| policy.should_stop(epoch, val.mean_loss(), &mut s.patience))
                .unwrap_or(false);
            if stop {
                info!(epoch, "Early stopping triggered");
                break;
            }
        }

        if self.cancel.is_cancelled() {
            return Ok(self.cancelled(epochs_run));
        }
        self.finish(model, epochs_run)
    }

    fn validate(&self, model: &mut dyn TrainableModel) -> Result<EvalMetrics> {
        let train_set = &self.source.train;
        let mut metrics = EvalMetrics::default();
        for indices in self.split.validation.chunks(self.config.batch_size) {
            metrics = metrics.merge(model.evaluate(&train_set.batch(indices))?);
        }
        Ok(metrics)
    }

    /// Test-sample inference, checkpoint, then the terminal event.
    fn finish(&self, model: &mut dyn TrainableModel, epochs: usize) -> Result<TerminalOutcome> {
        let test_set = self.split.test_set(&self.source);
        let take = self.config.sample_size.min(self.split.test.len());
        let batch = test_set.batch(&self.split.test[..take]);
        let predictions = model.predict(&batch.inputs)?;

        let payload = model.to_json()?;
        let artifact = self.store.save(&self.config.artifact_name, &payload)?;

        let images: Vec<Vec<f64>> = batch.inputs.iter().map(|x| x.to_vec()).collect();
        let sample = SamplePredictions {
            images: images.clone(),
            predictions: predictions.clone(),
            true_labels: batch.labels.clone(),
            image_shape: test_set.image_shape,
        };

        // The session may have entered `Stopping` meanwhile; then the run
        // counts as cancelled and no terminal event is sent.
        if !self.session.complete(artifact.clone(), sample) {
            return Ok(self.cancelled(epochs));
        }
        self.channel.publish(ProgressEvent::TrainingComplete {
            epoch: epochs,
            images,
            predictions,
            true_labels: batch.labels,
        });
        debug!(epochs, artifact = %artifact.display(), "Published training_complete");
        Ok(TerminalOutcome::Completed { epochs, artifact })
    }

    fn report_failure(&self, message: String) -> TerminalOutcome {
        error!(run_id = self.session.run_id(), epoch = self.epoch, error = %message, "Training failed");
        // A run already being stopped or replaced ends without an error event.
        if self.session.fail(&message) {
            self.channel.publish(ProgressEvent::Error { epoch: self.epoch, message: message.clone() });
        } else {
            warn!(run_id = self.session.run_id(), "Failure after the run was stopped or replaced");
        }
        TerminalOutcome::Failed { epoch: self.epoch, message }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
