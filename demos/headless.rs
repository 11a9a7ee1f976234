/// Headless training demo for ferrite-trainer.
///
/// Trains a small MLP on synthetic Gaussian blobs, printing live progress
/// from the progress channel, then stops a second run halfway through.
///
/// Run with:
///   cargo run --example headless --release

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use ferrite_trainer::data::synthetic::blob_source;
use ferrite_trainer::train::{ProgressEvent, Recv};
use ferrite_trainer::{
    JsonDirStore, MlpClassifier, NetworkSpec, SessionController, Sgd, TrainConfig,
};

fn main() {
    let mut rng = StdRng::seed_from_u64(42);
    let source = Arc::new(blob_source(60, 20, 4, 8, &mut rng).expect("blob dataset"));

    let config = TrainConfig {
        max_epochs: 25,
        min_epochs: 5,
        patience: 4,
        batch_size: 16,
        learning_rate: 0.1,
        per_class_train: 50,
        per_class_val: 10,
        test_size: 40,
        sample_size: 8,
        seed: Some(42),
        artifact_name: "blobs_demo".into(),
        ..TrainConfig::default()
    };

    let spec = NetworkSpec::classifier("blobs_demo", 8, &[16], 4);
    let factory = MlpClassifier::factory(spec, Sgd::new(config.learning_rate).with_clip_norm(1.0));
    let store = Arc::new(JsonDirStore::new(std::env::temp_dir().join("ferrite-trainer-demo")));
    let controller = SessionController::new(source, factory, store, config);

    // ── Run 1: to completion ────────────────────────────────────────────────
    println!("Run 1: training to completion (early stopping enabled)");
    controller.start().expect("start");
    for event in controller.subscribe() {
        match event {
            ProgressEvent::EpochComplete { epoch, loss, val_loss, val_accuracy, elapsed_ms, .. } => {
                println!(
                    "  epoch {:>2}  loss {:.4}  val_loss {:.4}  val_acc {:>6.2}%  ({} ms)",
                    epoch, loss, val_loss, val_accuracy * 100.0, elapsed_ms
                );
            }
            ProgressEvent::TrainingComplete { predictions, true_labels, .. } => {
                println!("  sample predictions: {:?}", predictions);
                println!("  true labels:        {:?}", true_labels);
            }
            ProgressEvent::Error { message, .. } => println!("  error: {}", message),
            ProgressEvent::BatchUpdate { .. } => {}
        }
    }
    controller.wait(Duration::from_secs(5));
    let m = controller.metrics();
    println!("  state {:?}, {} epochs, saved to {:?}", m.state, m.loss.len(), m.artifact_path);

    // ── Run 2: cancelled after the first epoch ─────────────────────────────
    println!("\nRun 2: stopping after the first epoch");
    controller.start().expect("start");
    let events = controller.subscribe();
    loop {
        match events.recv_timeout(Duration::from_secs(5)) {
            Recv::Event(ProgressEvent::EpochComplete { epoch, .. }) => {
                println!("  epoch {} done, stopping", epoch);
                break;
            }
            Recv::Event(_) => {}
            Recv::Timeout | Recv::Closed => break,
        }
    }
    let status = controller.stop();
    println!("  stop: {:?}", status);
    println!("  state {:?}, {} epochs recorded", controller.state(), controller.metrics().loss.len());
}
