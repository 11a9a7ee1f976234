use serde::Serialize;

use crate::routes::{bytes_response, error_response, json_response, Reply};
use crate::state::SharedState;
use crate::util::image::grayscale_png;

#[derive(Serialize)]
struct PredictionsBody<'a> {
    predictions: &'a [usize],
    true_labels: &'a [usize],
    accuracy: f64,
    /// `(width, height)` when the samples are images.
    image_shape: Option<(u32, u32)>,
    /// Paths of the PNG previews, one per sample.
    images: Vec<String>,
}

/// `GET /get_random_predictions` — test-sample inference of the last
/// completed run.
pub fn handle_random(state: &SharedState) -> Reply {
    let sample = match state.controller.sample_predictions() {
        Some(s) => s,
        None => return error_response(400, "no completed training run"),
    };
    let hits = sample.predictions.iter().zip(&sample.true_labels).filter(|(p, t)| p == t).count();
    let images = match sample.image_shape {
        Some(_) => (0..sample.predictions.len()).map(|i| format!("/sample_image?index={}", i)).collect(),
        None => Vec::new(),
    };
    json_response(200, &PredictionsBody {
        predictions: &sample.predictions,
        true_labels: &sample.true_labels,
        accuracy: if sample.predictions.is_empty() { 0.0 } else { hits as f64 / sample.predictions.len() as f64 },
        image_shape: sample.image_shape,
        images,
    })
}

/// `GET /sample_image?index=N` — one sample of the last completed run as PNG.
pub fn handle_image(query: &str, state: &SharedState) -> Reply {
    let index = query
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .find(|(k, _)| *k == "index")
        .and_then(|(_, v)| v.parse::<usize>().ok());
    let index = match index {
        Some(i) => i,
        None => return error_response(400, "missing or invalid 'index' parameter"),
    };

    let sample = match state.controller.sample_predictions() {
        Some(s) => s,
        None => return error_response(400, "no completed training run"),
    };
    let (width, height) = match sample.image_shape {
        Some(shape) => shape,
        None => return error_response(400, "samples of this dataset are not images"),
    };
    let pixels = match sample.images.get(index) {
        Some(p) => p,
        None => return error_response(404, "sample index out of range"),
    };

    match grayscale_png(pixels, width, height) {
        Ok(png) => bytes_response(200, "image/png", png),
        Err(e) => error_response(500, &e),
    }
}
