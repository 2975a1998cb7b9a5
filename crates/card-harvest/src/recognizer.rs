//! Text recognition on image crops via ONNX Runtime.
//!
//! The engine is an explicitly constructed value handed to the region
//! extractor. [`OnnxRecognizer`] runs a CTC text-recognition model; tests
//! substitute their own [`TextRecognizer`].

use std::path::Path;

use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;

use crate::config::RecognizerSettings;
use crate::types::{HarvestError, HarvestResult};

/// Dictionary used when none is configured.
const DEFAULT_DICTIONARY: &str = "0123456789";

/// Narrowest tensor width fed to the model.
const MIN_INPUT_WIDTH: u32 = 8;

/// One recognized line of text.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Mean per-character probability in `[0, 1]`.
    pub confidence: f32,
}

/// Recognizes text in an image, restricted to an alphabet.
pub trait TextRecognizer {
    /// Recognized lines, best first. An empty vector means nothing was read.
    fn recognize(&mut self, img: &DynamicImage, allowlist: &str) -> HarvestResult<Vec<Recognition>>;
}

/// CTC recognizer backed by an ONNX model.
pub struct OnnxRecognizer {
    session: Session,
    /// Class `i + 1` of the model output; class 0 is the CTC blank.
    dictionary: Vec<String>,
    input_height: u32,
    logits: bool,
}

impl OnnxRecognizer {
    /// Load the configured model and dictionary.
    pub fn new(settings: &RecognizerSettings) -> HarvestResult<Self> {
        let path = settings.model.as_deref().ok_or_else(|| {
            HarvestError::ModelNotAvailable("local.recognizer.model is not set".into())
        })?;
        if !path.exists() {
            return Err(HarvestError::ModelNotAvailable(format!(
                "recognition model not found at {}",
                path.display()
            )));
        }

        let dictionary = match &settings.dictionary {
            Some(dict) => load_dictionary(dict)?,
            None => DEFAULT_DICTIONARY.chars().map(String::from).collect(),
        };

        tracing::info!("Loading recognition model from {}", path.display());
        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| HarvestError::Recognition(format!("Failed to load ONNX model: {e}")))?;

        tracing::info!(
            "Recognition model loaded ({} dictionary entries)",
            dictionary.len()
        );
        Ok(Self {
            session,
            dictionary,
            input_height: settings.input_height.max(1),
            logits: settings.logits,
        })
    }
}

impl TextRecognizer for OnnxRecognizer {
    fn recognize(&mut self, img: &DynamicImage, allowlist: &str) -> HarvestResult<Vec<Recognition>> {
        let tensor = preprocess(img, self.input_height);
        let input_tensor = Tensor::from_array(tensor).map_err(|e| {
            HarvestError::Recognition(format!("Failed to create input tensor: {e}"))
        })?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| HarvestError::Recognition(format!("ONNX inference failed: {e}")))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| HarvestError::Recognition(format!("Failed to extract output: {e}")))?;

        // [1, T, C]
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        let (steps, classes) = match dims.as_slice() {
            [1, t, c] => (*t, *c),
            [t, c] => (*t, *c),
            other => {
                return Err(HarvestError::Recognition(format!(
                    "unexpected output shape {other:?}"
                )))
            }
        };

        let allowed = allowed_classes(&self.dictionary, allowlist, classes);
        let mut rows: Vec<Vec<f32>> = data.chunks(classes).take(steps).map(<[f32]>::to_vec).collect();
        if self.logits {
            rows.iter_mut().for_each(|row| softmax(row));
        }

        Ok(ctc_greedy_decode(&rows, &allowed, &self.dictionary)
            .into_iter()
            .collect())
    }
}

fn load_dictionary(path: &Path) -> HarvestResult<Vec<String>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        HarvestError::ModelNotAvailable(format!(
            "cannot read dictionary {}: {e}",
            path.display()
        ))
    })?;
    let entries: Vec<String> = text
        .lines()
        .map(|l| l.trim_end_matches('\r').to_string())
        .collect();
    if entries.iter().all(String::is_empty) {
        return Err(HarvestError::ModelNotAvailable(format!(
            "dictionary {} is empty",
            path.display()
        )));
    }
    Ok(entries)
}

/// RGB, resized to `height` keeping aspect ratio, scaled to [-1, 1], NCHW.
fn preprocess(img: &DynamicImage, height: u32) -> Array4<f32> {
    let (w, h) = (img.width().max(1), img.height().max(1));
    let width = ((w as f64 * height as f64 / h as f64).round() as u32).max(MIN_INPUT_WIDTH);
    let rgb = img
        .resize_exact(width, height, image::imageops::FilterType::Triangle)
        .to_rgb8();

    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3usize {
            let val = pixel[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (val - 0.5) / 0.5;
        }
    }
    tensor
}

/// Class mask: blank plus every dictionary entry made only of allowlisted chars.
fn allowed_classes(dictionary: &[String], allowlist: &str, classes: usize) -> Vec<bool> {
    let mut allowed = vec![false; classes];
    if let Some(blank) = allowed.first_mut() {
        *blank = true;
    }
    for (i, entry) in dictionary.iter().enumerate() {
        let class = i + 1;
        if class < classes && !entry.is_empty() && entry.chars().all(|c| allowlist.contains(c)) {
            allowed[class] = true;
        }
    }
    allowed
}

fn softmax(row: &mut [f32]) {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in row.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        row.iter_mut().for_each(|v| *v /= sum);
    }
}

/// Best allowed class per step; repeats collapsed, blanks dropped.
fn ctc_greedy_decode(rows: &[Vec<f32>], allowed: &[bool], dictionary: &[String]) -> Option<Recognition> {
    let mut text = String::new();
    let mut probs = Vec::new();
    let mut previous = 0usize;

    for row in rows {
        let best = row
            .iter()
            .enumerate()
            .filter(|(class, _)| allowed.get(*class).copied().unwrap_or(false))
            .max_by(|a, b| a.1.total_cmp(b.1));
        let Some((class, &p)) = best else { continue };

        if class != 0 && class != previous {
            if let Some(entry) = dictionary.get(class - 1) {
                text.push_str(entry);
                probs.push(p);
            }
        }
        previous = class;
    }

    if text.is_empty() {
        return None;
    }
    let confidence = probs.iter().sum::<f32>() / probs.len() as f32;
    Some(Recognition { text, confidence })
}
