use std::path::PathBuf;

use float_ord::FloatOrd;
use ndarray::{Array2, Array4, ArrayView1, ArrayView2, Axis, Ix2};
use ort::{inputs, ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::{Error, Prediction, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "directml")]
    DirectML,
}

const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "directml")]
    ExecutionProvider::DirectML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];

#[cfg(feature = "cuda")]
fn setup_cuda() -> ExecutionProviderDispatch {
    use ort::CUDAExecutionProvider;

    CUDAExecutionProvider::default().build()
}

#[cfg(feature = "directml")]
fn setup_directml() -> ExecutionProviderDispatch {
    use ort::DirectMLExecutionProvider;

    DirectMLExecutionProvider::default().build()
}

#[cfg(feature = "coreml")]
fn setup_coreml() -> ExecutionProviderDispatch {
    use ort::CoreMLExecutionProvider;

    CoreMLExecutionProvider::default().build()
}

pub struct CharClassifierBuilder {
    model_path: PathBuf,
    threads: usize,
    input_name: String,
    execution_providers: Vec<ExecutionProvider>,
}

impl CharClassifierBuilder {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            threads: 4,
            input_name: "input".to_string(),
            execution_providers: DEFAULT_PROVIDERS.to_vec(),
        }
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn input_name(mut self, name: impl Into<String>) -> Self {
        self.input_name = name.into();
        self
    }

    pub fn with_execution_providers(
        mut self,
        providers: impl IntoIterator<Item = ExecutionProvider>,
    ) -> Self {
        self.execution_providers = providers.into_iter().collect();
        self
    }

    #[instrument(skip(self), level = "debug")]
    pub fn build(self) -> Result<CharClassifier> {
        let execution_providers = self.execution_providers.iter().filter_map(
            |provider| -> Option<ExecutionProviderDispatch> {
                match provider {
                    ExecutionProvider::Default => None,
                    #[cfg(feature = "coreml")]
                    ExecutionProvider::CoreML => Some(setup_coreml()),
                    #[cfg(feature = "cuda")]
                    ExecutionProvider::Cuda => Some(setup_cuda()),
                    #[cfg(feature = "directml")]
                    ExecutionProvider::DirectML => Some(setup_directml()),
                }
            },
        );

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_parallel_execution(true)?
            .with_inter_threads(self.threads)?
            .with_intra_threads(self.threads)?
            .with_execution_providers(execution_providers)?
            .commit_from_file(&self.model_path)?;

        log::debug!("Classifier inputs: {:?}", session.inputs);
        log::debug!("Classifier outputs: {:?}", session.outputs);

        Ok(CharClassifier {
            session,
            input_name: self.input_name,
        })
    }
}

/// ONNX export of the character classifier. Takes `(N, 3, S, S)` crops in
/// `[-1, 1]` and returns `(N, classes)` log-probabilities.
pub struct CharClassifier {
    session: Session,
    input_name: String,
}

impl CharClassifier {
    #[instrument(level = "debug", skip(self, images))]
    pub fn log_probs(&self, images: &Array4<f32>) -> Result<Array2<f32>> {
        let outputs = self
            .session
            .run(inputs![self.input_name.as_str() => images.clone()]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| Error::Model("no outputs".to_string()))?;
        let output = output
            .try_extract_tensor::<f32>()?
            .into_dimensionality::<Ix2>()?
            .to_owned();
        log::trace!("Output tensor size: {:?}", output.dim());

        let batch_size = images.len_of(Axis(0));
        if output.nrows() != batch_size {
            return Err(Error::Model(format!(
                "{} rows for a batch of {batch_size}",
                output.nrows()
            )));
        }
        Ok(output)
    }

    pub fn classify(&self, images: &Array4<f32>) -> Result<Vec<Prediction>> {
        Ok(predictions(self.log_probs(images)?.view()))
    }
}

/// Arg-max class of every row with its probability.
pub fn predictions(log_probs: ArrayView2<f32>) -> Vec<Prediction> {
    log_probs
        .outer_iter()
        .filter_map(|row| {
            row.iter()
                .enumerate()
                .max_by_key(|(_, score)| FloatOrd(**score))
                .map(|(index, score)| Prediction {
                    index,
                    score: score.exp(),
                })
        })
        .collect()
}

/// Mean negative log-likelihood of the target classes.
pub fn nll_loss(log_probs: ArrayView2<f32>, targets: ArrayView1<i64>) -> f32 {
    if targets.is_empty() {
        return 0.0;
    }
    let total = targets
        .iter()
        .zip(log_probs.outer_iter())
        .map(|(&target, row)| {
            -row.get(target as usize)
                .copied()
                .unwrap_or(f32::NEG_INFINITY)
        })
        .sum::<f32>();
    total / targets.len() as f32
}

/// Running accuracy and loss over evaluated batches.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Evaluation {
    pub correct: usize,
    pub total: usize,
    pub loss_sum: f64,
}

impl Evaluation {
    pub fn update(&mut self, log_probs: ArrayView2<f32>, targets: ArrayView1<i64>) {
        let predicted = predictions(log_probs);
        self.correct += predicted
            .iter()
            .zip(targets.iter())
            .filter(|&(p, &t)| p.index as i64 == t)
            .count();
        self.total += targets.len();
        self.loss_sum += nll_loss(log_probs, targets) as f64 * targets.len() as f64;
    }

    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total as f64
    }

    pub fn mean_loss(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.loss_sum / self.total as f64
    }
}
