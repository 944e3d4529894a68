//! ONNX Runtime backend for [`Model`].
//!
//! Each model file gets one session. Sessions need exclusive access to
//! run, so the session sits behind a `Mutex`; rayon workers predicting
//! patches of the same image queue on it.

use std::path::Path;
use std::sync::Mutex;

use histoscope_pipeline::{InferenceError, Model, PatchTensor};
use ort::session::Session;
use ort::value::Tensor;

/// A model loaded from an `.onnx` file.
pub struct OnnxModel {
    session: Mutex<Session>,
}

impl OnnxModel {
    /// Load and optimize the model at `path`.
    ///
    /// # Errors
    ///
    /// Returns the runtime's error if the file cannot be read or is not
    /// a valid ONNX graph.
    pub fn from_file(path: &Path) -> ort::Result<Self> {
        let session = Session::builder()?.commit_from_file(path)?;
        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

fn runtime(e: impl std::fmt::Display) -> InferenceError {
    InferenceError::Runtime(e.to_string())
}

impl Model for OnnxModel {
    fn predict(&self, input: &PatchTensor) -> Result<Vec<f32>, InferenceError> {
        let tensor = Tensor::from_array((input.shape(), input.data().to_vec())).map_err(runtime)?;
        let mut session = self
            .session
            .lock()
            .map_err(|_| InferenceError::Runtime("session lock poisoned".into()))?;
        let outputs = session.run(ort::inputs![tensor]).map_err(runtime)?;
        let (_, data) = outputs[0].try_extract_tensor::<f32>().map_err(runtime)?;
        Ok(data.to_vec())
    }
}
