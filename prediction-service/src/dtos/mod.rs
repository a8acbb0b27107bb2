pub mod predictions;

pub use predictions::{ObjectLocation, PredictionRequest, PredictionResponse};
