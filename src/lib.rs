#![recursion_limit = "256"]

//! Train a feed-forward MNIST classifier with Burn and export it for serving.

pub mod data;
pub mod error;
pub mod export;
pub mod inference;
pub mod input;
pub mod loader;
pub mod model;
pub mod renderer;
pub mod training;

pub use error::{DataError, Error, Result};

/// Backend for test cases
#[cfg(test)]
pub type TestBackend = burn::backend::NdArray<f32>;

/// Backend for autodiff test cases
#[cfg(test)]
pub type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;
