//! # starcoder-models
//!
//! Model files and the reference network for starcoder.rs.
//!
//! Provides:
//! - **ggml loader**: hyperparameters, vocabulary and a tensor index over a memory map
//! - **Kernels**: layer norm, GELU, linear, multi-query attention (scalar f32)
//! - **ReferenceEngine**: a seeded single-block GPT-BigCode network implementing
//!   the evaluation port, used wherever no tensor backend is linked in

pub mod error;
pub mod ggml;
pub mod kernels;
pub mod mmap;
pub mod reference;

pub use error::{LoadError, ModelError};
pub use ggml::{load, GgmlType, LoadedModel, TensorInfo, WeightIndex, GGML_MAGIC};
pub use mmap::MappedFile;
pub use reference::{ReferenceConfig, ReferenceEngine};
