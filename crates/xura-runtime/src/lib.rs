//! # xura-runtime
//!
//! Runtime tensor values exchanged between host programs and Xura-compiled
//! native routines. A routine receives buffer pointers plus parallel shape and
//! stride arrays; this crate owns that representation and makes buffer
//! ownership explicit.
//!
//! - [`Tensor`]: shape, strides, dtype and a data buffer it may or may not own
//! - [`TensorList`]: a fixed group of tensor handles, destroyed deep or shallow
//! - [`compare`]: tolerance comparison with per-index diagnostics
//! - [`print`]: `%d`/`%s`/`%t`/`%e`/`%i` structured printing
//!
//! ```rust,no_run
//! use xura_runtime::{compare, print, Tensor};
//!
//! let a = Tensor::from_data(&[1.0f32, 2.0], &[2]).unwrap();
//! let b = Tensor::from_data(&[1.005f32, 2.02], &[2]).unwrap();
//! assert!(compare::are_close::<f32, _, _>(&a, &b, 0.01, 0.01));
//! print::print("%s%d\n", &a).unwrap();
//! ```

pub mod alloc;
pub mod compare;
pub mod config;
pub mod dtype;
pub mod error;
pub mod list;
pub mod print;
pub mod random;
pub mod shape;
pub mod tensor;
mod typed;

pub use alloc::{Allocator, Global};
pub use compare::{Closeness, Tolerance};
pub use config::RuntimeConfig;
pub use dtype::{dtype_of, DType, Element};
pub use error::RuntimeError;
pub use list::{TensorHandle, TensorList};
pub use tensor::Tensor;

pub type Result<T> = std::result::Result<T, RuntimeError>;
