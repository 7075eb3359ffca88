//! Sparsering - Semiring-Parameterized Sparse Linear Algebra
//!
//! A GraphBLAS-style engine: graphs are sparse matrices, and matrix
//! operations are parameterized by **semirings** — an additive monoid
//! plus a multiplicative binary operator over arbitrary element types.
//! Everything funnels through one expression shape:
//!
//! ```text
//! C⟨M⟩ = accum(C, A ⊗₊ B)
//! ```
//!
//! generalized multiply and elementwise combine under an optional mask,
//! with optional transposes and accumulation.
//!
//! # Quick Start
//!
//! ```
//! use sparsering::{config, mxm, Config, Descriptor, Matrix, Scalar, Semiring, Type};
//!
//! config::init(Config::default()).ok();
//!
//! // a tiny cyclic graph as an adjacency matrix
//! let mut a = Matrix::new(Type::INT64, 3, 3).unwrap();
//! a.build(
//!     &[0, 1, 2],
//!     &[1, 2, 0],
//!     &[Scalar::Int64(1), Scalar::Int64(1), Scalar::Int64(1)],
//!     None,
//! )
//! .unwrap();
//!
//! // two-hop reachability counts: C = A * A
//! let sr = Semiring::plus_times(Type::INT64).unwrap();
//! let mut c = Matrix::new(Type::INT64, 3, 3).unwrap();
//! mxm(&mut c, None, None, &sr, &a, &a, &Descriptor::default()).unwrap();
//! assert_eq!(c.nvals().unwrap(), 3);
//! ```
//!
//! # Core Concepts
//!
//! ## Formats
//!
//! A matrix lives in one of four formats — sparse, hypersparse, bitmap,
//! full — in either row or column orientation. The conformer moves
//! matrices between formats by density thresholds; transitions never
//! change the logical `{(i, j, v)}` set.
//!
//! ## Deferred work
//!
//! Deletions leave **zombies** (bit-inverted indices), insertions queue
//! as **pending tuples**, and vectors may run **jumbled** (unsorted).
//! `Matrix::wait` settles all three; observers force it on demand.
//!
//! ## Kernels
//!
//! The multiply engines consult a registry of fused, fully-typed inner
//! loops keyed by `(⊕, ⊗, type)`. Anything the registry does not carry
//! — user operators, user types, mixed-type casts — runs through the
//! generic function-pointer path with identical semantics.
//!
//! # Modules
//!
//! - [`types`]: element types, dynamic scalars, the cast table
//! - [`ops`]: unary / binary / index-unary operator descriptors
//! - [`algebra`]: monoids and semirings
//! - [`matrix`]: the multi-format container and lifecycle operations
//! - [`mxm`], [`ewise_add`], [`ewise_mult`], [`apply_unary`],
//!   [`select`], [`reduce_scalar`], [`transpose`], [`assign`],
//!   [`kronecker`]: the primitives

#[path = "core/error.rs"]
pub mod error;

#[path = "core/types.rs"]
pub mod types;

#[path = "core/ops.rs"]
pub mod ops;

#[path = "core/algebra.rs"]
pub mod algebra;

#[path = "core/config.rs"]
pub mod config;

#[path = "mat/matrix.rs"]
pub mod matrix;

#[path = "mat/convert.rs"]
mod convert;

#[path = "mat/pending.rs"]
mod pending;

#[path = "engine/slicer.rs"]
mod slicer;

#[path = "engine/registry.rs"]
mod registry;

#[path = "engine/mask.rs"]
mod mask;

#[path = "engine/transpose.rs"]
mod transpose;

#[path = "engine/mxm.rs"]
mod mxm_engine;

#[path = "engine/ewise.rs"]
mod ewise;

#[path = "engine/apply.rs"]
mod apply;

#[path = "engine/reduce.rs"]
mod reduce;

#[path = "engine/assign.rs"]
mod assign_engine;

#[path = "engine/kron.rs"]
mod kron;

// Re-export the public surface
pub use algebra::{Monoid, Semiring};
pub use apply::{apply_bind1st, apply_bind2nd, apply_index_unary, apply_unary, select};
pub use assign_engine::{assign, assign_scalar, subassign, subassign_scalar, IndexList};
pub use config::{finalize, init, AxbMethod, Config, Descriptor, Mode};
pub use error::{Error, Result};
pub use ewise::{ewise_add, ewise_mult};
pub use kron::kronecker;
pub use matrix::{sparsity, Format, Matrix};
pub use mxm_engine::{mxm, mxv, vxm};
pub use ops::{
    boolean_rename, flip_opcode, BinaryOp, BinaryOpcode, IndexUnaryOp, IndexUnaryOpcode, UnaryOp,
    UnaryOpcode,
};
pub use reduce::{reduce_scalar, reduce_scalar_raw, reduce_vector};
pub use transpose::transpose;
pub use types::{Scalar, Type, TypeCode};
