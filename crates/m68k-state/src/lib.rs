//! Motorola 680x0 guest register file, status flags and exception model.
//!
//! The [`GuestState`] struct is the in-memory contract between the
//! translator and the code it emits: it is `#[repr(C)]` and every emitted
//! load or store addresses a field at a fixed offset from the state base
//! register. At every translation-block boundary the struct reflects the
//! full architectural state; inside a block, values may live in host
//! registers with dirty bits tracking unflushed writes.

#![warn(missing_docs)]

pub mod exceptions;
pub mod fpu;
pub mod memory;
pub mod sr;
pub mod state;
pub mod vectors;

pub use fpu::{FpCond, FPSR_I, FPSR_N, FPSR_NAN, FPSR_Z};
pub use memory::{FlatMemory, GuestMem};
pub use sr::{Condition, C, N, V, X, Z};
pub use state::GuestState;
