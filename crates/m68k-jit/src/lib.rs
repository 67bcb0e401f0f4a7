//! m68k → ARM dynamic binary translator core.
//!
//! A contiguous run of Motorola 68000-family instructions is compiled
//! into a block of AArch32 words — a *translation unit* — which the
//! engine executes in place of the guest sequence.
//!
//! # Architecture
//!
//! - [`translator::translate`] walks the guest stream, dispatching each
//!   opcode to its family lowering in [`lines`].
//! - [`ctx::BlockCtx`] is the per-block emission state: the code buffer,
//!   the register allocators, the cached-SR tracking and the batched
//!   guest-PC offset.
//! - [`ea`] compiles the twelve effective-address modes into loads,
//!   stores or address computations.
//! - [`liveness`] looks ahead for dead condition-code bits so lowerings
//!   can skip their flag updates.
//!
//! The crate never owns executable memory: a [`translator::CompiledBlock`]
//! is plain data, and the runtime crate turns it into a callable unit.

#![warn(missing_docs)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::match_same_arms)]

pub mod cond;
pub mod ctx;
pub mod ea;
pub mod lines;
pub mod liveness;
pub mod regalloc;
pub mod translator;

pub use ctx::{BlockCtx, CodeBuffer, Flow, HelperTable, JitConfig, REG_CTX, REG_PC, REG_SR};
pub use ea::OpSize;
pub use lines::linef::MathFn;
pub use regalloc::{FpReg, GuestReg};
pub use translator::{translate, Checkpoint, CompiledBlock};
