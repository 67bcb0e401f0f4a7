//! Runtime half of the m68k JIT: translation-unit publication, the
//! bucketed translation cache with LRU eviction and soft flush, the
//! dispatcher engine, host cache maintenance and the helper routines
//! emitted code calls into.
//!
//! The translator crate produces plain [`m68k_jit::CompiledBlock`]s;
//! this crate binds them to aligned executable memory ([`unit::Tu`]),
//! caches them ([`cache::Cache`]) and drives execution
//! ([`engine::Engine`]).

#![warn(missing_docs)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]

pub mod cache;
pub mod crc32;
pub mod engine;
pub mod helpers;
pub mod hostcache;
pub mod unit;

pub use cache::{hash, Cache};
pub use crc32::crc32;
pub use engine::{Engine, EngineConfig, EngineError, EngineStats};
#[cfg(target_arch = "arm")]
pub use hostcache::ArmHostCache;
pub use hostcache::{HostCache, NullHostCache};
pub use unit::{CodeBuf, Tu};
