//! Tether Core
//!
//! This crate provides a fine-grained reactivity engine. It implements:
//!
//! - Automatic dependency tracking between reactive state and its readers
//! - Lazy, cached computeds with version-based dirty checking
//! - Effects that re-run when what they read changes, batched so that one
//!   write wave runs each effect at most once
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: arena-backed Deps, Links, and subscriber nodes, the target
//!   registry, and the batch queues
//! - `reactive`: the runtime handle, effects, computeds, and signals
//! - `config`: runtime configuration (invalidation policy)
//! - `error`: error types surfaced by effects and computeds
//!
//! # Example
//!
//! ```rust
//! use tether_core::reactive::{Computed, Effect, Runtime, Signal};
//!
//! let runtime = Runtime::new();
//!
//! // Create a signal
//! let count = Signal::new(&runtime, 0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = Computed::new(&runtime, move || c.get() * 2);
//!
//! // Create an effect
//! let (c, d) = (count.clone(), doubled.clone());
//! let _effect = Effect::new(&runtime, move || {
//!     println!("Count: {}, Doubled: {}", c.get(), d.get().unwrap_or_default());
//! })
//! .unwrap();
//!
//! // Update the signal
//! count.set(5).unwrap();
//! // Effect automatically runs, prints: "Count: 5, Doubled: 10"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{InvalidationPolicy, InvalidationScope, RuntimeConfig};
pub use error::{BoxError, EffectOutput, ReactiveError};
pub use graph::{Key, SubFlags, TargetId, TrackOp, TriggerOp};
pub use reactive::{Computed, Effect, EffectOptions, Runtime, Signal, Target};
