//! Error types for the reactive engine.
//!
//! User closures (effect bodies, schedulers, computed getters) report failure
//! through [`BoxError`]. The engine wraps those failures in [`ReactiveError`]
//! together with the identity of the subscriber that produced them.

use thiserror::Error;

use crate::reactive::SubscriberId;

/// Type-erased error returned by user closures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by effects, computeds and batch drains.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// An effect body or its scheduler returned an error.
    #[error("effect {subscriber} failed")]
    Effect {
        subscriber: SubscriberId,
        #[source]
        source: BoxError,
    },

    /// A computed getter returned an error while re-evaluating.
    #[error("computed {subscriber} failed to evaluate")]
    Computed {
        subscriber: SubscriberId,
        #[source]
        source: BoxError,
    },

    /// A computed was read from inside its own getter before it had a value.
    #[error("computed {subscriber} was read while evaluating itself")]
    CyclicRead { subscriber: SubscriberId },
}

impl ReactiveError {
    /// The subscriber the error originated from.
    pub fn subscriber(&self) -> SubscriberId {
        match self {
            Self::Effect { subscriber, .. }
            | Self::Computed { subscriber, .. }
            | Self::CyclicRead { subscriber } => *subscriber,
        }
    }
}

/// Return types accepted from effect bodies.
///
/// Lets an effect closure return either `()` or a `Result`.
pub trait EffectOutput {
    fn into_result(self) -> Result<(), BoxError>;
}

impl EffectOutput for () {
    fn into_result(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<E> EffectOutput for Result<(), E>
where
    E: Into<BoxError>,
{
    fn into_result(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}
