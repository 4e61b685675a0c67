// hydra_core/src/error.rs

//! Typed error taxonomy for the simulation kernel.
//! Every fallible public operation returns `Result<T, HydraError>`.

/// Errors surfaced synchronously at the call site. The core never
/// silently absorbs an error; a failed order submission leaves no
/// trace in history or tracer logs.
#[derive(Debug, thiserror::Error)]
pub enum HydraError {
    /// Duplicate id, unknown id at registration time, mutation after
    /// `build()`, a strategy missing a required callback.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Operation attempted in the wrong phase (`run` before `build`,
    /// `register_asset` after `build`).
    #[error("state error: {message}")]
    State { message: String },

    /// Unknown asset/portfolio/exchange/broker id.
    #[error("lookup error: unknown {kind} '{id}'")]
    Lookup { kind: &'static str, id: String },

    /// Non-monotonic timestamps, header/shape mismatch, a zero-unit
    /// order.
    #[error("data error: {message}")]
    Data { message: String },

    /// Column index or history offset out of bounds.
    #[error("out of range: {message}")]
    OutOfRange { message: String },

    /// Aggregation mismatch between a node and its children. Always
    /// fatal; never caught or retried.
    #[error("internal invariant violated: {message}")]
    InternalInvariant { message: String },
}

impl HydraError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::State { message: message.into() }
    }

    pub fn lookup(kind: &'static str, id: impl Into<String>) -> Self {
        Self::Lookup { kind, id: id.into() }
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::Data { message: message.into() }
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::OutOfRange { message: message.into() }
    }

    pub fn internal_invariant(message: impl Into<String>) -> Self {
        Self::InternalInvariant { message: message.into() }
    }
}

pub type HydraResult<T> = Result<T, HydraError>;
