// hydra_core/src/lib.rs

pub mod asset;
pub mod broker;
pub mod error;
pub mod exchange;
pub mod hydra;
pub mod ids;
pub mod order;
pub mod portfolio;
pub mod position;
pub mod settings;
pub mod strategy;
pub mod tracer;

pub use error::{HydraError, HydraResult};
pub use hydra::Hydra;
pub use settings::HydraConfig;
