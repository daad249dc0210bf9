//! Public types for the Mimir API

mod params;
mod response;

pub use params::{GenerationParams, ParamsKey};
pub use response::{EngineResponse, ResponseStatus, StreamEvent};
