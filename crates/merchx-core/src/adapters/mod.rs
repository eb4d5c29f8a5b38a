//! Concrete provider adapters.

mod paapi;
mod rainforest;

pub use paapi::PaapiAdapter;
pub use rainforest::RainforestAdapter;
