pub mod batch;
pub mod device_map;
pub mod engine;
mod engine_factory;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod request;
mod sketch;
pub mod store;
mod util;

#[cfg(test)]
mod testing;

pub use batch::*;
pub use device_map::*;
pub use engine::*;
pub use engine_factory::*;
pub use error::*;
pub use orchestrator::*;
pub use progress::*;
pub use request::*;
pub use sketch::SketchEngine;
pub use store::*;
pub(crate) use util::*;
