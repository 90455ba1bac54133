pub mod registry;

pub use registry::{PolicyFactory, StrategyManager};
