pub mod config;
pub mod error;
pub mod db;
pub mod json;
pub mod graph;
pub mod store;
pub mod retrieval;
pub mod sequence;
pub mod generation;
pub mod chain;
pub mod export;
pub mod pipeline;

pub use config::Config;
pub use error::{CurriculumError, Result};
pub use graph::{Entity, EntityType, GraphNormalizer, Relation, RelationType, Subgraph};
pub use pipeline::{CurriculumEngine, GraphBuilder};
