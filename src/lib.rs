pub mod catalog;
pub mod cli;
pub mod codec;
pub mod config;
pub mod db;
pub mod descriptor;
pub mod distance;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod hamming;
pub mod index;
mod metrics;
pub mod pipeline;
pub mod search;
mod server;
pub mod utils;

pub use catalog::{CatalogEntry, CatalogRecord};
pub use config::Opts;
pub use descriptor::{Descriptor, DescriptorKind, KeypointShape, QueryDescriptors};
pub use error::{DecodeError, ExtractionError, SearchError};
pub use extract::{Extractor, ExtractorSet};
pub use index::{CatalogIndex, SearchResult};
pub use pipeline::{Pipeline, PipelineConfig};
pub use search::{EMPTY_CATALOG_MESSAGE, SearchResponse, Searcher};
