pub mod elasticsearch;
pub mod memory;

pub use elasticsearch::{ElasticConfig, ElasticsearchStore};
pub use memory::InMemoryIndex;
