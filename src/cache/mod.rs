mod entry;
mod shared;

pub use entry::{Cache, CacheOptions, OnDelete};
pub use shared::{destroy_content_cache, get_content_cache, init_content_cache};
