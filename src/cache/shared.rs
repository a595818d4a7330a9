use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;

use crate::cache::Cache;
use crate::content::ContentPayload;

/// Process-wide content cache, mirroring the teacher's `cache_shared.rs`
/// `Lazy<Mutex<Option<Arc<..>>>>` singleton: a single application normally
/// wants one shared content cache, but tests construct their own `Cache`
/// instances directly rather than going through this slot.
static SHARED: OnceCell<Mutex<Option<Arc<Cache<ContentPayload>>>>> = OnceCell::new();

fn slot() -> &'static Mutex<Option<Arc<Cache<ContentPayload>>>> {
    SHARED.get_or_init(|| Mutex::new(None))
}

pub fn init_content_cache() -> Arc<Cache<ContentPayload>> {
    let mut guard = slot().lock().unwrap();
    guard.get_or_insert_with(|| Arc::new(Cache::new())).clone()
}

pub fn get_content_cache() -> Option<Arc<Cache<ContentPayload>>> {
    slot().lock().unwrap().clone()
}

pub fn destroy_content_cache() {
    if let Some(cache) = slot().lock().unwrap().take() {
        cache.clear();
    }
}
