use xxhash_rust::xxh3::xxh3_64;

/// Stable id derived from a tile content URI, used as the `TileId` for
/// nodes grafted in by sub-tileset extension and as the `RequestQueue`
/// dedup key for content fetches.
pub fn hash_uri(uri: &str) -> u64 {
    xxh3_64(uri.as_bytes())
}
