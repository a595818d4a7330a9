use async_trait::async_trait;

use crate::error::CoreError;
use crate::tile::TileNode;

/// What a `Source` hands back for a node's `content_uri`. Decoding mesh and
/// texture bytes into GPU-ready buffers is a rendering concern and stays
/// outside this crate; these variants carry the payload opaquely so the
/// traversal engine only needs to know which bucket it landed in.
#[derive(Debug, Clone)]
pub enum ContentPayload {
    MeshSurface(Vec<u8>),
    TextureTile(Vec<u8>),
    PointBatch(Vec<u8>),
    /// A fetched tileset JSON document, still to be parsed and grafted by
    /// the sub-tileset extension.
    SubTileset(serde_json::Value),
}

impl ContentPayload {
    pub fn byte_len(&self) -> usize {
        match self {
            ContentPayload::MeshSurface(b) | ContentPayload::TextureTile(b) | ContentPayload::PointBatch(b) => {
                b.len()
            }
            ContentPayload::SubTileset(v) => v.to_string().len(),
        }
    }
}

/// The single collaborator this crate asks for tile content. A `Source`
/// implementation owns HTTP fetching, on-wire protocol parsing, and
/// mesh/texture decoding; this crate only calls `get_data` through the
/// `RequestQueue` and interprets the returned `ContentPayload` tag.
#[async_trait]
pub trait Source: Send + Sync {
    async fn get_data(&self, node: &TileNode) -> Result<ContentPayload, CoreError>;
}
