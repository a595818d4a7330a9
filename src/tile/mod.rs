mod index;
mod node;

pub use index::TileIndex;
pub use node::{ContentState, RefineMode, TileId, TileNode};
