use std::sync::Arc;

use cgmath::{Matrix4, Vector3};
use serde::Deserialize;

use crate::error::CoreError;
use crate::spatial::{BoundingSphere, BoundingVolume, GeodeticRegion, Obb};
use crate::tile::{RefineMode, TileId, TileIndex, TileNode};

/// 3D Tiles 1.0 `tileset.json` (asset/root): only the fields this core
/// reads are modeled, everything else in a real document is ignored.
#[derive(Debug, Deserialize)]
pub struct RawTileset {
    pub root: RawTile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTile {
    pub bounding_volume: RawBoundingVolume,
    #[serde(default)]
    pub transform: Option<[f64; 16]>,
    pub geometric_error: f64,
    #[serde(default)]
    pub refine: Option<String>,
    #[serde(default)]
    pub children: Vec<RawTile>,
    #[serde(default)]
    pub content: Option<RawContent>,
}

#[derive(Debug, Deserialize)]
pub struct RawContent {
    pub uri: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawBoundingVolume {
    #[serde(rename = "box", default)]
    pub box_: Option<[f64; 12]>,
    #[serde(default)]
    pub sphere: Option<[f64; 4]>,
    #[serde(default)]
    pub region: Option<[f64; 6]>,
}

fn convert_bounding_volume(raw: &RawBoundingVolume) -> Result<BoundingVolume, CoreError> {
    if let Some(b) = raw.box_ {
        Ok(BoundingVolume::Box(Obb {
            center: Vector3::new(b[0], b[1], b[2]),
            half_axes: [
                Vector3::new(b[3], b[4], b[5]),
                Vector3::new(b[6], b[7], b[8]),
                Vector3::new(b[9], b[10], b[11]),
            ],
        }))
    } else if let Some(s) = raw.sphere {
        Ok(BoundingVolume::Sphere(BoundingSphere {
            center: Vector3::new(s[0], s[1], s[2]),
            radius: s[3],
        }))
    } else if let Some(r) = raw.region {
        Ok(BoundingVolume::Region(GeodeticRegion {
            west: r[0],
            south: r[1],
            east: r[2],
            north: r[3],
            min_height: r[4],
            max_height: r[5],
        }))
    } else {
        Err(CoreError::Invariant(
            "tileset boundingVolume has none of box/sphere/region".into(),
        ))
    }
}

/// 3D Tiles transforms are column-major 4x4 arrays, the same layout
/// `cgmath::Matrix4::new`'s column-major argument order expects.
fn convert_transform(raw: Option<[f64; 16]>) -> Matrix4<f64> {
    match raw {
        Some(m) => Matrix4::new(
            m[0], m[1], m[2], m[3], m[4], m[5], m[6], m[7], m[8], m[9], m[10], m[11], m[12], m[13], m[14], m[15],
        ),
        None => Matrix4::from_scale(1.0),
    }
}

fn convert_refine(raw: &Option<String>, inherited: RefineMode) -> Result<RefineMode, CoreError> {
    match raw.as_deref() {
        Some("ADD") => Ok(RefineMode::Add),
        Some("REPLACE") => Ok(RefineMode::Replace),
        Some(other) => Err(CoreError::Invariant(format!("unknown refine mode \"{other}\""))),
        None => Ok(inherited),
    }
}

#[allow(clippy::too_many_arguments)]
fn insert_subtree(
    index: &TileIndex,
    raw: &RawTile,
    parent: Option<TileId>,
    id: TileId,
    level: u32,
    base_key: &str,
    path: &str,
    inherited_refine: RefineMode,
    frame: u64,
    inserted: &mut Vec<TileId>,
) -> Result<(), CoreError> {
    let bounding_volume = convert_bounding_volume(&raw.bounding_volume)?;
    let refine = convert_refine(&raw.refine, inherited_refine)?;
    let local_transform = convert_transform(raw.transform);
    let content_uri = raw.content.as_ref().map(|c| c.uri.clone());

    let mut children = Vec::with_capacity(raw.children.len());
    for (i, child_raw) in raw.children.iter().enumerate() {
        let child_path = format!("{path}.{i}");
        let child_id = TileIndex::id_for_uri(&format!("{base_key}/{child_path}"));
        insert_subtree(
            index,
            child_raw,
            Some(id),
            child_id,
            level + 1,
            base_key,
            &child_path,
            refine,
            frame,
            inserted,
        )?;
        children.push(child_id);
    }

    index.insert(TileNode {
        id,
        parent,
        children,
        level,
        local_transform,
        bounding_volume,
        geometric_error: raw.geometric_error,
        refine,
        content_uri,
        sub_tileset_loaded: false,
        last_seen_frame: frame,
        content_state: Default::default(),
        visible: false,
        displayed: false,
        cleanable_since: None,
    });
    inserted.push(id);
    Ok(())
}

/// Builds the very first tree for a 3D Tiles entity from its top-level
/// `tileset.json`, overwriting whatever placeholder root `index` was
/// constructed with.
pub fn load_tileset_root(index: &TileIndex, json: &serde_json::Value) -> Result<Vec<TileId>, CoreError> {
    let raw: RawTileset = serde_json::from_value(json.clone())?;
    let mut inserted = Vec::new();
    insert_subtree(
        index,
        &raw.root,
        None,
        index.root(),
        0,
        "root",
        "root",
        RefineMode::Replace,
        0,
        &mut inserted,
    )?;
    Ok(inserted)
}

/// Parses `json` as a top-level `tileset.json` and returns a freshly built
/// `TileIndex` rooted at it.
pub fn build_index(json: &serde_json::Value) -> Result<Arc<TileIndex>, CoreError> {
    let raw: RawTileset = serde_json::from_value(json.clone())?;
    let placeholder = convert_bounding_volume(&raw.root.bounding_volume)?;
    let index = Arc::new(TileIndex::new(placeholder, raw.root.geometric_error, RefineMode::Replace));
    load_tileset_root(&index, json)?;
    Ok(index)
}

/// Grafts a fetched sub-tileset onto `leaf`. Node ids are derived from
/// `leaf`'s content URI and each child's path, so grafting the same
/// tileset JSON onto the same leaf twice reproduces the same ids rather
/// than growing the tree.
pub fn graft_sub_tileset(
    index: &TileIndex,
    leaf: TileId,
    base_key: &str,
    json: &serde_json::Value,
    frame: u64,
) -> Result<Vec<TileId>, CoreError> {
    let raw: RawTileset = serde_json::from_value(json.clone())?;
    let leaf_node = index
        .get(leaf)
        .ok_or_else(|| CoreError::Invariant(format!("sub-tileset graft target {leaf:?} missing from index")))?;

    let new_root_id = TileIndex::id_for_uri(&format!("{base_key}/root"));
    let mut inserted = Vec::new();
    insert_subtree(
        index,
        &raw.root,
        Some(leaf),
        new_root_id,
        leaf_node.level + 1,
        base_key,
        "root",
        leaf_node.refine,
        frame,
        &mut inserted,
    )?;
    index.set_children(leaf, vec![new_root_id]);
    index.mark_sub_tileset_loaded(leaf);
    Ok(inserted)
}
