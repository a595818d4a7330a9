use crate::spatial::Camera;
use crate::tile::TileId;

/// Opaque handle to the current frame's displayed set. The core only ever
/// hands this back to the `Renderer`; GPU buffers, materials, and the
/// scene graph itself are the renderer's concern and stay outside this
/// crate (§1 Non-goals: GPU rendering itself).
#[derive(Debug, Clone, Default)]
pub struct SceneHandle {
    pub displayed: Vec<TileId>,
}

/// A screen-space rectangle the renderer is asked to fill with an
/// id+depth+uv encoding for picking, centered on the cursor (§9 Design
/// Notes).
#[derive(Debug, Clone, Copy)]
pub struct PickZone {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Decoded contents of one texel of a picking render target.
#[derive(Debug, Clone, Copy, Default)]
pub struct PickTexel {
    pub tile_id: Option<TileId>,
    pub depth: f32,
    pub uv: (f32, f32),
}

/// A small CPU-readable buffer the renderer fills in during
/// `Renderer::render_to_buffer`.
#[derive(Debug, Clone)]
pub struct PickBuffer {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<PickTexel>,
}

impl PickBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        PickBuffer {
            width,
            height,
            texels: vec![PickTexel::default(); (width as usize) * (height as usize)],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Option<&PickTexel> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.texels.get((y * self.width + x) as usize)
    }

    pub fn set(&mut self, x: u32, y: u32, texel: PickTexel) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = (y * self.width + x) as usize;
        self.texels[idx] = texel;
    }
}

/// Renderer-reported counters surfaced to inspector-style collaborators.
#[derive(Debug, Clone, Copy, Default)]
pub struct RendererInfo {
    pub frame_count: u64,
    pub draw_calls: u32,
}

/// The only rendering-side contract this crate assumes (§6, §9): the core
/// never reads pixels itself except through `render_to_buffer`, and never
/// assumes a particular 3D library behind it.
pub trait Renderer: Send + Sync {
    fn render(&self, scene: &SceneHandle, camera: &Camera);
    fn render_to_buffer(&self, zone: PickZone, target: &mut PickBuffer);
    fn get_info(&self) -> RendererInfo;
}
