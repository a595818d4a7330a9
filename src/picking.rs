use std::sync::Arc;

use crate::event::{CoreEvent, EventBus};
use crate::render::{PickBuffer, PickZone, Renderer};
use crate::tile::TileId;

/// Resolved result of a cursor pick: which tile was hit, its depth in the
/// picking target, and the sub-pixel coordinate within that tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickResult {
    pub tile: TileId,
    pub depth: f32,
    pub uv: (f32, f32),
}

/// Default size, in pixels, of the square picking target rendered around
/// the cursor. Small enough to be cheap per pick, large enough to tolerate
/// a pixel or two of cursor jitter.
const DEFAULT_ZONE_SIZE: u32 = 5;

/// Drives the id+depth+uv picking sequence described in §9 Design Notes:
/// render the displayed set into a small target around the cursor with a
/// special material, read it back, decode the tile id and sub-pixel
/// coordinate, and publish `picking-end`. The renderer owns the actual
/// GPU pass behind `render_to_buffer`; this only drives the
/// request/readback/decode/notify sequence.
pub struct Picker {
    renderer: Arc<dyn Renderer>,
    events: Arc<EventBus>,
    zone_size: u32,
}

impl Picker {
    pub fn new(renderer: Arc<dyn Renderer>, events: Arc<EventBus>) -> Self {
        Picker {
            renderer,
            events,
            zone_size: DEFAULT_ZONE_SIZE,
        }
    }

    pub fn with_zone_size(mut self, zone_size: u32) -> Self {
        self.zone_size = zone_size.max(1);
        self
    }

    /// Picks whatever tile is displayed under cursor position `(x, y)` in
    /// viewport pixels. Returns `None` if nothing was hit (empty space, or
    /// a texel the renderer didn't write a tile id into).
    pub fn pick(&self, x: u32, y: u32) -> Option<PickResult> {
        let half = self.zone_size / 2;
        let zone = PickZone {
            x: x.saturating_sub(half),
            y: y.saturating_sub(half),
            width: self.zone_size,
            height: self.zone_size,
        };
        let mut buffer = PickBuffer::new(zone.width, zone.height);
        self.renderer.render_to_buffer(zone, &mut buffer);

        let local_x = (x - zone.x).min(zone.width.saturating_sub(1));
        let local_y = (y - zone.y).min(zone.height.saturating_sub(1));
        let texel = buffer.get(local_x, local_y)?;
        let tile = texel.tile_id?;

        let result = PickResult {
            tile,
            depth: texel.depth,
            uv: texel.uv,
        };
        self.events.publish(CoreEvent::PickingEnd { tile: Some(tile) });
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::mock::MockRenderer;
    use crate::render::PickTexel;

    #[test]
    fn resolves_a_hit_texel_to_its_tile() {
        let renderer = Arc::new(MockRenderer::new().with_pick_result(PickTexel {
            tile_id: Some(TileId(7)),
            depth: 0.5,
            uv: (0.25, 0.75),
        }));
        let events = Arc::new(EventBus::new());
        let picker = Picker::new(renderer, events);

        let result = picker.pick(100, 100).expect("should hit");
        assert_eq!(result.tile, TileId(7));
        assert_eq!(result.uv, (0.25, 0.75));
    }

    #[test]
    fn empty_buffer_misses() {
        let renderer = Arc::new(MockRenderer::new());
        let events = Arc::new(EventBus::new());
        let picker = Picker::new(renderer, events);
        assert!(picker.pick(10, 10).is_none());
    }

    #[tokio::test]
    async fn successful_pick_publishes_picking_end() {
        let renderer = Arc::new(MockRenderer::new().with_pick_result(PickTexel {
            tile_id: Some(TileId(1)),
            depth: 0.1,
            uv: (0.0, 0.0),
        }));
        let events = Arc::new(EventBus::new());
        let mut rx = events.subscribe();
        let picker = Picker::new(renderer, events);

        picker.pick(5, 5);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "picking-end");
    }
}
