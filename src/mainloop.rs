use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::cache::Cache;
use crate::config::CoreConfig;
use crate::content::{ContentPayload, Source};
use crate::entity::Entity;
use crate::event::{CoreEvent, EventBus};
use crate::helpers::FrameClock;
use crate::queue::RequestQueue;
use crate::spatial::Camera;
use crate::tile::{TileId, TileIndex};
use crate::traversal::{FrameOutcome, TraversalContext};
use crate::render::{Renderer, SceneHandle};

type ContentLoadedHook = Arc<dyn Fn(&TileIndex, TileId, &ContentPayload) + Send + Sync>;

struct RegisteredEntity {
    entity: Arc<dyn Entity>,
    source: Arc<dyn Source>,
    on_content_loaded: Option<ContentLoadedHook>,
    change_hints: Mutex<Vec<TileId>>,
}

/// One entity's outcome for a frame that already ran traversal, still
/// holding the `TraversalContext` it ran with so the cleanup pass can
/// reuse it for `postUpdate` (§4.6 step 4).
struct EntityFrame {
    entity: Arc<dyn Entity>,
    entity_id: String,
    outcome: FrameOutcome,
    ctx: TraversalContext,
}

/// Per-entity summary handed back to the `MainLoop` caller: what got
/// displayed/requested/visited this frame, and what cleanup removed.
#[derive(Debug, Clone)]
pub struct EntitySummary {
    pub entity_id: String,
    pub outcome: FrameOutcome,
    pub removed: Vec<TileId>,
}

/// What one `MainLoop::tick` produced.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frame: u64,
    pub entities: Vec<EntitySummary>,
    pub displayed_total: usize,
    pub cache_evicted: usize,
    pub dt_seconds: f32,
}

/// `Scheduler.updateEntities` of §2's pipeline diagram: owns the set of
/// registered entities and drives their `preUpdate → traverse →
/// postUpdate` hooks. Kept separate from `MainLoop` so the per-entity
/// bookkeeping (change hints, `fastUpdateHint` derivation) has a single
/// owner distinct from the frame-scheduling policy.
struct Scheduler {
    entities: RwLock<Vec<RegisteredEntity>>,
}

impl Scheduler {
    fn new() -> Self {
        Scheduler {
            entities: RwLock::new(Vec::new()),
        }
    }

    fn add_entity(&self, entity: Arc<dyn Entity>, source: Arc<dyn Source>, on_content_loaded: Option<ContentLoadedHook>) {
        self.entities.write().unwrap().push(RegisteredEntity {
            entity,
            source,
            on_content_loaded,
            change_hints: Mutex::new(Vec::new()),
        });
    }

    fn notify_change(&self, entity_id: &str, node: TileId) {
        let entities = self.entities.read().unwrap();
        if let Some(registered) = entities.iter().find(|e| e.entity.id() == entity_id) {
            registered.change_hints.lock().unwrap().push(node);
        }
    }

    /// Runs `preUpdate → traverse` for every registered entity (§4.6 step
    /// 2). Each entity's accumulated change hints since the last frame are
    /// collapsed to a `fastUpdateHint` via `TileIndex::common_ancestor`
    /// and then drained, win or lose.
    fn update_entities(
        &self,
        frame: u64,
        camera: &Arc<Camera>,
        queue: &Arc<RequestQueue<ContentPayload>>,
        cache: &Arc<Cache<ContentPayload>>,
        config: &CoreConfig,
    ) -> Vec<EntityFrame> {
        let entities = self.entities.read().unwrap();
        let mut frames = Vec::with_capacity(entities.len());
        for registered in entities.iter() {
            let hints = std::mem::take(&mut *registered.change_hints.lock().unwrap());
            let fast_update_hint = if hints.is_empty() {
                None
            } else {
                Some(registered.entity.tile_index().common_ancestor(&hints))
            };

            let ctx = TraversalContext {
                index: registered.entity.tile_index().clone(),
                camera: camera.clone(),
                queue: queue.clone(),
                cache: cache.clone(),
                source: registered.source.clone(),
                frame,
                sse_threshold: config.sse_threshold,
                max_level: config.max_subdivision_level,
                cleanup_after_frames: config.cleanup_after_frames,
                default_ttl: Duration::from_millis(config.default_cache_ttl_ms),
                fast_update_hint,
                on_content_loaded: registered.on_content_loaded.clone(),
            };

            let outcome = registered.entity.update(&ctx);
            frames.push(EntityFrame {
                entity: registered.entity.clone(),
                entity_id: registered.entity.id().to_string(),
                outcome,
                ctx,
            });
        }
        frames
    }

    /// Cleanup pass (§4.6 step 4): each entity's `postUpdate`.
    fn post_update_entities(&self, frames: Vec<EntityFrame>) -> Vec<EntitySummary> {
        frames
            .into_iter()
            .map(|f| {
                let removed = f.entity.post_update(&f.ctx);
                EntitySummary {
                    entity_id: f.entity_id,
                    outcome: f.outcome,
                    removed,
                }
            })
            .collect()
    }
}

/// The orchestrator (§4.6): drives one frame when `notify_change` fired,
/// an explicit animation frame was requested, or the request queue still
/// has work in flight for an entity. Single-threaded and cooperative —
/// traversal never awaits; only tasks submitted to the `RequestQueue`
/// suspend (§5) — so `tick` is meant to be called from one driving loop,
/// never re-entered while a previous call is still running.
pub struct MainLoop {
    scheduler: Scheduler,
    camera: Arc<Camera>,
    renderer: Arc<dyn Renderer>,
    queue: Arc<RequestQueue<ContentPayload>>,
    cache: Arc<Cache<ContentPayload>>,
    events: Arc<EventBus>,
    config: CoreConfig,
    frame: AtomicU64,
    dirty: AtomicBool,
    animation_requested: AtomicBool,
    clock: Mutex<FrameClock>,
}

impl MainLoop {
    pub fn new(camera: Arc<Camera>, renderer: Arc<dyn Renderer>, config: CoreConfig) -> Arc<Self> {
        let queue = RequestQueue::new(config.max_concurrent_requests);
        Arc::new(MainLoop {
            scheduler: Scheduler::new(),
            camera,
            renderer,
            queue,
            cache: Arc::new(Cache::new()),
            events: Arc::new(EventBus::new()),
            config,
            frame: AtomicU64::new(0),
            // The very first tick always runs, regardless of whether
            // anyone called `notify_change` yet.
            dirty: AtomicBool::new(true),
            animation_requested: AtomicBool::new(false),
            clock: Mutex::new(FrameClock::default()),
        })
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn queue(&self) -> Arc<RequestQueue<ContentPayload>> {
        self.queue.clone()
    }

    pub fn cache(&self) -> Arc<Cache<ContentPayload>> {
        self.cache.clone()
    }

    pub fn camera(&self) -> Arc<Camera> {
        self.camera.clone()
    }

    pub fn add_entity(
        &self,
        entity: Arc<dyn Entity>,
        source: Arc<dyn Source>,
        on_content_loaded: Option<ContentLoadedHook>,
    ) {
        self.scheduler.add_entity(entity, source, on_content_loaded);
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// A source (or anything else) signals a change. `node`, when known,
    /// scopes the change to a subtree so the next frame's traversal can
    /// restart at the common ancestor of everything that changed instead
    /// of walking from the root (§3 `fastUpdateHint`).
    pub fn notify_change(&self, entity_id: &str, node: Option<TileId>) {
        self.dirty.store(true, Ordering::Relaxed);
        if let Some(node) = node {
            self.scheduler.notify_change(entity_id, node);
        }
    }

    /// A collaborator (camera controls, an animation) asked for one more
    /// frame even though nothing else changed.
    pub fn request_animation_frame(&self) {
        self.animation_requested.store(true, Ordering::Relaxed);
    }

    pub fn should_run_frame(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
            || self.animation_requested.load(Ordering::Relaxed)
            || self.queue.pending() > 0
            || self.queue.active() > 0
    }

    /// Runs exactly one frame if `should_run_frame()` holds, in the order
    /// fixed by §4.6: `update-start`; per-entity `preUpdate → traverse`;
    /// `before-render`, `render`, `after-render`; cleanup pass
    /// (`postUpdate`, cache `flush`), `update-end`. Returns `None` when
    /// nothing warranted a frame.
    pub fn tick(&self) -> Option<FrameReport> {
        if !self.should_run_frame() {
            return None;
        }
        self.dirty.store(false, Ordering::Relaxed);
        self.animation_requested.store(false, Ordering::Relaxed);

        let tick = self.clock.lock().unwrap().tick();
        let frame = self.frame.fetch_add(1, Ordering::Relaxed) + 1;

        self.events.publish(CoreEvent::UpdateStart { frame });

        let entity_frames = self
            .scheduler
            .update_entities(frame, &self.camera, &self.queue, &self.cache, &self.config);

        let displayed: Vec<TileId> = entity_frames
            .iter()
            .flat_map(|f| f.outcome.displayed.iter().copied())
            .collect();
        let scene = SceneHandle {
            displayed: displayed.clone(),
        };

        self.events.publish(CoreEvent::BeforeRender { frame });
        self.renderer.render(&scene, &self.camera);
        self.events.publish(CoreEvent::AfterRender { frame });

        let entities = self.scheduler.post_update_entities(entity_frames);
        let cache_evicted = self.cache.flush();

        self.events.publish(CoreEvent::UpdateEnd {
            frame,
            displayed: displayed.len(),
        });

        Some(FrameReport {
            frame,
            entities,
            displayed_total: displayed.len(),
            cache_evicted,
            dt_seconds: tick.dt_seconds,
        })
    }
}
