//! Scene objects and the per-frame draw-item lists.
//!
//! The engine rebuilds [`RenderLists`] on every frame and keeps them alive
//! afterwards, so the picker can re-submit exactly the drawn set with encode
//! materials instead of re-walking the scene.

use std::sync::Arc;

use glam::Mat4;

use sensorscope_core::EncodeKey;

use crate::geometry::{Geometry, GeometryKind};
use crate::picker::EncodeMaterial;

/// Blending category, which doubles as pick traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendCategory {
    /// Fully opaque items, drawn and picked first.
    #[default]
    Opaque,
    /// Refractive/transmissive items.
    Transmissive,
    /// Alpha-blended items, drawn and picked last.
    Transparent,
}

/// Sprite orientation parameters, copied into the encode pass so the picking
/// quad matches the visible sprite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpriteParams {
    /// In-plane rotation in radians.
    pub rotation: f32,
    /// Rotation/anchor point in quad UV space.
    pub center: [f32; 2],
}

impl Default for SpriteParams {
    fn default() -> Self {
        Self {
            rotation: 0.0,
            center: [0.5, 0.5],
        }
    }
}

/// Per-object picking behavior.
#[derive(Clone, Default)]
pub struct PickSettings {
    /// Suppresses the object from picking entirely.
    pub opt_out: bool,
    /// Replaces the cache-selected encode material, for objects whose vertex
    /// transform the generic feature variants cannot reproduce.
    pub override_material: Option<Arc<EncodeMaterial>>,
    /// Whether the object's screen size attenuates with camera distance.
    pub size_attenuation: bool,
}

impl std::fmt::Debug for PickSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PickSettings")
            .field("opt_out", &self.opt_out)
            .field("has_override", &self.override_material.is_some())
            .field("size_attenuation", &self.size_attenuation)
            .finish()
    }
}

/// A renderable object registered with the scene.
#[derive(Debug, Clone)]
pub struct RenderObject {
    /// Identifier assigned by [`Scene::add`]; 0 until then.
    pub id: u32,
    /// GPU geometry, or None for placeholder objects that draw nothing.
    pub geometry: Option<Arc<Geometry>>,
    /// Object-to-world transform.
    pub transform: Mat4,
    /// Display color (RGBA).
    pub color: [f32; 4],
    /// Blending category.
    pub blend: BlendCategory,
    /// Whether the object is drawn at all.
    pub visible: bool,
    /// Picking behavior.
    pub pick: PickSettings,
    /// Sprite orientation, for sprite-quad geometry.
    pub sprite: SpriteParams,
}

impl RenderObject {
    /// Creates a visible opaque object with default pick settings.
    #[must_use]
    pub fn new(geometry: Arc<Geometry>) -> Self {
        Self {
            id: 0,
            geometry: Some(geometry),
            transform: Mat4::IDENTITY,
            color: [1.0, 1.0, 1.0, 1.0],
            blend: BlendCategory::Opaque,
            visible: true,
            pick: PickSettings::default(),
            sprite: SpriteParams::default(),
        }
    }
}

/// One entry of the per-frame draw lists: everything the encode pass needs,
/// snapshotted at render time.
#[derive(Debug, Clone)]
pub struct DrawItem {
    /// Object identifier.
    pub id: u32,
    /// Geometry, or None when the object had nothing to rasterize.
    pub geometry: Option<Arc<Geometry>>,
    /// Object-to-world transform.
    pub transform: Mat4,
    /// Display color.
    pub color: [f32; 4],
    /// Picking behavior copied from the object.
    pub pick: PickSettings,
    /// Sprite orientation copied from the object.
    pub sprite: SpriteParams,
    /// Feature key selecting the encode material variant.
    pub features: EncodeKey,
}

impl DrawItem {
    fn from_object(object: &RenderObject) -> Self {
        let (instanced, sprite) = object.geometry.as_ref().map_or((false, false), |g| {
            (g.is_instanced(), g.kind() == GeometryKind::SpriteQuad)
        });
        Self {
            id: object.id,
            geometry: object.geometry.clone(),
            transform: object.transform,
            color: object.color,
            pick: object.pick.clone(),
            sprite: object.sprite,
            features: EncodeKey::new(instanced, sprite, object.pick.size_attenuation),
        }
    }
}

/// The renderer's per-frame record of everything submitted for
/// rasterization, grouped by blending category.
#[derive(Debug, Default)]
pub struct RenderLists {
    /// Opaque items.
    pub opaque: Vec<DrawItem>,
    /// Transmissive items.
    pub transmissive: Vec<DrawItem>,
    /// Transparent items.
    pub transparent: Vec<DrawItem>,
}

impl RenderLists {
    /// Drops all items.
    pub fn clear(&mut self) {
        self.opaque.clear();
        self.transmissive.clear();
        self.transparent.clear();
    }

    /// Total item count across all categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.opaque.len() + self.transmissive.len() + self.transparent.len()
    }

    /// Whether all lists are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates items in pick traversal order: opaque, transmissive,
    /// transparent.
    pub fn iter_pick_order(&self) -> impl Iterator<Item = &DrawItem> {
        self.opaque
            .iter()
            .chain(self.transmissive.iter())
            .chain(self.transparent.iter())
    }
}

/// The set of objects the engine renders.
#[derive(Debug, Default)]
pub struct Scene {
    objects: Vec<RenderObject>,
    // Starts at 1; the background sentinel 0xFFFF_FFFF is never reached.
    next_id: u32,
}

impl Scene {
    /// Creates an empty scene.
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            next_id: 1,
        }
    }

    /// Adds an object, assigning and returning its identifier.
    pub fn add(&mut self, mut object: RenderObject) -> u32 {
        let id = self.next_id;
        object.id = id;
        self.next_id += 1;
        self.objects.push(object);
        id
    }

    /// Removes an object by identifier. Returns whether it existed.
    pub fn remove(&mut self, id: u32) -> bool {
        let before = self.objects.len();
        self.objects.retain(|o| o.id != id);
        before != self.objects.len()
    }

    /// Looks up an object by identifier.
    #[must_use]
    pub fn get_mut(&mut self, id: u32) -> Option<&mut RenderObject> {
        self.objects.iter_mut().find(|o| o.id == id)
    }

    /// Number of objects in the scene.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the scene has no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Rebuilds the draw lists from the current visible set.
    pub fn build_lists(&self, lists: &mut RenderLists) {
        lists.clear();
        for object in &self.objects {
            if !object.visible {
                continue;
            }
            let item = DrawItem::from_object(object);
            match object.blend {
                BlendCategory::Opaque => lists.opaque.push(item),
                BlendCategory::Transmissive => lists.transmissive.push(item),
                BlendCategory::Transparent => lists.transparent.push(item),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholder(blend: BlendCategory) -> RenderObject {
        RenderObject {
            id: 0,
            geometry: None,
            transform: Mat4::IDENTITY,
            color: [1.0; 4],
            blend,
            visible: true,
            pick: PickSettings::default(),
            sprite: SpriteParams::default(),
        }
    }

    #[test]
    fn scene_assigns_ids_from_one() {
        let mut scene = Scene::new();
        let a = scene.add(placeholder(BlendCategory::Opaque));
        let b = scene.add(placeholder(BlendCategory::Opaque));
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_ne!(a, sensorscope_core::BACKGROUND_ID);
    }

    #[test]
    fn build_lists_partitions_by_blend_and_skips_invisible() {
        let mut scene = Scene::new();
        scene.add(placeholder(BlendCategory::Opaque));
        scene.add(placeholder(BlendCategory::Transparent));
        scene.add(placeholder(BlendCategory::Transmissive));
        let hidden = scene.add(placeholder(BlendCategory::Opaque));
        scene.get_mut(hidden).unwrap().visible = false;

        let mut lists = RenderLists::default();
        scene.build_lists(&mut lists);
        assert_eq!(lists.opaque.len(), 1);
        assert_eq!(lists.transmissive.len(), 1);
        assert_eq!(lists.transparent.len(), 1);
        assert_eq!(lists.len(), 3);
    }

    #[test]
    fn pick_order_is_opaque_then_transmissive_then_transparent() {
        let mut scene = Scene::new();
        let transparent = scene.add(placeholder(BlendCategory::Transparent));
        let opaque = scene.add(placeholder(BlendCategory::Opaque));
        let transmissive = scene.add(placeholder(BlendCategory::Transmissive));

        let mut lists = RenderLists::default();
        scene.build_lists(&mut lists);
        let order: Vec<u32> = lists.iter_pick_order().map(|i| i.id).collect();
        assert_eq!(order, vec![opaque, transmissive, transparent]);
    }

    #[test]
    fn draw_item_features_follow_pick_settings() {
        let mut object = placeholder(BlendCategory::Opaque);
        object.pick.size_attenuation = true;
        let item = DrawItem::from_object(&object);
        assert!(item.features.size_attenuation());
        assert!(!item.features.instanced());
        assert!(!item.features.sprite());
    }

    #[test]
    fn remove_drops_only_the_named_object() {
        let mut scene = Scene::new();
        let a = scene.add(placeholder(BlendCategory::Opaque));
        let b = scene.add(placeholder(BlendCategory::Opaque));
        assert!(scene.remove(a));
        assert!(!scene.remove(a));
        assert_eq!(scene.len(), 1);
        assert!(scene.get_mut(b).is_some());
    }
}
