//! Layer Store - exclusive owner of every template's layers.
//!
//! Writers for one template queue on that template's lock; readers clone the
//! current `Arc` snapshot and never wait for a writer to finish its work.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::layers::{Layer, LayerId, LayerPatch, LayerSpec};
use crate::templates::{Template, TemplateId, TemplateRegistry};

/// Immutable view of a template's layers, sorted ascending by `z_index`.
pub type LayerSnapshot = Arc<Vec<Layer>>;

#[derive(Default)]
struct TemplateSlot {
    writer: Mutex<()>,
    snapshot: RwLock<LayerSnapshot>,
}

impl TemplateSlot {
    fn current(&self) -> LayerSnapshot {
        Arc::clone(&self.snapshot.read())
    }
}

pub struct LayerStore {
    templates: Arc<TemplateRegistry>,
    slots: DashMap<TemplateId, Arc<TemplateSlot>>,
    owners: DashMap<LayerId, TemplateId>,
}

impl LayerStore {
    pub fn new(templates: Arc<TemplateRegistry>) -> Self {
        Self {
            templates,
            slots: DashMap::new(),
            owners: DashMap::new(),
        }
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn create(&self, template_id: &str, spec: LayerSpec) -> EngineResult<Layer> {
        spec.position.validate()?;
        spec.style.validate()?;
        let layer = self.mutate(template_id, |template, current| {
            check_binding(template, spec.field_name.as_deref())?;
            let z_index = current
                .iter()
                .map(|l| l.z_index)
                .max()
                .map_or(0, |max| max + 1);
            let layer = spec.into_layer(Uuid::new_v4(), z_index);
            let mut next = current.to_vec();
            next.push(layer.clone());
            self.owners.insert(layer.id, template_id.to_string());
            Ok((next, layer))
        })?;
        debug!("created layer {} at z {} in {}", layer.id, layer.z_index, template_id);
        Ok(layer)
    }

    pub fn update(&self, layer_id: LayerId, patch: LayerPatch) -> EngineResult<Layer> {
        let template_id = self.owner_of(layer_id)?;
        self.mutate(&template_id, |template, current| {
            let index = find(current, layer_id)?;
            let updated = current[index].patched(patch)?;
            check_binding(template, updated.field_name.as_deref())?;
            let mut next = current.to_vec();
            next[index] = updated.clone();
            Ok((next, updated))
        })
    }

    /// Remove a layer. Remaining z-indices keep their values, gaps included.
    pub fn delete(&self, layer_id: LayerId) -> EngineResult<()> {
        let template_id = self.owner_of(layer_id)?;
        self.mutate(&template_id, |_, current| {
            let index = find(current, layer_id)?;
            let mut next = current.to_vec();
            next.remove(index);
            self.owners.remove(&layer_id);
            Ok((next, ()))
        })
    }

    /// Assign `z_index = position` for every id. The ids must be exactly the
    /// template's current layer set; anything else leaves the store untouched.
    pub fn reorder(&self, template_id: &str, ordered: &[LayerId]) -> EngineResult<LayerSnapshot> {
        self.mutate(template_id, |_, current| {
            let requested: HashSet<_> = ordered.iter().copied().collect();
            let existing: HashSet<_> = current.iter().map(|l| l.id).collect();
            if requested.len() != ordered.len() || requested != existing {
                return Err(EngineError::OrderMismatch(template_id.to_string()));
            }
            let mut next = Vec::with_capacity(ordered.len());
            for (z_index, id) in ordered.iter().enumerate() {
                let mut layer = current[find(current, *id)?].clone();
                layer.z_index = z_index as u32;
                next.push(layer);
            }
            Ok((next, ()))
        })?;
        self.list(template_id)
    }

    pub fn list(&self, template_id: &str) -> EngineResult<LayerSnapshot> {
        self.template(template_id)?;
        Ok(self
            .slots
            .get(template_id)
            .map(|slot| slot.current())
            .unwrap_or_default())
    }

    pub fn get(&self, layer_id: LayerId) -> EngineResult<Layer> {
        let template_id = self.owner_of(layer_id)?;
        let snapshot = self.list(&template_id)?;
        snapshot
            .iter()
            .find(|l| l.id == layer_id)
            .cloned()
            .ok_or(EngineError::LayerNotFound(layer_id))
    }

    /// Replace a template's whole layer set, e.g. when restoring a layout.
    pub fn replace_all(&self, template_id: &str, layers: Vec<Layer>) -> EngineResult<LayerSnapshot> {
        let mut ids = HashSet::new();
        let mut z_indices = HashSet::new();
        for layer in &layers {
            layer.position.validate()?;
            layer.style.validate()?;
            if !ids.insert(layer.id) {
                return Err(EngineError::InvalidLayout(format!("duplicate layer id {}", layer.id)));
            }
            if !z_indices.insert(layer.z_index) {
                return Err(EngineError::InvalidLayout(format!("duplicate zIndex {}", layer.z_index)));
            }
        }
        self.mutate(template_id, |template, current| {
            for layer in &layers {
                check_binding(template, layer.field_name.as_deref())?;
            }
            self.claim(template_id, layers.iter().map(|l| l.id))?;
            for layer in current {
                if !ids.contains(&layer.id) {
                    self.owners.remove(&layer.id);
                }
            }
            Ok((layers, ()))
        })?;
        self.list(template_id)
    }

    /// Drop every layer of a template. Returns how many were removed.
    pub fn remove_template(&self, template_id: &str) -> usize {
        match self.slots.remove(template_id) {
            Some((_, slot)) => {
                let _guard = slot.writer.lock();
                let layers = slot.current();
                for layer in layers.iter() {
                    self.owners.remove(&layer.id);
                }
                layers.len()
            }
            None => 0,
        }
    }

    fn template(&self, template_id: &str) -> EngineResult<&Template> {
        self.templates
            .get(template_id)
            .ok_or_else(|| EngineError::TemplateNotFound(template_id.to_string()))
    }

    fn owner_of(&self, layer_id: LayerId) -> EngineResult<TemplateId> {
        self.owners
            .get(&layer_id)
            .map(|owner| owner.value().clone())
            .ok_or(EngineError::LayerNotFound(layer_id))
    }

    /// Record `template_id` as the owner of every id, or of none if any id
    /// already belongs to another template. Each id is checked and claimed
    /// under its own map entry, so two templates can never both win one.
    fn claim(&self, template_id: &str, ids: impl Iterator<Item = LayerId>) -> EngineResult<()> {
        let mut claimed = Vec::new();
        for id in ids {
            let taken = match self.owners.entry(id) {
                Entry::Occupied(owner) if owner.get() != template_id => Some(owner.get().clone()),
                Entry::Occupied(_) => None,
                Entry::Vacant(slot) => {
                    slot.insert(template_id.to_string());
                    claimed.push(id);
                    None
                }
            };
            if let Some(owner) = taken {
                for id in &claimed {
                    self.owners.remove(id);
                }
                return Err(EngineError::InvalidLayout(format!(
                    "layer {} belongs to template {}",
                    id, owner
                )));
            }
        }
        Ok(())
    }

    fn slot(&self, template_id: &str) -> Arc<TemplateSlot> {
        let entry = self.slots.entry(template_id.to_string()).or_default();
        Arc::clone(entry.value())
    }

    /// Run one serialized mutation against a template. The closure receives
    /// the current layers and returns the next set; it is committed only if
    /// the closure succeeds. Owner index changes belong inside the closure
    /// and must be its last fallible step.
    fn mutate<T>(
        &self,
        template_id: &str,
        f: impl FnOnce(&Template, &[Layer]) -> EngineResult<(Vec<Layer>, T)>,
    ) -> EngineResult<T> {
        let template = self.template(template_id)?;
        let slot = self.slot(template_id);
        let _guard = slot.writer.lock();
        let current = slot.current();
        let (mut next, out) = f(template, &current)?;
        next.sort_by_key(|l| l.z_index);
        *slot.snapshot.write() = Arc::new(next);
        Ok(out)
    }
}

fn find(layers: &[Layer], layer_id: LayerId) -> EngineResult<usize> {
    layers
        .iter()
        .position(|l| l.id == layer_id)
        .ok_or(EngineError::LayerNotFound(layer_id))
}

fn check_binding(template: &Template, field_name: Option<&str>) -> EngineResult<()> {
    match field_name {
        Some(field) if template.field(field).is_none() => Err(EngineError::UnknownFieldBinding {
            template_id: template.id.clone(),
            field: field.to_string(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{LayerStyle, LayerType, Position};
    use crate::templates::{FieldDecl, FieldType};

    fn store() -> LayerStore {
        let mut registry = TemplateRegistry::new();
        for id in ["wedding", "certificate"] {
            registry
                .register(Template {
                    id: id.to_string(),
                    title: id.to_string(),
                    design_width: 1000,
                    design_height: 1400,
                    background: "#FFFFFF".to_string(),
                    fields: vec![FieldDecl::new("recipient", FieldType::Text, true)],
                })
                .unwrap();
        }
        LayerStore::new(Arc::new(registry))
    }

    fn text(name: &str) -> LayerSpec {
        LayerSpec::new(name, LayerType::Text, Position::new(0.1, 0.1, 0.8, 0.2))
    }

    #[test]
    fn test_create_assigns_next_z_index() {
        let store = store();
        let a = store.create("wedding", text("a")).unwrap();
        let b = store.create("wedding", text("b")).unwrap();
        store.delete(a.id).unwrap();
        let c = store.create("wedding", text("c")).unwrap();
        assert_eq!((a.z_index, b.z_index, c.z_index), (0, 1, 2));
    }

    #[test]
    fn test_create_rejects_unknown_binding_and_template() {
        let store = store();
        assert!(matches!(
            store.create("wedding", text("a").bound_to("groom")),
            Err(EngineError::UnknownFieldBinding { .. })
        ));
        assert!(matches!(
            store.create("missing", text("a")),
            Err(EngineError::TemplateNotFound(_))
        ));
        assert!(store.list("wedding").unwrap().is_empty());
    }

    #[test]
    fn test_create_rejects_degenerate_position() {
        let store = store();
        let spec = LayerSpec::new("a", LayerType::Shape, Position::new(0.1, 0.1, 0.0, 0.2));
        assert!(matches!(store.create("wedding", spec), Err(EngineError::InvalidGeometry(_))));
    }

    #[test]
    fn test_create_rejects_bad_style() {
        let store = store();
        let spec = text("a").with_style(LayerStyle {
            font_size: -4.0,
            ..LayerStyle::default()
        });
        assert!(matches!(store.create("wedding", spec), Err(EngineError::InvalidStyle(_))));
        assert!(store.list("wedding").unwrap().is_empty());
    }

    #[test]
    fn test_update_checks_binding() {
        let store = store();
        let layer = store.create("wedding", text("a")).unwrap();
        let patch = LayerPatch {
            field_name: Some(Some("unknown".to_string())),
            ..Default::default()
        };
        assert!(store.update(layer.id, patch).is_err());
        assert_eq!(store.get(layer.id).unwrap(), layer);

        let patch = LayerPatch {
            field_name: Some(Some("recipient".to_string())),
            ..Default::default()
        };
        let updated = store.update(layer.id, patch).unwrap();
        assert_eq!(updated.field_name.as_deref(), Some("recipient"));
        assert_eq!(updated.z_index, layer.z_index);
    }

    #[test]
    fn test_unknown_layer_operations() {
        let store = store();
        let ghost = Uuid::new_v4();
        assert!(matches!(store.delete(ghost), Err(EngineError::LayerNotFound(_))));
        assert!(matches!(store.get(ghost), Err(EngineError::LayerNotFound(_))));
        assert!(matches!(
            store.update(ghost, LayerPatch::default()),
            Err(EngineError::LayerNotFound(_))
        ));
    }

    #[test]
    fn test_reorder_rejects_partial_and_duplicate_lists() {
        let store = store();
        let a = store.create("wedding", text("a")).unwrap();
        let b = store.create("wedding", text("b")).unwrap();
        let before = store.list("wedding").unwrap();

        for ids in [vec![a.id], vec![a.id, a.id], vec![a.id, b.id, Uuid::new_v4()]] {
            assert!(matches!(
                store.reorder("wedding", &ids),
                Err(EngineError::OrderMismatch(_))
            ));
        }
        assert_eq!(store.list("wedding").unwrap(), before);
    }

    #[test]
    fn test_templates_are_isolated() {
        let store = store();
        let a = store.create("wedding", text("a")).unwrap();
        store.create("certificate", text("b")).unwrap();
        assert!(store.reorder("certificate", &[a.id]).is_err());
        assert_eq!(store.remove_template("wedding"), 1);
        assert!(store.list("wedding").unwrap().is_empty());
        assert_eq!(store.list("certificate").unwrap().len(), 1);
        assert!(store.get(a.id).is_err());
    }

    #[test]
    fn test_concurrent_writers_keep_z_unique() {
        let store = store();
        std::thread::scope(|scope| {
            for template in ["wedding", "certificate"] {
                for _ in 0..4 {
                    let store = &store;
                    scope.spawn(move || {
                        for i in 0..10 {
                            store.create(template, text(&format!("l{}", i))).unwrap();
                        }
                    });
                }
            }
        });
        for template in ["wedding", "certificate"] {
            let layers = store.list(template).unwrap();
            let z: Vec<u32> = layers.iter().map(|l| l.z_index).collect();
            assert_eq!(z, (0..40).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_snapshot_survives_later_writes() {
        let store = store();
        store.create("wedding", text("a")).unwrap();
        let snapshot = store.list("wedding").unwrap();
        store.create("wedding", text("b")).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.list("wedding").unwrap().len(), 2);
    }

    #[test]
    fn test_concurrent_restores_never_share_ids() {
        let store = store();
        for _ in 0..50 {
            let layers: Vec<Layer> = (0..8)
                .map(|z| text(&format!("l{}", z)).into_layer(Uuid::new_v4(), z))
                .collect();
            let results: Vec<bool> = std::thread::scope(|scope| {
                let handles: Vec<_> = ["wedding", "certificate"]
                    .into_iter()
                    .map(|template| {
                        let (store, layers) = (&store, layers.clone());
                        scope.spawn(move || store.replace_all(template, layers).is_ok())
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });
            assert_eq!(results.iter().filter(|ok| **ok).count(), 1);

            let winner = if results[0] { "wedding" } else { "certificate" };
            let loser = if results[0] { "certificate" } else { "wedding" };
            assert_eq!(store.list(winner).unwrap().len(), 8);
            assert!(store.list(loser).unwrap().is_empty());
            for layer in &layers {
                assert_eq!(store.owner_of(layer.id).unwrap(), winner);
            }
            store.remove_template(winner);
        }
    }

    #[test]
    fn test_restore_releases_dropped_ids() {
        let store = store();
        let old = store.create("wedding", text("a")).unwrap();
        let fresh = text("b").into_layer(Uuid::new_v4(), 0);
        store.replace_all("wedding", vec![fresh.clone()]).unwrap();
        assert!(matches!(store.get(old.id), Err(EngineError::LayerNotFound(_))));
        // A failed restore elsewhere leaves no stray claims behind.
        let clash = vec![text("c").into_layer(Uuid::new_v4(), 0), fresh.clone()];
        let stray = clash[0].id;
        assert!(store.replace_all("certificate", clash).is_err());
        assert!(store.owner_of(stray).is_err());
        assert_eq!(store.get(fresh.id).unwrap(), fresh);
    }
}
