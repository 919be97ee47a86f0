//! Bone reduction and per-vertex bone limits

use crate::settings::StopCondition;
use lodcrate_core::{BoneWeights, GeometryData, NodeId, ProcessingLog, Result, Scene};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoneSettings {
    pub use_bone_reducer: bool,
    /// Fraction of the bones to keep
    pub bone_reduction_target_bone_ratio: f32,
    pub bone_reduction_target_bone_count: Option<u32>,
    pub stop_condition: StopCondition,
    pub limit_bones_per_vertex: bool,
    pub max_bone_per_vertex: u32,
    pub remove_unused_bones: bool,
}

impl Default for BoneSettings {
    fn default() -> Self {
        Self {
            use_bone_reducer: false,
            bone_reduction_target_bone_ratio: 1.0,
            bone_reduction_target_bone_count: None,
            stop_condition: StopCondition::All,
            limit_bones_per_vertex: false,
            max_bone_per_vertex: 4,
            remove_unused_bones: false,
        }
    }
}

impl BoneSettings {
    pub fn is_enabled(&self) -> bool {
        self.use_bone_reducer || self.limit_bones_per_vertex || self.remove_unused_bones
    }

    pub fn check(&self, log: &mut ProcessingLog) -> bool {
        let mut ok = true;
        if !(0.0..=1.0).contains(&self.bone_reduction_target_bone_ratio) {
            log.error(format!(
                "bone ratio must be in [0, 1], got {}",
                self.bone_reduction_target_bone_ratio
            ));
            ok = false;
        }
        if self.limit_bones_per_vertex && self.max_bone_per_vertex == 0 {
            log.error("max bones per vertex must be at least 1");
            ok = false;
        }
        ok
    }

    /// Number of bones to keep out of `count`
    pub fn bone_budget(&self, count: usize) -> usize {
        let by_ratio = (count as f32 * self.bone_reduction_target_bone_ratio).ceil() as usize;
        match self.bone_reduction_target_bone_count {
            None => by_ratio,
            Some(target) => match self.stop_condition {
                StopCondition::All => by_ratio.min(target as usize),
                StopCondition::Any => by_ratio.max(target as usize),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoneStats {
    pub removed_bones: usize,
    pub limited_vertices: usize,
}

/// Apply bone reduction, per-vertex limits and unused bone removal to the
/// meshes of a scene. Bone ids index the scene's bone table, so ids are
/// remapped on every mesh when the table shrinks.
pub fn process_bones(scene: &mut Scene, settings: &BoneSettings, log: &mut ProcessingLog) -> Result<BoneStats> {
    let mut stats = BoneStats::default();
    if !settings.is_enabled() || scene.bones.is_empty() || !settings.check(log) {
        return Ok(stats);
    }

    let mesh_ids: Vec<NodeId> = scene.mesh_nodes().iter().map(|m| m.id).collect();
    let parents = bone_parents(scene);
    let mut influence = bone_influence(scene, &mesh_ids);
    let mut replacement: Vec<Option<usize>> = (0..scene.bones.len()).map(Some).collect();
    let mut removed = vec![false; scene.bones.len()];

    if settings.use_bone_reducer {
        let budget = settings.bone_budget(scene.bones.len());
        let mut alive = scene.bones.len();
        while alive > budget {
            let leaf = (0..removed.len())
                .filter(|&b| !removed[b] && is_leaf(b, &parents, &removed))
                .min_by(|&a, &b| influence[a].total_cmp(&influence[b]));
            let Some(leaf) = leaf else {
                break;
            };
            removed[leaf] = true;
            alive -= 1;
            let parent = parents[leaf];
            if let Some(p) = parent {
                influence[p] += influence[leaf];
            }
            // Weights move to the closest kept ancestor
            for r in replacement.iter_mut() {
                if *r == Some(leaf) {
                    *r = parent;
                }
            }
        }
    }

    if settings.remove_unused_bones {
        for b in 0..removed.len() {
            if !removed[b] && influence[b] <= 0.0 {
                removed[b] = true;
                replacement[b] = None;
            }
        }
    }

    let mut new_index = vec![None; removed.len()];
    let mut kept = Vec::new();
    for (b, id) in scene.bones.iter().enumerate() {
        if !removed[b] {
            new_index[b] = Some(kept.len() as i32);
            kept.push(*id);
        }
    }
    stats.removed_bones = removed.len() - kept.len();
    let remap: Vec<Option<i32>> = replacement.iter().map(|r| r.and_then(|b| new_index[b])).collect();

    let max_per_vertex = settings.limit_bones_per_vertex.then_some(settings.max_bone_per_vertex as usize);
    for id in &mesh_ids {
        if let Some(bones) = scene.geometry_mut(*id).and_then(|g| g.bone_weights.as_mut()) {
            stats.limited_vertices += remap_bone_weights(bones, &remap, max_per_vertex);
        }
    }
    if stats.removed_bones > 0 {
        scene.bones.set_bones(kept);
    }
    tracing::debug!(
        "bones: removed {}, limited {} vertices, {} bones left",
        stats.removed_bones,
        stats.limited_vertices,
        scene.bones.len()
    );
    Ok(stats)
}

/// Index of the closest ancestor of every bone that is itself in the table
fn bone_parents(scene: &Scene) -> Vec<Option<usize>> {
    let index: HashMap<NodeId, usize> = scene.bones.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    scene
        .bones
        .iter()
        .map(|id| {
            let path = scene.path_to(*id)?;
            path.iter()
                .rev()
                .skip(1)
                .find_map(|node| index.get(&node.id).copied())
        })
        .collect()
}

fn is_leaf(bone: usize, parents: &[Option<usize>], removed: &[bool]) -> bool {
    !parents
        .iter()
        .enumerate()
        .any(|(child, p)| *p == Some(bone) && !removed[child])
}

/// Summed skinning weight of every bone over all meshes
fn bone_influence(scene: &Scene, mesh_ids: &[NodeId]) -> Vec<f32> {
    let mut influence = vec![0.0f32; scene.bones.len()];
    for id in mesh_ids {
        let Some(bones) = scene.geometry(*id).and_then(|g| g.bone_weights.as_ref()) else {
            continue;
        };
        for (&bone, &w) in bones.bone_ids.iter().zip(&bones.weights) {
            if bone >= 0 && (bone as usize) < influence.len() {
                influence[bone as usize] += w;
            }
        }
    }
    influence
}

/// Rewrite bone ids through `remap`, merging influences that land on the
/// same bone and keeping at most `max_per_vertex` of them. Returns the
/// number of vertices that lost influences to the limit.
pub fn remap_bone_weights(bones: &mut BoneWeights, remap: &[Option<i32>], max_per_vertex: Option<usize>) -> usize {
    let slots = max_per_vertex.map_or(bones.bones_per_vertex, |m| m.min(bones.bones_per_vertex).max(1));
    let mut out = BoneWeights::new(bones.vertex_count(), slots);
    let mut limited = 0;
    for v in 0..bones.vertex_count() {
        let mut merged: Vec<(i32, f32)> = Vec::new();
        for (bone, w) in bones.influences(v) {
            let Some(new) = remap.get(bone as usize).copied().flatten() else {
                continue;
            };
            match merged.iter_mut().find(|(id, _)| *id == new) {
                Some((_, acc)) => *acc += w,
                None => merged.push((new, w)),
            }
        }
        if merged.len() > slots {
            limited += 1;
        }
        out.set_influences(v, &merged);
        out.normalize_vertex(v);
    }
    *bones = out;
    limited
}

/// Limit a single geometry's influences per vertex without touching ids
pub fn limit_bones_per_vertex(geometry: &mut GeometryData, max_per_vertex: usize) -> usize {
    let Some(bones) = geometry.bone_weights.as_mut() else {
        return 0;
    };
    let max_id = bones.bone_ids.iter().copied().max().unwrap_or(-1);
    let identity: Vec<Option<i32>> = (0..=max_id).map(Some).collect();
    remap_bone_weights(bones, &identity, Some(max_per_vertex))
}
