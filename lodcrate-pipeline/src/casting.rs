//! Material casting after processing, and the scene update that swaps the
//! source materials for the cast ones

use crate::processors::Processor;
use crate::settings::CasterEntry;
use lodcrate_casting::{CastInput, CastOutput, MaterialCaster};
use lodcrate_core::{
    channels, BlendMode, Error, Material, NodeId, ProcessContext, ProcessingLog, Result, Scene, ShadingNetwork,
    ShadingNode, Texture,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// A texture written by a caster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputTexture {
    pub output_index: usize,
    pub channel: String,
    /// Name of the texture in the updated scene
    pub texture_name: String,
    pub path: Option<PathBuf>,
}

/// What a pipeline run produced besides the updated scene
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub log: ProcessingLog,
    pub textures: Vec<OutputTexture>,
}

impl PipelineOutput {
    pub fn has_errors(&self) -> bool {
        self.log.has_errors()
    }
}

/// Name of the material replacing the source materials for an output
pub fn output_material_name(output_index: usize) -> String {
    format!("LODMaterial{}", output_index)
}

/// Directory the casters of an output material write into. With several
/// outputs every output gets its own sub-directory.
fn output_dir(base: &Path, output_index: usize, output_count: usize) -> PathBuf {
    if output_count > 1 {
        base.join(output_material_name(output_index))
    } else {
        base.to_path_buf()
    }
}

/// Run the casters over the processor's mapping images, write cast geometry
/// data back to the processed meshes and replace the materials of the
/// processed meshes with one cast material per output
pub fn cast_materials(
    processor: &dyn Processor,
    scene: &mut Scene,
    casters: &[CasterEntry],
    base_dir: Option<&Path>,
    log: &mut ProcessingLog,
    ctx: &ProcessContext,
) -> Result<Vec<OutputTexture>> {
    if casters.is_empty() {
        return Ok(Vec::new());
    }
    let images = processor.mapping_images();
    if images.is_empty() {
        log.error("material casting requires a mapping image; enable generate_mapping_image");
        return Ok(Vec::new());
    }
    warn_missing_textures(scene, log);

    let mut outputs: Vec<(usize, CastOutput)> = Vec::with_capacity(casters.len());
    let count = casters.len() as f32;
    for (k, entry) in casters.iter().enumerate() {
        let Some(mapping) = images.get(entry.output_index) else {
            log.error(format!(
                "caster for '{}' writes output material {} but only {} exist",
                entry.caster.channel(),
                entry.output_index,
                images.len()
            ));
            continue;
        };
        let dir = base_dir.map(|base| output_dir(base, entry.output_index, images.len()));
        let input = CastInput {
            mapping,
            materials: &scene.materials,
            textures: &scene.textures,
            output_dir: dir.as_deref(),
        };
        let cast_ctx = ctx.sub_range(100.0 * k as f32 / count, 100.0 * (k + 1) as f32 / count);
        match entry.caster.cast(&input, &cast_ctx) {
            Ok(output) => outputs.push((entry.output_index, output)),
            Err(Error::InvalidSettings(message)) => log.error(message),
            Err(e) => return Err(e),
        }
    }
    ctx.checkpoint()?;

    for (_, output) in &outputs {
        let has_geometry_data = output.vertex_colors.is_some() || output.tessellated_displacement.is_some();
        match processor.mapped_meshes() {
            Some(mapped) => mapped.apply_cast_output(scene, output, log),
            None if has_geometry_data => log.warning(format!(
                "cast geometry data for '{}' cannot be written to this pipeline's output",
                output.channel
            )),
            None => {}
        }
    }

    let tex_coord_name = processor.mapping_image_settings().tex_coord_name.clone();
    let mut materials: BTreeMap<usize, Material> = BTreeMap::new();
    let mut textures = Vec::new();
    let mut written = Vec::new();
    for (output_index, output) in outputs {
        let Some(image) = output.image else {
            continue;
        };
        let texture_name = format!("{}_{}", output_material_name(output_index), output.channel);
        let mut network = ShadingNetwork::new();
        let node = network.add(ShadingNode::Texture {
            texture_name: texture_name.clone(),
            tex_coord_level: images[output_index].tex_coord_level,
            tex_coord_name: Some(tex_coord_name.clone()),
        })?;
        network.set_output(node)?;
        let material = materials
            .entry(output_index)
            .or_insert_with(|| Material::new(&output_material_name(output_index)));
        if output.channel == channels::OPACITY {
            material.blend_mode = BlendMode::Blend;
        }
        material.set_shading_network(&output.channel, network);
        textures.push(Texture {
            name: texture_name.clone(),
            file_path: output.path.clone(),
            image: Some(image),
        });
        written.push(OutputTexture {
            output_index,
            channel: output.channel,
            texture_name,
            path: output.path,
        });
    }

    let outputs: Vec<Material> = (0..images.len())
        .map(|i| {
            materials
                .remove(&i)
                .unwrap_or_else(|| Material::new(&output_material_name(i)))
        })
        .collect();
    let assignments: Vec<(NodeId, Vec<usize>)> = processor
        .output_nodes()
        .into_iter()
        .map(|node| (node, processor.triangle_outputs(scene, node)))
        .collect();
    replace_materials(scene, &assignments, outputs, textures);
    tracing::info!("cast {} textures", written.len());
    Ok(written)
}

/// Textures the materials sample but that have no image. They read as
/// [`lodcrate_core::MISSING_TEXTURE_COLOR`] while casting.
fn warn_missing_textures(scene: &Scene, log: &mut ProcessingLog) {
    let mut names: Vec<&str> = scene
        .materials
        .iter()
        .flat_map(|m| m.channels.values())
        .flat_map(|network| network.texture_names())
        .collect();
    names.sort_unstable();
    names.dedup();
    for name in names {
        if !scene.textures.find_by_name(name).is_some_and(|t| t.image.is_some()) {
            log.warning(format!("texture '{}' has no image and is cast as a constant color", name));
        }
    }
}

/// Give the output nodes the new materials, `assignments` holding the
/// output material of every triangle of a node, then drop materials and
/// textures nothing refers to anymore
pub fn replace_materials(
    scene: &mut Scene,
    assignments: &[(NodeId, Vec<usize>)],
    materials: Vec<Material>,
    textures: Vec<Texture>,
) {
    let offset = scene.materials.len() as i32;
    let last = materials.len().saturating_sub(1);
    for material in materials {
        scene.materials.add(material);
    }
    for texture in textures {
        scene.textures.add(texture);
    }
    for (node, outputs) in assignments {
        if let Some(geometry) = scene.geometry_mut(*node) {
            for (t, id) in geometry.add_material_ids().iter_mut().enumerate() {
                let output = outputs.get(t).copied().unwrap_or(0).min(last);
                *id = offset + output as i32;
            }
        }
    }
    compact_materials(scene);
}

/// Remove unreferenced materials (renumbering mesh material ids) and
/// textures no remaining material samples
pub fn compact_materials(scene: &mut Scene) {
    let mut used = vec![false; scene.materials.len()];
    let meshes: Vec<NodeId> = scene.mesh_nodes().iter().map(|m| m.id).collect();
    for &node in &meshes {
        let Some(geometry) = scene.geometry(node) else {
            continue;
        };
        match &geometry.material_ids {
            Some(ids) => {
                for &id in ids {
                    if let Some(flag) = usize::try_from(id).ok().and_then(|i| used.get_mut(i)) {
                        *flag = true;
                    }
                }
            }
            None if geometry.triangle_count() > 0 => {
                if let Some(flag) = used.first_mut() {
                    *flag = true;
                }
            }
            None => {}
        }
    }

    let mut remap = vec![-1i32; used.len()];
    let mut kept = Vec::new();
    for (i, material) in scene.materials.iter().enumerate() {
        if used[i] {
            remap[i] = kept.len() as i32;
            kept.push(material.clone());
        }
    }
    if kept.len() < used.len() {
        for &node in &meshes {
            if let Some(ids) = scene.geometry_mut(node).and_then(|g| g.material_ids.as_mut()) {
                for id in ids.iter_mut() {
                    if let Some(&new) = usize::try_from(*id).ok().and_then(|i| remap.get(i)) {
                        *id = new.max(0);
                    }
                }
            }
        }
        tracing::debug!("dropped {} unused materials", used.len() - kept.len());
        scene.materials.clear();
        for material in kept {
            scene.materials.add(material);
        }
    }

    let referenced: HashSet<String> = scene
        .materials
        .iter()
        .flat_map(|m| m.channels.values())
        .flat_map(|network| network.texture_names())
        .map(str::to_string)
        .collect();
    let textures: Vec<Texture> = scene
        .textures
        .iter()
        .filter(|t| referenced.contains(&t.name))
        .cloned()
        .collect();
    if textures.len() < scene.textures.len() {
        scene.textures.clear();
        for texture in textures {
            scene.textures.add(texture);
        }
    }
}
