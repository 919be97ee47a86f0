//! Shading networks
//!
//! A shading network is an expression DAG evaluated per texel when a
//! material channel is cast into a texture. Nodes live in an arena and refer
//! to their inputs by [`ShadingNodeId`]; a node may only reference nodes added
//! before it, so networks are acyclic by construction and a node can feed any
//! number of consumers.

use crate::error::{Error, Result};
use crate::point::Color;
use serde::{Deserialize, Serialize};

/// Index of a node inside its [`ShadingNetwork`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShadingNodeId(pub u32);

impl ShadingNodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A shading expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ShadingNode {
    /// Constant color
    Color(Color),
    /// Texture lookup using a texture coordinate level (or named level)
    Texture {
        texture_name: String,
        tex_coord_level: usize,
        tex_coord_name: Option<String>,
    },
    /// Interpolated vertex color set
    VertexColor { color_set: usize },
    Add(ShadingNodeId, ShadingNodeId),
    Subtract(ShadingNodeId, ShadingNodeId),
    Multiply(ShadingNodeId, ShadingNodeId),
    Divide(ShadingNodeId, ShadingNodeId),
    Max(ShadingNodeId, ShadingNodeId),
    Min(ShadingNodeId, ShadingNodeId),
    /// Dot product of the RGB parts, written to all four components
    Dot3(ShadingNodeId, ShadingNodeId),
    /// Component-wise clamp to `[min, max]`
    Clamp {
        input: ShadingNodeId,
        min: f32,
        max: f32,
    },
    /// `a + (b - a) * t`, with `t` taken per component
    Interpolate {
        a: ShadingNodeId,
        b: ShadingNodeId,
        t: ShadingNodeId,
    },
    /// Reorder components; each entry picks 0..=3 from the input
    Swizzle {
        input: ShadingNodeId,
        components: [u8; 4],
    },
    /// User evaluated node, resolved through [`ShadingContext::custom_node`]
    Custom {
        name: String,
        inputs: Vec<ShadingNodeId>,
    },
}

impl ShadingNode {
    pub fn texture(texture_name: &str, tex_coord_level: usize) -> Self {
        ShadingNode::Texture {
            texture_name: texture_name.to_string(),
            tex_coord_level,
            tex_coord_name: None,
        }
    }

    pub fn inputs(&self) -> Vec<ShadingNodeId> {
        match self {
            ShadingNode::Color(_) | ShadingNode::Texture { .. } | ShadingNode::VertexColor { .. } => {
                Vec::new()
            }
            ShadingNode::Add(a, b)
            | ShadingNode::Subtract(a, b)
            | ShadingNode::Multiply(a, b)
            | ShadingNode::Divide(a, b)
            | ShadingNode::Max(a, b)
            | ShadingNode::Min(a, b)
            | ShadingNode::Dot3(a, b) => vec![*a, *b],
            ShadingNode::Clamp { input, .. } | ShadingNode::Swizzle { input, .. } => vec![*input],
            ShadingNode::Interpolate { a, b, t } => vec![*a, *b, *t],
            ShadingNode::Custom { inputs, .. } => inputs.clone(),
        }
    }
}

/// Value of a texture node whose image or texture coordinates are missing
pub const MISSING_TEXTURE_COLOR: Color = Color::BLACK;

/// Per-texel inputs a network evaluation can draw from
pub trait ShadingContext {
    /// Sample a texture at the interpolated texture coordinate of the given
    /// level. `None` when the texture or the level is unavailable.
    fn sample_texture(
        &self,
        texture_name: &str,
        tex_coord_level: usize,
        tex_coord_name: Option<&str>,
    ) -> Option<Color>;

    /// Interpolated vertex color of a color set
    fn vertex_color(&self, color_set: usize) -> Option<Color>;

    /// Evaluate a custom node from its already evaluated inputs
    fn custom_node(&self, _name: &str, _inputs: &[Color]) -> Option<Color> {
        None
    }
}

/// An acyclic expression graph with a designated output node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadingNetwork {
    nodes: Vec<ShadingNode>,
    output: Option<ShadingNodeId>,
}

impl ShadingNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Network made of a single constant color
    pub fn constant(color: Color) -> Self {
        let mut network = Self::new();
        let id = network.push(ShadingNode::Color(color));
        network.output = Some(id);
        network
    }

    /// Network made of a single texture lookup
    pub fn texture(texture_name: &str, tex_coord_level: usize) -> Self {
        let mut network = Self::new();
        let id = network.push(ShadingNode::texture(texture_name, tex_coord_level));
        network.output = Some(id);
        network
    }

    fn push(&mut self, node: ShadingNode) -> ShadingNodeId {
        self.nodes.push(node);
        ShadingNodeId(self.nodes.len() as u32 - 1)
    }

    /// Add a node. Inputs must refer to nodes already in the network.
    pub fn add(&mut self, node: ShadingNode) -> Result<ShadingNodeId> {
        let next = self.nodes.len() as u32;
        if let Some(bad) = node.inputs().into_iter().find(|id| id.0 >= next) {
            return Err(Error::InvalidData(format!(
                "shading node input {} does not exist yet",
                bad.0
            )));
        }
        Ok(self.push(node))
    }

    /// Make `id` the node whose value the network produces
    pub fn set_output(&mut self, id: ShadingNodeId) -> Result<()> {
        if id.index() >= self.nodes.len() {
            return Err(Error::InvalidData(format!("shading node {} does not exist", id.0)));
        }
        self.output = Some(id);
        Ok(())
    }

    pub fn output(&self) -> Option<ShadingNodeId> {
        self.output
    }

    pub fn node(&self, id: ShadingNodeId) -> Option<&ShadingNode> {
        self.nodes.get(id.index())
    }

    pub fn nodes(&self) -> &[ShadingNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check the arena ordering (inputs before consumers) and the output id.
    /// Networks built with [`ShadingNetwork::add`] always pass; deserialized
    /// ones may not.
    pub fn validate(&self) -> Result<()> {
        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(bad) = node.inputs().into_iter().find(|id| id.index() >= i) {
                return Err(Error::InvalidData(format!(
                    "shading node {} references node {} which is not an earlier node",
                    i, bad.0
                )));
            }
        }
        match self.output {
            Some(id) if id.index() < self.nodes.len() => Ok(()),
            Some(id) => Err(Error::InvalidData(format!("output node {} does not exist", id.0))),
            None => Err(Error::InvalidData("shading network has no output node".to_string())),
        }
    }

    /// Names of every texture the network reads
    pub fn texture_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .nodes
            .iter()
            .filter_map(|n| match n {
                ShadingNode::Texture { texture_name, .. } => Some(texture_name.as_str()),
                _ => None,
            })
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Color of a network whose output is a constant
    pub fn constant_color(&self) -> Option<Color> {
        match self.output.and_then(|id| self.node(id)) {
            Some(ShadingNode::Color(color)) => Some(*color),
            _ => None,
        }
    }

    /// First texture lookup of the network as `(texture name, level)`
    pub fn primary_texture(&self) -> Option<(&str, usize)> {
        self.nodes.iter().find_map(|n| match n {
            ShadingNode::Texture {
                texture_name,
                tex_coord_level,
                ..
            } => Some((texture_name.as_str(), *tex_coord_level)),
            _ => None,
        })
    }

    /// True when any custom node is present
    pub fn has_custom_nodes(&self) -> bool {
        self.nodes.iter().any(|n| matches!(n, ShadingNode::Custom { .. }))
    }

    /// Evaluate the output node
    pub fn evaluate(&self, ctx: &dyn ShadingContext) -> Result<Color> {
        let mut scratch = Vec::new();
        self.evaluate_with(ctx, &mut scratch)
    }

    /// Evaluate reusing a caller owned memo buffer. Each node is evaluated at
    /// most once per call. Textures that cannot be sampled read as
    /// [`MISSING_TEXTURE_COLOR`].
    pub fn evaluate_with(&self, ctx: &dyn ShadingContext, memo: &mut Vec<Option<Color>>) -> Result<Color> {
        self.validate()?;
        let output = self
            .output
            .ok_or_else(|| Error::InvalidData("shading network has no output node".to_string()))?;
        memo.clear();
        memo.resize(self.nodes.len(), None);
        self.eval_node(output, ctx, memo)
    }

    fn eval_node(
        &self,
        id: ShadingNodeId,
        ctx: &dyn ShadingContext,
        memo: &mut Vec<Option<Color>>,
    ) -> Result<Color> {
        if let Some(value) = memo.get(id.index()).copied().flatten() {
            return Ok(value);
        }
        let node = self
            .nodes
            .get(id.index())
            .ok_or_else(|| Error::InvalidData(format!("shading node {} does not exist", id.0)))?;

        let value = match node {
            ShadingNode::Color(c) => *c,
            ShadingNode::Texture {
                texture_name,
                tex_coord_level,
                tex_coord_name,
            } => ctx
                .sample_texture(texture_name, *tex_coord_level, tex_coord_name.as_deref())
                .unwrap_or(MISSING_TEXTURE_COLOR),
            ShadingNode::VertexColor { color_set } => ctx
                .vertex_color(*color_set)
                .ok_or_else(|| Error::InvalidData(format!("vertex color set {} is missing", color_set)))?,
            ShadingNode::Add(a, b) => self.binary(*a, *b, ctx, memo, |x, y| x + y)?,
            ShadingNode::Subtract(a, b) => self.binary(*a, *b, ctx, memo, |x, y| x - y)?,
            ShadingNode::Multiply(a, b) => self.binary(*a, *b, ctx, memo, |x, y| x * y)?,
            ShadingNode::Divide(a, b) => {
                self.binary(*a, *b, ctx, memo, |x, y| if y != 0.0 { x / y } else { 0.0 })?
            }
            ShadingNode::Max(a, b) => self.binary(*a, *b, ctx, memo, f32::max)?,
            ShadingNode::Min(a, b) => self.binary(*a, *b, ctx, memo, f32::min)?,
            ShadingNode::Dot3(a, b) => {
                let x = self.eval_node(*a, ctx, memo)?;
                let y = self.eval_node(*b, ctx, memo)?;
                Color::splat(x.r * y.r + x.g * y.g + x.b * y.b)
            }
            ShadingNode::Clamp { input, min, max } => {
                let (lo, hi) = (*min, *max);
                self.eval_node(*input, ctx, memo)?.map(|v| v.clamp(lo, hi))
            }
            ShadingNode::Interpolate { a, b, t } => {
                let x = self.eval_node(*a, ctx, memo)?;
                let y = self.eval_node(*b, ctx, memo)?;
                let w = self.eval_node(*t, ctx, memo)?;
                Color::new(
                    x.r + (y.r - x.r) * w.r,
                    x.g + (y.g - x.g) * w.g,
                    x.b + (y.b - x.b) * w.b,
                    x.a + (y.a - x.a) * w.a,
                )
            }
            ShadingNode::Swizzle { input, components } => {
                let x = self.eval_node(*input, ctx, memo)?;
                Color::new(
                    x.component(components[0] as usize),
                    x.component(components[1] as usize),
                    x.component(components[2] as usize),
                    x.component(components[3] as usize),
                )
            }
            ShadingNode::Custom { name, inputs } => {
                let mut values = Vec::with_capacity(inputs.len());
                for input in inputs {
                    values.push(self.eval_node(*input, ctx, memo)?);
                }
                ctx.custom_node(name, &values).ok_or_else(|| {
                    Error::Algorithm(format!("no evaluator registered for custom node '{}'", name))
                })?
            }
        };
        memo[id.index()] = Some(value);
        Ok(value)
    }

    fn binary(
        &self,
        a: ShadingNodeId,
        b: ShadingNodeId,
        ctx: &dyn ShadingContext,
        memo: &mut Vec<Option<Color>>,
        op: impl Fn(f32, f32) -> f32,
    ) -> Result<Color> {
        let x = self.eval_node(a, ctx, memo)?;
        let y = self.eval_node(b, ctx, memo)?;
        Ok(x.zip(y, op))
    }
}
