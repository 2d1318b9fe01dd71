use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use glam::{Mat4, Vec3};
use roxmltree::{Document, Node};

use crate::light::Light;
use crate::obj::ObjMesh;

/// Callbacks invoked by [`SceneTraversal::traverse`], in nested order: each
/// node, then each material used under it, then each primitive drawn with
/// that material.
pub trait SceneVisitor<N, M, P> {
    fn node(&mut self, node: &N);
    fn material(&mut self, material: &M);
    fn primitive(&mut self, primitive: &P);
}

/// Anything the geometry pass can walk to find drawable primitives.
pub trait SceneTraversal {
    type Node;
    type Material;
    type Primitive;

    fn traverse(&self, visitor: &mut dyn SceneVisitor<Self::Node, Self::Material, Self::Primitive>);
}

/// Scene description: transformed nodes referencing shared meshes and
/// materials, plus point lights and an optional camera.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Scene {
    pub nodes: Vec<SceneNode>,
    pub materials: Vec<Material>,
    pub meshes: Vec<ObjMesh>,
    pub lights: Vec<Light>,
    pub camera: Option<SceneCamera>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub name: String,
    pub transform: Mat4,
    pub primitives: Vec<Primitive>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Primitive {
    pub mesh: usize,
    pub material: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub albedo: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneCamera {
    pub position: Vec3,
    pub target: Vec3,
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for SceneCamera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 4.0, 12.0),
            target: Vec3::ZERO,
            fov: 60.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Scene {
    /// Loads a scene file, resolving OBJ mesh references relative to it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let xml = fs::read_to_string(path)
            .with_context(|| format!("unable to read scene {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_xml(&xml, |name| {
            let file = base.join(name);
            let data = fs::read_to_string(&file)
                .with_context(|| format!("unable to read mesh {}", file.display()))?;
            ObjMesh::parse(&data).with_context(|| format!("failed to parse OBJ mesh {name}"))
        })
    }

    /// Parses a scene description. `cube` and `plane` name built-in meshes;
    /// any other mesh reference is handed to `load_mesh` once.
    ///
    /// ```xml
    /// <scene>
    ///   <material><name>red</name><color>255 0 0</color></material>
    ///   <object><name>Box</name><mesh>cube</mesh><material>red</material></object>
    ///   <object><name>Lamp</name><type>light</type><radius>6</radius></object>
    ///   <object><name>Eye</name><type>camera</type><position>0 2 8</position></object>
    /// </scene>
    /// ```
    pub fn from_xml(xml: &str, mut load_mesh: impl FnMut(&str) -> Result<ObjMesh>) -> Result<Self> {
        let document = Document::parse(xml).context("invalid scene XML")?;
        let mut scene = Scene::default();
        let mut mesh_names: Vec<String> = Vec::new();

        for node in document.descendants().filter(|n| n.has_tag_name("material")) {
            if node.parent().is_some_and(|p| p.has_tag_name("object")) {
                continue;
            }
            scene.materials.push(Material {
                name: required_text(&node, "name")?,
                albedo: parse_color(optional_text(&node, "color"), Vec3::ONE)?,
            });
        }

        for node in document.descendants().filter(|n| n.has_tag_name("object")) {
            let name = required_text(&node, "name")?;
            let kind = optional_text(&node, "type").unwrap_or_else(|| "mesh".to_string());
            let position = parse_vec3(optional_text(&node, "position"), Vec3::ZERO)?;
            let color = parse_color(optional_text(&node, "color"), Vec3::ONE)?;

            match kind.as_str() {
                "light" => {
                    let light = Light {
                        position,
                        radius: parse_f32(optional_text(&node, "radius"), 5.0)?,
                        color,
                        intensity: parse_f32(optional_text(&node, "intensity"), 1.0)?,
                    };
                    light.check().map_err(|reason| anyhow!("light {name}: {reason}"))?;
                    scene.lights.push(light);
                }
                "camera" => {
                    let defaults = SceneCamera::default();
                    scene.camera = Some(SceneCamera {
                        position,
                        target: parse_vec3(optional_text(&node, "target"), defaults.target)?,
                        fov: parse_f32(optional_text(&node, "fov"), defaults.fov)?,
                        near: parse_f32(optional_text(&node, "near"), defaults.near)?,
                        far: parse_f32(optional_text(&node, "far"), defaults.far)?,
                    });
                }
                "mesh" => {
                    let mesh_name = optional_text(&node, "mesh").unwrap_or_else(|| "cube".to_string());
                    let mesh = match mesh_names.iter().position(|n| *n == mesh_name) {
                        Some(index) => index,
                        None => {
                            let mesh = match mesh_name.as_str() {
                                "cube" => ObjMesh::cube(),
                                "plane" => ObjMesh::plane(),
                                other => load_mesh(other)?,
                            };
                            mesh.validate()
                                .with_context(|| format!("mesh {mesh_name} is malformed"))?;
                            mesh_names.push(mesh_name);
                            scene.meshes.push(mesh);
                            scene.meshes.len() - 1
                        }
                    };
                    let material = match optional_text(&node, "material") {
                        Some(material) => scene
                            .materials
                            .iter()
                            .position(|m| m.name == material)
                            .ok_or_else(|| anyhow!("object {name} uses unknown material {material}"))?,
                        None => scene.material_for_color(&name, color),
                    };
                    let rotation = parse_vec3(optional_text(&node, "rotation"), Vec3::ZERO)?;
                    let scale = parse_vec3(optional_text(&node, "scale"), Vec3::ONE)?;
                    scene.nodes.push(SceneNode {
                        name,
                        transform: model_matrix(position, rotation, scale),
                        primitives: vec![Primitive { mesh, material }],
                    });
                }
                other => return Err(anyhow!("object {name} has unsupported type {other}")),
            }
        }

        Ok(scene)
    }

    /// Built-in scene used when no file is given: a floor with a grid of boxes.
    pub fn demo() -> Self {
        let mut scene = Scene {
            meshes: vec![ObjMesh::plane(), ObjMesh::cube()],
            camera: Some(SceneCamera::default()),
            ..Default::default()
        };
        let floor = scene.material_for_color("floor", Vec3::splat(0.8));
        scene.nodes.push(SceneNode {
            name: "floor".to_string(),
            transform: Mat4::from_scale(Vec3::new(40.0, 1.0, 40.0)),
            primitives: vec![Primitive { mesh: 0, material: floor }],
        });
        let palette = [
            Vec3::new(0.9, 0.3, 0.3),
            Vec3::new(0.3, 0.9, 0.4),
            Vec3::new(0.3, 0.4, 0.9),
        ];
        for row in -3i32..=3 {
            for col in -3i32..=3 {
                let tint = palette[(row + col).rem_euclid(3) as usize];
                let name = format!("box_{row}_{col}");
                let material = scene.material_for_color(&name, tint);
                let height = 0.5 + ((row * 7 + col * 3).rem_euclid(5)) as f32 * 0.5;
                scene.nodes.push(SceneNode {
                    name,
                    transform: model_matrix(
                        Vec3::new(col as f32 * 4.0, height * 0.5, row as f32 * 4.0),
                        Vec3::ZERO,
                        Vec3::new(1.0, height, 1.0),
                    ),
                    primitives: vec![Primitive { mesh: 1, material }],
                });
            }
        }
        scene
    }

    /// World-space bounds of all node origins.
    pub fn extent(&self) -> (Vec3, Vec3) {
        self.nodes
            .iter()
            .map(|node| node.transform.w_axis.truncate())
            .fold((Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)), |(lo, hi), p| {
                (lo.min(p), hi.max(p))
            })
    }

    fn material_for_color(&mut self, owner: &str, albedo: Vec3) -> usize {
        if let Some(index) = self.materials.iter().position(|m| m.albedo == albedo) {
            return index;
        }
        self.materials.push(Material {
            name: owner.to_string(),
            albedo,
        });
        self.materials.len() - 1
    }
}

impl SceneTraversal for Scene {
    type Node = SceneNode;
    type Material = Material;
    type Primitive = Primitive;

    fn traverse(&self, visitor: &mut dyn SceneVisitor<SceneNode, Material, Primitive>) {
        for node in &self.nodes {
            visitor.node(node);
            for batch in batch_by_material(&node.primitives) {
                visitor.material(&self.materials[batch.material]);
                for &primitive in &batch.primitives {
                    visitor.primitive(&node.primitives[primitive]);
                }
            }
        }
    }
}

/// A node's primitives that share one material, as indices into the node's
/// primitive list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialBatch {
    pub material: usize,
    pub primitives: Vec<usize>,
}

/// Groups primitives by material in ascending material order. Primitives
/// keep their relative order inside a batch.
pub fn batch_by_material(primitives: &[Primitive]) -> Vec<MaterialBatch> {
    let mut order: Vec<usize> = (0..primitives.len()).collect();
    order.sort_by_key(|&index| primitives[index].material);
    let mut batches: Vec<MaterialBatch> = Vec::new();
    for index in order {
        let material = primitives[index].material;
        match batches.last_mut() {
            Some(batch) if batch.material == material => batch.primitives.push(index),
            _ => batches.push(MaterialBatch {
                material,
                primitives: vec![index],
            }),
        }
    }
    batches
}

pub fn model_matrix(position: Vec3, rotation_degrees: Vec3, scale: Vec3) -> Mat4 {
    let rotation = Mat4::from_rotation_z(rotation_degrees.z.to_radians())
        * Mat4::from_rotation_y(rotation_degrees.y.to_radians())
        * Mat4::from_rotation_x(rotation_degrees.x.to_radians());
    Mat4::from_translation(position) * rotation * Mat4::from_scale(scale)
}

fn required_text(node: &Node<'_, '_>, tag: &str) -> Result<String> {
    optional_text(node, tag).ok_or_else(|| anyhow!("<{tag}> tag is missing"))
}

fn optional_text(node: &Node<'_, '_>, tag: &str) -> Option<String> {
    node.children()
        .find(|child| child.has_tag_name(tag))
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn parse_components<const N: usize>(value: &str, what: &str) -> Result<[f32; N]> {
    let numbers = value
        .split_whitespace()
        .map(|part| part.parse::<f32>().with_context(|| format!("invalid {what} component {part}")))
        .collect::<Result<Vec<_>>>()?;
    numbers
        .try_into()
        .map_err(|numbers: Vec<f32>| anyhow!("{what} needs {N} components, got {}", numbers.len()))
}

fn parse_vec3(value: Option<String>, default: Vec3) -> Result<Vec3> {
    match value {
        Some(value) => Ok(Vec3::from_array(parse_components::<3>(&value, "vector")?)),
        None => Ok(default),
    }
}

/// Colours are written as 0-255 channel triples.
fn parse_color(value: Option<String>, default: Vec3) -> Result<Vec3> {
    match value {
        Some(value) => Ok(Vec3::from_array(parse_components::<3>(&value, "color")?) / 255.0),
        None => Ok(default),
    }
}

fn parse_f32(value: Option<String>, default: f32) -> Result<f32> {
    match value {
        Some(value) => value
            .parse::<f32>()
            .map_err(|err| anyhow!("failed to parse float {value}: {err}")),
        None => Ok(default),
    }
}
