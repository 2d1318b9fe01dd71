use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4};
use wgpu::util::DeviceExt;

use crate::error::{RendererError, RendererResult};
use crate::obj::ObjMesh;
use crate::scene::{batch_by_material, MaterialBatch, Primitive, Scene, SceneTraversal, SceneVisitor};

/// Bind group layouts for the per-node and per-material uniforms.
pub struct SceneLayouts {
    pub node: wgpu::BindGroupLayout,
    pub material: wgpu::BindGroupLayout,
}

impl SceneLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let entry = |visibility| wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        Self {
            node: device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("node-bind-layout"),
                entries: &[entry(wgpu::ShaderStages::VERTEX)],
            }),
            material: device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("material-bind-layout"),
                entries: &[entry(wgpu::ShaderStages::FRAGMENT)],
            }),
        }
    }
}

pub struct GpuMesh {
    pub vertex: wgpu::Buffer,
    pub index: wgpu::Buffer,
    pub index_count: u32,
}

impl GpuMesh {
    fn from_mesh(device: &wgpu::Device, mesh: &ObjMesh, label: &str) -> Self {
        let vertex = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label}-vertices")),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label}-indices")),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertex,
            index,
            index_count: mesh.indices.len() as u32,
        }
    }
}

pub struct GpuMaterial {
    pub bind_group: wgpu::BindGroup,
}

pub struct GpuNode {
    pub bind_group: wgpu::BindGroup,
    /// Mesh indices grouped by material, fixed at upload.
    batches: Vec<GpuBatch>,
}

struct GpuBatch {
    material: usize,
    meshes: Vec<usize>,
}

impl GpuBatch {
    fn group(primitives: &[Primitive]) -> Vec<Self> {
        batch_by_material(primitives)
            .into_iter()
            .map(|MaterialBatch { material, primitives: members }| GpuBatch {
                material,
                meshes: members.into_iter().map(|index| primitives[index].mesh).collect(),
            })
            .collect()
    }
}

/// Scene contents uploaded to the GPU, walked by the geometry pass in
/// node, material, primitive order.
pub struct GpuScene {
    nodes: Vec<GpuNode>,
    materials: Vec<GpuMaterial>,
    meshes: Vec<GpuMesh>,
}

impl GpuScene {
    /// Validates and uploads every mesh, material and node. Nothing is
    /// uploaded if any mesh or primitive reference is malformed.
    pub fn upload(device: &wgpu::Device, layouts: &SceneLayouts, scene: &Scene) -> RendererResult<Self> {
        check_scene(scene)?;

        let meshes = scene
            .meshes
            .iter()
            .enumerate()
            .map(|(index, mesh)| GpuMesh::from_mesh(device, mesh, &format!("mesh-{index}")))
            .collect();

        let materials = scene
            .materials
            .iter()
            .map(|material| {
                let uniform = MaterialUniform {
                    albedo: material.albedo.extend(1.0).into(),
                };
                GpuMaterial {
                    bind_group: uniform_bind_group(
                        device,
                        &layouts.material,
                        bytemuck::bytes_of(&uniform),
                        &material.name,
                    ),
                }
            })
            .collect();

        let nodes = scene
            .nodes
            .iter()
            .map(|node| {
                let uniform = NodeUniform::new(node.transform);
                GpuNode {
                    bind_group: uniform_bind_group(
                        device,
                        &layouts.node,
                        bytemuck::bytes_of(&uniform),
                        &node.name,
                    ),
                    batches: GpuBatch::group(&node.primitives),
                }
            })
            .collect();

        Ok(Self {
            nodes,
            materials,
            meshes,
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl SceneTraversal for GpuScene {
    type Node = GpuNode;
    type Material = GpuMaterial;
    type Primitive = GpuMesh;

    fn traverse(&self, visitor: &mut dyn SceneVisitor<GpuNode, GpuMaterial, GpuMesh>) {
        for node in &self.nodes {
            visitor.node(node);
            for batch in &node.batches {
                visitor.material(&self.materials[batch.material]);
                for &mesh in &batch.meshes {
                    visitor.primitive(&self.meshes[mesh]);
                }
            }
        }
    }
}

fn check_scene(scene: &Scene) -> RendererResult<()> {
    for (index, mesh) in scene.meshes.iter().enumerate() {
        mesh.validate().map_err(|err| RendererError::InvalidMesh {
            name: format!("mesh #{index}"),
            reason: err.to_string(),
        })?;
    }
    for node in &scene.nodes {
        for primitive in &node.primitives {
            if primitive.mesh >= scene.meshes.len() {
                return Err(RendererError::InvalidMesh {
                    name: node.name.clone(),
                    reason: format!("references missing mesh #{}", primitive.mesh),
                });
            }
            if primitive.material >= scene.materials.len() {
                return Err(RendererError::InvalidMesh {
                    name: node.name.clone(),
                    reason: format!("references missing material #{}", primitive.material),
                });
            }
        }
    }
    Ok(())
}

fn uniform_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    contents: &[u8],
    label: &str,
) -> wgpu::BindGroup {
    let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents,
        usage: wgpu::BufferUsages::UNIFORM,
    });
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: buffer.as_entire_binding(),
        }],
    })
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct NodeUniform {
    model: [[f32; 4]; 4],
    normal: [[f32; 4]; 3],
}

impl NodeUniform {
    fn new(model: Mat4) -> Self {
        let normal = Mat3::from_mat4(model).inverse().transpose();
        Self {
            model: model.to_cols_array_2d(),
            normal: mat3_to_3x4(normal),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct MaterialUniform {
    albedo: [f32; 4],
}

fn mat3_to_3x4(matrix: Mat3) -> [[f32; 4]; 3] {
    let cols = matrix.to_cols_array();
    [
        [cols[0], cols[1], cols[2], 0.0],
        [cols[3], cols[4], cols[5], 0.0],
        [cols[6], cols[7], cols[8], 0.0],
    ]
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::scene::{Material, SceneNode};

    fn scene_with(mesh: ObjMesh, primitive: Primitive) -> Scene {
        Scene {
            meshes: vec![mesh],
            materials: vec![Material {
                name: "grey".into(),
                albedo: Vec3::splat(0.5),
            }],
            nodes: vec![SceneNode {
                name: "node".into(),
                transform: Mat4::IDENTITY,
                primitives: vec![primitive],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn accepts_well_formed_scene() {
        assert!(check_scene(&Scene::demo()).is_ok());
        let scene = scene_with(ObjMesh::cube(), Primitive { mesh: 0, material: 0 });
        assert!(check_scene(&scene).is_ok());
    }

    #[test]
    fn rejects_bad_mesh_and_references() {
        let mut broken = ObjMesh::cube();
        broken.indices.pop();
        let err = check_scene(&scene_with(broken, Primitive { mesh: 0, material: 0 })).unwrap_err();
        assert!(matches!(err, RendererError::InvalidMesh { .. }));

        let err = check_scene(&scene_with(ObjMesh::cube(), Primitive { mesh: 3, material: 0 }))
            .unwrap_err();
        assert!(err.to_string().contains("missing mesh"));
    }

    #[test]
    fn batches_resolve_to_mesh_indices() {
        let primitives = [
            Primitive { mesh: 4, material: 1 },
            Primitive { mesh: 7, material: 0 },
            Primitive { mesh: 5, material: 1 },
        ];
        let batches = GpuBatch::group(&primitives);
        let flat: Vec<(usize, Vec<usize>)> = batches
            .into_iter()
            .map(|batch| (batch.material, batch.meshes))
            .collect();
        assert_eq!(flat, vec![(0, vec![7]), (1, vec![4, 5])]);
    }

    #[test]
    fn node_uniform_is_uniform_sized() {
        assert_eq!(std::mem::size_of::<NodeUniform>(), 112);
        let uniform = NodeUniform::new(Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0)));
        assert_eq!(uniform.normal[0][0], 0.5);
    }
}
