use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Floats per interleaved vertex: `position.xyz` followed by `normal.xyz`.
pub const VERTEX_STRIDE: usize = 6;

/// Indexed triangle mesh with interleaved position/normal vertices.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjMesh {
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
}

impl ObjMesh {
    /// Parses a Wavefront OBJ document. Polygons are fan-triangulated and
    /// missing normals are replaced by smoothed face normals.
    pub fn parse(data: &str) -> Result<Self> {
        let mut positions = Vec::new();
        let mut normals = Vec::new();
        let mut triangles: Vec<[Corner; 3]> = Vec::new();

        for (line_no, line) in data.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("v") => positions.push(
                    parse_vec3(fields).with_context(|| format!("bad vertex on line {}", line_no + 1))?,
                ),
                Some("vn") => normals.push(
                    parse_vec3(fields).with_context(|| format!("bad normal on line {}", line_no + 1))?,
                ),
                Some("f") => {
                    let polygon = parse_polygon(fields)
                        .with_context(|| format!("bad face on line {}", line_no + 1))?;
                    for i in 1..polygon.len() - 1 {
                        triangles.push([polygon[0], polygon[i], polygon[i + 1]]);
                    }
                }
                _ => {}
            }
        }

        if positions.is_empty() {
            return Err(anyhow!("OBJ data defines no vertices"));
        }

        let mut mesh = weld(&positions, &normals, &triangles)?;
        if mesh.has_missing_normals() {
            mesh.smooth_normals();
        }
        Ok(mesh)
    }

    /// Unit cube centred on the origin.
    pub fn cube() -> Self {
        let faces: [(Vec3, Vec3, Vec3); 6] = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        ];
        let mut mesh = Self::default();
        for (normal, right, up) in faces {
            mesh.push_quad(normal * 0.5, right * 0.5, up * 0.5, normal);
        }
        mesh
    }

    /// Unit square in the XZ plane facing `+Y`.
    pub fn plane() -> Self {
        let mut mesh = Self::default();
        mesh.push_quad(Vec3::ZERO, Vec3::X * 0.5, Vec3::NEG_Z * 0.5, Vec3::Y);
        mesh
    }

    fn push_quad(&mut self, centre: Vec3, right: Vec3, up: Vec3, normal: Vec3) {
        let base = self.vertex_count() as u32;
        for corner in [
            centre - right - up,
            centre + right - up,
            centre + right + up,
            centre - right + up,
        ] {
            self.vertices.extend_from_slice(&corner.to_array());
            self.vertices.extend_from_slice(&normal.to_array());
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / VERTEX_STRIDE
    }

    /// Checks the buffers are drawable as an indexed triangle list.
    pub fn validate(&self) -> Result<()> {
        if self.vertices.is_empty() || self.vertices.len() % VERTEX_STRIDE != 0 {
            return Err(anyhow!(
                "vertex data has {} floats, expected a non-zero multiple of {VERTEX_STRIDE}",
                self.vertices.len()
            ));
        }
        if self.indices.is_empty() || self.indices.len() % 3 != 0 {
            return Err(anyhow!(
                "index data has {} entries, expected a non-zero multiple of 3",
                self.indices.len()
            ));
        }
        let count = self.vertex_count() as u32;
        if let Some(bad) = self.indices.iter().find(|&&i| i >= count) {
            return Err(anyhow!("index {bad} is out of range for {count} vertices"));
        }
        if self.vertices.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("vertex data contains non-finite values"));
        }
        Ok(())
    }

    fn position(&self, vertex: usize) -> Vec3 {
        Vec3::from_slice(&self.vertices[vertex * VERTEX_STRIDE..vertex * VERTEX_STRIDE + 3])
    }

    fn has_missing_normals(&self) -> bool {
        self.vertices
            .chunks_exact(VERTEX_STRIDE)
            .any(|v| v[3] == 0.0 && v[4] == 0.0 && v[5] == 0.0)
    }

    fn smooth_normals(&mut self) {
        let mut sums = vec![Vec3::ZERO; self.vertex_count()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            let face = (self.position(b) - self.position(a)).cross(self.position(c) - self.position(a));
            if let Some(face) = face.try_normalize() {
                sums[a] += face;
                sums[b] += face;
                sums[c] += face;
            }
        }
        for (vertex, sum) in sums.into_iter().enumerate() {
            let offset = vertex * VERTEX_STRIDE + 3;
            self.vertices[offset..offset + 3].copy_from_slice(&sum.normalize_or_zero().to_array());
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Corner {
    position: i32,
    normal: i32,
}

fn parse_vec3<'a>(mut fields: impl Iterator<Item = &'a str>) -> Result<Vec3> {
    let mut next = || -> Result<f32> {
        Ok(fields
            .next()
            .ok_or_else(|| anyhow!("missing vector component"))?
            .parse::<f32>()?)
    };
    Ok(Vec3::new(next()?, next()?, next()?))
}

fn parse_polygon<'a>(fields: impl Iterator<Item = &'a str>) -> Result<Vec<Corner>> {
    let corners = fields
        .map(|field| -> Result<Corner> {
            // v, v/vt, v//vn or v/vt/vn
            let mut parts = field.split('/');
            let position = parts
                .next()
                .ok_or_else(|| anyhow!("missing vertex index"))?
                .parse::<i32>()?;
            let normal = parts
                .nth(1)
                .filter(|s| !s.is_empty())
                .map(str::parse::<i32>)
                .transpose()?
                .unwrap_or(0);
            Ok(Corner { position, normal })
        })
        .collect::<Result<Vec<_>>>()?;
    if corners.len() < 3 {
        return Err(anyhow!("faces need at least 3 vertices"));
    }
    Ok(corners)
}

/// Resolves a 1-based (or negative, relative) OBJ index.
fn resolve(index: i32, len: usize) -> Option<usize> {
    match index {
        i if i > 0 => Some(i as usize - 1).filter(|&i| i < len),
        i if i < 0 => len.checked_sub(i.unsigned_abs() as usize),
        _ => None,
    }
}

fn weld(positions: &[Vec3], normals: &[Vec3], triangles: &[[Corner; 3]]) -> Result<ObjMesh> {
    let mut seen: HashMap<(usize, Option<usize>), u32> = HashMap::new();
    let mut mesh = ObjMesh::default();
    for corner in triangles.iter().flatten() {
        let position = resolve(corner.position, positions.len())
            .ok_or_else(|| anyhow!("vertex index {} out of range", corner.position))?;
        let normal = resolve(corner.normal, normals.len());
        let next = mesh.vertex_count() as u32;
        let index = *seen.entry((position, normal)).or_insert_with(|| {
            mesh.vertices.extend_from_slice(&positions[position].to_array());
            let n = normal.map(|i| normals[i]).unwrap_or(Vec3::ZERO);
            mesh.vertices.extend_from_slice(&n.to_array());
            next
        });
        mesh.indices.push(index);
    }
    Ok(mesh)
}
