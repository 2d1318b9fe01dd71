//! WGSL sources for the three passes. Grid dimensions and the per-cluster
//! capacity are baked in as module constants so the cluster records have a
//! fixed stride on both sides of the bus.

use std::fmt::Write as _;

use crate::config::ClusterConfig;
use crate::shading::{AMBIENT, BACKGROUND};

/// Module-scope constants shared by the assignment and resolve shaders.
pub(crate) fn constants_header(config: &ClusterConfig) -> String {
    let [x, y, z] = config.dims;
    let mut out = String::new();
    let _ = writeln!(out, "const CLUSTER_DIM_X: u32 = {x}u;");
    let _ = writeln!(out, "const CLUSTER_DIM_Y: u32 = {y}u;");
    let _ = writeln!(out, "const CLUSTER_DIM_Z: u32 = {z}u;");
    let _ = writeln!(out, "const CLUSTER_COUNT: u32 = {}u;", config.cluster_count());
    let _ = writeln!(
        out,
        "const MAX_LIGHTS_PER_CLUSTER: u32 = {}u;",
        config.max_lights_per_cluster
    );
    let _ = writeln!(out, "const WORKGROUP_SIZE: u32 = {}u;", config.workgroup_size);
    let _ = writeln!(out, "const AMBIENT: f32 = {AMBIENT:?};");
    let _ = writeln!(
        out,
        "const BACKGROUND: vec3<f32> = vec3<f32>({:?}, {:?}, {:?});",
        BACKGROUND.x, BACKGROUND.y, BACKGROUND.z
    );
    out
}

pub(crate) fn assignment_source(config: &ClusterConfig) -> String {
    [constants_header(config).as_str(), CAMERA, COMMON, ASSIGNMENT].concat()
}

pub(crate) fn geometry_source() -> String {
    [CAMERA, GEOMETRY].concat()
}

pub(crate) fn resolve_source(config: &ClusterConfig) -> String {
    [constants_header(config).as_str(), CAMERA, COMMON, RESOLVE].concat()
}

const CAMERA: &str = r#"
struct CameraUniforms {
    view_proj: mat4x4<f32>,
    view: mat4x4<f32>,
    inv_proj: mat4x4<f32>,
    resolution: vec2<f32>,
    near: f32,
    far: f32,
};
"#;

const COMMON: &str = r#"
struct Light {
    position: vec3<f32>,
    radius: f32,
    color: vec3<f32>,
    intensity: f32,
};

struct LightSet {
    count: u32,
    lights: array<Light>,
};

struct ClusterLights {
    count: u32,
    indices: array<u32, MAX_LIGHTS_PER_CLUSTER>,
};

struct ClusterSet {
    cluster_count: u32,
    clusters: array<ClusterLights>,
};

@group(0) @binding(0) var<uniform> camera: CameraUniforms;

fn slice_depth(z: u32) -> f32 {
    if (z == 0u) {
        return camera.near;
    }
    if (z >= CLUSTER_DIM_Z) {
        return camera.far;
    }
    return camera.near * pow(camera.far / camera.near, f32(z) / f32(CLUSTER_DIM_Z));
}
"#;

const ASSIGNMENT: &str = r#"
@group(0) @binding(1) var<storage, read> light_set: LightSet;
@group(0) @binding(2) var<storage, read_write> cluster_set: ClusterSet;

fn unproject_uv(uv: vec2<f32>) -> vec3<f32> {
    let p = camera.inv_proj * vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 0.0, 1.0);
    return p.xyz / p.w;
}

fn at_depth(ray: vec3<f32>, depth: f32) -> vec3<f32> {
    let scale = depth / -ray.z;
    return vec3<f32>(ray.xy * scale, -depth);
}

@compute @workgroup_size(WORKGROUP_SIZE)
fn assign_lights(@builtin(global_invocation_id) id: vec3<u32>) {
    let cluster = id.x;
    if (cluster >= CLUSTER_COUNT) {
        return;
    }
    if (cluster == 0u) {
        cluster_set.cluster_count = CLUSTER_COUNT;
    }

    let x = cluster % CLUSTER_DIM_X;
    let y = (cluster / CLUSTER_DIM_X) % CLUSTER_DIM_Y;
    let z = cluster / (CLUSTER_DIM_X * CLUSTER_DIM_Y);
    let uv_min = vec2<f32>(f32(x) / f32(CLUSTER_DIM_X), f32(y) / f32(CLUSTER_DIM_Y));
    let uv_max = vec2<f32>(f32(x + 1u) / f32(CLUSTER_DIM_X), f32(y + 1u) / f32(CLUSTER_DIM_Y));
    let near_depth = slice_depth(z);
    let far_depth = slice_depth(z + 1u);

    var rays = array<vec3<f32>, 4>(
        unproject_uv(uv_min),
        unproject_uv(vec2<f32>(uv_max.x, uv_min.y)),
        unproject_uv(vec2<f32>(uv_min.x, uv_max.y)),
        unproject_uv(uv_max),
    );
    var bounds_min = vec3<f32>(3.4e38);
    var bounds_max = vec3<f32>(-3.4e38);
    for (var i = 0u; i < 4u; i++) {
        let a = at_depth(rays[i], near_depth);
        let b = at_depth(rays[i], far_depth);
        bounds_min = min(bounds_min, min(a, b));
        bounds_max = max(bounds_max, max(a, b));
    }

    var count = 0u;
    let light_count = light_set.count;
    for (var i = 0u; i < light_count; i++) {
        let light = light_set.lights[i];
        let center = (camera.view * vec4<f32>(light.position, 1.0)).xyz;
        let delta = center - clamp(center, bounds_min, bounds_max);
        if (dot(delta, delta) <= light.radius * light.radius) {
            if (count == MAX_LIGHTS_PER_CLUSTER) {
                break;
            }
            cluster_set.clusters[cluster].indices[count] = i;
            count++;
        }
    }
    cluster_set.clusters[cluster].count = count;
}
"#;

const GEOMETRY: &str = r#"
struct NodeUniforms {
    model: mat4x4<f32>,
    normal: mat3x4<f32>,
};

struct MaterialUniforms {
    albedo: vec4<f32>,
};

@group(0) @binding(0) var<uniform> camera: CameraUniforms;
@group(1) @binding(0) var<uniform> node: NodeUniforms;
@group(2) @binding(0) var<uniform> material: MaterialUniforms;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) view_depth: f32,
};

struct GBufferOutput {
    @location(0) albedo: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) position: vec4<f32>,
    @location(3) depth: f32,
};

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let world = node.model * vec4<f32>(input.position, 1.0);
    let normal_matrix = mat3x3<f32>(node.normal[0].xyz, node.normal[1].xyz, node.normal[2].xyz);
    out.clip_position = camera.view_proj * world;
    out.world_position = world.xyz;
    out.normal = normal_matrix * input.normal;
    out.view_depth = -(camera.view * world).z;
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> GBufferOutput {
    var out: GBufferOutput;
    // alpha 1 marks covered pixels for the resolve pass
    out.albedo = vec4<f32>(material.albedo.rgb, 1.0);
    out.normal = vec4<f32>(normalize(input.normal), 0.0);
    out.position = vec4<f32>(input.world_position, 1.0);
    out.depth = input.view_depth;
    return out;
}
"#;

const RESOLVE: &str = r#"
@group(0) @binding(1) var<storage, read> light_set: LightSet;
@group(0) @binding(2) var<storage, read> cluster_set: ClusterSet;

@group(1) @binding(0) var gbuffer_albedo: texture_2d<f32>;
@group(1) @binding(1) var gbuffer_normal: texture_2d<f32>;
@group(1) @binding(2) var gbuffer_position: texture_2d<f32>;
@group(1) @binding(3) var gbuffer_depth: texture_2d<f32>;

@vertex
fn vs_fullscreen(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

fn cluster_index(pixel: vec2<f32>, depth: f32) -> u32 {
    let uv = pixel / camera.resolution;
    let x = min(u32(max(uv.x, 0.0) * f32(CLUSTER_DIM_X)), CLUSTER_DIM_X - 1u);
    let y = min(u32(max(uv.y, 0.0) * f32(CLUSTER_DIM_Y)), CLUSTER_DIM_Y - 1u);
    let t = log(max(depth, camera.near) / camera.near) / log(camera.far / camera.near);
    let z = min(u32(max(t, 0.0) * f32(CLUSTER_DIM_Z)), CLUSTER_DIM_Z - 1u);
    return x + y * CLUSTER_DIM_X + z * CLUSTER_DIM_X * CLUSTER_DIM_Y;
}

fn point_light(light: Light, position: vec3<f32>, normal: vec3<f32>) -> vec3<f32> {
    let to_light = light.position - position;
    let distance = length(to_light);
    if (distance >= light.radius) {
        return vec3<f32>(0.0);
    }
    let direction = to_light / max(distance, 1e-4);
    let lambert = max(dot(normal, direction), 0.0);
    let ratio = distance / light.radius;
    let window = clamp(1.0 - ratio * ratio * ratio * ratio, 0.0, 1.0);
    let attenuation = window * window / (distance * distance + 1.0);
    return light.color * light.intensity * lambert * attenuation;
}

@fragment
fn fs_resolve(@builtin(position) frag_coord: vec4<f32>) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(floor(frag_coord.xy));
    let albedo = textureLoad(gbuffer_albedo, pixel, 0);
    if (albedo.a == 0.0) {
        return vec4<f32>(BACKGROUND, 1.0);
    }
    let normal = normalize(textureLoad(gbuffer_normal, pixel, 0).xyz);
    let position = textureLoad(gbuffer_position, pixel, 0).xyz;
    let depth = textureLoad(gbuffer_depth, pixel, 0).r;

    let cluster = cluster_index(frag_coord.xy, depth);
    let count = min(cluster_set.clusters[cluster].count, MAX_LIGHTS_PER_CLUSTER);
    var lit = vec3<f32>(0.0);
    for (var i = 0u; i < count; i++) {
        let light = light_set.lights[cluster_set.clusters[cluster].indices[i]];
        lit += point_light(light, position, normal);
    }
    return vec4<f32>(albedo.rgb * (vec3<f32>(AMBIENT) + lit), 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_reflects_config() {
        let config = ClusterConfig::default()
            .with_dims(4, 3, 2)
            .with_max_lights_per_cluster(8);
        let header = constants_header(&config);
        assert!(header.contains("const CLUSTER_DIM_X: u32 = 4u;"));
        assert!(header.contains("const CLUSTER_DIM_Z: u32 = 2u;"));
        assert!(header.contains("const CLUSTER_COUNT: u32 = 24u;"));
        assert!(header.contains("const MAX_LIGHTS_PER_CLUSTER: u32 = 8u;"));
        assert!(header.contains("const AMBIENT: f32 = 0.05;"));
    }

    #[test]
    fn sources_declare_their_entry_points() {
        let config = ClusterConfig::default();
        assert!(assignment_source(&config).contains("fn assign_lights("));
        assert!(geometry_source().contains("fn vs_main("));
        assert!(geometry_source().contains("fn fs_main("));
        let resolve = resolve_source(&config);
        assert!(resolve.contains("fn vs_fullscreen("));
        assert!(resolve.contains("fn fs_resolve("));
        // One camera declaration per module.
        assert_eq!(resolve.matches("struct CameraUniforms").count(), 1);
    }

    fn validate(label: &str, source: &str) -> Vec<String> {
        let module = naga::front::wgsl::parse_str(source)
            .unwrap_or_else(|err| panic!("{label} does not parse:\n{}", err.emit_to_string(source)));
        naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all())
            .validate(&module)
            .unwrap_or_else(|err| panic!("{label} does not validate: {err:?}"));
        module.entry_points.iter().map(|entry| entry.name.clone()).collect()
    }

    #[test]
    fn generated_modules_validate() {
        let configs = [
            ClusterConfig::default(),
            ClusterConfig::default()
                .with_dims(1, 1, 1)
                .with_max_lights_per_cluster(1),
            ClusterConfig::default()
                .with_dims(7, 5, 3)
                .with_max_lights_per_cluster(2),
        ];
        for config in configs {
            assert_eq!(validate("assignment", &assignment_source(&config)), ["assign_lights"]);
            let mut resolve = validate("resolve", &resolve_source(&config));
            resolve.sort();
            assert_eq!(resolve, ["fs_resolve", "vs_fullscreen"]);
        }
        let mut geometry = validate("geometry", &geometry_source());
        geometry.sort();
        assert_eq!(geometry, ["fs_main", "vs_main"]);
    }
}
