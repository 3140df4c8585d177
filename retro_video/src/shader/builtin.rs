// Every built-in stage declares the same `Params` block so the vertex and
// fragment modules of a pass agree on member offsets.

pub const DEFAULT_VERTEX: &str = r#"
struct Params {
    MVPMatrix: mat4x4<f32>,
    TextureSize: vec2<f32>,
    InputSize: vec2<f32>,
    OutputSize: vec2<f32>,
    FrameCount: i32,
    FrameDirection: i32,
    screenDensity: f32,
};

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) coords: vec2<f32>,
};

@group(0) @binding(2) var<uniform> params: Params;

@vertex
fn vs_main(
    @location(0) vPosition: vec2<f32>,
    @location(1) vCoordinate: vec2<f32>,
) -> VertexOutput {
    var output: VertexOutput;
    output.position = params.MVPMatrix * vec4<f32>(vPosition, 0.0, 1.0);
    output.coords = vCoordinate;
    return output;
}
"#;

pub const DEFAULT_FRAGMENT: &str = r#"
@group(0) @binding(0) var Texture: texture_2d<f32>;
@group(0) @binding(1) var textureSampler: sampler;

@fragment
fn fs_main(@location(0) coords: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(Texture, textureSampler, coords);
}
"#;

/// Nearest-looking upscale that only blends across texel edges.
pub const SHARP_FRAGMENT: &str = r#"
struct Params {
    MVPMatrix: mat4x4<f32>,
    TextureSize: vec2<f32>,
    InputSize: vec2<f32>,
    OutputSize: vec2<f32>,
    FrameCount: i32,
    FrameDirection: i32,
    screenDensity: f32,
};

@group(0) @binding(0) var Texture: texture_2d<f32>;
@group(0) @binding(1) var textureSampler: sampler;
@group(0) @binding(2) var<uniform> params: Params;

@fragment
fn fs_main(@location(0) coords: vec2<f32>) -> @location(0) vec4<f32> {
    let size = max(params.TextureSize, vec2<f32>(1.0, 1.0));
    let texel = coords * size;
    let scale = max(floor(params.screenDensity), 1.0);
    let region = 0.5 - 0.5 / scale;
    let center_dist = fract(texel) - vec2<f32>(0.5, 0.5);
    let bounded = clamp(center_dist, vec2<f32>(-region, -region), vec2<f32>(region, region));
    let offset = (center_dist - bounded) * scale + vec2<f32>(0.5, 0.5);
    return textureSample(Texture, textureSampler, (floor(texel) + offset) / size);
}
"#;

/// First CRT pass: horizontal phosphor spread into an offscreen target.
pub const CRT_SPREAD_FRAGMENT: &str = r#"
struct Params {
    MVPMatrix: mat4x4<f32>,
    TextureSize: vec2<f32>,
    InputSize: vec2<f32>,
    OutputSize: vec2<f32>,
    FrameCount: i32,
    FrameDirection: i32,
    screenDensity: f32,
};

@group(0) @binding(0) var Texture: texture_2d<f32>;
@group(0) @binding(1) var textureSampler: sampler;
@group(0) @binding(2) var<uniform> params: Params;

@fragment
fn fs_main(@location(0) coords: vec2<f32>) -> @location(0) vec4<f32> {
    let texel_width = 1.0 / max(params.TextureSize.x, 1.0);
    let spread = vec2<f32>(texel_width * 0.5, 0.0);
    let center = textureSample(Texture, textureSampler, coords).rgb;
    let left = textureSample(Texture, textureSampler, coords - spread).rgb;
    let right = textureSample(Texture, textureSampler, coords + spread).rgb;
    return vec4<f32>(center * 0.6 + (left + right) * 0.2, 1.0);
}
"#;

/// Second CRT pass: scanlines and an aperture mask over the spread image.
pub const CRT_SCANLINE_FRAGMENT: &str = r#"
struct Params {
    MVPMatrix: mat4x4<f32>,
    TextureSize: vec2<f32>,
    InputSize: vec2<f32>,
    OutputSize: vec2<f32>,
    FrameCount: i32,
    FrameDirection: i32,
    screenDensity: f32,
};

@group(0) @binding(1) var textureSampler: sampler;
@group(0) @binding(2) var<uniform> params: Params;
@group(0) @binding(3) var previousPass: texture_2d<f32>;

@fragment
fn fs_main(
    @builtin(position) frag: vec4<f32>,
    @location(0) coords: vec2<f32>,
) -> @location(0) vec4<f32> {
    let color = textureSample(previousPass, textureSampler, coords).rgb;
    let line = fract(coords.y * max(params.TextureSize.y, 1.0));
    let scan = mix(0.65, 1.0, step(0.5, line));
    let lines_per_pixel = params.OutputSize.y / max(params.InputSize.y, 1.0);
    let strength = clamp(lines_per_pixel - 1.0, 0.0, 1.0);
    let column = i32(frag.x) % 3;
    var mask = vec3<f32>(0.9, 0.9, 0.9);
    mask[column] = 1.1;
    let flicker = 1.0 - 0.005 * f32((params.FrameCount * params.FrameDirection) & 1);
    let weight = vec3<f32>(strength, strength, strength);
    let shaded = color * mix(1.0, scan, strength) * mix(vec3<f32>(1.0, 1.0, 1.0), mask, weight);
    return vec4<f32>(shaded * flicker, 1.0);
}
"#;

/// Darkened grid between texels, like a handheld LCD.
pub const LCD_FRAGMENT: &str = r#"
struct Params {
    MVPMatrix: mat4x4<f32>,
    TextureSize: vec2<f32>,
    InputSize: vec2<f32>,
    OutputSize: vec2<f32>,
    FrameCount: i32,
    FrameDirection: i32,
    screenDensity: f32,
};

@group(0) @binding(0) var Texture: texture_2d<f32>;
@group(0) @binding(1) var textureSampler: sampler;
@group(0) @binding(2) var<uniform> params: Params;

@fragment
fn fs_main(@location(0) coords: vec2<f32>) -> @location(0) vec4<f32> {
    let cell = fract(coords * max(params.TextureSize, vec2<f32>(1.0, 1.0)));
    let inside = step(vec2<f32>(0.08, 0.08), cell) * step(cell, vec2<f32>(0.92, 0.92));
    let color = textureSample(Texture, textureSampler, coords).rgb;
    return vec4<f32>(color * mix(0.75, 1.0, inside.x * inside.y), 1.0);
}
"#;
