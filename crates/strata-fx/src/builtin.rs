//! The built-in shader set registered at process start.
//!
//! Every shader shares the full-screen triangle vertex stage and reads its
//! input through `t_input`/`s_input` unless noted. Parameter names in the
//! `Params` blocks match the uniform names pass steps carry.

use crate::shader::{
    ChannelBinding, ChannelSemantic, CompilePolicy, ShaderDescriptor, SubPass,
};

pub const LINEARIZE: &str = "linearize";
pub const ENCODE: &str = "encode";
pub const COPY: &str = "copy";
pub const SOLID_FILL: &str = "solid_fill";
pub const BLEND: &str = "blend";
pub const BASIC_ADJUSTMENTS: &str = "basic_adjustments";
pub const STYLISTIC_EFFECTS: &str = "stylistic_effects";
pub const VIGNETTE: &str = "vignette";
pub const GAUSSIAN_BLUR: &str = "gaussian_blur";

pub const HORIZONTAL: &str = "horizontal";
pub const VERTICAL: &str = "vertical";

/// Full-screen triangle; three vertices, no vertex buffer.
pub const FULLSCREEN_VS: &str = r#"
struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOut {
    var out: VertexOut;
    let x = f32((index << 1u) & 2u);
    let y = f32(index & 2u);
    out.position = vec4<f32>(x * 2.0 - 1.0, 1.0 - y * 2.0, 0.0, 1.0);
    out.uv = vec2<f32>(x, y);
    return out;
}
"#;

const FRAGMENT_PRELUDE: &str = r#"
struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

fn srgb_to_linear(c: vec3<f32>) -> vec3<f32> {
    let lo = c / 12.92;
    let hi = pow((c + vec3<f32>(0.055)) / 1.055, vec3<f32>(2.4));
    return select(hi, lo, c <= vec3<f32>(0.04045));
}

fn linear_to_srgb(c: vec3<f32>) -> vec3<f32> {
    let lo = c * 12.92;
    let hi = 1.055 * pow(max(c, vec3<f32>(0.0)), vec3<f32>(1.0 / 2.4)) - vec3<f32>(0.055);
    return select(hi, lo, c <= vec3<f32>(0.0031308));
}

fn luma(c: vec3<f32>) -> f32 {
    return dot(c, vec3<f32>(0.2126, 0.7152, 0.0722));
}
"#;

const LINEARIZE_FS: &str = r#"
struct Params { profile: f32 };
@group(0) @binding(0) var t_input: texture_2d<f32>;
@group(0) @binding(1) var s_input: sampler;
@group(0) @binding(2) var<uniform> params: Params;

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let c = textureSampleLevel(t_input, s_input, in.uv, 0.0);
    if (params.profile > 0.5) {
        return c;
    }
    return vec4<f32>(srgb_to_linear(c.rgb), c.a);
}
"#;

const ENCODE_FS: &str = r#"
struct Params { profile: f32 };
@group(0) @binding(0) var t_input: texture_2d<f32>;
@group(0) @binding(1) var s_input: sampler;
@group(0) @binding(2) var<uniform> params: Params;

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let c = textureSampleLevel(t_input, s_input, in.uv, 0.0);
    if (params.profile > 0.5) {
        return c;
    }
    return vec4<f32>(linear_to_srgb(c.rgb), c.a);
}
"#;

const COPY_FS: &str = r#"
struct Params { rect: vec4<f32>, canvas: vec2<f32> };
@group(0) @binding(0) var t_input: texture_2d<f32>;
@group(0) @binding(1) var s_input: sampler;
@group(0) @binding(2) var<uniform> params: Params;

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let px = in.uv * params.canvas;
    let local = (px - params.rect.xy) / params.rect.zw;
    if (any(local < vec2<f32>(0.0)) || any(local >= vec2<f32>(1.0))) {
        return vec4<f32>(0.0);
    }
    return textureSampleLevel(t_input, s_input, local, 0.0);
}
"#;

const SOLID_FILL_FS: &str = r#"
struct Params { rect: vec4<f32>, canvas: vec2<f32> };
@group(0) @binding(0) var t_input: texture_2d<f32>;
@group(0) @binding(1) var s_input: sampler;
@group(0) @binding(2) var<uniform> params: Params;

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let px = in.uv * params.canvas;
    let inside = all(px >= params.rect.xy) && all(px < params.rect.xy + params.rect.zw);
    if (!inside) {
        return vec4<f32>(0.0);
    }
    return textureSampleLevel(t_input, s_input, vec2<f32>(0.5, 0.5), 0.0);
}
"#;

const BLEND_FS: &str = r#"
struct Params { mode: f32, opacity: f32 };
@group(0) @binding(0) var t_layer: texture_2d<f32>;
@group(0) @binding(1) var t_backdrop: texture_2d<f32>;
@group(0) @binding(2) var t_mask_weight: texture_2d<f32>;
@group(0) @binding(3) var s_input: sampler;
@group(0) @binding(4) var<uniform> params: Params;

fn overlay_channel(b: f32, s: f32) -> f32 {
    if (b <= 0.5) {
        return 2.0 * b * s;
    }
    return 1.0 - 2.0 * (1.0 - b) * (1.0 - s);
}

fn blend_rgb(b: vec3<f32>, s: vec3<f32>, mode: u32) -> vec3<f32> {
    var out = s;
    switch mode {
        case 1u: { out = b * s; }
        case 2u: { out = b + s - b * s; }
        case 3u: {
            out = vec3<f32>(overlay_channel(b.r, s.r), overlay_channel(b.g, s.g), overlay_channel(b.b, s.b));
        }
        case 4u: { out = min(b, s); }
        case 5u: { out = max(b, s); }
        case 6u: { out = min(b + s, vec3<f32>(1.0)); }
        default: {}
    }
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let src = textureSampleLevel(t_layer, s_input, in.uv, 0.0);
    let dst = textureSampleLevel(t_backdrop, s_input, in.uv, 0.0);
    let weight = textureSampleLevel(t_mask_weight, s_input, in.uv, 0.0).r;
    let sa = src.a * params.opacity * weight;
    let mixed = mix(src.rgb, blend_rgb(dst.rgb, src.rgb, u32(params.mode)), vec3<f32>(dst.a));
    let out_a = sa + dst.a * (1.0 - sa);
    if (out_a <= 0.0) {
        return vec4<f32>(0.0);
    }
    let rgb = (mixed * sa + dst.rgb * dst.a * (1.0 - sa)) / out_a;
    return vec4<f32>(rgb, out_a);
}
"#;

const BASIC_ADJUSTMENTS_FS: &str = r#"
struct Params {
    brightness: f32,
    contrast: f32,
    saturation: f32,
    hue: f32,
    exposure: f32,
    gamma: f32,
};
@group(0) @binding(0) var t_input: texture_2d<f32>;
@group(0) @binding(1) var s_input: sampler;
@group(0) @binding(2) var<uniform> params: Params;

fn rotate_hue(c: vec3<f32>, degrees: f32) -> vec3<f32> {
    let a = radians(degrees);
    let k = vec3<f32>(0.57735);
    let cos_a = cos(a);
    return c * cos_a + cross(k, c) * sin(a) + k * dot(k, c) * (1.0 - cos_a);
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let src = textureSampleLevel(t_input, s_input, in.uv, 0.0);
    var c = src.rgb * exp2(params.exposure);
    c = c * (params.brightness / 100.0);
    c = (c - vec3<f32>(0.5)) * (params.contrast / 100.0) + vec3<f32>(0.5);
    c = mix(vec3<f32>(luma(c)), c, vec3<f32>(params.saturation / 100.0));
    c = rotate_hue(c, params.hue);
    c = pow(max(c, vec3<f32>(0.0)), vec3<f32>(1.0 / max(params.gamma, 0.01)));
    return vec4<f32>(c, src.a);
}
"#;

const STYLISTIC_EFFECTS_FS: &str = r#"
struct Params {
    vintage: f32,
    sepia: f32,
    grayscale: f32,
    invert: f32,
    vibrance: f32,
    noise: f32,
    grain: f32,
    recolor: f32,
    recolor_color: vec4<f32>,
};
@group(0) @binding(0) var t_input: texture_2d<f32>;
@group(0) @binding(1) var s_input: sampler;
@group(0) @binding(2) var<uniform> params: Params;

fn hash2(p: vec2<f32>) -> f32 {
    return fract(sin(dot(p, vec2<f32>(12.9898, 78.233))) * 43758.5453);
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let src = textureSampleLevel(t_input, s_input, in.uv, 0.0);
    var c = src.rgb;
    let sepia = vec3<f32>(
        dot(c, vec3<f32>(0.393, 0.769, 0.189)),
        dot(c, vec3<f32>(0.349, 0.686, 0.168)),
        dot(c, vec3<f32>(0.272, 0.534, 0.131))
    );
    c = mix(c, sepia, vec3<f32>(params.sepia / 100.0));
    let faded = mix(sepia, vec3<f32>(0.9, 0.8, 0.6), vec3<f32>(0.25));
    c = mix(c, faded, vec3<f32>(params.vintage / 100.0));
    c = mix(c, vec3<f32>(luma(c)), vec3<f32>(params.grayscale / 100.0));
    let mx = max(c.r, max(c.g, c.b));
    let mn = min(c.r, min(c.g, c.b));
    let boost = (params.vibrance / 100.0) * (1.0 - (mx - mn));
    c = mix(vec3<f32>(luma(c)), c, vec3<f32>(1.0 + boost));
    c = mix(c, params.recolor_color.rgb * luma(c), vec3<f32>(params.recolor / 100.0));
    c = mix(c, vec3<f32>(1.0) - c, vec3<f32>(params.invert / 100.0));
    let px = in.position.xy;
    c = c + vec3<f32>(hash2(px) - 0.5) * (params.noise / 100.0) * 0.5;
    c = c + vec3<f32>(hash2(px + vec2<f32>(17.0, 59.0)) - 0.5) * (params.grain / 100.0) * 0.25;
    return vec4<f32>(c, src.a);
}
"#;

const VIGNETTE_FS: &str = r#"
struct Params { vignette: f32 };
@group(0) @binding(0) var t_input: texture_2d<f32>;
@group(0) @binding(1) var s_input: sampler;
@group(0) @binding(2) var<uniform> params: Params;

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let src = textureSampleLevel(t_input, s_input, in.uv, 0.0);
    let d = distance(in.uv, vec2<f32>(0.5)) * 1.41421356;
    let falloff = smoothstep(0.4, 1.0, d);
    let k = 1.0 - falloff * (params.vignette / 100.0);
    return vec4<f32>(src.rgb * k, src.a);
}
"#;

fn blur_fs(direction: &str) -> String {
    format!(
        r#"
struct Params {{ radius: f32, stride: f32 }};
@group(0) @binding(0) var t_input: texture_2d<f32>;
@group(0) @binding(1) var s_input: sampler;
@group(0) @binding(2) var<uniform> params: Params;

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {{
    let size = vec2<f32>(textureDimensions(t_input));
    let texel = {direction} / size;
    // Taps past the far edge only repeat the clamped border.
    let radius = min(max(params.radius, 0.0), max(size.x, size.y));
    let sigma = max(radius / 2.0, 0.5);
    let taps = i32(ceil(radius));
    let stride = max(i32(params.stride), 1);
    var acc = vec4<f32>(0.0);
    var total = 0.0;
    for (var i = -taps; i <= taps; i += stride) {{
        let w = exp(-f32(i * i) / (2.0 * sigma * sigma));
        let s = textureSampleLevel(t_input, s_input, in.uv + texel * f32(i), 0.0);
        acc += vec4<f32>(s.rgb * s.a, s.a) * w;
        total += w;
    }}
    let a = acc.a / total;
    if (a <= 0.0) {{
        return vec4<f32>(0.0);
    }}
    return vec4<f32>(acc.rgb / acc.a, a);
}}
"#
    )
}

fn fragment(body: &str) -> String {
    format!("{FRAGMENT_PRELUDE}{body}")
}

fn current_layer() -> Vec<ChannelBinding> {
    vec![ChannelBinding::new("t_input", ChannelSemantic::CurrentLayer)]
}

fn single(name: &str, body: &str, policy: CompilePolicy) -> ShaderDescriptor {
    ShaderDescriptor::single(name, FULLSCREEN_VS, fragment(body), current_layer())
        .with_policy(policy)
}

/// Descriptors for every built-in shader.
pub fn builtin_shaders() -> Vec<ShaderDescriptor> {
    let blur = ShaderDescriptor::multi_pass(
        GAUSSIAN_BLUR,
        vec![
            SubPass {
                id: HORIZONTAL.into(),
                fragment: fragment(&blur_fs("vec2<f32>(1.0, 0.0)")),
                vertex: None,
                bindings: current_layer(),
                depends_on: vec![],
            },
            SubPass {
                id: VERTICAL.into(),
                fragment: fragment(&blur_fs("vec2<f32>(0.0, 1.0)")),
                vertex: None,
                bindings: vec![ChannelBinding::new(
                    "t_input",
                    ChannelSemantic::PassResult(HORIZONTAL.into()),
                )],
                depends_on: vec![HORIZONTAL.into()],
            },
        ],
    )
    .with_policy(CompilePolicy::Warm);

    let blend = ShaderDescriptor::single(
        BLEND,
        FULLSCREEN_VS,
        fragment(BLEND_FS),
        vec![
            ChannelBinding::new("t_layer", ChannelSemantic::CurrentLayer),
            ChannelBinding::new("t_backdrop", ChannelSemantic::Backdrop),
        ],
    )
    .with_policy(CompilePolicy::Eager);

    vec![
        single(LINEARIZE, LINEARIZE_FS, CompilePolicy::Eager),
        single(ENCODE, ENCODE_FS, CompilePolicy::Eager),
        single(COPY, COPY_FS, CompilePolicy::Eager),
        single(SOLID_FILL, SOLID_FILL_FS, CompilePolicy::Warm),
        blend,
        single(BASIC_ADJUSTMENTS, BASIC_ADJUSTMENTS_FS, CompilePolicy::Eager),
        single(STYLISTIC_EFFECTS, STYLISTIC_EFFECTS_FS, CompilePolicy::Warm),
        single(VIGNETTE, VIGNETTE_FS, CompilePolicy::Lazy),
        blur,
    ]
}
