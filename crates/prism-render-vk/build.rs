use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    // Must match the pipeline's vertex layout (prism_scene::Vertex, stride 52):
    //   location 0: R32G32B32_SFLOAT    position  @0
    //   location 1: R32G32B32_SFLOAT    normal    @12
    //   location 2: R32G32B32A32_SFLOAT tangent   @24
    //   location 3: R32G32_SFLOAT       texcoord  @40
    //   location 4: R8G8B8A8_UNORM      color     @48
    // and the 128-byte push block in prism_render::PushConstants.
    let vs_src = r#"
#version 450
layout(location = 0) in vec3 inPosition;
layout(location = 1) in vec3 inNormal;
layout(location = 2) in vec4 inTangent;
layout(location = 3) in vec2 inTexCoord;
layout(location = 4) in vec4 inColor;

layout(set = 0, binding = 0) uniform Camera {
    mat4 view;
    mat4 projection;
    vec4 eye;
} cam;

layout(push_constant) uniform Draw {
    mat4 world;
    vec4 normal0;
    vec4 normal1;
    vec4 normal2;
    uint material;
} draw;

layout(location = 0) out vec3 vPosition;
layout(location = 1) out vec3 vNormal;
layout(location = 2) out vec4 vColor;
layout(location = 3) out vec2 vTexCoord;

void main() {
    vec4 world = draw.world * vec4(inPosition, 1.0);
    mat3 normalMatrix = mat3(draw.normal0.xyz, draw.normal1.xyz, draw.normal2.xyz);
    vPosition = world.xyz;
    vNormal = normalMatrix * inNormal;
    vColor = inColor;
    vTexCoord = inTexCoord;
    gl_Position = cam.projection * cam.view * world;
    gl_PointSize = 1.0;
}
"#;

    // Material tag 0 is unlit vertex color; everything else gets a fixed
    // hemisphere light so geometry reads in captures.
    let fs_src = r#"
#version 450
layout(location = 0) in vec3 vPosition;
layout(location = 1) in vec3 vNormal;
layout(location = 2) in vec4 vColor;
layout(location = 3) in vec2 vTexCoord;

layout(set = 0, binding = 0) uniform Camera {
    mat4 view;
    mat4 projection;
    vec4 eye;
} cam;

layout(push_constant) uniform Draw {
    mat4 world;
    vec4 normal0;
    vec4 normal1;
    vec4 normal2;
    uint material;
} draw;

layout(location = 0) out vec4 outColor;

void main() {
    if (draw.material == 0u) {
        outColor = vec4(vColor.rgb, 1.0);
        return;
    }
    vec3 n = normalize(vNormal);
    float sky = 0.5 * dot(n, vec3(0.0, 0.0, 1.0)) + 0.5;
    vec3 light = mix(vec3(0.1, 0.1, 0.1), vec3(1.0, 1.0, 0.95), sky);
    outColor = vec4(vColor.rgb * light, 1.0);
}
"#;

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_2 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let vs_spv = comp
        .compile_into_spirv(
            vs_src,
            shaderc::ShaderKind::Vertex,
            "scene.vert",
            "main",
            Some(&opts),
        )
        .unwrap();

    let fs_spv = comp
        .compile_into_spirv(
            fs_src,
            shaderc::ShaderKind::Fragment,
            "scene.frag",
            "main",
            Some(&opts),
        )
        .unwrap();

    fs::write(out.join("scene.vert.spv"), vs_spv.as_binary_u8()).unwrap();
    fs::write(out.join("scene.frag.spv"), fs_spv.as_binary_u8()).unwrap();

    println!("cargo:rerun-if-changed=build.rs");
}
