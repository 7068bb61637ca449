use std::env;
use std::fs;
use std::path::Path;

const SHADERS: &[(&str, &str)] = &[("src/shader/min_distance.comp", "min_distance.spv")];

/// Build script for the shapelet response library.
/// Compiles the response-distance compute shader when the `vulkan` feature is on.
#[cfg(feature = "vulkan")]
fn compile_shader(compiler: &shaderc::Compiler, shader_path: &str, output_name: &str) {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let out_path = Path::new(&out_dir).join(output_name);
    let shader_source = fs::read_to_string(shader_path).unwrap_or_else(|_| panic!("Failed to read shader source: {}", shader_path));
    let compile_options = shaderc::CompileOptions::new().expect("Failed to init compile options");
    let binary_result = compiler
        .compile_into_spirv(
            &shader_source,
            shaderc::ShaderKind::Compute,
            shader_path,
            "main",
            Some(&compile_options),
        )
        .unwrap_or_else(|err| panic!("Failed to compile shader {}: {}", shader_path, err));
    fs::write(&out_path, binary_result.as_binary_u8()).unwrap_or_else(|_| panic!("Failed to write SPIR-V: {}", output_name));
    println!("cargo:rerun-if-changed={}", shader_path);
}

/// Empty SPIR-V files keep `include_bytes!` happy; the runtime probe rejects them.
fn write_placeholder_shaders() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let out_path = Path::new(&out_dir);
    for (_, output_name) in SHADERS {
        fs::write(out_path.join(output_name), b"").expect("Failed to write placeholder SPIR-V");
    }
}

#[cfg(feature = "vulkan")]
fn main() {
    match shaderc::Compiler::new() {
        Ok(compiler) => {
            for (shader_path, output_name) in SHADERS {
                compile_shader(&compiler, shader_path, output_name);
            }
        }
        Err(_) => {
            println!("cargo:warning=shaderc not available, GPU response distance disabled at runtime");
            write_placeholder_shaders();
        }
    }
}

#[cfg(not(feature = "vulkan"))]
fn main() {
    write_placeholder_shaders();
}
