/// Build script for insight_render
///
/// # Shader Compilation Strategy:
/// - DX12: HLSL sources are embedded with `include_str!` and compiled at runtime via D3DCompile
/// - Headless: no shaders
fn main() {
    // Trigger rebuild if shader files change
    println!("cargo:rerun-if-changed=src/gfx/dx12/shaders/geometry.hlsl");
    println!("cargo:rerun-if-changed=src/gfx/dx12/shaders/overlay.hlsl");
}
