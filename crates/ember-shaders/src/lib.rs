//! Built-in shaders for the Ember engine.
//!
//! GLSL sources live in `shaders/` and are compiled to SPIR-V by the build
//! script. The vertex shader passes position and color through unchanged,
//! so scene coordinates are already in clip space.

use std::sync::OnceLock;

mod spirv_bytes {
    pub static TRIANGLE_VERT: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/triangle_vert.spv"));
    pub static TRIANGLE_FRAG: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/triangle_frag.spv"));
}

/// SPIR-V magic number, the first word of every module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Reassemble little-endian SPIR-V words; `include_bytes!` gives no alignment guarantee.
fn bytes_to_spirv(bytes: &[u8]) -> Vec<u32> {
    assert!(
        bytes.len() % 4 == 0,
        "SPIR-V bytecode length must be a multiple of 4"
    );
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

static TRIANGLE_VERT_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();
static TRIANGLE_FRAG_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();

/// Vertex shader: position at location 0, color at location 1.
pub fn triangle_vertex_shader() -> &'static [u32] {
    TRIANGLE_VERT_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::TRIANGLE_VERT))
}

/// Fragment shader writing the interpolated vertex color.
pub fn triangle_fragment_shader() -> &'static [u32] {
    TRIANGLE_FRAG_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::TRIANGLE_FRAG))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shaders_are_spirv() {
        for shader in [triangle_vertex_shader(), triangle_fragment_shader()] {
            assert_eq!(shader[0], SPIRV_MAGIC, "Invalid SPIR-V magic number");
            assert!(shader.len() > 5, "Shader too small");
        }
    }

    #[test]
    fn words_are_little_endian() {
        assert_eq!(bytes_to_spirv(&[0x03, 0x02, 0x23, 0x07]), vec![SPIRV_MAGIC]);
    }
}
