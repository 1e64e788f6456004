use ash::{util::read_spv, vk};
use std::io::Cursor;

use crate::error::{ComputeError, Result, Stage, VkResultExt};

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

const HEADER_WORDS: usize = 5;
const OP_ENTRY_POINT: u32 = 15;
const EXECUTION_MODEL_GL_COMPUTE: u32 = 5;

/// A validated SPIR-V word stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderProgram {
    words: Vec<u32>,
    /// Names of the GLCompute entry points, in declaration order.
    entry_points: Vec<String>,
}

impl ShaderProgram {
    /// Parses a SPIR-V blob, accepting either byte order.
    ///
    /// The blob must be non-empty, a whole number of words, and start with
    /// the SPIR-V magic number. The instruction stream is walked once so that a
    /// truncated or corrupt body is rejected here rather than by the driver.
    pub fn from_bytes(spirv_bytes: &[u8]) -> Result<Self> {
        if spirv_bytes.is_empty() {
            return Err(ComputeError::InvalidShader("blob is empty".into()));
        }
        if spirv_bytes.len() % 4 != 0 {
            return Err(ComputeError::InvalidShader(format!(
                "length {} is not a multiple of 4",
                spirv_bytes.len()
            )));
        }

        let head = u32::from_le_bytes([spirv_bytes[0], spirv_bytes[1], spirv_bytes[2], spirv_bytes[3]]);
        if head != SPIRV_MAGIC && head != SPIRV_MAGIC.swap_bytes() {
            return Err(ComputeError::InvalidShader(format!("bad magic number {head:#010x}")));
        }

        // read_spv swaps foreign-endian modules into host order.
        let words = read_spv(&mut Cursor::new(spirv_bytes))
            .map_err(|e| ComputeError::InvalidShader(format!("failed to read words: {e}")))?;
        let entry_points = scan_instructions(&words)?;
        Ok(Self { words, entry_points })
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn entry_points(&self) -> &[String] {
        &self.entry_points
    }

    pub fn has_entry_point(&self, name: &str) -> bool {
        self.entry_points.iter().any(|e| e == name)
    }

    /// Creates a shader module from the program.
    pub fn create_module(&self, device: &ash::Device) -> Result<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&self.words);
        unsafe { device.create_shader_module(&create_info, None) }.at(Stage::ShaderModule)
    }

    /// Built-in program: writes `1.0` to every texel of the storage image at
    /// set 0, binding 0. One invocation per workgroup; the workgroup id is the
    /// texel coordinate.
    pub fn fill_ones() -> Self {
        Self {
            words: FILL_ONES_SPIRV.to_vec(),
            entry_points: vec!["main".to_owned()],
        }
    }
}

/// Checks the header and instruction lengths, collecting compute entry point names.
fn scan_instructions(words: &[u32]) -> Result<Vec<String>> {
    if words.len() < HEADER_WORDS {
        return Err(ComputeError::InvalidShader(format!(
            "{} words is shorter than the {HEADER_WORDS}-word header",
            words.len()
        )));
    }
    if words[3] == 0 {
        return Err(ComputeError::InvalidShader("id bound is zero".into()));
    }

    let mut entry_points = Vec::new();
    let mut at = HEADER_WORDS;
    while at < words.len() {
        let word_count = (words[at] >> 16) as usize;
        let opcode = words[at] & 0xFFFF;
        if word_count == 0 {
            return Err(ComputeError::InvalidShader(format!("zero-length instruction at word {at}")));
        }
        let end = at + word_count;
        if end > words.len() {
            return Err(ComputeError::InvalidShader(format!(
                "instruction at word {at} needs {word_count} words but only {} remain",
                words.len() - at
            )));
        }
        if opcode == OP_ENTRY_POINT && word_count > 3 && words[at + 1] == EXECUTION_MODEL_GL_COMPUTE {
            entry_points.push(literal_string(&words[at + 3..end])?);
        }
        at = end;
    }
    Ok(entry_points)
}

/// Decodes a nul-terminated literal packed four bytes per word, low byte first.
fn literal_string(words: &[u32]) -> Result<String> {
    let mut bytes = Vec::new();
    for byte in words.iter().flat_map(|w| w.to_le_bytes()) {
        if byte == 0 {
            return String::from_utf8(bytes)
                .map_err(|e| ComputeError::InvalidShader(format!("entry point name is not UTF-8: {e}")));
        }
        bytes.push(byte);
    }
    Err(ComputeError::InvalidShader("unterminated entry point name".into()))
}

// layout(local_size_x = 1) in;
// layout(set = 0, binding = 0, r32f) uniform writeonly image2D img;
// void main() { imageStore(img, ivec2(gl_WorkGroupID.xy), vec4(1.0)); }
#[rustfmt::skip]
const FILL_ONES_SPIRV: &[u32] = &[
    SPIRV_MAGIC, 0x0001_0000, 0, 23, 0,
    0x0002_0011, 1,                                  // OpCapability Shader
    0x0003_000E, 0, 1,                               // OpMemoryModel Logical GLSL450
    0x0006_000F, 5, 1, 0x6E69_616D, 0, 2,            // OpEntryPoint GLCompute %1 "main" %2
    0x0006_0010, 1, 17, 1, 1, 1,                     // OpExecutionMode %1 LocalSize 1 1 1
    0x0004_0047, 2, 11, 26,                          // OpDecorate %2 BuiltIn WorkgroupId
    0x0004_0047, 3, 34, 0,                           // OpDecorate %3 DescriptorSet 0
    0x0004_0047, 3, 33, 0,                           // OpDecorate %3 Binding 0
    0x0002_0013, 4,                                  // %4 = OpTypeVoid
    0x0003_0021, 5, 4,                               // %5 = OpTypeFunction %4
    0x0004_0015, 6, 32, 0,                           // %6 = OpTypeInt 32 0
    0x0004_0015, 7, 32, 1,                           // %7 = OpTypeInt 32 1
    0x0003_0016, 8, 32,                              // %8 = OpTypeFloat 32
    0x0004_0017, 9, 6, 3,                            // %9 = OpTypeVector %6 3
    0x0004_0020, 10, 1, 9,                           // %10 = OpTypePointer Input %9
    0x0004_003B, 10, 2, 1,                           // %2 = OpVariable %10 Input
    0x0004_0017, 11, 6, 2,                           // %11 = OpTypeVector %6 2
    0x0004_0017, 12, 7, 2,                           // %12 = OpTypeVector %7 2
    0x0004_0017, 13, 8, 4,                           // %13 = OpTypeVector %8 4
    0x0009_0019, 14, 8, 1, 0, 0, 0, 2, 3,            // %14 = OpTypeImage %8 2D 0 0 0 2 R32f
    0x0004_0020, 15, 0, 14,                          // %15 = OpTypePointer UniformConstant %14
    0x0004_003B, 15, 3, 0,                           // %3 = OpVariable %15 UniformConstant
    0x0004_002B, 8, 16, 0x3F80_0000,                 // %16 = OpConstant %8 1.0
    0x0007_002C, 13, 17, 16, 16, 16, 16,             // %17 = OpConstantComposite %13 %16 %16 %16 %16
    0x0005_0036, 4, 1, 0, 5,                         // %1 = OpFunction %4 None %5
    0x0002_00F8, 18,                                 // %18 = OpLabel
    0x0004_003D, 14, 19, 3,                          // %19 = OpLoad %14 %3
    0x0004_003D, 9, 20, 2,                           // %20 = OpLoad %9 %2
    0x0007_004F, 11, 21, 20, 20, 0, 1,               // %21 = OpVectorShuffle %11 %20 %20 0 1
    0x0004_007C, 12, 22, 21,                         // %22 = OpBitcast %12 %21
    0x0004_0063, 19, 22, 17,                         // OpImageWrite %19 %22 %17
    0x0001_00FD,                                     // OpReturn
    0x0001_0038,                                     // OpFunctionEnd
];

/// Little-endian bytes of the built-in fill program, as a `.spv` file would hold them.
pub fn fill_ones_spirv_bytes() -> Vec<u8> {
    FILL_ONES_SPIRV.iter().flat_map(|w| w.to_le_bytes()).collect()
}
