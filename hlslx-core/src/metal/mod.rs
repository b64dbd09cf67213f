//! Metal Shading Language backend.
//!
//! Resources and file-scope state live in a per-entry context struct whose
//! member functions are the translated HLSL functions. A `vertex` or
//! `fragment` function builds the context from its bound resources, unpacks
//! the stage input struct and packs the stage output struct.

pub mod generator;

pub use generator::MetalGenerator;

/// C++ keywords, Metal built-ins and names the generator itself declares.
const RESERVED: &[&str] = &[
    "alignas", "alignof", "and", "auto", "bias", "bitand", "bitor", "catch", "char", "class", "compl",
    "const_cast", "constant", "constexpr", "context", "decltype", "delete", "device", "dfdx", "dfdy",
    "discard_fragment", "dynamic_cast", "explicit", "export", "extern", "fma", "fract", "fragment", "friend",
    "goto", "gradient2d", "kernel", "level", "long", "main", "metal", "mix", "mutable", "namespace", "new",
    "noexcept", "not", "nullptr", "operator", "or", "private", "protected", "public", "register",
    "reinterpret_cast", "rsqrt", "sampler", "select", "short", "signed", "sizeof", "stage_input",
    "stage_output", "static_assert", "static_cast", "template", "texture2d", "texture3d", "texturecube",
    "this", "thread", "threadgroup", "throw", "try", "typeid", "typename", "uniforms", "union", "unsigned",
    "using", "vertex", "virtual", "volatile", "wchar_t", "xor",
];

pub fn is_reserved(name: &str) -> bool {
    RESERVED.contains(&name)
}
