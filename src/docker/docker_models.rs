use std::fmt;

use crate::proto::sandbox::Language;

/// Languages the sandbox knows how to compile and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SandboxLanguage {
    Python3,
    Cpp,
    Java,
}

impl SandboxLanguage {
    pub const ALL: [SandboxLanguage; 3] = [
        SandboxLanguage::Python3,
        SandboxLanguage::Cpp,
        SandboxLanguage::Java,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxLanguage::Python3 => "python3",
            SandboxLanguage::Cpp => "cpp",
            SandboxLanguage::Java => "java",
        }
    }

    /// Maps the wire value (0 = python3, 1 = cpp, 2 = java).
    pub fn from_wire(value: i32) -> Option<Self> {
        match Language::try_from(value).ok()? {
            Language::Python3 => Some(SandboxLanguage::Python3),
            Language::Cpp => Some(SandboxLanguage::Cpp),
            Language::Java => Some(SandboxLanguage::Java),
        }
    }
}

impl fmt::Display for SandboxLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A container as the runtime knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub name: String,
    pub image_ref: String,
}
