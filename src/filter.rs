//! Syscall filter programs.
//!
//! A manifest may reference a compiled classic-BPF seccomp program, or a
//! seccompiler JSON policy which is compiled for the running architecture.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::FilterFailure;

/// Size of one BPF instruction.
const INSTRUCTION_SIZE: usize = 8;

/// Kernel limit of instructions per filter.
const MAX_INSTRUCTIONS: usize = 4096;

/// Name of the filter used when a JSON policy defines several.
const MAIN_FILTER: &str = "main";

/// One classic-BPF instruction.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

/// Loaded seccomp program.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FilterProgram {
    instructions: Vec<Instruction>,
    /// File the program was loaded from.
    source: Option<PathBuf>,
}

impl FilterProgram {
    /// Load the program referenced by a manifest.
    pub fn load(path: &Path) -> Result<Self, FilterFailure> {
        let bytes = fs::read(path).map_err(FilterFailure::Read)?;

        let mut program = if path.extension().map_or(false, |extension| extension == "json") {
            Self::compile_json(&bytes)?
        } else {
            Self::from_bytes(&bytes)?
        };
        program.source = Some(path.into());

        Ok(program)
    }

    /// Parse a raw program in native byte order.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FilterFailure> {
        if bytes.is_empty() || bytes.len() % INSTRUCTION_SIZE != 0 {
            return Err(FilterFailure::Malformed(format!(
                "program size {} is not a positive multiple of {INSTRUCTION_SIZE}",
                bytes.len()
            )));
        }

        let instructions = bytes
            .chunks_exact(INSTRUCTION_SIZE)
            .map(|chunk| Instruction {
                code: u16::from_ne_bytes([chunk[0], chunk[1]]),
                jt: chunk[2],
                jf: chunk[3],
                k: u32::from_ne_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
            })
            .collect();

        Self::new(instructions)
    }

    fn new(instructions: Vec<Instruction>) -> Result<Self, FilterFailure> {
        if instructions.len() > MAX_INSTRUCTIONS {
            return Err(FilterFailure::Malformed(format!(
                "{} instructions exceed the limit of {MAX_INSTRUCTIONS}",
                instructions.len()
            )));
        }

        Ok(Self { instructions, source: None })
    }

    #[cfg(target_os = "linux")]
    fn compile_json(bytes: &[u8]) -> Result<Self, FilterFailure> {
        let malformed = |reason: String| FilterFailure::Malformed(reason);

        let arch = crate::linux::seccomp::target_arch().map_err(malformed)?;
        let mut filters = seccompiler::compile_from_json(bytes, arch)
            .map_err(|err| malformed(err.to_string()))?;

        let program = if filters.len() == 1 {
            filters.into_values().next()
        } else {
            filters.remove(MAIN_FILTER)
        };
        let program =
            program.ok_or_else(|| malformed(format!("no single or {MAIN_FILTER:?} filter")))?;

        let instructions = program
            .iter()
            .map(|insn| Instruction { code: insn.code, jt: insn.jt, jf: insn.jf, k: insn.k })
            .collect();
        Self::new(instructions)
    }

    #[cfg(not(target_os = "linux"))]
    fn compile_json(_bytes: &[u8]) -> Result<Self, FilterFailure> {
        Err(FilterFailure::Malformed("JSON policies require Linux".into()))
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}
