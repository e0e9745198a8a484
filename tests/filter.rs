use std::fs;

use pharaoh::error::FilterFailure;
use pharaoh::filter::{FilterProgram, Instruction};
use tempfile::TempDir;

/// Encode instructions in native byte order.
fn encode(instructions: &[Instruction]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for insn in instructions {
        bytes.extend_from_slice(&insn.code.to_ne_bytes());
        bytes.push(insn.jt);
        bytes.push(insn.jf);
        bytes.extend_from_slice(&insn.k.to_ne_bytes());
    }
    bytes
}

/// `ld [nr]; ret ALLOW`
fn allow_all() -> Vec<Instruction> {
    vec![
        Instruction { code: 0x20, jt: 0, jf: 0, k: 0 },
        Instruction { code: 0x06, jt: 0, jf: 0, k: 0x7fff_0000 },
    ]
}

#[test]
fn raw_program() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("filter.bpf");
    fs::write(&path, encode(&allow_all())).unwrap();

    let program = FilterProgram::load(&path).unwrap();
    assert_eq!(program.instructions(), allow_all().as_slice());
    assert_eq!(program.source(), Some(path.as_path()));
}

#[test]
fn missing_file() {
    let dir = TempDir::new().unwrap();
    let result = FilterProgram::load(&dir.path().join("missing.bpf"));
    assert!(matches!(result, Err(FilterFailure::Read(_))));
}

#[test]
fn truncated_program() {
    let mut bytes = encode(&allow_all());
    bytes.pop();

    assert!(matches!(FilterProgram::from_bytes(&bytes), Err(FilterFailure::Malformed(_))));
    assert!(matches!(FilterProgram::from_bytes(&[]), Err(FilterFailure::Malformed(_))));
}

#[test]
fn oversized_program() {
    let instructions = vec![Instruction { code: 0x06, jt: 0, jf: 0, k: 0 }; 4097];
    let result = FilterProgram::from_bytes(&encode(&instructions));
    assert!(matches!(result, Err(FilterFailure::Malformed(_))));

    let program = FilterProgram::from_bytes(&encode(&instructions[..4096])).unwrap();
    assert_eq!(program.len(), 4096);
}

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
#[test]
fn json_policy() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("filter.json");
    let policy = r#"{
        "main": {
            "mismatch_action": "allow",
            "match_action": { "errno": 1 },
            "filter": [{ "syscall": "ptrace" }]
        }
    }"#;
    fs::write(&path, policy).unwrap();

    let program = FilterProgram::load(&path).unwrap();
    assert!(!program.is_empty());
}

#[test]
fn malformed_json_policy() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("filter.json");
    fs::write(&path, "{ \"main\": ").unwrap();

    let result = FilterProgram::load(&path);
    assert!(matches!(result, Err(FilterFailure::Malformed(_))));
}

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
#[test]
fn ambiguous_json_policy() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("filter.json");
    let filter = r#"{ "mismatch_action": "allow", "match_action": "trap", "filter": [] }"#;
    fs::write(&path, format!(r#"{{ "first": {filter}, "second": {filter} }}"#)).unwrap();

    let result = FilterProgram::load(&path);
    assert!(matches!(result, Err(FilterFailure::Malformed(_))));
}
