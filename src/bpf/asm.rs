//! Textual assembler and disassembler for the filter instruction set
//!
//! One instruction per line: a mnemonic followed by tab-separated hex
//! fields with no `0x` prefix. Jump offsets are zero-padded to two digits,
//! immediates are unpadded upper-case hex. The two directions are inverses
//! for everything the code generator can emit, which makes this module the
//! round-trip oracle for generated programs.

use thiserror::Error;

use crate::bpf::opcodes::{
    SockFilter, BPF_ABS, BPF_ADD, BPF_ALU, BPF_IMM, BPF_JA, BPF_JEQ, BPF_JGE, BPF_JGT, BPF_JMP,
    BPF_JSET, BPF_K, BPF_LD, BPF_MISC, BPF_RET, BPF_TAX, BPF_TXA, BPF_W, BPF_X,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AsmError {
    #[error("line {line}: unknown mnemonic {found:?}")]
    UnknownMnemonic { line: usize, found: String },

    #[error("line {line}: {mnemonic} takes {expected} operand(s), got {found}")]
    WrongOperandCount {
        line: usize,
        mnemonic: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: invalid hex field {field:?}")]
    BadHex { line: usize, field: String },

    #[error("line {line}: jump offset {value:#x} does not fit in one byte")]
    JumpOutOfRange { line: usize, value: u32 },

    #[error("no mnemonic for opcode {code:#06x}")]
    UnknownOpcode { code: u16 },

    #[error("binary filter length {len} is not a multiple of 8")]
    TruncatedBinary { len: usize },
}

/// Operand shape of a mnemonic, fixed per opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operands {
    None,
    Immediate,
    Jumps,
    JumpsAndImmediate,
}

struct Mnemonic {
    name: &'static str,
    code: u16,
    operands: Operands,
}

static MNEMONICS: &[Mnemonic] = &[
    Mnemonic {
        name: "ld_abs",
        code: BPF_LD | BPF_W | BPF_ABS,
        operands: Operands::Immediate,
    },
    Mnemonic {
        name: "ld_imm",
        code: BPF_LD | BPF_IMM,
        operands: Operands::Immediate,
    },
    Mnemonic {
        name: "add_k",
        code: BPF_ALU | BPF_ADD | BPF_K,
        operands: Operands::Immediate,
    },
    Mnemonic {
        name: "tax",
        code: BPF_MISC | BPF_TAX,
        operands: Operands::None,
    },
    Mnemonic {
        name: "txa",
        code: BPF_MISC | BPF_TXA,
        operands: Operands::None,
    },
    Mnemonic {
        name: "ja",
        code: BPF_JMP | BPF_JA,
        operands: Operands::Immediate,
    },
    Mnemonic {
        name: "jeq_k",
        code: BPF_JMP | BPF_JEQ | BPF_K,
        operands: Operands::JumpsAndImmediate,
    },
    Mnemonic {
        name: "jeq_x",
        code: BPF_JMP | BPF_JEQ | BPF_X,
        operands: Operands::Jumps,
    },
    Mnemonic {
        name: "jgt_k",
        code: BPF_JMP | BPF_JGT | BPF_K,
        operands: Operands::JumpsAndImmediate,
    },
    Mnemonic {
        name: "jgt_x",
        code: BPF_JMP | BPF_JGT | BPF_X,
        operands: Operands::Jumps,
    },
    Mnemonic {
        name: "jge_k",
        code: BPF_JMP | BPF_JGE | BPF_K,
        operands: Operands::JumpsAndImmediate,
    },
    Mnemonic {
        name: "jge_x",
        code: BPF_JMP | BPF_JGE | BPF_X,
        operands: Operands::Jumps,
    },
    Mnemonic {
        name: "jset_k",
        code: BPF_JMP | BPF_JSET | BPF_K,
        operands: Operands::JumpsAndImmediate,
    },
    Mnemonic {
        name: "jset_x",
        code: BPF_JMP | BPF_JSET | BPF_X,
        operands: Operands::Jumps,
    },
    Mnemonic {
        name: "ret_k",
        code: BPF_RET | BPF_K,
        operands: Operands::Immediate,
    },
];

fn by_name(name: &str) -> Option<&'static Mnemonic> {
    MNEMONICS.iter().find(|m| m.name == name)
}

fn by_code(code: u16) -> Option<&'static Mnemonic> {
    MNEMONICS.iter().find(|m| m.code == code)
}

/// Parse mnemonic text into instructions. Blank lines are skipped; fields
/// may be separated by any whitespace.
pub fn assemble(text: &str) -> Result<Vec<SockFilter>, AsmError> {
    let mut program = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let mut fields = raw.split_whitespace();
        let name = match fields.next() {
            Some(name) => name,
            None => continue,
        };
        let mnemonic = by_name(name).ok_or_else(|| AsmError::UnknownMnemonic {
            line,
            found: name.to_string(),
        })?;
        let fields: Vec<&str> = fields.collect();
        let insn = match mnemonic.operands {
            Operands::None => {
                expect_operands(line, mnemonic, &fields, 0)?;
                SockFilter {
                    code: mnemonic.code,
                    jt: 0,
                    jf: 0,
                    k: 0,
                }
            }
            Operands::Immediate => {
                expect_operands(line, mnemonic, &fields, 1)?;
                SockFilter {
                    code: mnemonic.code,
                    jt: 0,
                    jf: 0,
                    k: parse_hex(line, fields[0])?,
                }
            }
            Operands::Jumps => {
                expect_operands(line, mnemonic, &fields, 2)?;
                SockFilter {
                    code: mnemonic.code,
                    jt: parse_jump(line, fields[0])?,
                    jf: parse_jump(line, fields[1])?,
                    k: 0,
                }
            }
            Operands::JumpsAndImmediate => {
                expect_operands(line, mnemonic, &fields, 3)?;
                SockFilter {
                    code: mnemonic.code,
                    jt: parse_jump(line, fields[0])?,
                    jf: parse_jump(line, fields[1])?,
                    k: parse_hex(line, fields[2])?,
                }
            }
        };
        program.push(insn);
    }
    Ok(program)
}

/// Render instructions in the canonical text form. Fails only on an
/// opcode outside the mnemonic table.
pub fn disassemble(program: &[SockFilter]) -> Result<String, AsmError> {
    program
        .iter()
        .map(|insn| {
            let mnemonic =
                by_code(insn.code).ok_or(AsmError::UnknownOpcode { code: insn.code })?;
            Ok(match mnemonic.operands {
                Operands::None => format!("{}\n", mnemonic.name),
                Operands::Immediate => format!("{}\t{:X}\n", mnemonic.name, insn.k),
                Operands::Jumps => {
                    format!("{}\t{:02X}\t{:02X}\n", mnemonic.name, insn.jt, insn.jf)
                }
                Operands::JumpsAndImmediate => format!(
                    "{}\t{:02X}\t{:02X}\t{:X}\n",
                    mnemonic.name, insn.jt, insn.jf, insn.k
                ),
            })
        })
        .collect()
}

/// Parse the kernel's 8-byte little-endian record layout back into
/// instructions
pub fn decode(bytes: &[u8]) -> Result<Vec<SockFilter>, AsmError> {
    if bytes.len() % 8 != 0 {
        return Err(AsmError::TruncatedBinary { len: bytes.len() });
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|record| SockFilter {
            code: u16::from_le_bytes([record[0], record[1]]),
            jt: record[2],
            jf: record[3],
            k: u32::from_le_bytes([record[4], record[5], record[6], record[7]]),
        })
        .collect())
}

fn expect_operands(
    line: usize,
    mnemonic: &'static Mnemonic,
    fields: &[&str],
    expected: usize,
) -> Result<(), AsmError> {
    if fields.len() != expected {
        return Err(AsmError::WrongOperandCount {
            line,
            mnemonic: mnemonic.name,
            expected,
            found: fields.len(),
        });
    }
    Ok(())
}

fn parse_hex(line: usize, field: &str) -> Result<u32, AsmError> {
    u32::from_str_radix(field, 16).map_err(|_| AsmError::BadHex {
        line,
        field: field.to_string(),
    })
}

fn parse_jump(line: usize, field: &str) -> Result<u8, AsmError> {
    let value = parse_hex(line, field)?;
    u8::try_from(value).map_err(|_| AsmError::JumpOutOfRange { line, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bpf::opcodes::encode;
    use crate::bpf::seccomp::{SECCOMP_RET_ALLOW, SECCOMP_RET_KILL};
    use crate::syscalls;
    use pretty_assertions::assert_eq;

    const FIXTURE: &str = "ld_abs\t0\n\
                           jeq_k\t00\t08\t1\n\
                           ld_imm\tC\n\
                           add_k\t4\n\
                           tax\n\
                           ld_abs\t14\n\
                           jeq_k\t00\t03\t0\n\
                           ld_abs\t10\n\
                           jeq_x\t00\t01\n\
                           ret_k\t7FFF0000\n\
                           ret_k\t0\n";

    fn fixture_program() -> Vec<SockFilter> {
        vec![
            SockFilter {
                code: BPF_LD | BPF_W | BPF_ABS,
                jt: 0,
                jf: 0,
                k: 0,
            },
            SockFilter {
                code: BPF_JMP | BPF_JEQ | BPF_K,
                jt: 0,
                jf: 8,
                k: syscalls::lookup("write").unwrap(),
            },
            SockFilter {
                code: BPF_LD | BPF_IMM,
                jt: 0,
                jf: 0,
                k: 0xc,
            },
            SockFilter {
                code: BPF_ALU | BPF_ADD | BPF_K,
                jt: 0,
                jf: 0,
                k: 4,
            },
            SockFilter {
                code: BPF_MISC | BPF_TAX,
                jt: 0,
                jf: 0,
                k: 0,
            },
            SockFilter {
                code: BPF_LD | BPF_W | BPF_ABS,
                jt: 0,
                jf: 0,
                k: 0x14,
            },
            SockFilter {
                code: BPF_JMP | BPF_JEQ | BPF_K,
                jt: 0,
                jf: 3,
                k: 0,
            },
            SockFilter {
                code: BPF_LD | BPF_W | BPF_ABS,
                jt: 0,
                jf: 0,
                k: 0x10,
            },
            SockFilter {
                code: BPF_JMP | BPF_JEQ | BPF_X,
                jt: 0,
                jf: 1,
                k: 0,
            },
            SockFilter {
                code: BPF_RET | BPF_K,
                jt: 0,
                jf: 0,
                k: SECCOMP_RET_ALLOW,
            },
            SockFilter {
                code: BPF_RET | BPF_K,
                jt: 0,
                jf: 0,
                k: SECCOMP_RET_KILL,
            },
        ]
    }

    #[test]
    fn test_assemble_produces_documented_instruction_fields() {
        assert_eq!(assemble(FIXTURE).unwrap(), fixture_program());
    }

    #[test]
    fn test_disassemble_reproduces_canonical_text() {
        assert_eq!(disassemble(&fixture_program()).unwrap(), FIXTURE);
    }

    #[test]
    fn test_text_round_trip() {
        let program = assemble(FIXTURE).unwrap();
        assert_eq!(assemble(&disassemble(&program).unwrap()).unwrap(), program);
    }

    #[test]
    fn test_binary_round_trip() {
        let program = fixture_program();
        assert_eq!(decode(&encode(&program)).unwrap(), program);
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let program = assemble("\nld_abs\t0\n\n  \nret_k\t0\n").unwrap();
        assert_eq!(program.len(), 2);
    }

    #[test]
    fn test_unknown_mnemonic_is_rejected_with_line() {
        let err = assemble("ld_abs\t0\nbogus\t1\n").unwrap_err();
        assert_eq!(
            err,
            AsmError::UnknownMnemonic {
                line: 2,
                found: "bogus".to_string(),
            }
        );
    }

    #[test]
    fn test_wrong_operand_count_is_rejected() {
        let err = assemble("jeq_k\t00\t01\n").unwrap_err();
        assert_eq!(
            err,
            AsmError::WrongOperandCount {
                line: 1,
                mnemonic: "jeq_k",
                expected: 3,
                found: 2,
            }
        );
    }

    #[test]
    fn test_bad_hex_is_rejected() {
        let err = assemble("ld_abs\tZZ\n").unwrap_err();
        assert_eq!(
            err,
            AsmError::BadHex {
                line: 1,
                field: "ZZ".to_string(),
            }
        );
    }

    #[test]
    fn test_oversized_jump_field_is_rejected() {
        let err = assemble("jeq_k\t100\t00\t1\n").unwrap_err();
        assert_eq!(err, AsmError::JumpOutOfRange { line: 1, value: 0x100 });
    }

    #[test]
    fn test_unknown_opcode_cannot_be_disassembled() {
        let program = [SockFilter {
            code: 0xffff,
            jt: 0,
            jf: 0,
            k: 0,
        }];
        assert_eq!(
            disassemble(&program).unwrap_err(),
            AsmError::UnknownOpcode { code: 0xffff }
        );
    }

    #[test]
    fn test_truncated_binary_is_rejected() {
        assert_eq!(
            decode(&[0x15, 0x00, 0x01]).unwrap_err(),
            AsmError::TruncatedBinary { len: 3 }
        );
    }
}
