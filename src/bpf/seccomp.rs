//! Seccomp ABI constants: filter return values and the layout of the
//! `seccomp_data` structure the kernel hands to a filter

/// Allow the syscall
pub const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;
/// Kill the calling thread
pub const SECCOMP_RET_KILL: u32 = 0x0000_0000;
/// Trap with SIGSYS
pub const SECCOMP_RET_TRAP: u32 = 0x0003_0000;
/// Fail the syscall; OR the errno value into the low bits
pub const SECCOMP_RET_ERRNO: u32 = 0x0005_0000;

/// Offset of the syscall number within `seccomp_data`
pub const SYSCALL_NR_OFFSET: u32 = 0;
/// Offset of the audit architecture token
pub const ARCH_OFFSET: u32 = 4;
/// Offset of the first 64-bit argument slot
pub const ARGS_OFFSET: u32 = 0x10;

/// Number of argument slots in `seccomp_data`
pub const ARG_COUNT: usize = 6;

/// Byte offsets of the two 32-bit words holding argument `index`. The
/// first word is compared against the upper half of a 64-bit literal, the
/// second against the lower half.
pub fn arg_word_offsets(index: usize) -> (u32, u32) {
    let base = ARGS_OFFSET + 8 * index as u32;
    (base, base + 4)
}
