//! Syscall name to number mapping for x86_64
//!
//! Policies reference syscalls by name; the code generator resolves them
//! through this table when emitting each rule's number guard. The table
//! makes no claim about whether a syscall is meaningful on the running
//! kernel.

use once_cell::sync::Lazy;
use std::collections::HashMap;

static TABLE: &[(&str, u32)] = &[
    ("read", 0),
    ("write", 1),
    ("open", 2),
    ("close", 3),
    ("stat", 4),
    ("fstat", 5),
    ("lstat", 6),
    ("poll", 7),
    ("lseek", 8),
    ("mmap", 9),
    ("mprotect", 10),
    ("munmap", 11),
    ("brk", 12),
    ("rt_sigaction", 13),
    ("rt_sigprocmask", 14),
    ("rt_sigreturn", 15),
    ("ioctl", 16),
    ("pread64", 17),
    ("pwrite64", 18),
    ("readv", 19),
    ("writev", 20),
    ("access", 21),
    ("pipe", 22),
    ("select", 23),
    ("sched_yield", 24),
    ("mremap", 25),
    ("msync", 26),
    ("madvise", 28),
    ("dup", 32),
    ("dup2", 33),
    ("nanosleep", 35),
    ("getpid", 39),
    ("socket", 41),
    ("connect", 42),
    ("accept", 43),
    ("sendto", 44),
    ("recvfrom", 45),
    ("sendmsg", 46),
    ("recvmsg", 47),
    ("shutdown", 48),
    ("bind", 49),
    ("listen", 50),
    ("getsockname", 51),
    ("getpeername", 52),
    ("socketpair", 53),
    ("setsockopt", 54),
    ("getsockopt", 55),
    ("clone", 56),
    ("fork", 57),
    ("vfork", 58),
    ("execve", 59),
    ("exit", 60),
    ("wait4", 61),
    ("kill", 62),
    ("uname", 63),
    ("fcntl", 72),
    ("flock", 73),
    ("fsync", 74),
    ("fdatasync", 75),
    ("truncate", 76),
    ("ftruncate", 77),
    ("getcwd", 79),
    ("chdir", 80),
    ("rename", 82),
    ("mkdir", 83),
    ("rmdir", 84),
    ("creat", 85),
    ("link", 86),
    ("unlink", 87),
    ("symlink", 88),
    ("readlink", 89),
    ("chmod", 90),
    ("chown", 92),
    ("umask", 95),
    ("gettimeofday", 96),
    ("getuid", 102),
    ("getgid", 104),
    ("geteuid", 107),
    ("getegid", 108),
    ("prctl", 157),
    ("arch_prctl", 158),
    ("mount", 165),
    ("umount2", 166),
    ("gettid", 186),
    ("futex", 202),
    ("sched_getaffinity", 204),
    ("getdents64", 217),
    ("set_tid_address", 218),
    ("clock_gettime", 228),
    ("exit_group", 231),
    ("epoll_wait", 232),
    ("epoll_ctl", 233),
    ("tgkill", 234),
    ("openat", 257),
    ("mkdirat", 258),
    ("newfstatat", 262),
    ("unlinkat", 263),
    ("ppoll", 271),
    ("set_robust_list", 273),
    ("epoll_pwait", 281),
    ("accept4", 288),
    ("epoll_create1", 291),
    ("dup3", 292),
    ("pipe2", 293),
    ("prlimit64", 302),
    ("getrandom", 318),
    ("memfd_create", 319),
    ("execveat", 322),
    ("statx", 332),
    ("rseq", 334),
    ("clone3", 435),
];

static BY_NAME: Lazy<HashMap<&'static str, u32>> =
    Lazy::new(|| TABLE.iter().copied().collect());

/// Resolve a syscall name to its x86_64 number
pub fn lookup(name: &str) -> Option<u32> {
    BY_NAME.get(name).copied()
}
