//! Guest programs and sandbox helpers shared by unit tests.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::sandbox::{BytecodeImage, Evaluator, ResourceLimits, Sandbox, SandboxOptions};
use crate::tools::EvalJsTool;

/// `(module)` in binary form.
pub const EMPTY_MODULE: [u8; 8] = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

/// Writes the JSON text `2` to stdout.
pub const PRINT_TWO: &str = r#"(module
    (import "wasi_snapshot_preview1" "fd_write"
        (func $fd_write (param i32 i32 i32 i32) (result i32)))
    (memory (export "memory") 1)
    (data (i32.const 16) "2")
    (func (export "_start")
        (i32.store (i32.const 0) (i32.const 16))
        (i32.store (i32.const 4) (i32.const 1))
        (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))))"#;

/// Writes `boom` to stderr and exits with code 7.
pub const EXIT_SEVEN: &str = r#"(module
    (import "wasi_snapshot_preview1" "fd_write"
        (func $fd_write (param i32 i32 i32 i32) (result i32)))
    (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
    (memory (export "memory") 1)
    (data (i32.const 16) "boom")
    (func (export "_start")
        (i32.store (i32.const 0) (i32.const 16))
        (i32.store (i32.const 4) (i32.const 4))
        (drop (call $fd_write (i32.const 2) (i32.const 0) (i32.const 1) (i32.const 8)))
        (call $proc_exit (i32.const 7))))"#;

/// Copies stdin to stdout, so the source text must itself be JSON.
pub const ECHO: &str = r#"(module
    (import "wasi_snapshot_preview1" "fd_read"
        (func $fd_read (param i32 i32 i32 i32) (result i32)))
    (import "wasi_snapshot_preview1" "fd_write"
        (func $fd_write (param i32 i32 i32 i32) (result i32)))
    (memory (export "memory") 1)
    (func (export "_start")
        (local $n i32)
        (block $done
            (loop $next
                (i32.store (i32.const 0) (i32.const 64))
                (i32.store (i32.const 4) (i32.const 4096))
                (br_if $done
                    (call $fd_read (i32.const 0) (i32.const 0) (i32.const 1) (i32.const 8)))
                (local.set $n (i32.load (i32.const 8)))
                (br_if $done (i32.eqz (local.get $n)))
                (i32.store (i32.const 4) (local.get $n))
                (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 12)))
                (br $next)))))"#;

/// Never returns on its own.
pub const SPIN: &str = r#"(module
    (func (export "_start") (loop $forever (br $forever))))"#;

/// Grows memory by 100 pages; exits 3 if refused, else prints `true`.
pub const GROW: &str = r#"(module
    (import "wasi_snapshot_preview1" "fd_write"
        (func $fd_write (param i32 i32 i32 i32) (result i32)))
    (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
    (memory (export "memory") 1)
    (data (i32.const 16) "true")
    (func (export "_start")
        (if (i32.eq (memory.grow (i32.const 100)) (i32.const -1))
            (then (call $proc_exit (i32.const 3))))
        (i32.store (i32.const 0) (i32.const 16))
        (i32.store (i32.const 4) (i32.const 4))
        (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))))"#;

/// Sleeps ten seconds in `poll_oneoff` on a relative monotonic clock.
pub const SLEEP: &str = r#"(module
    (import "wasi_snapshot_preview1" "poll_oneoff"
        (func $poll_oneoff (param i32 i32 i32 i32) (result i32)))
    (memory (export "memory") 1)
    (func (export "_start")
        ;; subscription @0: userdata 0, tag clock, clock id 1, timeout in ns
        (i32.store (i32.const 16) (i32.const 1))
        (i64.store (i32.const 24) (i64.const 10000000000))
        (drop (call $poll_oneoff (i32.const 0) (i32.const 64) (i32.const 1) (i32.const 128)))))"#;

/// Declares 32 pages of memory up front.
pub const BIG_MEMORY: &str = r#"(module
    (memory (export "memory") 32)
    (func (export "_start")))"#;

pub fn wasm(wat_src: &str) -> Vec<u8> {
    wat::parse_str(wat_src).unwrap()
}

/// Builds a sandbox over `bytes` with the given page ceiling and deadline.
pub fn evaluator_for(bytes: Vec<u8>, pages: u32, deadline_ms: u64) -> (Sandbox, Evaluator) {
    evaluator_with_ceiling(bytes, pages, pages, deadline_ms)
}

/// Like [`evaluator_for`], with separate host and evaluator page limits.
pub fn evaluator_with_ceiling(
    bytes: Vec<u8>,
    host_pages: u32,
    evaluator_pages: u32,
    deadline_ms: u64,
) -> (Sandbox, Evaluator) {
    let options = SandboxOptions {
        memory_limit_pages: host_pages,
        ..SandboxOptions::default()
    };
    let sandbox = Sandbox::initialize(BytecodeImage::from_bytes(bytes), &options).unwrap();
    let evaluator = Evaluator::new(
        sandbox.module(),
        ResourceLimits {
            memory_limit_pages: evaluator_pages,
            execution_deadline: Duration::from_millis(deadline_ms),
        },
    );
    (sandbox, evaluator)
}

/// Guest from WAT text, 16-page ceiling, one-second deadline.
pub fn wat_evaluator(wat_src: &str) -> (Sandbox, Evaluator) {
    evaluator_for(wasm(wat_src), 16, 1_000)
}

/// `eval-js` over the echo guest. The evaluator's module handle keeps the
/// epoch ticker running after the sandbox itself is dropped.
pub fn echo_tool() -> EvalJsTool {
    let (_sandbox, evaluator) = wat_evaluator(ECHO);
    EvalJsTool::new(evaluator, CancellationToken::new())
}
