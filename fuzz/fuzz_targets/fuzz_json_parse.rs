#![no_main]

use jscell::Runtime;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Only process valid UTF-8
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Limit input size to avoid timeout
    if text.len() > 100_000 {
        return;
    }

    let mut runtime = Runtime::new();

    // Parse should return Ok, a SyntaxError or (past the depth ceiling) a
    // stack overflow, never panic
    if let Err(err) = runtime.json_parse(text, None) {
        assert!(
            err.is_syntax_error() || err.is_stack_overflow(),
            "unexpected error kind: {:?}",
            err
        );
    }
});
