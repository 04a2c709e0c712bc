#![no_main]

use libfuzzer_sys::fuzz_target;
use trazar::call_path;

fuzz_target!(|data: &[u8]| {
    // Convert arbitrary bytes to UTF-8 string (lossy conversion)
    if let Ok(input) = std::str::from_utf8(data) {
        // Split into raw path tokens and normalize
        // This should not panic regardless of input
        let tokens: Vec<String> = input.split(';').map(str::to_string).collect();
        let normalized = call_path::normalize_path(&tokens);
        let steps = call_path::group_steps(&normalized);
        let _ = call_path::group_path_string(&steps);
    }
});
