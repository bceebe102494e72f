#![no_main]

use libfuzzer_sys::fuzz_target;
use termidx::index::trie::Trie;

fuzz_target!(|data: &[u8]| {
    // Malformed trie artifacts must be rejected, never panic
    if let Ok(trie) = serde_json::from_slice::<Trie>(data) {
        let _ = trie.complete("a");
        let _ = serde_json::to_vec(&trie);
    }
});
