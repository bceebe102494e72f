#![no_main]

use libfuzzer_sys::fuzz_target;
use termidx::index::trie::Trie;

fuzz_target!(|data: &str| {
    let _ = termidx::utils::extract_index_words(data);

    // Every inserted token completes to itself
    let trie = Trie::build([data]);
    for token in termidx::utils::split_words(data) {
        assert!(trie.complete(&token).contains(&token));
    }
});
