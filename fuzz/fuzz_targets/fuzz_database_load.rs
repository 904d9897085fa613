#![no_main]
use ipfold::{Tree, TreeOptions};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let options = TreeOptions {
        include_reserved_networks: true,
        ..TreeOptions::default()
    };
    // Garbage must be rejected with an error, never a panic
    if let Ok(tree) = Tree::from_bytes(data, options) {
        // Anything that loads must serialize again
        tree.to_bytes().expect("loaded tree failed to serialize");
    }
});
