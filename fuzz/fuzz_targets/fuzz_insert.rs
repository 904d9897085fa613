#![no_main]
use ipfold::{DataValue, MergeStrategy, Tree, TreeOptions};
use libfuzzer_sys::fuzz_target;
use std::net::Ipv4Addr;

// Each 6-byte chunk: 4 address bytes, mask length, strategy/value selector
fuzz_target!(|data: &[u8]| {
    let mut tree = Tree::new(TreeOptions {
        build_epoch: Some(0),
        ..TreeOptions::default()
    });

    for chunk in data.chunks_exact(6) {
        let addr = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
        let network = format!("{}/{}", addr, chunk[4] % 40);
        let strategy = match chunk[5] % 4 {
            0 => MergeStrategy::TopLevelMerge,
            1 => MergeStrategy::Replace,
            2 => MergeStrategy::DeepMerge,
            _ => MergeStrategy::Remove,
        };
        let record: DataValue = [("v", DataValue::Uint32((chunk[5] / 4) as u32))]
            .into_iter()
            .collect();
        let _ = tree.insert(&network, record, strategy);
    }

    let bytes = tree.to_bytes().expect("built tree failed to serialize");
    Tree::from_bytes(&bytes, TreeOptions::default()).expect("written tree failed to load");
});
