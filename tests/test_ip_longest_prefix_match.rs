// Longest prefix match with overlapping networks
//
// Networks are inserted in both orders (host before subnet and subnet
// before host), written to bytes and loaded back. The host must keep its
// own /32 leaf and the rest of the subnet must resolve to the /24 record.

use ipfold::{DataValue, MergeStrategy, Tree, TreeOptions};

fn options() -> TreeOptions {
    TreeOptions {
        include_reserved_networks: true,
        build_epoch: Some(1_700_000_000),
        ..TreeOptions::default()
    }
}

fn record(pairs: &[(&str, &str)]) -> DataValue {
    pairs
        .iter()
        .map(|(k, v)| (*k, DataValue::from(*v)))
        .collect()
}

fn reload(tree: &Tree) -> Tree {
    let bytes = tree.to_bytes().unwrap();
    Tree::from_bytes(&bytes, options()).unwrap()
}

fn field<'a>(tree: &'a Tree, addr: &str, key: &str) -> Option<&'a str> {
    tree.lookup(addr.parse().unwrap())
        .and_then(|(_, v)| v.get(key))
        .and_then(DataValue::as_str)
}

#[test]
fn test_ip_specific_before_subnet() {
    let mut tree = Tree::new(options());
    tree.insert(
        "192.0.2.1",
        record(&[("category", "single ip address"), ("host_only", "yes")]),
        MergeStrategy::TopLevelMerge,
    )
    .unwrap();
    tree.insert(
        "192.0.2.0/24",
        record(&[("category", "subnet"), ("threat_level", "medium")]),
        MergeStrategy::TopLevelMerge,
    )
    .unwrap();

    let db = reload(&tree);

    let (prefix, _) = db.lookup("192.0.2.1".parse().unwrap()).unwrap();
    assert_eq!(prefix.len(), 32, "host keeps its own leaf");

    // The later, wider insert wins shared keys; host-only keys survive
    assert_eq!(field(&db, "192.0.2.1", "category"), Some("subnet"));
    assert_eq!(field(&db, "192.0.2.1", "host_only"), Some("yes"));
    assert_eq!(field(&db, "192.0.2.1", "threat_level"), Some("medium"));

    assert_eq!(field(&db, "192.0.2.2", "category"), Some("subnet"));
    assert_eq!(field(&db, "192.0.2.2", "host_only"), None);
}

#[test]
fn test_ip_subnet_before_specific() {
    let mut tree = Tree::new(options());
    tree.insert(
        "192.0.2.0/24",
        record(&[("category", "subnet"), ("threat_level", "medium")]),
        MergeStrategy::TopLevelMerge,
    )
    .unwrap();
    tree.insert(
        "192.0.2.1",
        record(&[("category", "single ip address")]),
        MergeStrategy::TopLevelMerge,
    )
    .unwrap();

    let db = reload(&tree);

    assert_eq!(field(&db, "192.0.2.1", "category"), Some("single ip address"));
    assert_eq!(field(&db, "192.0.2.1", "threat_level"), Some("medium"));
    assert_eq!(field(&db, "192.0.2.0", "category"), Some("subnet"));
    assert_eq!(field(&db, "192.0.2.255", "category"), Some("subnet"));
    assert_eq!(field(&db, "192.0.3.0", "category"), None);
}

#[test]
fn test_nested_prefixes_resolve_to_deepest() {
    let mut tree = Tree::new(options());
    for (net, level) in [
        ("10.0.0.0/8", "8"),
        ("10.1.0.0/16", "16"),
        ("10.1.2.0/24", "24"),
        ("10.1.2.3/32", "32"),
    ] {
        tree.insert(net, record(&[("level", level)]), MergeStrategy::Replace)
            .unwrap();
    }

    let db = reload(&tree);
    assert_eq!(field(&db, "10.1.2.3", "level"), Some("32"));
    assert_eq!(field(&db, "10.1.2.4", "level"), Some("24"));
    assert_eq!(field(&db, "10.1.3.0", "level"), Some("16"));
    assert_eq!(field(&db, "10.2.0.0", "level"), Some("8"));
    assert_eq!(field(&db, "11.0.0.0", "level"), None);
}

#[test]
fn test_adjacent_networks_do_not_leak() {
    let mut tree = Tree::new(options());
    tree.insert("203.0.113.0/25", record(&[("half", "low")]), MergeStrategy::TopLevelMerge)
        .unwrap();
    tree.insert("203.0.113.128/25", record(&[("half", "high")]), MergeStrategy::TopLevelMerge)
        .unwrap();

    let db = reload(&tree);
    assert_eq!(field(&db, "203.0.113.127", "half"), Some("low"));
    assert_eq!(field(&db, "203.0.113.128", "half"), Some("high"));
    assert_eq!(db.network_count().unwrap(), 2);
}
