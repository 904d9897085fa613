// End-to-end tests: NDJSON in, database file out, loaded back

use ipfold::ingest::{BuildPipeline, ErrorPolicy, Profile};
use ipfold::{file_reader, DataValue, IpfoldError, MergeStrategy, Metadata, RecordSize, Tree, TreeOptions};
use std::io::Write;
use tempfile::TempDir;

fn options() -> TreeOptions {
    TreeOptions {
        include_reserved_networks: true,
        database_type: Some("GeoIP-City".to_string()),
        languages: Some(vec!["en".to_string(), "de".to_string()]),
        build_epoch: Some(1_700_000_000),
        ..TreeOptions::default()
    }
}

fn lookup(tree: &Tree, addr: &str) -> Option<DataValue> {
    tree.lookup(addr.parse().unwrap()).map(|(_, v)| v.clone())
}

#[test]
fn test_ndjson_to_file_and_back() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("ips.ndjson");
    let output = dir.path().join("geoip.mmdb");

    std::fs::write(
        &input,
        concat!(
            r#"{"ip": "10.10.0.0/16", "name": "Building A", "floor": "0"}"#,
            "\n",
            r#"{"ip": "10.10.3.7", "name": "Lab 3.07", "floor": "3", "lat": 51.53, "lon": 9.93}"#,
            "\n",
        ),
    )
    .unwrap();

    let mut pipeline = BuildPipeline::new(Tree::new(options()));
    let report = pipeline
        .process_reader(file_reader::open(&input).unwrap())
        .unwrap();
    assert_eq!(report.inserted, 2);
    pipeline.into_tree().save(&output).unwrap();

    let loaded = Tree::load(&output, options()).unwrap();

    let lab = lookup(&loaded, "10.10.3.7").unwrap();
    assert_eq!(lab.get("name"), Some(&DataValue::from("Lab 3.07")));
    assert_eq!(
        lab.get("location").and_then(|l| l.get("latitude")),
        Some(&DataValue::Double(51.53))
    );

    let hall = lookup(&loaded, "10.10.200.1").unwrap();
    assert_eq!(hall.get("name"), Some(&DataValue::from("Building A")));
    assert_eq!(lookup(&loaded, "10.11.0.0"), None);

    let bytes = std::fs::read(&output).unwrap();
    let (metadata, _) = Metadata::from_file(&bytes).unwrap();
    assert_eq!(metadata.database_type, "GeoIP-City");
    assert_eq!(metadata.languages, vec!["en", "de"]);
    assert_eq!(metadata.build_epoch, 1_700_000_000);
}

#[test]
fn test_enrich_existing_database() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("base.mmdb");
    let enriched = dir.path().join("enriched.mmdb");

    // A country-level base database
    let mut tree = Tree::new(options());
    let country: DataValue = [
        ("country", [("iso_code", DataValue::from("DE"))].into_iter().collect()),
        ("source", DataValue::from("base")),
    ]
    .into_iter()
    .collect();
    tree.insert("134.76.0.0/16", country, MergeStrategy::TopLevelMerge)
        .unwrap();
    tree.save(&base).unwrap();

    // Enrich one host
    let mut pipeline = BuildPipeline::new(Tree::load(&base, TreeOptions::default()).unwrap())
        .with_profile(Profile::Raw);
    pipeline
        .process_line(r#"{"ip": "134.76.10.1", "source": "campus", "room": "0.101"}"#, 1)
        .unwrap();
    let tree = pipeline.into_tree();
    assert_eq!(tree.options().database_type.as_deref(), Some("GeoIP-City"));
    tree.save(&enriched).unwrap();

    let loaded = Tree::load(&enriched, options()).unwrap();
    let host = lookup(&loaded, "134.76.10.1").unwrap();
    assert_eq!(host.get("source"), Some(&DataValue::from("campus")));
    assert_eq!(host.get("room"), Some(&DataValue::from("0.101")));
    assert_eq!(
        host.get("country").and_then(|c| c.get("iso_code")),
        Some(&DataValue::from("DE"))
    );

    let other = lookup(&loaded, "134.76.10.2").unwrap();
    assert_eq!(other.get("source"), Some(&DataValue::from("base")));
    assert_eq!(other.get("room"), None);
}

#[test]
fn test_same_input_same_bytes() {
    let input = concat!(
        r#"{"ip": "1.2.3.0/24", "name": "a"}"#,
        "\n",
        r#"{"ip": "1.2.3.4", "name": "b"}"#,
        "\n",
        r#"{"ip": "5.6.0.0/15", "name": "a"}"#,
        "\n",
    );

    let build = || {
        let mut pipeline = BuildPipeline::new(Tree::new(options()));
        pipeline.process_reader(input.as_bytes()).unwrap();
        pipeline.into_tree().to_bytes().unwrap()
    };
    assert_eq!(build(), build());
}

#[test]
fn test_malformed_prefix_halts_without_output() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out.mmdb");

    let mut pipeline = BuildPipeline::new(Tree::new(options()));
    let input = "{\"ip\": \"10.0.0.1\"}\n{\"ip\": \"999.1.1.1/99\"}\n";
    let err = pipeline.process_reader(input.as_bytes()).unwrap_err();
    assert!(matches!(err, IpfoldError::InvalidPrefix(_)));

    // Nothing was saved
    assert!(!output.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_skip_policy_writes_good_lines() {
    let mut pipeline = BuildPipeline::new(Tree::new(options()))
        .with_profile(Profile::Raw)
        .with_error_policy(ErrorPolicy::Skip);
    let input = "{\"ip\": \"10.0.0.1\", \"x\": 1}\n{\"ip\": \"::1\", \"x\": 2}\n{\"ip\": \"10.0.0.3\", \"x\": 3}\n";
    let report = pipeline.process_reader(input.as_bytes()).unwrap();
    assert_eq!((report.inserted, report.skipped), (2, 1));

    let tree = Tree::from_bytes(&pipeline.tree().to_bytes().unwrap(), options()).unwrap();
    assert_eq!(tree.network_count().unwrap(), 2);
}

#[test]
fn test_corrupt_trailer_leaves_tree_untouched() {
    let dir = TempDir::new().unwrap();
    let bad = dir.path().join("bad.mmdb");

    let mut tree = Tree::new(options());
    tree.insert("192.0.2.0/24", DataValue::from("kept"), MergeStrategy::Replace)
        .unwrap();
    let mut bytes = tree.to_bytes().unwrap();

    // Chop the metadata marker off the end
    let marker = ipfold::mmdb::find_metadata_marker(&bytes).unwrap();
    bytes.truncate(marker + 3);
    std::fs::File::create(&bad)
        .unwrap()
        .write_all(&bytes)
        .unwrap();

    let before = tree.to_bytes().unwrap();
    let result = Tree::load(&bad, options());
    assert!(matches!(result, Err(IpfoldError::CorruptDatabase(_))));

    // The in-memory tree is independent of the failed load
    assert_eq!(tree.to_bytes().unwrap(), before);
    assert_eq!(lookup(&tree, "192.0.2.9"), Some(DataValue::from("kept")));
}

#[test]
fn test_record_sizes_round_trip() {
    for size in [RecordSize::Bits24, RecordSize::Bits28, RecordSize::Bits32] {
        let mut tree = Tree::new(TreeOptions {
            record_size: Some(size),
            ..options()
        });
        for i in 0..64u32 {
            let network = format!("{}.{}.0.0/16", 1 + i / 8, i);
            tree.insert(&network, DataValue::Uint32(i), MergeStrategy::Replace)
                .unwrap();
        }

        let bytes = tree.to_bytes().unwrap();
        let (metadata, _) = Metadata::from_file(&bytes).unwrap();
        assert_eq!(metadata.record_size, size);

        let loaded = Tree::from_bytes(&bytes, options()).unwrap();
        assert_eq!(lookup(&loaded, "1.7.200.200"), Some(DataValue::Uint32(7)));
        assert_eq!(lookup(&loaded, "8.63.0.1"), Some(DataValue::Uint32(63)));
        assert_eq!(loaded.network_count().unwrap(), 64);
    }
}

#[test]
fn test_reserved_networks_excluded_on_load() {
    let mut tree = Tree::new(options());
    tree.insert("192.168.1.0/24", DataValue::from("private"), MergeStrategy::Replace)
        .unwrap();
    tree.insert("8.8.8.0/24", DataValue::from("public"), MergeStrategy::Replace)
        .unwrap();
    let bytes = tree.to_bytes().unwrap();

    let masked = Tree::from_bytes(&bytes, TreeOptions::default()).unwrap();
    assert_eq!(lookup(&masked, "192.168.1.1"), None);
    assert_eq!(lookup(&masked, "8.8.8.8"), Some(DataValue::from("public")));
}
