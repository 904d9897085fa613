use anyhow::{Context, Result};
use ipfold::{Metadata, Tree, TreeOptions};
use serde_json::json;
use std::path::PathBuf;

use crate::cli_utils::{data_value_to_json, format_bytes, format_number};

pub fn cmd_inspect(database: PathBuf, json_output: bool, list_networks: bool) -> Result<()> {
    let bytes = std::fs::read(&database)
        .with_context(|| format!("Failed to read database: {}", database.display()))?;

    let (metadata, _) = Metadata::from_file(&bytes)
        .with_context(|| format!("Failed to load database: {}", database.display()))?;

    // Reserved networks stay as stored; nothing is masked for display
    let tree = Tree::from_bytes(&bytes, TreeOptions {
        include_reserved_networks: true,
        ..TreeOptions::default()
    })
    .with_context(|| format!("Failed to load database: {}", database.display()))?;
    let networks = tree.networks()?;

    if json_output {
        let mut output = json!({
            "file": database.display().to_string(),
            "size": bytes.len(),
            "metadata": data_value_to_json(&metadata.to_value()),
            "network_count": networks.len(),
        });
        if list_networks {
            output["networks"] = networks
                .iter()
                .map(|(prefix, record)| {
                    json!({ "network": prefix.to_string(), "data": data_value_to_json(record) })
                })
                .collect();
        }
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Database:     {}", database.display());
    println!("Type:         {}", metadata.database_type);
    println!("IP version:   {}", metadata.ip_version.number());
    println!("Record size:  {} bits", metadata.record_size.bits());
    println!("Nodes:        {}", format_number(metadata.node_count as usize));
    println!("Networks:     {}", format_number(networks.len()));
    println!("Size:         {}", format_bytes(bytes.len()));
    println!("Build epoch:  {}", metadata.build_epoch);
    if !metadata.languages.is_empty() {
        println!("Languages:    {}", metadata.languages.join(", "));
    }
    for (lang, text) in &metadata.description {
        println!("Description:  [{}] {}", lang, text);
    }

    if list_networks {
        println!();
        for (prefix, record) in &networks {
            println!("{}\t{}", prefix, data_value_to_json(record));
        }
    }
    Ok(())
}
