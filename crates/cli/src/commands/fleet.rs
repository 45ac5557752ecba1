//! Fleet inventory CLI commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, FleetImages, FleetSnapshot, Node};
use crate::output::{
    color_status, format_bytes, format_optional, format_percent, print_json, print_rows,
    print_warning, OutputFormat,
};

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Cores")]
    cores: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Mem Total")]
    memory_total: String,
    #[tabled(rename = "Storage")]
    storage: String,
    #[tabled(rename = "GPU")]
    gpu: String,
    #[tabled(rename = "GPUs")]
    gpus: String,
}

#[derive(Tabled)]
struct ImageRow {
    #[tabled(rename = "Image")]
    reference: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Hosts")]
    hosts: String,
}

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "SSH")]
    ssh: String,
}

/// Show a live resource snapshot of every node
pub async fn show_snapshot(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let fleet: FleetSnapshot = client.get("api/v1/fleet/snapshot").await?;

    match format {
        OutputFormat::Json => print_json(&fleet)?,
        OutputFormat::Table => {
            let rows: Vec<SnapshotRow> = fleet
                .nodes
                .iter()
                .map(|n| SnapshotRow {
                    node: n.node_id.clone(),
                    status: color_status(&n.snapshot.status),
                    cpu: format_percent(n.snapshot.cpu_utilization),
                    cores: format_optional(n.snapshot.cpu_cores, ""),
                    memory: format_percent(n.snapshot.memory_utilization),
                    memory_total: format_optional(n.snapshot.memory_total_gb, " GB"),
                    storage: format_percent(n.snapshot.storage_utilization),
                    gpu: format_percent(n.snapshot.gpu_utilization),
                    gpus: format_optional(n.snapshot.gpu_count, ""),
                })
                .collect();
            print_rows(rows);

            for node in fleet.nodes.iter().filter(|n| n.snapshot.error.is_some()) {
                print_warning(&format!(
                    "{}: {}",
                    node.node_id,
                    node.snapshot.error.as_deref().unwrap_or_default()
                ));
            }
            println!(
                "\n{} of {} nodes reachable",
                fleet.summary.reachable, fleet.summary.nodes
            );
        }
    }

    Ok(())
}

/// Show the deduplicated image inventory
pub async fn show_images(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let inventory: FleetImages = client.get("api/v1/fleet/images").await?;

    match format {
        OutputFormat::Json => print_json(&inventory)?,
        OutputFormat::Table => {
            if inventory.images.is_empty() {
                print_warning("No images found");
            } else {
                print_rows(
                    inventory
                        .images
                        .iter()
                        .map(|i| ImageRow {
                            reference: i.reference.clone(),
                            size: format_bytes(i.size_bytes),
                            hosts: i.hosts.join(", "),
                        })
                        .collect(),
                );
            }
            for failure in &inventory.errors {
                print_warning(&format!("{}: {}", failure.node_id, failure.error));
            }
        }
    }

    Ok(())
}

/// List registered nodes
pub async fn list_nodes(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let nodes: Vec<Node> = client.get("api/v1/nodes").await?;

    match format {
        OutputFormat::Json => print_json(&nodes)?,
        OutputFormat::Table => {
            if nodes.is_empty() {
                print_warning("No nodes registered");
                return Ok(());
            }
            print_rows(
                nodes
                    .iter()
                    .map(|n| NodeRow {
                        id: n.id.clone(),
                        name: n.name.clone(),
                        ssh: format!("{}@{}:{}", n.ssh_user, n.ip_address, n.ssh_port),
                    })
                    .collect(),
            );
        }
    }

    Ok(())
}
