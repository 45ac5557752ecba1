//! Capacity and allocation CLI commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{Allocation, ApiClient, CapacityView, Requirements};
use crate::output::{
    format_quantity, print_info, print_json, print_rows, print_warning, truncate_id, OutputFormat,
};

/// Row for the capacity table, one per dimension
#[derive(Tabled)]
struct CapacityRow {
    #[tabled(rename = "Dimension")]
    dimension: &'static str,
    #[tabled(rename = "Total")]
    total: String,
    #[tabled(rename = "Granted")]
    granted: String,
    #[tabled(rename = "Available")]
    available: String,
}

#[derive(Tabled)]
struct AllocationRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Request")]
    request_id: String,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "GPU")]
    gpus: String,
    #[tabled(rename = "CPU")]
    cpus: String,
    #[tabled(rename = "Target")]
    cluster_target: String,
}

fn dimensions(v: &Requirements) -> [(&'static str, f64); 4] {
    [
        ("gpu", v.gpu_count),
        ("cpu", v.cpu_cores),
        ("memory (GB)", v.memory_gb),
        ("storage (TB)", v.storage_tb),
    ]
}

/// Show total, granted and available capacity
pub async fn show_capacity(client: &ApiClient, live: bool, format: OutputFormat) -> Result<()> {
    let query = if live {
        vec![("live", "true".to_string())]
    } else {
        Vec::new()
    };
    let view: CapacityView = client.get_with_query("api/v1/capacity", &query).await?;

    match format {
        OutputFormat::Json => print_json(&view)?,
        OutputFormat::Table => {
            let rows: Vec<CapacityRow> = dimensions(&view.total)
                .into_iter()
                .zip(dimensions(&view.granted))
                .zip(dimensions(&view.available))
                .map(|(((name, total), (_, granted)), (_, available))| CapacityRow {
                    dimension: name,
                    total: format_quantity(total),
                    granted: format_quantity(granted),
                    available: format_quantity(available),
                })
                .collect();
            print_rows(rows);
            println!("\nActive allocations: {}", view.active_allocations);

            if !view.over_committed.is_empty() {
                print_warning(&format!(
                    "Over-committed: {}",
                    view.over_committed.join(", ")
                ));
            }

            if let Some(fleet) = &view.fleet {
                print_info(&format!(
                    "Live fleet: {}/{} nodes reachable, {} of {} GPUs and {} of {} CPU cores in use",
                    fleet.reachable,
                    fleet.nodes,
                    format_quantity(fleet.used.gpu_count),
                    format_quantity(fleet.total.gpu_count),
                    format_quantity(fleet.used.cpu_cores),
                    format_quantity(fleet.total.cpu_cores),
                ));
            }
        }
    }

    Ok(())
}

/// List granted allocations
pub async fn list_allocations(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let allocations: Vec<Allocation> = client.get("api/v1/allocations").await?;

    match format {
        OutputFormat::Json => print_json(&allocations)?,
        OutputFormat::Table => {
            if allocations.is_empty() {
                print_warning("No allocations found");
                return Ok(());
            }
            print_rows(
                allocations
                    .iter()
                    .map(|a| AllocationRow {
                        id: truncate_id(&a.id),
                        request_id: truncate_id(&a.request_id),
                        namespace: a.namespace.clone(),
                        gpus: format_quantity(a.granted.gpu_count),
                        cpus: format_quantity(a.granted.cpu_cores),
                        cluster_target: a.cluster_target.clone(),
                    })
                    .collect(),
            );
        }
    }

    Ok(())
}
