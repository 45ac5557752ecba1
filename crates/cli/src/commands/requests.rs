//! Resource request CLI commands

use anyhow::{Context, Result};
use tabled::Tabled;

use crate::client::{Allocation, ApiClient, RejectBody, Requirements, ResourceRequest, SubmitBody};
use crate::output::{
    color_status, format_quantity, format_timestamp, print_json, print_rows, print_success,
    print_warning, truncate_id, OutputFormat,
};

/// Row for requests table
#[derive(Tabled)]
struct RequestRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Project")]
    project: String,
    #[tabled(rename = "Owner")]
    owner: String,
    #[tabled(rename = "GPU")]
    gpus: String,
    #[tabled(rename = "CPU")]
    cpus: String,
    #[tabled(rename = "Mem (GB)")]
    memory: String,
    #[tabled(rename = "Storage (TB)")]
    storage: String,
    #[tabled(rename = "State")]
    state: String,
}

impl From<&ResourceRequest> for RequestRow {
    fn from(r: &ResourceRequest) -> Self {
        Self {
            id: truncate_id(&r.id),
            project: r.project_name.clone(),
            owner: r.owner.clone(),
            gpus: format_quantity(r.requirements.gpu_count),
            cpus: format_quantity(r.requirements.cpu_cores),
            memory: format_quantity(r.requirements.memory_gb),
            storage: format_quantity(r.requirements.storage_tb),
            state: color_status(&r.state),
        }
    }
}

/// Arguments for a new request
pub struct SubmitArgs {
    pub project: String,
    pub owner: String,
    pub organisation: Option<String>,
    pub summary: Option<String>,
    pub runtime: Option<String>,
    pub image: Option<String>,
    pub tags: Vec<String>,
    pub deadline: Option<String>,
    pub requirements: Requirements,
}

fn request_path(id: &str) -> String {
    format!("api/v1/requests/{}", id)
}

/// List requests with optional owner and state filters
pub async fn list_requests(
    client: &ApiClient,
    owner: Option<String>,
    state: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let mut query = Vec::new();
    if let Some(owner) = owner {
        query.push(("owner", owner));
    }
    if let Some(state) = state {
        query.push(("state", state));
    }

    let requests: Vec<ResourceRequest> = client.get_with_query("api/v1/requests", &query).await?;

    match format {
        OutputFormat::Json => print_json(&requests)?,
        OutputFormat::Table => {
            if requests.is_empty() {
                print_warning("No requests found");
                return Ok(());
            }
            print_rows(requests.iter().map(RequestRow::from).collect());
            println!("\nTotal: {} requests", requests.len());
        }
    }

    Ok(())
}

/// Show one request in detail
pub async fn get_request(client: &ApiClient, id: &str, format: OutputFormat) -> Result<()> {
    let request: ResourceRequest = client.get(&request_path(id)).await?;

    match format {
        OutputFormat::Json => print_json(&request)?,
        OutputFormat::Table => {
            println!("ID:           {}", request.id);
            println!("Project:      {}", request.project_name);
            println!("Owner:        {}", request.owner);
            if !request.organisation.is_empty() {
                println!("Organisation: {}", request.organisation);
            }
            println!("State:        {}", color_status(&request.state));
            if let Some(reason) = &request.rejection_reason {
                println!("Reason:       {}", reason);
            }
            println!("Runtime:      {}", request.preferred_runtime);
            if let Some(image) = &request.preferred_image {
                println!("Image:        {}", image);
            }
            if let Some(deadline) = &request.deadline {
                println!("Deadline:     {}", deadline);
            }
            if !request.tags.is_empty() {
                println!("Tags:         {}", request.tags.join(", "));
            }
            println!(
                "Requirements: {} GPU, {} CPU, {} GB memory, {} TB storage",
                format_quantity(request.requirements.gpu_count),
                format_quantity(request.requirements.cpu_cores),
                format_quantity(request.requirements.memory_gb),
                format_quantity(request.requirements.storage_tb),
            );
            println!("Created:      {}", format_timestamp(&request.created_at));
            if !request.summary.is_empty() {
                println!("\n{}", request.summary);
            }
        }
    }

    Ok(())
}

/// Submit a new request, from flags or from a JSON file
pub async fn submit_request(
    client: &ApiClient,
    args: Option<SubmitArgs>,
    file: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let body: serde_json::Value = match (file, args) {
        (Some(path), _) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path))?;
            serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path))?
        }
        (None, Some(args)) => serde_json::to_value(SubmitBody {
            project_name: args.project,
            owner: args.owner,
            organisation: args.organisation,
            summary: args.summary,
            preferred_runtime: args.runtime,
            preferred_image: args.image,
            tags: args.tags,
            deadline: args.deadline,
            requirements: args.requirements,
        })?,
        (None, None) => anyhow::bail!("Either --file or --project and --owner are required"),
    };

    let request: ResourceRequest = client.post("api/v1/requests", &body).await?;

    match format {
        OutputFormat::Json => print_json(&request)?,
        OutputFormat::Table => print_success(&format!("Submitted request {}", request.id)),
    }
    Ok(())
}

/// Approve a pending request
pub async fn approve_request(client: &ApiClient, id: &str, format: OutputFormat) -> Result<()> {
    let allocation: Allocation = client
        .post(&format!("{}/approve", request_path(id)), &serde_json::json!({}))
        .await?;

    match format {
        OutputFormat::Json => print_json(&allocation)?,
        OutputFormat::Table => print_success(&format!(
            "Approved request {} into namespace {} on {}",
            id, allocation.namespace, allocation.cluster_target
        )),
    }
    Ok(())
}

/// Cancel a pending request
pub async fn cancel_request(client: &ApiClient, id: &str, format: OutputFormat) -> Result<()> {
    let request: ResourceRequest = client
        .post(&format!("{}/cancel", request_path(id)), &serde_json::json!({}))
        .await?;

    match format {
        OutputFormat::Json => print_json(&request)?,
        OutputFormat::Table => print_success(&format!("Cancelled request {}", request.id)),
    }
    Ok(())
}

/// Reject a pending request
pub async fn reject_request(
    client: &ApiClient,
    id: &str,
    reason: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let request: ResourceRequest = client
        .post(&format!("{}/reject", request_path(id)), &RejectBody { reason })
        .await?;

    match format {
        OutputFormat::Json => print_json(&request)?,
        OutputFormat::Table => print_success(&format!("Rejected request {}", request.id)),
    }
    Ok(())
}

/// Delete a request and any allocation it holds
pub async fn delete_request(client: &ApiClient, id: &str) -> Result<()> {
    client.delete(&request_path(id)).await?;
    print_success(&format!("Deleted request {}", id));
    Ok(())
}
