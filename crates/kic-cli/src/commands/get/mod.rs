//! Get command - query clusters and their nodes

mod format;

use clap::{Args, Subcommand, ValueEnum};

use kic_cluster::{Backend, ClusterContext, Node};

use super::ClusterArgs;
use crate::Result;

/// Get kic resources
#[derive(Args, Debug)]
pub struct GetArgs {
    #[command(subcommand)]
    pub resource: GetResource,

    /// Output format
    #[arg(short, long, default_value = "table", global = true)]
    pub output: OutputFormat,
}

/// Resource to get
#[derive(Subcommand, Debug)]
pub enum GetResource {
    /// List every cluster with at least one node
    Clusters,
    /// List the nodes of a cluster
    Nodes(ClusterArgs),
    /// Print the path of a cluster's kubeconfig file
    KubeconfigPath(ClusterArgs),
}

/// Output format
#[derive(Clone, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    /// Columnar table (default)
    #[default]
    Table,
    /// JSON
    Json,
}

/// Run the get command
pub async fn run(args: GetArgs) -> Result<()> {
    match args.resource {
        GetResource::Clusters => {
            let clusters = Backend::docker().registry.list_clusters().await?;
            print_clusters(&clusters, &args.output)
        }
        GetResource::Nodes(cluster) => {
            let nodes = ClusterContext::new(cluster.identity(), Backend::docker())
                .list_nodes()
                .await?;
            print_nodes(&nodes, &args.output)
        }
        GetResource::KubeconfigPath(cluster) => {
            println!("{}", cluster.identity().credentials_path().display());
            Ok(())
        }
    }
}

fn print_clusters(clusters: &[String], output: &OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Table => {
            if clusters.is_empty() {
                println!("No clusters found.");
            }
            for name in clusters {
                println!("{}", name);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(clusters)?),
    }
    Ok(())
}

fn print_nodes(nodes: &[Node], output: &OutputFormat) -> Result<()> {
    let nodes = kic_cluster::node::sorted(nodes);
    match output {
        OutputFormat::Table => {
            let rows: Vec<Vec<String>> = nodes
                .iter()
                .map(|n| vec![n.name.clone(), n.role.to_string()])
                .collect();
            format::print_table(&["NAME", "ROLE"], &rows);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&nodes)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kic_common::NodeRole;

    #[test]
    fn nodes_serialize_with_kebab_case_roles() {
        let nodes = vec![
            Node::new("dev-control-plane", NodeRole::ControlPlane),
            Node::new("dev-worker", NodeRole::Worker),
            Node::new("dev-external-load-balancer", NodeRole::ExternalLoadBalancer),
        ];
        let value = serde_json::to_value(&nodes).unwrap();
        assert_eq!(
            value,
            serde_json::json!([
                { "name": "dev-control-plane", "role": "control-plane" },
                { "name": "dev-worker", "role": "worker" },
                { "name": "dev-external-load-balancer", "role": "external-load-balancer" },
            ])
        );
    }

    #[test]
    fn empty_cluster_serializes_to_empty_array() {
        let nodes: Vec<Node> = Vec::new();
        assert_eq!(serde_json::to_value(&nodes).unwrap(), serde_json::json!([]));
    }
}
