use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tessera_types::models::DEFAULT_NAMESPACE;

#[derive(Parser)]
#[command(
    name = "tessera",
    about = "Tessera - Overlay Network Control Plane",
    version = env!("CARGO_PKG_VERSION"),
    author,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(short, long, global = true, env = "TESSERA_CONFIG", default_value = "tessera.json")]
    pub config: PathBuf,

    #[arg(long, global = true, help = "PostgreSQL URL (overrides TESSERA_DATABASE_URL)")]
    pub database_url: Option<String>,

    #[arg(short, long, global = true, help = "Log filter, e.g. 'debug' (RUST_LOG wins)")]
    pub log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the control plane (default if no command specified)")]
    Serve {
        #[arg(long, help = "Agent registry address (overrides TESSERA_LISTEN)")]
        listen: Option<String>,

        #[arg(long, help = "REST API address (overrides TESSERA_API_LISTEN)")]
        api_listen: Option<String>,

        #[arg(long, help = "Use the in-process store; state is lost on exit")]
        memory: bool,
    },

    #[command(subcommand, about = "Inspect namespaces")]
    Namespace(NamespaceCommands),

    #[command(subcommand, about = "Manage edge gateways")]
    Edge(EdgeCommands),

    #[command(subcommand, about = "Manage routes")]
    Route(RouteCommands),

    #[command(about = "Show edges and routes of a namespace")]
    Topology {
        #[arg(short, long, default_value = DEFAULT_NAMESPACE)]
        namespace: String,

        #[arg(short, long, help = "Output as JSON")]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum NamespaceCommands {
    #[command(about = "List namespaces that own edges or routes")]
    List {
        #[arg(short, long, help = "Output as JSON")]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum EdgeCommands {
    #[command(about = "Add an edge gateway")]
    Add {
        #[arg(help = "Edge name, unique per namespace")]
        name: String,

        #[arg(long, help = "Address the gateway is reachable at, e.g. 1.2.3.4:58423")]
        host_addr: String,

        #[arg(long, help = "Private subnet owned by the gateway, e.g. 172.18.0.0/16")]
        cidr: String,

        #[arg(long, default_value = "", help = "Platform tag (aws, aliyun, vm, ...)")]
        platform: String,

        #[arg(short, long, default_value = DEFAULT_NAMESPACE)]
        namespace: String,
    },

    #[command(about = "Delete an edge gateway")]
    Del {
        name: String,

        #[arg(short, long, default_value = DEFAULT_NAMESPACE)]
        namespace: String,
    },

    #[command(about = "List edge gateways")]
    List {
        #[arg(short, long, default_value = DEFAULT_NAMESPACE)]
        namespace: String,

        #[arg(short, long, help = "Output as JSON")]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum RouteCommands {
    #[command(about = "Add a route")]
    Add {
        #[arg(help = "Route name, unique per namespace")]
        name: String,

        #[arg(long, help = "Edge that traffic for the destination is forwarded through")]
        listener: String,

        #[arg(long, help = "Destination subnet, e.g. 10.10.0.0/16")]
        cidr: String,

        #[arg(short, long, default_value = DEFAULT_NAMESPACE)]
        namespace: String,
    },

    #[command(about = "Delete a route")]
    Del {
        name: String,

        #[arg(short, long, default_value = DEFAULT_NAMESPACE)]
        namespace: String,
    },

    #[command(about = "List routes")]
    List {
        #[arg(short, long, default_value = DEFAULT_NAMESPACE)]
        namespace: String,

        #[arg(short, long, help = "Output as JSON")]
        json: bool,
    },
}
