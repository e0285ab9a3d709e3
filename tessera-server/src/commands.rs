//! Admin subcommands. They talk to the shared store directly; a running
//! controller picks the writes up through its watch like any other change.

use anyhow::Result;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use std::sync::Arc;

use tessera_core::store::KvStore;
use tessera_core::{namespaces, EdgeManager, RouteManager};
use tessera_types::{Edge, Route};

use crate::cli::{EdgeCommands, NamespaceCommands, RouteCommands};

pub async fn handle_namespace_command(store: Arc<dyn KvStore>, cmd: NamespaceCommands) -> Result<()> {
    match cmd {
        NamespaceCommands::List { json } => {
            let names = namespaces::list_namespaces(store.as_ref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else if names.is_empty() {
                println!("{}", "No namespaces found.".yellow());
            } else {
                for name in &names {
                    println!("{}", name);
                }
            }
            Ok(())
        },
    }
}

pub async fn handle_edge_command(store: Arc<dyn KvStore>, cmd: EdgeCommands) -> Result<()> {
    let edges = EdgeManager::new(store);
    match cmd {
        EdgeCommands::Add { name, host_addr, cidr, platform, namespace } => {
            let edge = Edge::new(namespace, name, host_addr, cidr).with_platform(platform);
            let edge = edges.add_edge(edge).await?;
            println!(
                "{} Edge added: {}/{} ({})",
                "✓".green(),
                edge.namespace,
                edge.name.green(),
                edge.cidr
            );
        },
        EdgeCommands::Del { name, namespace } => {
            if edges.delete_edge(&namespace, &name).await? {
                println!("{} Edge deleted: {}/{}", "✓".green(), namespace, name.green());
            } else {
                println!("{}", format!("Edge {}/{} does not exist.", namespace, name).yellow());
            }
        },
        EdgeCommands::List { namespace, json } => {
            let list = edges.list_edges(&namespace).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else if list.is_empty() {
                println!("{}", format!("No edges in namespace '{}'.", namespace).yellow());
            } else {
                println!("{}", edges_table(&list, &[]));
                println!("\n{} edges total", list.len());
            }
        },
    }
    Ok(())
}

pub async fn handle_route_command(store: Arc<dyn KvStore>, cmd: RouteCommands) -> Result<()> {
    let routes = RouteManager::new(store);
    match cmd {
        RouteCommands::Add { name, listener, cidr, namespace } => {
            let route = routes.add_route(Route::new(namespace, name, listener, cidr)).await?;
            println!(
                "{} Route added: {}/{} {} via {}",
                "✓".green(),
                route.namespace,
                route.name.green(),
                route.cidr,
                route.listener
            );
        },
        RouteCommands::Del { name, namespace } => {
            if routes.delete_route(&namespace, &name).await? {
                println!("{} Route deleted: {}/{}", "✓".green(), namespace, name.green());
            } else {
                println!("{}", format!("Route {}/{} does not exist.", namespace, name).yellow());
            }
        },
        RouteCommands::List { namespace, json } => {
            let list = routes.list_routes(&namespace).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else if list.is_empty() {
                println!("{}", format!("No routes in namespace '{}'.", namespace).yellow());
            } else {
                println!("{}", routes_table(&list));
                println!("\n{} routes total", list.len());
            }
        },
    }
    Ok(())
}

pub async fn handle_topology(store: Arc<dyn KvStore>, namespace: &str, json: bool) -> Result<()> {
    let topology = namespaces::read_topology(store.as_ref(), namespace).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&topology)?);
        return Ok(());
    }

    println!("{}", format!("Namespace '{}'", namespace).cyan().bold());
    if topology.is_empty() {
        println!("{}", "Nothing declared.".yellow());
        return Ok(());
    }
    if !topology.edges.is_empty() {
        println!("{}", edges_table(&topology.edges, &topology.routes));
    }
    if !topology.routes.is_empty() {
        println!("{}", routes_table(&topology.routes));
    }
    println!(
        "\n{} edges, {} routes",
        topology.edges.len(),
        topology.routes.len()
    );
    Ok(())
}

/// Edges with the number of routes each one listens for.
fn edges_table(edges: &[Edge], routes: &[Route]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    let mut header = vec!["Name", "Host", "CIDR", "Platform"];
    if !routes.is_empty() {
        header.push("Routes");
    }
    table.set_header(header);

    for edge in edges {
        let mut row = vec![
            Cell::new(&edge.name).fg(Color::Green),
            Cell::new(&edge.host_addr),
            Cell::new(&edge.cidr),
            Cell::new(if edge.platform.is_empty() { "-" } else { edge.platform.as_str() }),
        ];
        if !routes.is_empty() {
            let count = routes.iter().filter(|r| r.listener == edge.name).count();
            row.push(Cell::new(count));
        }
        table.add_row(row);
    }
    table
}

fn routes_table(routes: &[Route]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Name", "CIDR", "Listener"]);
    for route in routes {
        table.add_row(vec![
            Cell::new(&route.name).fg(Color::Green),
            Cell::new(&route.cidr),
            Cell::new(&route.listener),
        ]);
    }
    table
}
