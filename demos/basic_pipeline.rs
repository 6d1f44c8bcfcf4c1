//! Basic example of running one device through the pipeline.
//!
//! Run with: RUST_LOG=info cargo run --example basic_pipeline

use episode_router::{
    process_device, EdgeId, GpsFix, NetworkEdge, NetworkNode, PipelineConfig, RoadNetwork,
    RouteStatus,
};

fn main() {
    env_logger::init();

    // Two blocks east along King St, then north up Bay St
    let nodes = vec![
        NetworkNode { id: 1, lon: -79.9250, lat: 43.2600 },
        NetworkNode { id: 2, lon: -79.9225, lat: 43.2600 },
        NetworkNode { id: 3, lon: -79.9200, lat: 43.2600 },
        NetworkNode { id: 4, lon: -79.9200, lat: 43.2618 },
    ];
    let edge = |u, v, name: &str| NetworkEdge {
        id: EdgeId::new(u, v, 0),
        geometry: vec![],
        name: Some(name.to_string()),
        length: None,
    };
    let edges = vec![edge(1, 2, "King St"), edge(2, 3, "King St"), edge(3, 4, "Bay St")];
    let network = match RoadNetwork::new(nodes, edges) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("Invalid network: {}", e);
            return;
        }
    };

    // Parked, driving at 36 km/h with a fix every ~20 m, parked again
    let mut fixes = Vec::new();
    let mut id = 1;
    let mut push = |minute: u32, lat: f64, lon: f64, speed: f64| {
        let time = format!("3/14/2023 10:{:02}", minute);
        fixes.push(GpsFix::new(id, "dev-1", &time, lat, lon, speed));
        id += 1;
    };
    for m in 0..4 {
        push(m, 43.2600 + m as f64 * 1e-6, -79.9250, 0.0);
    }
    for k in 0..20 {
        push(4 + k / 30, 43.2600, -79.9248 + k as f64 * 0.00024, 36.0);
    }
    for k in 0..8 {
        push(5 + k / 30, 43.26002 + k as f64 * 0.0002, -79.9200, 36.0);
    }
    for m in 0..4 {
        push(7 + m, 43.2616 + m as f64 * 1e-6, -79.9200, 0.0);
    }

    let output = match process_device("dev-1", &fixes, &network, &PipelineConfig::default()) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Pipeline failed: {}", e);
            return;
        }
    };

    println!("Episodes for {}:", output.serial_id);
    for episode in &output.episodes {
        println!(
            "  {:>5} fixes {:>2}..={:<2}{}",
            episode.mode,
            episode.start_index,
            episode.end_index,
            if episode.forced_by_gap { " (sensor gap)" } else { "" }
        );
    }
    println!("Trip points: {}, stop points: {}\n", output.trip.len(), output.stops.points.len());

    match &output.status {
        RouteStatus::Routed { route, variables, gaps, unfilled, .. } => {
            println!("Route: {} vertices over {} edges", route.line.0.len(), route.edges.len());
            println!("Gaps filled: {}, left open: {}", gaps.len(), unfilled.len());
            println!("  distance:      {:.0} m", variables.distance);
            println!(
                "  turns:         {} left, {} right",
                variables.left_turns, variables.right_turns
            );
            println!("  streets:       {}", variables.num_streets);
            println!(
                "  longest leg:   {} ({:.0} m)",
                variables.longest_leg_street.as_deref().unwrap_or("unnamed"),
                variables.longest_leg_length
            );
        }
        RouteStatus::Skipped(reason) => println!("No route: {:?}", reason),
    }
}
