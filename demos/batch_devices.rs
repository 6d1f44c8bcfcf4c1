//! Example of processing many devices at once.
//!
//! Run with: cargo run --example batch_devices --features parallel

use std::time::Instant;

use episode_router::{
    process_devices, process_devices_parallel, EdgeId, GpsFix, NetworkEdge, NetworkNode,
    PipelineConfig, RoadNetwork,
};

/// A square grid of two-way streets, `size` blocks on a side.
fn grid(size: i64) -> RoadNetwork {
    let id = |row: i64, col: i64| row * 100 + col;
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    for row in 0..=size {
        for col in 0..=size {
            nodes.push(NetworkNode {
                id: id(row, col),
                lon: -79.93 + col as f64 * 0.0012,
                lat: 43.25 + row as f64 * 0.0009,
            });
            let here = id(row, col);
            let mut link = |to: i64, name: String| {
                for (u, v) in [(here, to), (to, here)] {
                    edges.push(NetworkEdge {
                        id: EdgeId::new(u, v, 0),
                        geometry: vec![],
                        name: Some(name.clone()),
                        length: None,
                    });
                }
            };
            if col < size {
                link(id(row, col + 1), format!("Street {}", row));
            }
            if row < size {
                link(id(row + 1, col), format!("Avenue {}", col));
            }
        }
    }
    RoadNetwork::new(nodes, edges).expect("grid is well formed")
}

/// Drive east along one street, then north along one avenue.
fn device(serial: &str, street: usize, first_id: i64) -> Vec<GpsFix> {
    let lat = 43.25 + street as f64 * 0.0009;
    let mut fixes = Vec::new();
    let mut id = first_id;
    let mut push = |minute: usize, lat: f64, lon: f64, speed: f64| {
        fixes.push(GpsFix::new(id, serial, &format!("4/3/2023 7:{:02}", minute), lat, lon, speed));
        id += 1;
    };
    for m in 0..4 {
        push(m, lat + m as f64 * 1e-6, -79.93, 0.0);
    }
    for k in 0..30 {
        push(4 + k / 20, lat, -79.9298 + k as f64 * 0.00016, 30.0);
    }
    for k in 0..20 {
        push(6 + k / 20, lat + 0.00002 + k as f64 * 0.00011, -79.9252, 30.0);
    }
    for m in 0..4 {
        push(8 + m, lat + 0.0022 + m as f64 * 1e-6, -79.9252, 0.0);
    }
    fixes
}

fn main() {
    env_logger::init();
    println!("Batch Device Processing Example\n");

    let network = grid(10);
    println!("Network: {} nodes, {} edges", network.node_count(), network.edge_count());

    let mut fixes = Vec::new();
    for d in 0..200 {
        fixes.extend(device(&format!("dev-{:03}", d), d % 8, d as i64 * 1000));
    }
    println!("Fixes: {}\n", fixes.len());

    let config = PipelineConfig::default();

    let start = Instant::now();
    let sequential = process_devices(&fixes, &network, &config);
    println!("Sequential: {} devices in {:?}", sequential.len(), start.elapsed());

    let start = Instant::now();
    let parallel = process_devices_parallel(&fixes, &network, &config);
    println!("Parallel:   {} devices in {:?}", parallel.len(), start.elapsed());

    let routed = parallel
        .values()
        .filter(|r| r.as_ref().is_ok_and(|o| o.status.route().is_some()))
        .count();
    let mean_distance = parallel
        .values()
        .filter_map(|r| r.as_ref().ok()?.status.variables().map(|v| v.distance))
        .sum::<f64>()
        / routed.max(1) as f64;

    println!(
        "\nRouted {} of {} devices, mean route {:.0} m",
        routed,
        parallel.len(),
        mean_distance
    );
    println!("Results identical: {}", sequential == parallel);
}
