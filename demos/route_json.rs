//! Example of exporting route-choice variables and route geometry as JSON.
//!
//! Run with: cargo run --example route_json --features serde

use episode_router::{
    process_device, EdgeId, GpsFix, NetworkEdge, NetworkNode, PipelineConfig, RoadNetwork,
};

fn main() {
    env_logger::init();

    let nodes = vec![
        NetworkNode { id: 1, lon: -79.9250, lat: 43.2600 },
        NetworkNode { id: 2, lon: -79.9200, lat: 43.2600 },
        NetworkNode { id: 3, lon: -79.9200, lat: 43.2618 },
    ];
    let edges = vec![
        NetworkEdge {
            id: EdgeId::new(1, 2, 0),
            geometry: vec![],
            name: Some("King St".to_string()),
            length: None,
        },
        NetworkEdge {
            id: EdgeId::new(2, 3, 0),
            geometry: vec![],
            name: Some("Bay St".to_string()),
            length: None,
        },
    ];
    let network = RoadNetwork::new(nodes, edges).expect("network is well formed");

    let mut fixes: Vec<GpsFix> = (0..4)
        .map(|m| {
            let time = format!("8/21/2023 16:0{}", m);
            GpsFix::new(m + 1, "dev-7", &time, 43.2600 + m as f64 * 1e-6, -79.9250, 0.0)
        })
        .collect();
    let drive = (0..20)
        .map(|k| (43.2600, -79.9248 + k as f64 * 0.00024))
        .chain((0..8).map(|k| (43.26002 + k as f64 * 0.0002, -79.9200)));
    for (k, (lat, lon)) in drive.enumerate() {
        let id = fixes.len() as i64 + 1;
        let time = format!("8/21/2023 16:{:02}", 4 + k / 30);
        fixes.push(GpsFix::new(id, "dev-7", &time, lat, lon, 36.0));
    }
    for m in 0..4 {
        let id = fixes.len() as i64 + 1;
        let time = format!("8/21/2023 16:{:02}", 7 + m);
        fixes.push(GpsFix::new(id, "dev-7", &time, 43.2616 + m as f64 * 1e-6, -79.9200, 0.0));
    }

    let output = match process_device("dev-7", &fixes, &network, &PipelineConfig::default()) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Pipeline failed: {}", e);
            return;
        }
    };

    let Some(route) = output.status.route() else {
        let skipped = serde_json::json!({ "serial_id": output.serial_id, "status": output.status });
        println!("{}", skipped);
        return;
    };

    let record = serde_json::json!({
        "variables": output.status.variables(),
        "episodes": output.episodes,
        "geometry": route.to_lon_lat(network.projection()),
    });
    match serde_json::to_string_pretty(&record) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Serialization failed: {}", e),
    }
}
