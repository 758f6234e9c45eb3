use criterion::{criterion_group, criterion_main, Criterion};
use haulroute_lib::search::{find_route, SearchContext};
use haulroute_lib::{
    GraphSnapshot, GraphStoreConfig, RouteProfile, RuleSet, SecurityPolicy, System, SystemId,
};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::hint::black_box;

const SIDE: i64 = 80;

/// Square lattice of gates with low-sec columns and null-sec rows. Every
/// ninth column punches a high-sec gap through the null-sec rows.
static GRID: Lazy<GraphSnapshot> = Lazy::new(|| {
    let id = |x: i64, y: i64| -> SystemId { y * SIDE + x + 1 };
    let mut systems = HashMap::new();
    let mut adjacency: HashMap<SystemId, Vec<SystemId>> = HashMap::new();

    for y in 0..SIDE {
        for x in 0..SIDE {
            let security = if y % 7 == 3 && x % 9 != 0 {
                -0.3
            } else if x % 5 == 2 {
                0.3
            } else {
                0.8
            };
            systems.insert(
                id(x, y),
                System {
                    id: id(x, y),
                    name: format!("Grid-{x}-{y}"),
                    security,
                    constellation_id: (y / 10) * 100 + x / 10,
                    region_id: y / 20,
                },
            );
            let mut neighbours = Vec::new();
            if x > 0 {
                neighbours.push(id(x - 1, y));
            }
            if x + 1 < SIDE {
                neighbours.push(id(x + 1, y));
            }
            if y > 0 {
                neighbours.push(id(x, y - 1));
            }
            if y + 1 < SIDE {
                neighbours.push(id(x, y + 1));
            }
            adjacency.insert(id(x, y), neighbours);
        }
    }

    let config = GraphStoreConfig {
        min_nodes: 1,
        critical_systems: Vec::new(),
        ..GraphStoreConfig::default()
    };
    GraphSnapshot::from_parts(systems, adjacency, &config, 1)
});

static POLICY: Lazy<SecurityPolicy> = Lazy::new(SecurityPolicy::default);
static NO_RULES: Lazy<RuleSet> = Lazy::new(RuleSet::default);

fn benchmark_pathfinding(c: &mut Criterion) {
    let snapshot = &*GRID;
    let start = 1;
    let goal = SIDE * SIDE;

    for profile in [
        RouteProfile::Shortest,
        RouteProfile::Balanced,
        RouteProfile::Safest,
    ] {
        let ctx = SearchContext {
            snapshot,
            rules: &NO_RULES,
            policy: &POLICY,
            profile,
        };
        c.bench_function(&format!("dijkstra_grid_corner_to_corner_{profile}"), |b| {
            b.iter(|| {
                let outcome = find_route(&ctx, start, goal);
                black_box(outcome.map(|o| o.path.len()))
            });
        });
    }
}

criterion_group!(benches, benchmark_pathfinding);
criterion_main!(benches);
