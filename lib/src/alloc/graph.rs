//! Graph-coloring register allocation.
//!
//! Nodes are the virtual registers, edges are interval intersections. The
//! classic simplify loop peels off nodes of insignificant degree; when none
//! remains, the highest-degree node (ties broken towards the fewest use
//! positions) becomes a spill candidate. Popping the stack assigns colors,
//! demoting candidates that really cannot be colored.

use crate::cfg::Cfg;
use crate::errors::Error;
use crate::regs::{allocatable, Register, NUM_PHYSICAL};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub(crate) fn run(cfg: &mut Cfg) -> Result<(), Error> {
    let graph = build_interference_graph(cfg);
    validate_interference_graph(cfg, &graph)?;

    let mut degree: HashMap<u32, usize> =
        graph.iter().map(|(&n, edges)| (n, edges.len())).collect();
    let colors = allocatable().count();

    let mut remaining: BTreeSet<u32> = graph.keys().copied().collect();
    let mut stack: Vec<u32> = Vec::with_capacity(remaining.len());
    let mut spill_candidates: BTreeSet<u32> = BTreeSet::new();

    while !remaining.is_empty() {
        // Simplify: take the lowest-degree node while one of insignificant
        // degree exists.
        let simplifiable = remaining
            .iter()
            .copied()
            .min_by_key(|n| (degree[n], *n))
            .filter(|n| degree[n] < colors);

        let node = match simplifiable {
            Some(node) => node,
            None => {
                let node = choose_spill_candidate(cfg, &remaining, &degree);
                spill_candidates.insert(node);
                node
            }
        };

        remaining.remove(&node);
        stack.push(node);
        for neighbor in &graph[&node] {
            if let Some(d) = degree.get_mut(neighbor) {
                *d = d.saturating_sub(1);
            }
        }
    }

    let mut coloring: HashMap<u32, u8> = HashMap::new();
    let mut next_offset = super::SPILL_SLOT_STRIDE;
    while let Some(node) = stack.pop() {
        if spill_candidates.contains(&node) {
            super::spill(cfg, node, &mut next_offset);
            continue;
        }
        // Colors taken by already-colored neighbors that genuinely overlap.
        let taken: BTreeSet<u8> = graph[&node]
            .iter()
            .filter(|neighbor| {
                cfg.intervals[node as usize].intersects(&cfg.intervals[**neighbor as usize])
            })
            .filter_map(|neighbor| coloring.get(neighbor).copied())
            .collect();
        match allocatable().find(|c| !taken.contains(c)) {
            Some(color) => {
                coloring.insert(node, color);
                if let Some(vreg) = cfg.registers[node as usize]
                    .as_mut()
                    .and_then(|r| r.as_virtual_mut())
                {
                    vreg.preg = Some(color);
                }
                log::debug!("assigned r{} to v{}", color, node);
            }
            None => super::spill(cfg, node, &mut next_offset),
        }
    }

    Ok(())
}

// Edge (u, v) iff both are virtual and their intervals intersect.
fn build_interference_graph(cfg: &Cfg) -> BTreeMap<u32, BTreeSet<u32>> {
    let mut graph: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
    let virtuals: Vec<u32> = (NUM_PHYSICAL..cfg.registers.len())
        .filter(|&i| matches!(cfg.registers[i], Some(Register::Virtual(_))))
        .map(|i| i as u32)
        .collect();
    for &v in &virtuals {
        graph.insert(v, BTreeSet::new());
    }
    for (i, &u) in virtuals.iter().enumerate() {
        for &v in &virtuals[i + 1..] {
            if cfg.intervals[u as usize].intersects(&cfg.intervals[v as usize]) {
                graph.get_mut(&u).unwrap().insert(v);
                graph.get_mut(&v).unwrap().insert(u);
            }
        }
    }
    graph
}

// Every neighbor must itself be a node; anything else means the graph (or
// the interval table behind it) is inconsistent.
fn validate_interference_graph(
    cfg: &Cfg,
    graph: &BTreeMap<u32, BTreeSet<u32>>,
) -> Result<(), Error> {
    for (node, neighbors) in graph {
        for neighbor in neighbors {
            if !graph.contains_key(neighbor) {
                return Err(Error::allocation(
                    &cfg.name,
                    format!(
                        "interference graph names v{} (neighbor of v{}) but has no such node",
                        neighbor, node
                    ),
                ));
            }
        }
    }
    Ok(())
}

// Highest degree wins; ties fall to the node with the fewest use positions
// (cheapest to spill), then to the smallest id.
fn choose_spill_candidate(
    cfg: &Cfg,
    remaining: &BTreeSet<u32>,
    degree: &HashMap<u32, usize>,
) -> u32 {
    remaining
        .iter()
        .copied()
        .max_by_key(|n| {
            let weight = cfg.intervals[*n as usize].use_positions.len();
            (degree[n], std::cmp::Reverse(weight), std::cmp::Reverse(*n))
        })
        .expect("spill candidate requested from a non-empty set")
}
