//! Family tree of an experiment, as consumed by the lineage dashboard.

use std::collections::HashSet;

use hf_types::{LedgerRow, MutationDetails, ParameterSet, RunId};
use serde::{Deserialize, Serialize};

use crate::ledger::dedup_latest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageNode {
    /// `"{run_id}_{generation}"`.
    pub id: String,
    pub run_id: RunId,
    pub label: String,
    #[serde(rename = "gen")]
    pub generation: u32,
    pub precision: f64,
    pub recall: f64,
    pub selection_metric: f64,
    pub fitness_score: f64,
    pub mutated: bool,
    pub mutation_details: MutationDetails,
    pub params: ParameterSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Parent,
}

/// Directed parent -> child edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageLink {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub kind: LinkKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineageGraph {
    pub nodes: Vec<LineageNode>,
    pub links: Vec<LineageLink>,
}

pub fn node_id(run_id: RunId, generation: u32) -> String {
    format!("{run_id}_{generation}")
}

impl LineageGraph {
    /// Builds the graph from raw ledger rows.
    ///
    /// Rows are deduplicated by `(run_id, generation)` first. An edge exists
    /// only when the parent row is present in the generation right before
    /// the child's.
    pub fn from_rows<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a LedgerRow>,
    {
        let rows = dedup_latest(rows.into_iter().cloned());
        let present: HashSet<(RunId, u32)> = rows.iter().map(LedgerRow::key).collect();

        let mut links = Vec::new();
        for child in &rows {
            if child.generation == 0 {
                continue;
            }
            let parent_gen = child.generation - 1;
            let mut parents: Vec<RunId> = Vec::with_capacity(2);
            for parent in [child.parent1_id, child.parent2_id].into_iter().flatten() {
                if !parents.contains(&parent) {
                    parents.push(parent);
                }
            }
            for parent in parents {
                if present.contains(&(parent, parent_gen)) {
                    links.push(LineageLink {
                        source: node_id(parent, parent_gen),
                        target: node_id(child.run_id, child.generation),
                        kind: LinkKind::Parent,
                    });
                }
            }
        }

        let nodes = rows
            .into_iter()
            .map(|row| LineageNode {
                id: node_id(row.run_id, row.generation),
                run_id: row.run_id,
                label: row.name,
                generation: row.generation,
                precision: row.result.precision,
                recall: row.result.recall,
                selection_metric: row.result.selection_metric,
                fitness_score: row.result.fitness_score,
                mutated: row.mutated,
                mutation_details: row.mutation_details,
                params: row.params,
            })
            .collect();

        Self { nodes, links }
    }

    /// Edges pointing at `id`.
    pub fn parents_of(&self, id: &str) -> Vec<&str> {
        self.links
            .iter()
            .filter(|l| l.target == id)
            .map(|l| l.source.as_str())
            .collect()
    }

    /// Distinct generations, ascending.
    pub fn generations(&self) -> Vec<u32> {
        let mut gens: Vec<u32> = self.nodes.iter().map(|n| n.generation).collect();
        gens.sort_unstable();
        gens.dedup();
        gens
    }
}
