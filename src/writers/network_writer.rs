
use serde::Serialize;
use std::fs::File;
use std::path::Path;

use crate::connectivity::AlleleJunction;
use crate::evidence::EvidenceSet;
use crate::phaser::PhaseFragment;

/// Contains all the data written to each row of the network links file
#[derive(Serialize)]
struct NetworkLinkRow {
    /// the first allele instance, `{variant_id}:{allele}`
    variant_a: String,
    /// the second allele instance
    variant_b: String,
    /// reads spanning this exact allele pair
    connections: u64,
    /// 0 for directly observed junctions, 1 for complementary inferred ones
    inferred: u8
}

/// Contains all the data written to each row of the network nodes file
#[derive(Serialize)]
struct NetworkNodeRow {
    /// the allele instance, `{variant_id}:{allele}`
    id: String,
    /// the variant's index within the fragment
    index: usize,
    /// "A" or "B" depending on which haplotype the allele was assigned to
    assigned_hap: String
}

/// Renders one allele instance as `{variant_id}:{allele}`
fn node_label(evidence: &EvidenceSet, variant_index: usize, allele: u8) -> String {
    let variant = evidence.variant(variant_index);
    format!("{}:{}", variant.unique_id(), variant.allele(allele))
}

/// Writes the allele connectivity network of one fragment: a links file with the junction
/// read counts and a nodes file assigning each allele instance to its haplotype.
/// Junctions without any spanning read are skipped.
/// # Arguments
/// * `links_filename` - the path for the links file
/// * `nodes_filename` - the path for the nodes file
/// * `evidence` - the evidence set
/// * `junctions` - the enumerated allele junctions for the fragment's variants
/// * `fragment` - the resolved fragment, for haplotype assignment
/// # Errors
/// * if either csv writer has any errors
pub fn write_network(
    links_filename: &Path,
    nodes_filename: &Path,
    evidence: &EvidenceSet,
    junctions: &[AlleleJunction],
    fragment: &PhaseFragment
) -> Result<(), Box<dyn std::error::Error>> {
    // modify the delimiter to "," if it ends with .csv
    let is_csv: bool = links_filename.extension().unwrap_or_default() == "csv";
    let delimiter: u8 = if is_csv { b',' } else { b'\t' };

    let mut links_writer: csv::Writer<File> = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(links_filename)?;

    // only junctions with read support make it into the network
    let mut seen_nodes: Vec<(usize, u8)> = vec![];
    for junction in junctions.iter().filter(|j| j.junction_reads > 0) {
        let row: NetworkLinkRow = NetworkLinkRow {
            variant_a: node_label(evidence, junction.node_a.0, junction.node_a.1),
            variant_b: node_label(evidence, junction.node_b.0, junction.node_b.1),
            connections: junction.junction_reads,
            inferred: junction.inferred
        };
        links_writer.serialize(&row)?;
        for node in [junction.node_a, junction.node_b] {
            if !seen_nodes.contains(&node) {
                seen_nodes.push(node);
            }
        }
    }
    links_writer.flush()?;

    let mut nodes_writer: csv::Writer<File> = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(nodes_filename)?;

    for &(variant_index, allele) in seen_nodes.iter() {
        let fragment_position: usize = match fragment.variants.iter().position(|&v| v == variant_index) {
            Some(p) => p,
            // junction endpoints outside the fragment carry no haplotype assignment
            None => continue
        };
        let assigned_hap: &str = if fragment.haplotype_1[fragment_position] == allele { "A" } else { "B" };
        let row: NetworkNodeRow = NetworkNodeRow {
            id: node_label(evidence, variant_index, allele),
            index: fragment_position,
            assigned_hap: assigned_hap.to_string()
        };
        nodes_writer.serialize(&row)?;
    }
    nodes_writer.flush()?;
    Ok(())
}
