
/// Per-read allele observation records and the associated readers
pub mod observations;
/// Variant representation and the evidence attached to each variant
pub mod variants;
