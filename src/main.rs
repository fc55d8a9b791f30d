
use haplink::anchor::{AnchorResult, FrequencyTable, PhaseMethod, anchor_fragment};
use haplink::block_gen::{Block, assemble_blocks};
use haplink::cli::{Settings, check_settings, get_raw_settings};
use haplink::connectivity::{
    AlleleGraph, ConnectionTest, NoiseModel, OverlapMap,
    allele_network, apply_connection_tests, build_overlap_map, connection_candidates, test_variant_connection
};
use haplink::data_types::observations::{AlleleObservation, alignment_score_cutoff, load_observation_file};
use haplink::evidence::{EvidenceError, EvidenceSet, estimate_noise, select_dropped_variants};
use haplink::phaser::{BlockPhase, PhaseFragment, phase_block};
use haplink::writers::connection_writer::ConnectionWriter;
use haplink::writers::counts_writer::{AllelicCountsWriter, CountsWriter};
use haplink::writers::haplotype_writer::{HaplotypeWriter, PhaseAnnotationWriter};
use haplink::writers::network_writer::write_network;

use log::{LevelFilter, debug, error, info, warn};
use rustc_hash::FxHashSet as HashSet;
use std::sync::{Arc, mpsc};
use std::time::Instant;
use threadpool::ThreadPool;

fn main() {
    // get the settings
    let settings: Settings = get_raw_settings();
    let filter_level: LevelFilter = match settings.verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace
    };

    // immediately setup logging first
    env_logger::builder()
        .format_timestamp_millis()
        .filter_level(filter_level)
        .init();

    // okay, now we can check all the other settings
    let cli_settings: Settings = check_settings(settings);
    let phase_method: PhaseMethod = cli_settings.phase_method();
    let start_time: Instant = Instant::now();

    // load the frequency table up front if we have one
    let frequency_table: Option<FrequencyTable> = match cli_settings.frequency_table {
        Some(ref filename) => {
            match FrequencyTable::from_file(filename) {
                Ok(table) => {
                    info!("Loaded {} allele frequencies from {:?}", table.len(), filename);
                    Some(table)
                },
                Err(e) => {
                    error!("Error while loading frequency table: {}", e);
                    std::process::exit(exitcode::IOERR);
                }
            }
        },
        None => None
    };

    // #1: fold every observation source into the evidence set
    info!("Loading allele observations...");
    let mut evidence: EvidenceSet = EvidenceSet::new();
    let mut total_observations: u64 = 0;
    for filename in cli_settings.observation_filenames.iter() {
        let observations: Vec<AlleleObservation> = match load_observation_file(filename) {
            Ok(obs) => obs,
            Err(e) => {
                error!("Error while loading {:?}: {}", filename, e);
                std::process::exit(exitcode::IOERR);
            }
        };

        // the score cutoff is computed once per input source
        let score_cutoff: Option<f64> = if cli_settings.as_cutoff_quantile > 0.0 && !observations.is_empty() {
            match alignment_score_cutoff(&observations, cli_settings.as_cutoff_quantile) {
                Ok(cutoff) => {
                    info!("\t{:?}: using alignment score cutoff of {}", filename, cutoff);
                    Some(cutoff)
                },
                Err(e) => {
                    error!("Error while computing alignment score cutoff: {}", e);
                    std::process::exit(exitcode::DATAERR);
                }
            }
        } else {
            None
        };

        for observation in observations.iter() {
            if let Some(cutoff) = score_cutoff {
                if (observation.alignment_score as f64) < cutoff {
                    continue;
                }
            }
            if let Err(e) = evidence.add_observation(observation, &cli_settings.id_separator) {
                error!("Error while parsing observation from {:?}: {}", filename, e);
                std::process::exit(exitcode::DATAERR);
            }
            total_observations += 1;
        }
    }
    info!("Loaded {} observations covering {} heterozygous variants from {} reads",
        total_observations, evidence.num_variants(), evidence.num_reads());

    if evidence.num_variants() == 0 {
        error!("{}", EvidenceError::NoUsableVariants);
        std::process::exit(exitcode::DATAERR);
    }

    // #2: estimate the sequencing noise level
    let noise_rate: f64 = match estimate_noise(&evidence) {
        Ok(rate) => rate,
        Err(e) => {
            error!("Error while estimating noise: {}", e);
            std::process::exit(exitcode::DATAERR);
        }
    };
    info!("Sequencing noise level estimated at {:.6}", noise_rate);
    let noise_model: NoiseModel = NoiseModel {
        error_rate: noise_rate,
        linear_coef: cli_settings.conflict_linear_coef,
        quadratic_coef: cli_settings.conflict_quadratic_coef
    };

    // #3: build the per-chromosome connectivity graphs
    info!("Generating read connectivity map...");
    let chromosomes: Vec<String> = evidence.chromosomes();
    let mut overlap_map: OverlapMap = Default::default();
    for chrom in chromosomes.iter() {
        let chrom_map: OverlapMap = build_overlap_map(&evidence, chrom);
        debug!("\t{}: {} connected variants", chrom, chrom_map.len());
        overlap_map.extend(chrom_map);
    }
    evidence.clear_read_variants();

    // #4: test every connection against the noise model; the evidence is frozen into a
    // shared snapshot for the parallel section and taken back afterwards
    let candidates: Vec<(usize, usize)> = connection_candidates(&evidence, &overlap_map);
    info!("Testing {} variant connections versus noise...", candidates.len());
    let arc_evidence: Arc<EvidenceSet> = Arc::new(evidence);
    let connection_tests: Vec<ConnectionTest> = run_connection_tests(&cli_settings, &arc_evidence, &candidates, &noise_model);

    // every tested pair is reported, surviving or not
    let connections_filename = cli_settings.output_path(".variant_connections.tsv");
    let mut connection_writer: ConnectionWriter = match ConnectionWriter::new(&connections_filename) {
        Ok(writer) => writer,
        Err(e) => {
            error!("Error during connection writer creation: {}", e);
            std::process::exit(exitcode::IOERR);
        }
    };
    for test in connection_tests.iter() {
        if let Err(e) = connection_writer.write_connection(&arc_evidence, test) {
            error!("Error while writing connection record: {}", e);
            std::process::exit(exitcode::IOERR);
        }
    }
    if let Err(e) = connection_writer.flush() {
        error!("Error while writing connection record: {}", e);
        std::process::exit(exitcode::IOERR);
    }

    // per-variant allele coverage, for every variant with at least one matching read
    let mut allelic_counts_writer: AllelicCountsWriter = match AllelicCountsWriter::new(&cli_settings.output_path(".allelic_counts.tsv")) {
        Ok(writer) => writer,
        Err(e) => {
            error!("Error during allelic counts writer creation: {}", e);
            std::process::exit(exitcode::IOERR);
        }
    };
    let mut covered_variants: Vec<usize> = (0..arc_evidence.num_variants())
        .filter(|&v| arc_evidence.variant(v).matching_read_count() > 0)
        .collect();
    covered_variants.sort_by_key(|&v| {
        let variant = arc_evidence.variant(v);
        (variant.chrom().to_string(), variant.position(), v)
    });
    for &variant_index in covered_variants.iter() {
        if let Err(e) = allelic_counts_writer.write_variant(&arc_evidence, variant_index) {
            error!("Error while writing allelic counts: {}", e);
            std::process::exit(exitcode::IOERR);
        }
    }
    if let Err(e) = allelic_counts_writer.flush() {
        error!("Error while writing allelic counts: {}", e);
        std::process::exit(exitcode::IOERR);
    }
    info!("{} variants covered by at least 1 read", covered_variants.len());

    let mut allele_graph: AlleleGraph = Default::default();
    let dropped_connections: usize = apply_connection_tests(&mut overlap_map, &mut allele_graph, &connection_tests, cli_settings.cc_threshold);
    info!("{} variant connections dropped because of conflicting configurations (threshold = {})",
        dropped_connections, cli_settings.cc_threshold);

    // #5: assemble the surviving components into blocks
    info!("Identifying haplotype blocks...");
    let mut blocks: Vec<Block> = vec![];
    for chrom in chromosomes.iter() {
        let mut chrom_overlap: OverlapMap = Default::default();
        for (&variant_index, connected) in overlap_map.iter() {
            if arc_evidence.variant(variant_index).chrom() == chrom.as_str() {
                chrom_overlap.insert(variant_index, connected.clone());
            }
        }
        let chrom_blocks: Vec<Block> = assemble_blocks(&arc_evidence, chrom, &chrom_overlap, blocks.len());
        blocks.extend(chrom_blocks);
    }
    info!("Found {} candidate blocks across {} chromosomes", blocks.len(), chromosomes.len());

    // #6: resolve each block's two-haplotype configuration
    info!("Phasing blocks...");
    let arc_overlap: Arc<OverlapMap> = Arc::new(overlap_map);
    let arc_alleles: Arc<AlleleGraph> = Arc::new(allele_graph);
    let block_phases: Vec<BlockPhase> = run_block_phasing(&cli_settings, &arc_overlap, &arc_alleles, &blocks);

    // the parallel phase is over, take the evidence back for anchoring updates
    let mut evidence: EvidenceSet = match Arc::try_unwrap(arc_evidence) {
        Ok(e) => e,
        Err(_) => {
            error!("Internal error: evidence snapshot still shared after worker pool join");
            std::process::exit(exitcode::SOFTWARE);
        }
    };

    // figure out which variants leave working memory before output
    let connected_variants: HashSet<usize> = arc_overlap.keys().copied().collect();
    let dropped_variants: HashSet<usize> = select_dropped_variants(&evidence, &connected_variants, !cli_settings.no_unphased_output)
        .into_iter()
        .collect();
    debug!("removed {} variants from memory in cleanup", dropped_variants.len());

    // #7: anchor each fragment genome-wide and write all block-level outputs
    info!("Anchoring and outputting haplotypes...");
    let mut haplotype_writer: HaplotypeWriter = match HaplotypeWriter::new(&cli_settings.output_path(".haplotypes.tsv")) {
        Ok(writer) => writer,
        Err(e) => {
            error!("Error during haplotype writer creation: {}", e);
            std::process::exit(exitcode::IOERR);
        }
    };
    let mut annotation_writer: PhaseAnnotationWriter = match PhaseAnnotationWriter::new(
        &cli_settings.output_path(".phase_annotations.tsv"), cli_settings.gw_min_confidence
    ) {
        Ok(writer) => writer,
        Err(e) => {
            error!("Error during annotation writer creation: {}", e);
            std::process::exit(exitcode::IOERR);
        }
    };
    let mut counts_writer: CountsWriter = match CountsWriter::new(&cli_settings.output_path(".haplotypic_counts.tsv")) {
        Ok(writer) => writer,
        Err(e) => {
            error!("Error during counts writer creation: {}", e);
            std::process::exit(exitcode::IOERR);
        }
    };

    let mut phased_variants: HashSet<usize> = Default::default();
    let mut fragment_id: usize = 0;
    let mut network_fragment: Option<PhaseFragment> = None;
    let network_target: Option<usize> = cli_settings.network_variant.as_ref()
        .and_then(|id| evidence.variant_index(id));
    if cli_settings.network_variant.is_some() && network_target.is_none() {
        warn!("Network variant {:?} was never observed, skipping network output", cli_settings.network_variant.as_ref().unwrap());
    }

    for block_phase in block_phases.iter() {
        for fragment in block_phase.fragments.iter() {
            let anchor: AnchorResult = anchor_fragment(&mut evidence, fragment, phase_method, frequency_table.as_ref());
            phased_variants.extend(fragment.variants.iter());

            if let Err(e) = haplotype_writer.write_fragment(&evidence, &arc_alleles, fragment, &anchor) {
                error!("Error while writing haplotype fragment: {}", e);
                std::process::exit(exitcode::IOERR);
            }
            if let Err(e) = annotation_writer.write_fragment(&evidence, fragment, fragment_id) {
                error!("Error while writing phase annotations: {}", e);
                std::process::exit(exitcode::IOERR);
            }
            if let Err(e) = counts_writer.write_fragment(&evidence, fragment, &anchor) {
                error!("Error while writing haplotypic counts: {}", e);
                std::process::exit(exitcode::IOERR);
            }
            fragment_id += 1;

            if let Some(target) = network_target {
                if fragment.variants.contains(&target) {
                    network_fragment = Some(fragment.clone());
                }
            }
        }
    }

    // everything that never landed in a fragment is an unphased singleton
    if !cli_settings.no_unphased_output {
        let mut singletons: Vec<usize> = (0..evidence.num_variants())
            .filter(|v| !phased_variants.contains(v) && !dropped_variants.contains(v))
            .collect();
        singletons.sort_by_key(|&v| {
            let variant = evidence.variant(v);
            (variant.chrom().to_string(), variant.position(), v)
        });

        for &variant_index in singletons.iter() {
            if let Err(e) = haplotype_writer.write_singleton(&evidence, variant_index) {
                error!("Error while writing unphased singleton: {}", e);
                std::process::exit(exitcode::IOERR);
            }
            if let Err(e) = counts_writer.write_singleton(&evidence, variant_index) {
                error!("Error while writing unphased singleton: {}", e);
                std::process::exit(exitcode::IOERR);
            }
        }
    }

    for flush_result in [haplotype_writer.flush(), annotation_writer.flush(), counts_writer.flush()] {
        if let Err(e) = flush_result {
            error!("Error while finalizing output files: {}", e);
            std::process::exit(exitcode::IOERR);
        }
    }

    // optional allele network for one requested variant
    if let Some(target) = network_target {
        match network_fragment {
            Some(ref fragment) => {
                let junctions = allele_network(&evidence, &fragment.variants);
                if let Err(e) = write_network(
                    &cli_settings.output_path(".network.links.tsv"),
                    &cli_settings.output_path(".network.nodes.tsv"),
                    &evidence, &junctions, fragment
                ) {
                    error!("Error while writing network files: {}", e);
                    std::process::exit(exitcode::IOERR);
                }
                info!("Wrote allele network for {:?}", evidence.variant(target).unique_id());
            },
            None => {
                warn!("Network variant {:?} was not phased into any fragment, skipping network output",
                    evidence.variant(target).unique_id());
            }
        }
    }

    let total_rephased: usize = block_phases.iter().map(|bp| bp.rephase_rounds).sum();
    if total_rephased > 0 {
        warn!("{} re-phasing rounds were needed across all blocks", total_rephased);
    }

    info!("PHASED {} of {} variants with at least one other variant", phased_variants.len(), evidence.num_variants());
    info!("All blocks finished successfully after {:.3} seconds.", start_time.elapsed().as_secs_f64());
}

/// Runs the connection tests, fanning batches out to a worker pool when configured.
/// Results always come back in candidate order regardless of the thread count.
/// # Arguments
/// * `cli_settings` - the full program settings
/// * `arc_evidence` - the frozen evidence snapshot
/// * `candidates` - the sorted pair list to test
/// * `noise_model` - the noise model snapshot
fn run_connection_tests(
    cli_settings: &Settings,
    arc_evidence: &Arc<EvidenceSet>,
    candidates: &[(usize, usize)],
    noise_model: &NoiseModel
) -> Vec<ConnectionTest> {
    if cli_settings.threads <= 1 || candidates.len() <= 1 {
        return candidates.iter()
            .map(|&(a, b)| test_variant_connection(arc_evidence, a, b, noise_model))
            .collect();
    }

    // batches sized for the pool, but bounded so one worker never owns too much
    let batch_size: usize = candidates.len().div_ceil(cli_settings.threads)
        .clamp(1, cli_settings.max_batch_size);
    let batches: Vec<Vec<(usize, usize)>> = candidates.chunks(batch_size)
        .map(|chunk| chunk.to_vec())
        .collect();
    debug!("testing {} connections in {} batches", candidates.len(), batches.len());

    let pool = ThreadPool::new(cli_settings.threads);
    let (tx, rx) = mpsc::channel();
    let num_batches: usize = batches.len();
    for (batch_index, batch) in batches.into_iter().enumerate() {
        let tx = tx.clone();
        let arc_evidence = arc_evidence.clone();
        let model: NoiseModel = *noise_model;
        pool.execute(move || {
            let results: Vec<ConnectionTest> = batch.iter()
                .map(|&(a, b)| test_variant_connection(&arc_evidence, a, b, &model))
                .collect();
            tx.send((batch_index, results)).expect("channel will be there waiting for the pool");
        });
    }
    drop(tx);

    // reassemble by batch index so the merge is deterministic
    let mut batch_results: Vec<Option<Vec<ConnectionTest>>> = (0..num_batches).map(|_| None).collect();
    for (batch_index, results) in rx.iter() {
        batch_results[batch_index] = Some(results);
    }
    pool.join();
    if pool.panic_count() > 0 {
        error!("Panic detected in ThreadPool, check above for details.");
        std::process::exit(exitcode::SOFTWARE);
    }

    let mut connection_tests: Vec<ConnectionTest> = Vec::with_capacity(candidates.len());
    for batch_result in batch_results.into_iter() {
        match batch_result {
            Some(results) => connection_tests.extend(results),
            None => {
                // a worker died before sending its batch
                error!("A connection test worker failed to return results.");
                std::process::exit(exitcode::SOFTWARE);
            }
        }
    }
    connection_tests
}

/// Phases all blocks, one block per worker when a pool is configured.
/// Results always come back in block-index order regardless of the thread count.
/// # Arguments
/// * `cli_settings` - the full program settings
/// * `arc_overlap` - the pruned variant connectivity
/// * `arc_alleles` - the surviving allele connectivity
/// * `blocks` - the assembled blocks, in output order
fn run_block_phasing(
    cli_settings: &Settings,
    arc_overlap: &Arc<OverlapMap>,
    arc_alleles: &Arc<AlleleGraph>,
    blocks: &[Block]
) -> Vec<BlockPhase> {
    if cli_settings.threads <= 1 || blocks.len() <= 1 {
        let mut results: Vec<BlockPhase> = Vec::with_capacity(blocks.len());
        for block in blocks.iter() {
            debug!("Solving problem: {:?}", block);
            match phase_block(block.variants(), arc_overlap, arc_alleles, cli_settings.max_block_size) {
                Ok(phase) => results.push(phase),
                Err(e) => {
                    error!("Error while phasing {:?}:", block);
                    error!("  {}", e);
                    std::process::exit(exitcode::SOFTWARE);
                }
            }
        }
        return results;
    }

    let pool = ThreadPool::new(cli_settings.threads);
    let (tx, rx) = mpsc::channel();
    for block in blocks.iter() {
        let tx = tx.clone();
        let arc_overlap = arc_overlap.clone();
        let arc_alleles = arc_alleles.clone();
        let max_block_size: usize = cli_settings.max_block_size;
        let block = block.clone();
        pool.execute(move || {
            debug!("Solving problem: {:?}", block);
            let result = phase_block(block.variants(), &arc_overlap, &arc_alleles, max_block_size)
                .map(|phase| (block.get_block_index(), phase));
            tx.send(result).expect("channel will be there waiting for the pool");
        });
    }
    drop(tx);

    const UPDATE_SPEED: usize = 1000;
    let mut results_received: usize = 0;
    let mut block_results: Vec<Option<BlockPhase>> = (0..blocks.len()).map(|_| None).collect();
    for result in rx.iter() {
        match result {
            Ok((block_index, phase)) => {
                block_results[block_index] = Some(phase);
            },
            Err(e) => {
                error!("Error while phasing a block: {}", e);
                std::process::exit(exitcode::SOFTWARE);
            }
        }
        results_received += 1;
        if results_received % UPDATE_SPEED == 0 {
            info!("Received results for {} / {} blocks", results_received, blocks.len());
        }
    }
    pool.join();
    if pool.panic_count() > 0 {
        error!("Panic detected in ThreadPool, check above for details.");
        std::process::exit(exitcode::SOFTWARE);
    }

    let mut phases: Vec<BlockPhase> = Vec::with_capacity(blocks.len());
    for block_result in block_results.into_iter() {
        match block_result {
            Some(phase) => phases.push(phase),
            None => {
                // a worker died before sending its block
                error!("A phasing worker failed to return results.");
                std::process::exit(exitcode::SOFTWARE);
            }
        }
    }
    phases
}
