
use clap::Parser;
use log::{error, info, warn};
use std::path::{Path, PathBuf};

use crate::anchor::PhaseMethod;

#[derive(Clone, Parser)]
#[clap(author, version, about)]
pub struct Settings {
    /// Input allele observation files, tab-separated with optional gzip (from the read mapper)
    #[clap(required = true)]
    #[clap(short = 'i')]
    #[clap(long = "observations")]
    #[clap(value_name = "TSV")]
    #[clap(help_heading = Some("Input/Output"))]
    pub observation_filenames: Vec<PathBuf>,

    /// Prefix for all output files
    #[clap(required = true)]
    #[clap(short = 'o')]
    #[clap(long = "output-prefix")]
    #[clap(value_name = "PREFIX")]
    #[clap(help_heading = Some("Input/Output"))]
    pub output_prefix: PathBuf,

    /// Population allele frequency table for MAF-weighted anchoring (tsv: chrom, pos, af)
    #[clap(long = "frequency-table")]
    #[clap(value_name = "TSV")]
    #[clap(help_heading = Some("Input/Output"))]
    pub frequency_table: Option<PathBuf>,

    /// Separator used inside composite variant ids; must not occur in chromosome names
    #[clap(long = "id-separator")]
    #[clap(value_name = "SEP")]
    #[clap(default_value = "_")]
    #[clap(help_heading = Some("Input/Output"))]
    pub id_separator: String,

    /// Write the allele connectivity network for the block containing this variant id
    #[clap(long = "network-variant")]
    #[clap(value_name = "VARIANT")]
    #[clap(help_heading = Some("Input/Output"))]
    pub network_variant: Option<String>,

    /// Suppress unphased singleton variants in the haplotype and count outputs
    #[clap(long = "no-unphased-output")]
    #[clap(help_heading = Some("Input/Output"))]
    pub no_unphased_output: bool,

    /// Bottom quantile of alignment scores to cut from each observation source
    #[clap(long = "as-cutoff-quantile")]
    #[clap(value_name = "QUANTILE")]
    #[clap(default_value = "0.05")]
    #[clap(help_heading = Some("Observation Filtering"))]
    pub as_cutoff_quantile: f64,

    /// Connections with a conflicting-configuration p-value below this threshold are removed
    #[clap(long = "cc-threshold")]
    #[clap(value_name = "PROB")]
    #[clap(default_value = "0.01")]
    #[clap(help_heading = Some("Connection Filtering"))]
    pub cc_threshold: f64,

    /// Linear coefficient of the conflicting-configuration error model
    #[clap(long = "conflict-linear-coef")]
    #[clap(value_name = "COEF")]
    #[clap(default_value = "6.0")]
    #[clap(help_heading = Some("Connection Filtering"))]
    #[clap(hide = true)]
    pub conflict_linear_coef: f64,

    /// Quadratic coefficient of the conflicting-configuration error model
    #[clap(long = "conflict-quadratic-coef")]
    #[clap(value_name = "COEF")]
    #[clap(default_value = "10.0")]
    #[clap(help_heading = Some("Connection Filtering"))]
    #[clap(hide = true)]
    pub conflict_quadratic_coef: f64,

    /// Maximum number of variants resolved at once; larger blocks are split at weak points (0 = unlimited)
    #[clap(long = "max-block-size")]
    #[clap(value_name = "SIZE")]
    #[clap(default_value = "15")]
    #[clap(help_heading = Some("Phasing"))]
    pub max_block_size: usize,

    /// Method for genome-wide phase anchoring: "majority" or "maf-weighted"
    #[clap(long = "gw-phase-method")]
    #[clap(value_name = "METHOD")]
    #[clap(default_value = "majority")]
    #[clap(help_heading = Some("Genome-Wide Phasing"))]
    pub gw_phase_method: String,

    /// Minimum anchoring confidence before the genome-wide phase overwrites the input phase
    #[clap(long = "gw-min-confidence")]
    #[clap(value_name = "CONF")]
    #[clap(default_value = "0.9")]
    #[clap(help_heading = Some("Genome-Wide Phasing"))]
    pub gw_min_confidence: f64,

    /// Number of threads to use for connection testing and block phasing
    #[clap(short = 't')]
    #[clap(long = "threads")]
    #[clap(value_name = "THREADS")]
    #[clap(default_value = "1")]
    #[clap(help_heading = Some("Performance"))]
    pub threads: usize,

    /// Maximum number of items assigned to one worker batch (0 = unlimited)
    #[clap(long = "max-batch-size")]
    #[clap(value_name = "ITEMS")]
    #[clap(default_value = "100000")]
    #[clap(help_heading = Some("Performance"))]
    pub max_batch_size: usize,

    /// Enable verbose output
    #[clap(short = 'v')]
    #[clap(long = "verbose")]
    #[clap(action = clap::ArgAction::Count)]
    pub verbosity: u8
}

/// Checks if a file exists and will otherwise exit
/// # Arguments
/// * `filename` - the file path to check for
/// * `label` - the label to use for error messages
fn check_required_filename(filename: &Path, label: &str) {
    if !filename.exists() {
        error!("{} does not exist: \"{}\"", label, filename.display());
        std::process::exit(exitcode::NOINPUT);
    } else {
        info!("{}: \"{}\"", label, filename.display());
    }
}

impl Settings {
    /// Resolves the anchoring method from the CLI string; exits on an unknown method
    pub fn phase_method(&self) -> PhaseMethod {
        match self.gw_phase_method.as_str() {
            "majority" => PhaseMethod::Majority,
            "maf-weighted" => PhaseMethod::MafWeighted,
            _ => {
                error!("Unknown --gw-phase-method {:?}, expected \"majority\" or \"maf-weighted\"", self.gw_phase_method);
                std::process::exit(exitcode::USAGE);
            }
        }
    }

    /// Builds an output path from the configured prefix and a suffix
    pub fn output_path(&self, suffix: &str) -> PathBuf {
        let mut os_path = self.output_prefix.clone().into_os_string();
        os_path.push(suffix);
        PathBuf::from(os_path)
    }
}

pub fn get_raw_settings() -> Settings {
    Settings::parse()
}

/// Do some additional checks here, we may increase these as we go.
/// Also can modify settings if needed since we're passing it around.
/// # Arguments
/// * `settings` - the raw settings, nothing has been checked other than what clap does for us.
pub fn check_settings(mut settings: Settings) -> Settings {
    //check for any of our required files
    for filename in settings.observation_filenames.iter() {
        check_required_filename(filename, "Observation file");
    }
    if let Some(ref filename) = settings.frequency_table {
        check_required_filename(filename, "Frequency table");
    }

    // a ":" separator would collide with allele-instance labels downstream
    if settings.id_separator.is_empty() || settings.id_separator == ":" {
        error!("--id-separator must not be \":\" or blank, choose a separator not found in the chromosome names");
        std::process::exit(exitcode::USAGE);
    }

    if !(0.0..=1.0).contains(&settings.cc_threshold) {
        error!("--cc-threshold must be in the range [0.0, 1.0]");
        std::process::exit(exitcode::USAGE);
    }
    if !(0.0..=1.0).contains(&settings.as_cutoff_quantile) {
        error!("--as-cutoff-quantile must be in the range [0.0, 1.0]");
        std::process::exit(exitcode::USAGE);
    }
    if !(0.5..=1.0).contains(&settings.gw_min_confidence) {
        error!("--gw-min-confidence must be in the range [0.5, 1.0]");
        std::process::exit(exitcode::USAGE);
    }

    // 0 is just a sentinel for unlimited
    if settings.max_block_size == 0 {
        settings.max_block_size = usize::MAX;
        warn!("--max-block-size 0 removes the exhaustive search bound, large conflicted blocks may be very slow");
    }
    if settings.max_batch_size == 0 {
        settings.max_batch_size = usize::MAX;
    }

    // 0 doesn't make sense, so lets just error proof it up to 1
    if settings.threads == 0 {
        settings.threads = 1;
    }

    // resolve the method once so typos die before any work happens
    let method: PhaseMethod = settings.phase_method();
    if method == PhaseMethod::MafWeighted && settings.frequency_table.is_none() {
        warn!("MAF-weighted anchoring without --frequency-table falls back to per-variant frequencies from the observations");
    }

    // dump stuff to the logger
    info!("Observation filtering:");
    info!("\tAlignment score cutoff quantile: {}", settings.as_cutoff_quantile);
    info!("\tID separator: {:?}", settings.id_separator);

    info!("Connection filtering:");
    info!("\tConflicting configuration threshold: {}", settings.cc_threshold);
    if settings.conflict_linear_coef != 6.0 || settings.conflict_quadratic_coef != 10.0 {
        warn!("\tNon-default error model coefficients: {}e + {}e^2", settings.conflict_linear_coef, settings.conflict_quadratic_coef);
    }

    info!("Phasing:");
    if settings.max_block_size == usize::MAX {
        info!("\tMaximum block size: DISABLED");
    } else {
        info!("\tMaximum block size: {}", settings.max_block_size);
    }
    info!("\tGenome-wide phase method: {:?}", method);
    info!("\tGenome-wide minimum confidence: {}", settings.gw_min_confidence);
    info!("\tUnphased singleton output: {}", if settings.no_unphased_output { "DISABLED" } else { "ENABLED" });

    info!("Processing threads: {}", settings.threads);
    if settings.max_batch_size != usize::MAX {
        info!("Maximum items per batch: {}", settings.max_batch_size);
    }

    //send the settings back
    settings
}
