
use flate2::bufread::MultiGzDecoder;
use serde::Deserialize;
use simple_error::bail;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// One record from the upstream read-to-variant mapping collaborator.
/// Each record ties a single read to a single variant along with the allele the read displayed.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AlleleObservation {
    /// The read name
    pub read_id: String,
    /// The composite variant id, `{chrom}{sep}{pos}{sep}{allele}...`
    pub variant_id: String,
    /// External variant id, "." when absent
    pub rsid: String,
    /// The allele sequence observed on the read at the variant site
    pub observed_allele: String,
    /// The aligner-reported alignment score of the read
    pub alignment_score: i64,
    /// The individual's genotype string for the variant, e.g. "0|1"
    pub genotype: String,
    /// Minor allele frequency column; may be "None" when the upstream tool had no frequency
    maf: String
}

impl AlleleObservation {
    /// Returns the minor allele frequency, if the record carries a parsable one
    pub fn maf(&self) -> Option<f64> {
        self.maf.parse().ok()
    }
}

/// Loads all observation records from a single tab-separated source file.
/// Files ending in ".gz" are decompressed on the fly.
/// # Arguments
/// * `filename` - the observation file to load
/// # Errors
/// * if the file cannot be opened
/// * if any record fails to parse into the expected seven columns
pub fn load_observation_file(filename: &Path) -> Result<Vec<AlleleObservation>, Box<dyn std::error::Error>> {
    let file: File = File::open(filename)?;
    let buf_reader = BufReader::new(file);
    let boxed_reader: Box<dyn Read> = if filename.extension().unwrap_or_default() == "gz" {
        Box::new(MultiGzDecoder::new(buf_reader))
    } else {
        Box::new(buf_reader)
    };
    read_observations(boxed_reader)
}

/// Parses observation records from any readable source; see `load_observation_file(...)`.
pub fn read_observations<R: Read>(reader: R) -> Result<Vec<AlleleObservation>, Box<dyn std::error::Error>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_reader(reader);

    let mut observations: Vec<AlleleObservation> = vec![];
    for record in csv_reader.deserialize() {
        let observation: AlleleObservation = record?;
        observations.push(observation);
    }
    Ok(observations)
}

/// Computes the alignment-score cutoff for one input source: the score at the given
/// bottom quantile of the source's score distribution (linear interpolation between ranks).
/// Observations scoring below the returned value should be ignored.
/// # Arguments
/// * `observations` - all observations from one source
/// * `quantile` - the bottom quantile to cut, in [0, 1]
/// # Errors
/// * if the observation list is empty
/// * if the quantile is outside [0, 1]
pub fn alignment_score_cutoff(observations: &[AlleleObservation], quantile: f64) -> Result<f64, Box<dyn std::error::Error>> {
    if observations.is_empty() {
        bail!("cannot compute an alignment score cutoff without observations");
    }
    if !(0.0..=1.0).contains(&quantile) {
        bail!("alignment score quantile must be in [0, 1], got {}", quantile);
    }

    let mut scores: Vec<i64> = observations.iter()
        .map(|obs| obs.alignment_score)
        .collect();
    scores.sort_unstable();

    // linear interpolation between the two nearest ranks
    let rank: f64 = quantile * (scores.len() - 1) as f64;
    let lower: usize = rank.floor() as usize;
    let fraction: f64 = rank - lower as f64;
    let cutoff: f64 = if lower + 1 < scores.len() {
        scores[lower] as f64 + fraction * (scores[lower + 1] - scores[lower]) as f64
    } else {
        scores[lower] as f64
    };
    Ok(cutoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn example_tsv() -> &'static str {
        "read1\tchr1_100_A_C\trs1\tA\t60\t0|1\t0.25\n\
         read2\tchr1_100_A_C\trs1\tC\t55\t0|1\t0.25\n\
         read2\tchr1_200_G_T\trs2\tG\t55\t0/1\tNone\n"
    }

    #[test]
    fn test_read_observations() {
        let observations = read_observations(Cursor::new(example_tsv())).unwrap();
        assert_eq!(observations.len(), 3);
        assert_eq!(observations[0].read_id, "read1");
        assert_eq!(observations[0].variant_id, "chr1_100_A_C");
        assert_eq!(observations[0].observed_allele, "A");
        assert_eq!(observations[0].alignment_score, 60);
        assert_eq!(observations[0].maf(), Some(0.25));
        assert_eq!(observations[2].genotype, "0/1");
        assert_eq!(observations[2].maf(), None);
    }

    #[test]
    fn test_malformed_observations() {
        let result = read_observations(Cursor::new("read1\tchr1_100_A_C\trs1\tA\n"));
        assert!(result.is_err());
    }

    #[test]
    fn test_alignment_score_cutoff() {
        let mut observations = read_observations(Cursor::new(example_tsv())).unwrap();
        // scores are [55, 55, 60]; the 0-quantile is the minimum
        assert_eq!(alignment_score_cutoff(&observations, 0.0).unwrap(), 55.0);
        assert_eq!(alignment_score_cutoff(&observations, 1.0).unwrap(), 60.0);
        // midpoint interpolates between ranks 1 and 2
        assert_eq!(alignment_score_cutoff(&observations, 0.5).unwrap(), 55.0);

        observations.truncate(1);
        assert_eq!(alignment_score_cutoff(&observations, 0.5).unwrap(), 60.0);
        assert!(alignment_score_cutoff(&[], 0.5).is_err());
        assert!(alignment_score_cutoff(&observations, 1.5).is_err());
    }
}
