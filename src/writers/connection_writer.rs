
use serde::Serialize;
use std::fs::File;
use std::path::Path;

use crate::connectivity::ConnectionTest;
use crate::evidence::EvidenceSet;

/// This is a wrapper for writing the tested variant connections to a file
pub struct ConnectionWriter {
    /// Handle for the CSV writer
    csv_writer: csv::Writer<File>
}

/// Contains all the data written to each row of our connections file
#[derive(Serialize)]
struct ConnectionRow {
    /// The composite id of the first variant
    variant_a: String,
    /// The composite id of the second variant
    variant_b: String,
    /// Reads supporting the winning configuration
    supporting_connections: u64,
    /// All co-observations of the pair
    total_connections: u64,
    /// The conflicting-configuration probability from the noise test
    conflicting_configuration_p: f64,
    /// "1"/"0" when both variants had input phase and a winner existed, "." otherwise
    phase_concordant: String
}

impl ConnectionWriter {
    /// Creates a new writer for a given filename
    /// # Arguments
    /// * `filename` - the path to write all connection records to
    pub fn new(filename: &Path) -> csv::Result<ConnectionWriter> {
        // modify the delimiter to "," if it ends with .csv
        let is_csv: bool = filename.extension().unwrap_or_default() == "csv";
        let delimiter: u8 = if is_csv { b',' } else { b'\t' };
        let csv_writer: csv::Writer<File> = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(filename)?;
        Ok(ConnectionWriter {
            csv_writer
        })
    }

    /// Writes one tested connection, whether or not the edge survived pruning.
    /// # Arguments
    /// * `evidence` - the evidence set, for id lookups
    /// * `test` - the connection test outcome
    /// # Errors
    /// * if the csv_writer has any errors
    pub fn write_connection(&mut self, evidence: &EvidenceSet, test: &ConnectionTest) -> Result<(), Box<dyn std::error::Error>> {
        let phase_concordant: String = match test.phase_concordant {
            Some(true) => "1".to_string(),
            Some(false) => "0".to_string(),
            None => ".".to_string()
        };
        let row: ConnectionRow = ConnectionRow {
            variant_a: evidence.variant(test.variant_a).unique_id().to_string(),
            variant_b: evidence.variant(test.variant_b).unique_id().to_string(),
            supporting_connections: test.supporting,
            total_connections: test.total,
            conflicting_configuration_p: test.conflicting_config_p,
            phase_concordant
        };
        self.csv_writer.serialize(&row)?;
        Ok(())
    }

    /// Flushes any buffered rows to disk
    pub fn flush(&mut self) -> csv::Result<()> {
        Ok(self.csv_writer.flush()?)
    }
}
