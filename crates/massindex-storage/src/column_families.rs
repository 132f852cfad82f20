//! Column family definitions for RocksDB.
//!
//! - records: authoritative records keyed by type and primary key
//! - checkpoints: per-partition checkpoint records
//! - partitions: persisted partition plans
//! - jobs: job execution state

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for records
pub const CF_RECORDS: &str = "records";

/// Column family name for partition checkpoints
pub const CF_CHECKPOINTS: &str = "checkpoints";

/// Column family name for partition plans
pub const CF_PARTITIONS: &str = "partitions";

/// Column family name for job executions
pub const CF_JOBS: &str = "jobs";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_RECORDS, CF_CHECKPOINTS, CF_PARTITIONS, CF_JOBS];

/// Records are large and read in key order
fn records_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_RECORDS, records_options()),
        ColumnFamilyDescriptor::new(CF_CHECKPOINTS, Options::default()),
        ColumnFamilyDescriptor::new(CF_PARTITIONS, Options::default()),
        ColumnFamilyDescriptor::new(CF_JOBS, Options::default()),
    ]
}
