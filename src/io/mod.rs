//! Object storage access and parquet dataset encoding.

mod store;
mod table_codec;

pub use store::{create_storage, encode_tagging, ObjectStorage, ObjectStoreStorage, S3Storage, StorageError, Tag};
pub use table_codec::{write_batch, Dataset, EnrichedDataset, TableCodec, METRIC_COLUMNS};

#[cfg(test)]
pub(crate) use table_codec::test_support;
