//! Records served to callers and the block descriptors that address them.

mod descriptor;
mod records;

pub use descriptor::{BlockDescriptor, DescriptorError};
pub use records::{normalize_hash, BlockRecord, ReceiptRecord, ResolvedBlock, TransactionRecord};
