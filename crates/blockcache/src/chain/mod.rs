//! Origin chain access: the source trait, the JSON-RPC client, and wire quantity parsing.

pub(crate) mod fetch;
mod origin;
mod quantity;

pub use fetch::{FetchConfig, RpcOrigin};
pub use origin::{OriginBlock, OriginError, OriginSource, OriginTransaction};
pub use quantity::{parse_quantity, parse_quantity_u128, QuantityError};
