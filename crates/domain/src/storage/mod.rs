//! Storage contracts implemented by `chain_watch_storage`.

mod traits;

pub use traits::*;
