pub mod fileops;

pub use fileops::retry::{classify, Backoff, ErrorClass, RetryPolicy};
pub use fileops::{Cancelled, FileOps, OpOutcome, RetryingFileOps};
