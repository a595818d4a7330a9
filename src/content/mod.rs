mod source;

#[cfg(test)]
pub mod mock;

pub use source::{ContentPayload, Source};
