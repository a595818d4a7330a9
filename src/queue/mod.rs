mod entry;

pub use entry::{QueueEvent, RequestQueue};
