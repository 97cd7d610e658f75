mod builder;
mod handle;

pub use builder::{RuntimeBuilder, resolve_chain_key};
pub use handle::{NexusRuntime, ShutdownHook};
