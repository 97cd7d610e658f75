pub mod coordinator;
pub mod rewards;
pub mod sampler;
pub mod window;

pub use coordinator::*;
pub use rewards::*;
pub use sampler::*;
pub use window::*;
