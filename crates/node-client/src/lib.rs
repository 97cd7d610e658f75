pub mod head_feed;
pub mod http;
pub mod provider;

pub use head_feed::*;
pub use http::*;
pub use provider::*;
