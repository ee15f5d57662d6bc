pub mod batch;
pub mod config;
pub mod diff;
pub mod logging;
pub mod request;

pub use batch::BatchDir;
pub use config::Settings;
pub use request::{process_request, MergeRequest, MergeResponse};
