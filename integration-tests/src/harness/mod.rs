pub mod tracing;
pub mod upstream;

pub use tracing::{CapturedEvent, events, init_test_tracing};
pub use upstream::TestUpstream;
