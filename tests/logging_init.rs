//! Runs in its own test binary because `init` installs the process-global tracing
//! subscriber, which conflicts with `#[traced_test]` in the library unit tests.

use rust_forge::logging::{init, OutputFormat, TracingConfig};
use tracing::Level;

#[test]
fn test_init_is_idempotent() {
    let config = TracingConfig::new(Level::ERROR).with_format(OutputFormat::Compact);
    assert!(init(config.clone()).is_ok());
    assert!(init(config).is_ok());
}
