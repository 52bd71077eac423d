#![allow(dead_code)]

pub mod mock_h2_server;
pub mod mock_server;
pub mod proxy;
pub mod tls;

/// Opt-in log output: `RUST_LOG=requests=debug cargo test`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
