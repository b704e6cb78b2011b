pub mod synthetic_slits;

/// Opt-in logging for test debugging (`RUST_LOG=debug cargo test`).
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
