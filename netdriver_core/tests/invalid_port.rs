use netdriver_core::error::PortError;
use netdriver_core::{DriverError, DriverSettings, NetDriver, ServerExit, TCP_PORT_ENV};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[test]
fn out_of_range_override_stops_startup_before_the_server_runs() {
    let _ = env_logger::builder().is_test(true).try_init();

    // SAFETY: this binary runs a single test, nothing else reads the environment.
    unsafe { std::env::set_var(TCP_PORT_ENV, "70000") };

    let entered = Arc::new(AtomicBool::new(false));
    let server_entered = Arc::clone(&entered);
    let settings = DriverSettings {
        isolate: false,
        readiness_interval_ms: 10,
        ..DriverSettings::default()
    };

    let result = NetDriver::initialize_with(
        vec!["prog".to_string(), "--".to_string(), "--serve".to_string()],
        move |_argv: Vec<String>| {
            server_entered.store(true, Ordering::SeqCst);
            0
        },
        &settings,
        |exit: ServerExit| panic!("Server should never have run, but it {exit}"),
    );

    match result {
        Err(DriverError::InvalidPort { var, value, reason }) => {
            assert_eq!(var, TCP_PORT_ENV);
            assert_eq!(value, "70000");
            assert_eq!(reason, PortError::TooLarge(70000));
        }
        other => panic!("Expected InvalidPort, got {other:?}"),
    }
    assert!(!entered.load(Ordering::SeqCst));
}
