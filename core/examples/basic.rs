//! Basic circuit breaker usage example
//!
//! Run with `RUST_LOG=fallback_breaker=debug` to see the state transitions.

use fallback_breaker::{CircuitBreaker, FnTask, ManualClock};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== Circuit Breaker Basic Example ===\n");

    let clock = Arc::new(ManualClock::new());
    let circuit = CircuitBreaker::builder("payment_api")
        .open_threshold(3)
        .cooldown_secs(5)
        .clock(clock.clone())
        .on_open(|name| println!("Circuit '{}' opened!", name))
        .on_probe(|name| println!("Circuit '{}' probing...", name))
        .on_close(|name| println!("Circuit '{}' closed!", name))
        .build();

    let charge = |healthy: bool, id: u32| {
        FnTask::new(
            move || {
                if healthy {
                    Ok(format!("Payment {} charged", id))
                } else {
                    Err(format!("Payment {} timed out", id))
                }
            },
            move || Ok::<_, String>(format!("Payment {} queued for retry", id)),
        )
    };

    println!("--- Successful calls ---");
    for i in 1..=2 {
        report(circuit.execute(charge(true, i)));
    }
    println!("State: {}, errors: {}\n", circuit.state_name(), circuit.error_count());

    println!("--- Triggering failures ---");
    for i in 3..=6 {
        report(circuit.execute(charge(false, i)));
    }
    println!("State: {}, errors: {}\n", circuit.state_name(), circuit.error_count());

    println!("--- Calling while open ---");
    report(circuit.execute(charge(true, 7)));
    println!();

    println!("--- After cooldown ---");
    clock.advance(Duration::from_secs(5));
    report(circuit.execute(charge(true, 8)));
    println!("State: {}, errors: {}", circuit.state_name(), circuit.error_count());
}

fn report(result: Result<String, fallback_breaker::CircuitError<String>>) {
    match result {
        Ok(message) => println!("  {}", message),
        Err(e) => println!("  error: {}", e),
    }
}
