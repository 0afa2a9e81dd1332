//! Basic circuit breaker and retry usage example

use resilience_machines::{BackoffStrategy, CancellationToken, CircuitBreaker, RetryExecutor};
use std::time::Duration;

fn main() {
    println!("=== Circuit Breaker Basic Example ===\n");

    // Create a circuit with builder API
    let circuit: CircuitBreaker<String, String> = CircuitBreaker::builder("payment_api")
        .failure_ratio(0.5)
        .minimum_throughput(4)
        .sampling_duration(Duration::from_secs(10))
        .break_duration(Duration::from_millis(500))
        .on_opened(|name, wait, _| println!("🔴 Circuit '{}' opened for {:?}!", name, wait))
        .on_closed(|name, _| println!("🟢 Circuit '{}' closed!", name))
        .on_half_open(|name| println!("🟡 Circuit '{}' half-open, testing...", name))
        .build()
        .expect("valid configuration");

    println!("Initial state: {}\n", circuit.state());

    // Simulate successful calls
    println!("--- Successful calls ---");
    for i in 1..=2 {
        match circuit.execute(|| Ok(format!("Payment {}", i))) {
            Ok(result) => println!("✓ {}", result),
            Err(e) => println!("✗ Error: {}", e),
        }
    }
    println!("State: {}\n", circuit.state());

    // Simulate failures
    println!("--- Triggering failures ---");
    for i in 1..=2 {
        match circuit.execute(|| Err(format!("Payment failed {}", i))) {
            Ok(_) => println!("✓ Success"),
            Err(e) => println!("✗ {}", e),
        }
    }
    let health = circuit.health();
    println!(
        "State: {} (throughput {}, failure rate {:.0}%)\n",
        circuit.state(),
        health.throughput,
        health.failure_rate * 100.0
    );

    // Try calling while open
    println!("--- Attempting call while open ---");
    match circuit.execute(|| Ok("Should be rejected".to_string())) {
        Ok(_) => println!("✓ Success"),
        Err(e) => println!("✗ {}", e),
    }
    println!();

    // Wait out the break; the next call is the trial
    println!("--- Trial call after break ---");
    std::thread::sleep(circuit.break_duration());
    match circuit.execute(|| Ok("Payment successful".to_string())) {
        Ok(result) => println!("✓ {}", result),
        Err(e) => println!("✗ {}", e),
    }
    println!("State: {}\n", circuit.state());

    // Manual isolation
    println!("--- Isolating circuit ---");
    circuit.isolate();
    if let Err(e) = circuit.execute(|| Ok("Should be rejected".to_string())) {
        println!("✗ {}", e);
    }
    circuit.reset();
    println!("State after reset: {}\n", circuit.state());

    println!("=== Retry Example ===\n");

    let retry = RetryExecutor::builder()
        .attempts(3)
        .backoff(BackoffStrategy::Exponential)
        .delay(Duration::from_millis(20))
        .max_delay(Duration::from_millis(200))
        .jitter(true)
        .token(CancellationToken::with_timeout(Duration::from_secs(2)))
        .on_retry(|attempt, err: &String| println!("↻ attempt {} failed: {}", attempt, err))
        .build();

    let mut calls = 0;
    let result = retry.retry_result(|| {
        calls += 1;
        if calls < 3 {
            Err(format!("inventory service timeout #{}", calls))
        } else {
            Ok("Inventory reserved")
        }
    });

    match result {
        Ok(value) => println!("✓ {} after {} calls", value, calls),
        Err(e) => println!("✗ gave up:\n{}", e),
    }
}
