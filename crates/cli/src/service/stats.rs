//! Run statistics.

use std::time::Duration;

use dispatcher::DispatchSnapshot;

/// Statistics from a service run
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Configured endpoints
    pub endpoints: usize,

    /// Worker tasks started (after coercion)
    pub workers: usize,

    /// Total duration of the run
    pub duration: Duration,

    /// Dispatcher counters at shutdown
    pub dispatch: DispatchSnapshot,

    /// Whether every worker finished within the shutdown timeout
    pub drained: bool,
}

impl RunStats {
    /// Messages handled per second
    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.dispatch.handled as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Share of invocations that did not succeed, as percentage
    pub fn failure_rate(&self) -> f64 {
        let total = self.dispatch.invocations();
        if total > 0 {
            ((self.dispatch.failed + self.dispatch.panicked) as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    Consumer Statistics                       ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Endpoints: {}", self.endpoints);
        println!("   ├─ Workers: {}", self.workers);
        println!("   ├─ Throughput: {:.2} msg/s", self.throughput());
        println!(
            "   └─ Drained: {}",
            if self.drained { "yes" } else { "no (timed out)" }
        );

        println!("\n📈 Handlers");
        println!("   ├─ Handled: {}", self.dispatch.handled);
        println!(
            "   ├─ Failed: {} ({:.2}%)",
            self.dispatch.failed,
            self.failure_rate()
        );
        println!("   └─ Panicked: {}", self.dispatch.panicked);

        println!("\n⚠️  Consumer errors");
        println!("   ├─ Total: {}", self.dispatch.consume_errors);
        println!("   └─ Transport: {}", self.dispatch.transport_errors);

        println!();
    }
}
