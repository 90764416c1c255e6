/// Basic usage example: feed a synthetic wake-to-sleep session, print rows
use sleep_sensing::{Row, SleepEngine};

const LABELS: [&str; 4] = ["AF3/theta", "AF3/alpha", "AF3/betaL", "AF3/betaH"];

fn main() {
    println!("=== Sleep Sensing Engine: Basic Example ===\n");

    let mut engine = SleepEngine::default();
    engine.configure(&LABELS);

    // (start, end, band powers, acceleration magnitude)
    let phases = [
        (0.0, 60.0, [1.0, 2.0, 1.0, 1.0], 0.5),
        (60.0, 150.0, [3.0, 2.0, 1.5, 1.5], 0.12),
        (150.0, 300.0, [3.0, 2.0, 0.2, 0.2], 0.05),
    ];

    let mut row_count = 0;
    for (start, end, power, magnitude) in phases {
        let mut t: f64 = start;
        while t < end {
            // Power every 2 s, motion at 10 Hz
            if ((t - start) * 10.0).round() as u64 % 20 == 0 {
                engine.push_power(t, &power);
            }
            let mut motion = vec![0.0; 12];
            motion[9] = magnitude;
            engine.push_motion(t, &motion);

            if let Some(row) = engine.evaluate(t) {
                row_count += 1;
                print_row(&row);
            }
            t += 0.1;
        }
    }

    println!("\n=== Summary ===");
    println!("Rows emitted: {}", row_count);
    println!("Current stage: {:?}", engine.current_stage());
    match engine.confirmed_stage(300.0) {
        Some(c) => println!(
            "Confirmed: {} ({:.2} posterior, {} micro-epochs)",
            c.stage, c.posterior_confidence, c.observations
        ),
        None => println!("Confirmed: none"),
    }
}

fn print_row(row: &Row) {
    let stage = row.stage.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
    let raw = row.raw_stage.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
    println!(
        "t={:>6.1}s  stage={:<10} raw={:<10} conf={:.2}  θ/α={:.2} motion={:.2}",
        row.t, stage, raw, row.confidence, row.features.theta_alpha_ratio, row.features.motion_rms
    );
}
