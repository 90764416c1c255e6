/// Actor example: two producer threads feed one engine, the main thread consumes
use std::thread;
use std::time::Duration;

use sleep_sensing::actor::{self, ActorConfig, EngineOutput};
use sleep_sensing::{Sample, SamplePayload, SleepEngine};

fn main() {
    let actor = actor::spawn(SleepEngine::default(), ActorConfig::default())
        .expect("spawn engine thread");
    actor
        .handle
        .configure(&["AF3/theta", "AF3/alpha", "AF3/betaL", "AF3/betaH"])
        .expect("engine running");

    // Headset producer: power every 2 s, motion at 10 Hz
    let headset = actor.handle.clone();
    let headset_thread = thread::spawn(move || {
        for k in 0..1200 {
            let t = k as f64 * 0.1;
            if k % 20 == 0 {
                let power = Sample::new(t, SamplePayload::Power { values: vec![3.0, 2.0, 1.5, 1.5] });
                headset.push(power).expect("engine running");
            }
            let mut values = vec![0.0; 12];
            values[9] = 0.12;
            headset.push(Sample::new(t, SamplePayload::Motion { values })).expect("engine running");
            headset.evaluate(t).expect("engine running");
        }
    });

    // EOG producer at 200 Hz for the first minute
    let eog = actor.handle.clone();
    let eog_thread = thread::spawn(move || {
        for i in 0..12_000 {
            let t = i as f64 / 200.0;
            let value = if i % 300 < 8 { 10.0 } else { 0.0 };
            let sample = Sample::new(t, SamplePayload::Eog { value, source_rate_hz: Some(200.0) });
            eog.push(sample).expect("engine running");
        }
    });

    headset_thread.join().expect("headset producer");
    eog_thread.join().expect("eog producer");
    actor.handle.shutdown().expect("engine running");

    while let Ok(output) = actor.outputs.recv_timeout(Duration::from_millis(200)) {
        match output {
            EngineOutput::Row(row) => println!(
                "row       t={:>6.1}s stage={:?} conf={:.2} eog={}",
                row.t, row.stage, row.confidence, row.features.eog_available
            ),
            EngineOutput::Confirmed(c) => println!(
                "confirmed t={:>6.1}s stage={} posterior={:.2}",
                c.t_center, c.stage, c.posterior_confidence
            ),
        }
    }

    let engine = actor.join().expect("engine thread");
    println!("\nHistory: {} rows", engine.history().len());
}
