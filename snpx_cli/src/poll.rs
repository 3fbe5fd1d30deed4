/*!
Periodic position sampling.

Samples are written as one JSON object per line. The wait between two samples
listens on a stop channel so Ctrl+C ends the loop without waiting out the
interval.
*/

use anyhow::Result;
use chrono::Local;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::Serialize;
use snpx::{PositionKind, Session, Transport};
use std::io::Write;
use std::time::Duration;
use tracing::info;

/// One timestamped position snapshot
#[derive(Debug, Clone, Serialize)]
pub struct PositionSample {
    pub timestamp: String,
    pub kind: PositionKind,
    pub values: Vec<f32>,
}

/// Sample until `max_samples` is reached (0 = unbounded) or `stop` fires
///
/// Returns the number of samples written.
pub fn run_poll<T: Transport, W: Write>(
    session: &mut Session<T>,
    kind: PositionKind,
    interval: Duration,
    max_samples: u64,
    stop: &Receiver<()>,
    out: &mut W,
) -> Result<u64> {
    let mut samples = 0u64;
    info!("📈 Polling {:?} position every {:?}", kind, interval);

    loop {
        let values = match kind {
            PositionKind::Joint => session.joint_position().read()?,
            PositionKind::Cartesian => session.cartesian_position().read()?,
        };
        let sample = PositionSample {
            timestamp: Local::now().to_rfc3339(),
            kind,
            values,
        };
        serde_json::to_writer(&mut *out, &sample)?;
        writeln!(out)?;
        out.flush()?;

        samples += 1;
        if max_samples > 0 && samples >= max_samples {
            break;
        }

        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("✅ Polling finished after {} samples", samples);
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use snpx::{ClientConfig, SimulatedController};

    fn session() -> Session<SimulatedController> {
        Session::open(SimulatedController::with_demo_state(), ClientConfig::default()).unwrap()
    }

    #[test]
    fn test_poll_stops_at_count() {
        let mut session = session();
        let (_stop_tx, stop_rx) = bounded(1);
        let mut out = Vec::new();

        let n = run_poll(
            &mut session,
            PositionKind::Joint,
            Duration::from_millis(1),
            3,
            &stop_rx,
            &mut out,
        )
        .unwrap();
        assert_eq!(n, 3);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);

        let sample: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(sample["kind"], "joint");
        assert_eq!(sample["values"].as_array().unwrap().len(), 6);
        assert!(sample["timestamp"].is_string());
    }

    #[test]
    fn test_poll_stops_on_signal() {
        let mut session = session();
        let (stop_tx, stop_rx) = bounded(1);
        stop_tx.send(()).unwrap();
        let mut out = Vec::new();

        let n = run_poll(
            &mut session,
            PositionKind::Cartesian,
            Duration::from_secs(60),
            0,
            &stop_rx,
            &mut out,
        )
        .unwrap();
        assert_eq!(n, 1);
    }
}
