use std::io::{IsTerminal, Write};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use volley_common::pipeline::{BatchProgress, ProgressEvent};

/// Consumes pipeline progress until the sending side is dropped, keeping a
/// one-line status on stderr when it is a terminal.
pub fn report(rx: Receiver<ProgressEvent>) {
    let started = Instant::now();
    let live = std::io::stderr().is_terminal();
    let mut stderr = std::io::stderr();

    for event in rx {
        match event {
            ProgressEvent::BatchFlushed(progress) => {
                if live {
                    let _ = write!(stderr, "\r{}", status_line(&progress, started.elapsed()));
                    let _ = stderr.flush();
                }
            }
            ProgressEvent::TailDropped { frames } => {
                log::debug!("{frames} trailing frames dropped");
            }
            ProgressEvent::Finished { frames_written } => {
                if live {
                    let _ = writeln!(stderr);
                }
                log::info!(
                    "{frames_written} frames in {:.1}s",
                    started.elapsed().as_secs_f64()
                );
            }
        }
    }
}

fn status_line(progress: &BatchProgress, elapsed: Duration) -> String {
    let percent = if progress.total_frames > 0 {
        progress.frames_written as f64 * 100.0 / progress.total_frames as f64
    } else {
        0.0
    };
    let fps = if elapsed.as_secs_f64() > 0.0 {
        progress.frames_written as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };
    format!(
        "batch {:>4} {:<8} {:>6}/{} frames ({percent:5.1}%) {fps:6.1} fps",
        progress.batch,
        progress.state.as_str(),
        progress.frames_written,
        progress.total_frames,
    )
}
