//! Bidirectional communication with a subprocess.
//!
//! Run with: cargo run --example communicate

use std::time::Duration;
use pipeshell::Command;

fn main() -> pipeshell::Result<()> {
    // Basic communicate: send input, receive output
    let mut communicator = Command::new("cat").stdin("Hello, cat!")?.communicate()?;
    let (stdout, _stderr) = communicator.read()?;
    println!("cat said: {}", String::from_utf8_lossy(&stdout));

    // Communicate with a time limit
    println!("\nCommunicating with timeout:");
    let mut communicator = Command::new("cat")
        .stdin("data with timeout")?
        .communicate()?
        .limit_time(Duration::from_secs(5));

    match communicator.read() {
        Ok((stdout, _)) => println!("Got: {}", String::from_utf8_lossy(&stdout)),
        Err(e) => println!("Error: {}", e),
    }

    // Time out against a process that never stops producing output.
    println!("\nTerminating a process that outruns its time budget:");
    let job = Command::new("yes").stdout(pipeshell::Redirection::Pipe)?.start()?;
    match job.wait_timeout(Duration::from_millis(50))? {
        Some(status) => println!("finished: {status:?}"),
        None => {
            println!("still running, terminating");
            job.terminate()?;
            job.wait()?;
        }
    }

    Ok(())
}
