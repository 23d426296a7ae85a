//! Handle subprocess timeouts.
//!
//! Run with: cargo run --example timeout

use std::time::Duration;
use pipeshell::{Command, Redirection};

fn main() -> pipeshell::Result<()> {
    // Using wait_timeout on a process
    println!("Waiting with timeout...");

    let job = Command::new("sleep").arg("10").start()?;

    match job.wait_timeout(Duration::from_millis(100))? {
        Some(status) => println!("Process exited: {:?}", status),
        None => {
            println!("Timeout! Process still running, terminating...");
            job.terminate()?;
            job.wait()?;
            println!("Process terminated.");
        }
    }

    // Polling without blocking
    println!("\nPolling a quick command...");
    let job = Command::new("echo")
        .arg("quick")
        .stdout(Redirection::Pipe)?
        .start()?;

    // Poll until done
    loop {
        if let Some(status) = job.poll() {
            println!("Command finished with: {:?}", status);
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    Ok(())
}
