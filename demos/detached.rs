//! Run detached (background) processes.
//!
//! Run with: cargo run --example detached

use std::io::{BufRead, BufReader};
use std::time::Duration;
use pipeshell::{Command, Redirection};

fn main() -> pipeshell::Result<()> {
    // Start a detached process - won't be waited on drop
    println!("Starting detached process...");
    let job = Command::new("sleep").arg("0.1").detached().start()?;

    println!("Process started with PID: {}", job.pid());
    println!("Dropping handle without waiting...");
    drop(job);
    println!("Handle dropped, process may still be running");

    // Start and explicitly wait
    println!("\nStarting another process...");
    let job = Command::new("sleep").arg("0.1").detached().start()?;

    println!("Waiting explicitly...");
    let status = job.wait()?;
    println!("Process finished: {:?}", status);

    // Detached with streaming - useful for long-running processes
    println!("\nStreaming from detached process:");
    let job = Command::new("sh")
        .args(["-c", "for i in 1 2 3; do echo $i; sleep 0.05; done"])
        .stdout(Redirection::Pipe)?
        .detached()
        .start()?;
    let stream = job.stdout.as_ref().expect("stdout was piped");

    for line in BufReader::new(stream).lines() {
        println!("  Got: {}", line.unwrap());
    }

    std::thread::sleep(Duration::from_millis(100));
    println!("Done!");

    Ok(())
}
