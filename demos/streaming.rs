//! Stream subprocess output line by line.
//!
//! Run with: cargo run --example streaming

use std::io::{BufRead, BufReader, Write};
use pipeshell::{Command, Redirection};

fn main() -> pipeshell::Result<()> {
    // Stream stdout line by line
    println!("Reading output line by line:");
    let job = Command::new("sh")
        .args(["-c", "printf 'line 1\nline 2\nline 3\n'"])
        .stdout(Redirection::Pipe)?
        .start()?;
    let stdout = job.stdout.as_ref().expect("stdout was piped");

    for (i, line) in BufReader::new(stdout).lines().enumerate() {
        println!("  {}: {}", i + 1, line.unwrap());
    }
    job.wait()?;

    // Stream into stdin
    println!("\nWriting to subprocess stdin:");
    let mut job = Command::new("cat").stdin(Redirection::Pipe)?.start()?;
    let mut writer = job.stdin.take().expect("stdin was piped");

    writeln!(writer, "First line")?;
    writeln!(writer, "Second line")?;
    writer.flush()?;
    drop(writer); // Close stdin to signal EOF
    job.wait()?;

    // Read stderr separately
    println!("\nReading stderr:");
    let job = Command::new("sh")
        .args(["-c", "echo 'error message' >&2"])
        .stderr(Redirection::Pipe)?
        .start()?;
    let (_, stderr) = job.stderr.first().expect("stderr was piped");

    for line in BufReader::new(stderr).lines() {
        println!("  stderr: {}", line.unwrap());
    }
    job.wait()?;

    Ok(())
}
