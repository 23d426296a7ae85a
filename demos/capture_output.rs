//! Capture the output of a command.
//!
//! Run with: cargo run --example capture_output

use pipeshell::{Command, Redirection};

fn main() -> pipeshell::Result<()> {
    // Simple capture of stdout
    let output = Command::new("echo")
        .arg("Hello from pipeshell!")
        .stdout(Redirection::Pipe)?
        .capture()?;

    println!("Output: {}", output.stdout_str().trim());
    println!("Exit status: {:?}", output.exit_status);

    // Capture both stdout and stderr (merged)
    let output = Command::new("sh")
        .args(["-c", "echo stdout; echo stderr >&2"])
        .stdout(Redirection::Pipe)?
        .stderr(Redirection::Merge)?
        .capture()?;

    println!("\nMerged output: {}", output.stdout_str().trim());

    // Capture stdout and stderr separately
    let output = Command::new("sh")
        .args(["-c", "echo out; echo err >&2"])
        .stdout(Redirection::Pipe)?
        .stderr(Redirection::Pipe)?
        .capture()?;

    println!("\nSeparate streams:");
    println!("  stdout: {}", output.stdout_str().trim());
    println!("  stderr: {}", output.stderr_str().trim());

    Ok(())
}
