//! Handle various exit statuses.
//!
//! Run with: cargo run --example exit_status

use pipeshell::Command;

fn main() -> pipeshell::Result<()> {
    // Successful exit
    let status = Command::new("true").join()?;
    println!("true: {:?}, success={}", status, status.success());

    // Failed exit
    let status = Command::new("false").join()?;
    println!("false: {:?}, success={}", status, status.success());

    // Custom exit code
    let status = Command::new("sh").args(["-c", "exit 42"]).join()?;
    if let Some(code) = status.code() {
        println!("exit 42: code={}", code);
    } else if let Some(signal) = status.signal() {
        println!("exit 42: killed by signal {}", signal);
    } else {
        println!("exit 42: undetermined status");
    }

    // Check exit status from capture
    let result = Command::new("sh")
        .args(["-c", "echo output; exit 1"])
        .capture()?;
    println!(
        "\nCaptured output: {}, exit success: {}",
        result.stdout_str().trim(),
        result.success()
    );

    // Method-based status checks
    let status = Command::new("ls").arg("/nonexistent").join()?;
    if status.success() {
        println!("ls succeeded");
    } else if let Some(code) = status.code() {
        println!("ls failed with code {}", code);
    } else if let Some(signal) = status.signal() {
        println!("ls killed by signal {}", signal);
    } else {
        println!("ls: status unknown");
    }

    Ok(())
}
