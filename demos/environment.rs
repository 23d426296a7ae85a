//! Control subprocess environment variables.
//!
//! Run with: cargo run --example environment

use pipeshell::Command;

fn main() -> pipeshell::Result<()> {
    // Set a single environment variable
    let output = Command::new("sh")
        .args(["-c", "echo $GREETING"])
        .env("GREETING", "Hello from pipeshell!")
        .capture()?
        .stdout_str();

    println!("With custom env: {}", output.trim());

    // Set multiple environment variables
    let output = Command::new("sh")
        .args(["-c", "echo $FIRST $SECOND"])
        .env_extend([("FIRST", "Hello"), ("SECOND", "World")])
        .capture()?
        .stdout_str();

    println!("Multiple vars: {}", output.trim());

    // Don't inherit the parent's environment; set only specific variables.
    let output = Command::new("sh")
        .args(["-c", "env | wc -l"])
        .merge_env(false)
        .env("PATH", std::env::var("PATH").unwrap_or_default())
        .env("ONLY_VAR", "value")
        .capture()?
        .stdout_str();

    println!("Minimal env has {} variables", output.trim());

    // Remove a specific variable
    let output = Command::new("sh")
        .args(["-c", "echo ${HOME:-not set}"])
        .env_remove("HOME")
        .capture()?
        .stdout_str();

    println!("Without HOME: {}", output.trim());

    Ok(())
}
