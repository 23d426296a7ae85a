//! Demonstrate OS-level pipelines.
//!
//! Run with: cargo run --example pipeline

use pipeshell::Command;

fn shell(script: &str) -> Command {
    Command::new("sh").args(["-c", script])
}

fn main() -> pipeshell::Result<()> {
    // Simple pipeline: generate data, transform it, capture output
    let data = (Command::new("echo").args(["cherry", "apple", "banana"])
        | Command::new("tr").args([" ", "\n"])
        | Command::new("sort"))
    .capture()?
    .stdout_str();

    println!("Sorted fruits:\n{data}");

    // Pipeline with shell commands
    let result = (shell("echo 'hello world'")
        | shell("tr '[:lower:]' '[:upper:]'")
        | shell("rev"))
    .capture()?
    .stdout_str();

    println!("Transformed: {}", result.trim());

    // Build pipeline dynamically
    let commands = vec![
        shell("echo one two three"),
        shell("tr ' ' '\\n'"),
        Command::new("wc").arg("-l"),
    ];

    let line_count = commands
        .into_iter()
        .collect::<pipeshell::Pipeline>()
        .capture()?
        .stdout_str();

    println!("Line count: {}", line_count.trim());

    Ok(())
}
