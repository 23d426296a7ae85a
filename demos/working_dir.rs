//! Set the working directory for a subprocess.
//!
//! Run with: cargo run --example working_dir

use pipeshell::Command;

fn main() -> pipeshell::Result<()> {
    // Run command in a specific directory
    let output = Command::new("pwd").cwd("/tmp").capture()?.stdout_str();

    println!("Working directory: {}", output.trim());

    // List files in a specific directory
    let output = Command::new("ls").cwd("/").capture()?.stdout_str();

    println!("\nFiles in root directory:");
    for file in output.lines().take(5) {
        println!("  {}", file);
    }
    println!("  ...");

    // Relative paths are resolved relative to cwd
    let output = Command::new("sh")
        .args(["-c", "ls .."])
        .cwd("/usr/bin")
        .capture()?
        .stdout_str();

    println!("\nParent of /usr/bin contains:");
    for file in output.lines().take(3) {
        println!("  {}", file);
    }

    Ok(())
}
