//! Basic example: list files with line numbers.
//!
//! Run with: cargo run --example sample

use std::io::{BufRead, BufReader};
use pipeshell::{Command, Redirection};

fn main() -> pipeshell::Result<()> {
    let job = Command::new("ls").stdout(Redirection::Pipe)?.start()?;
    let reader = BufReader::new(job.stdout.as_ref().expect("stdout was piped"));

    for (i, line) in reader.lines().enumerate() {
        println!("{}: {}", i, line.unwrap());
    }

    Ok(())
}
