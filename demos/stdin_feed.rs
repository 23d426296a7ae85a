//! Feed data to a subprocess via stdin.
//!
//! Run with: cargo run --example stdin_feed

use pipeshell::Command;

fn main() -> pipeshell::Result<()> {
    // Feed string data to sort command
    let input = "banana\napple\ncherry\ndate\n";
    let sorted = Command::new("sort").stdin(input)?.capture()?.stdout_str();

    println!("Sorted input:\n{sorted}");

    // Feed binary data
    let numbers: Vec<u8> = vec![3, 1, 4, 1, 5, 9, 2, 6];
    let hex_output = Command::new("xxd").stdin(numbers)?.capture()?.stdout_str();

    println!("Hex dump:\n{hex_output}");

    // Pipeline with stdin data
    let result = (Command::new("cat") | Command::new("rev"))
        .stdin("hello\nworld\n")?
        .capture()?
        .stdout_str();

    println!("Reversed lines:\n{result}");

    Ok(())
}
