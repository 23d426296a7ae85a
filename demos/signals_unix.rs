//! Unix-specific: Send signals to processes.
//!
//! Run with: cargo run --example signals_unix

#[cfg(unix)]
fn main() -> pipeshell::Result<()> {
    use pipeshell::{Command, Pipeline, ProcessExt};

    // Start a long-running process
    let job = Command::new("sleep").arg("100").start()?;
    println!("Started sleep with PID {}", job.pid());

    // Send SIGTERM (graceful termination)
    job.processes[0].send_signal(libc::SIGTERM)?;
    println!("Sent SIGTERM");

    // Start another process in its own process group
    let job = Pipeline::new()
        .pipe(Command::new("sleep").arg("100"))
        .set_setpgid(true)
        .start()?;
    println!("\nStarted sleep in new process group, PID {}", job.pid());

    // Send signal to the entire process group
    job.processes[0].send_signal_group(libc::SIGKILL)?;
    println!("Sent SIGKILL to process group");

    // Demonstrate terminate vs kill
    let job = Command::new("sleep").arg("100").start()?;
    println!("\nStarted another sleep, PID {}", job.pid());

    // terminate() sends SIGTERM
    job.terminate()?;
    let status = job.wait()?;
    println!("After terminate: {:?}", status);

    let job = Command::new("sleep").arg("100").start()?;
    println!("\nStarted another sleep, PID {}", job.pid());

    // kill() sends SIGKILL
    job.kill()?;
    let status = job.wait()?;
    println!("After kill: {:?}", status);

    Ok(())
}

#[cfg(not(unix))]
fn main() {
    println!("This example only runs on Unix systems.");
}
