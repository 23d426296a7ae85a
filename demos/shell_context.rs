//! Build commands against a nested alias/environment/directory context.
//!
//! Run with: cargo run --example shell_context

use pipeshell::Shell;

fn main() -> pipeshell::Result<()> {
    let mut shell = Shell::new();

    // Aliases resolve argv[0] (and only argv[0]) before the command runs.
    shell.alias("ll", ["ls", "-la"]);
    let output = shell.command("ll").cwd("/tmp").capture()?.stdout_str();
    println!("ll /tmp:\n{}", output.lines().take(3).collect::<Vec<_>>().join("\n"));

    // Environment scopes nest; leaving the inner one restores the outer.
    {
        let mut outer = shell.enter_env([("GREETING", Some("outer"))]);
        let output = outer.command("sh").args(["-c", "echo $GREETING"]).capture()?.stdout_str();
        println!("\nouter scope: {}", output.trim());

        {
            let mut inner = outer.enter_env([("GREETING", Some("inner"))]);
            let output = inner.command("sh").args(["-c", "echo $GREETING"]).capture()?.stdout_str();
            println!("inner scope: {}", output.trim());
        } // inner scope pops here

        let output = outer.command("sh").args(["-c", "echo $GREETING"]).capture()?.stdout_str();
        println!("back to outer: {}", output.trim());
    } // outer scope pops here

    // Directory scopes stack and resolve relative paths lexically.
    {
        let mut at_tmp = shell.enter_dir("/tmp");
        let output = at_tmp.command("pwd").capture()?.stdout_str();
        println!("\nin /tmp: {}", output.trim());
    }

    // A null value in an env scope unsets an inherited variable for every
    // command built while the scope is active.
    {
        let mut scoped = shell.enter_env([("HOME", None::<&str>)]);
        let output = scoped
            .command("sh")
            .args(["-c", "echo ${HOME:-not set}"])
            .capture()?
            .stdout_str();
        println!("\nHOME unset in scope: {}", output.trim());
    }

    Ok(())
}
