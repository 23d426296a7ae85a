use pipeshell::Command;

#[test]
fn escape_args() {
    // This is mostly relevant for Windows: test whether the command-line
    // assembly does a good job with arguments that require escaping.
    // `printf "%s"` prints its argument back verbatim, with no shell in
    // between to reinterpret it.
    for &arg in &[
        "x", "", " ", "  ", r" \ ", r" \\ ", r" \\\ ", r#"""#, r#""""#, r#"\"\\""#, "æ÷", "šđ",
        "本", "❤", "☃",
    ] {
        let capture = Command::new("printf").arg("%s").arg(arg).capture().unwrap();
        assert_eq!(capture.stdout_str(), arg);
    }
}
