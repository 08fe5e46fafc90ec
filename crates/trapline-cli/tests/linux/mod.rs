mod utils;

use test_log::test;

use self::utils::compile_debuggee;

fn run_script(exe: &std::path::Path, config: Option<&str>, script: &str) -> (i32, String) {
    let mut output = Vec::new();

    let exit_code = trapline_cli::evaluate_run(
        config.map(str::to_owned),
        exe.to_path_buf(),
        vec![],
        script.as_bytes(),
        &mut output,
    )
    .expect("run");

    let output = String::from_utf8(output).expect("utf-8");
    println!("{output}");

    (exit_code, output)
}

#[test]
fn step_and_inspect() {
    let exe = compile_debuggee("calls.c");

    let (exit_code, output) = run_script(
        &exe,
        None,
        indoc::indoc! {"
            continue
            break add
            continue
            next
            locals
            list
            bl
            frobnicate
            continue
        "},
    );

    assert_eq!(exit_code, 0);
    assert!(output.contains("in main at"));
    assert!(output.contains("breakpoint at"));
    assert!(output.contains(" in add at "));
    assert!(output.contains("param a @ "));
    assert!(output.contains("local sum @ "));
    assert!(output.contains("=>    10      int sum = a + b;"));
    assert!(output.contains("unknown command `frobnicate`"));
    assert!(output.contains("process exited with code 0"));
}

#[test]
fn config_breakpoints() {
    let exe = compile_debuggee("calls.c");

    let (_, output) = run_script(
        &exe,
        Some(indoc::indoc! {r#"
            break-at-entry false
            break "f"
            disasm-window 2
        "#}),
        "continue\nquit\n",
    );

    assert!(output.contains(" in f at "));
    assert!(!output.contains("in main at"));
}

#[test]
fn exit_code_and_restart() {
    let exe = compile_debuggee("exit.c");

    let (exit_code, output) = run_script(&exe, None, "c\nc\nc\nrestart\nc\n");

    assert_eq!(exit_code, 7);
    assert_eq!(output.matches("process exited with code 7").count(), 1);
    assert!(output.contains("error: the debuggee has exited"));
    assert!(output.contains("restarted (pid "));
}

#[test]
fn info_dump() {
    let exe = compile_debuggee("calls.c");

    let mut output = Vec::new();
    trapline_cli::evaluate_info(&exe, &mut output).expect("info");

    let output = String::from_utf8(output).expect("utf-8");

    assert!(output.contains("(no-pie)"));
    assert!(output.contains(" main\n"));
    assert!(output.contains("    param b @ cfa"));
    assert!(output.contains("calls.c:20\n"));
}
