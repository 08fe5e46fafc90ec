mod utils;

use std::path::Path;

use test_log::test;
use trapline_debugger::{
    Error, LaunchOptions, Session, SessionState, Signal, StopReason, TRAP_OPCODE,
};
use trapline_symbol::VariableKind;

use self::utils::compile_debuggee;

fn launch(exe: &Path) -> Session {
    Session::launch(exe, Vec::<String>::new(), LaunchOptions::default()).expect("launch")
}

fn function_bounds(session: &Session, name: &str) -> (u64, u64) {
    let f = session
        .debug_info()
        .functions_named(name)
        .next()
        .expect(name);

    (f.low_pc, f.high_pc)
}

fn current_line(session: &Session) -> u64 {
    session.current_line().expect("line").line
}

fn frame_address(session: &Session) -> u64 {
    let regs = session.registers();

    session
        .debug_info()
        .compute_cfa(regs.instr_addr(), regs)
        .expect("cfa")
}

fn local_value(session: &Session, name: &str) -> Option<u32> {
    let locals = session.locals().expect("locals");
    let local = locals.iter().find(|l| l.name == name).expect(name);

    local.value.map(|v| v as u32)
}

/// Steps over lines until reaching the given one.
fn step_over_to_line(session: &mut Session, line: u64) {
    for _ in 0..8 {
        if current_line(session) == line {
            return;
        }

        assert_eq!(session.step_over().expect("step"), StopReason::Step);
    }

    panic!("line {line} not reached");
}

/// Runs the debuggee until it reaches `main`.
fn run_to_main(session: &mut Session) -> u64 {
    let (main, _) = function_bounds(session, "main");

    assert_eq!(session.last_stop(), StopReason::Launched);
    assert_eq!(
        session.continue_execution().expect("continue"),
        StopReason::Breakpoint(main)
    );
    assert_eq!(session.registers().instr_addr(), main);

    main
}

#[test]
fn step_over_call() {
    let exe = compile_debuggee("calls.c", false);
    let mut session = launch(&exe);

    let main = run_to_main(&mut session);
    let (f_start, f_end) = function_bounds(&session, "f");

    assert_eq!(session.step_over().expect("step"), StopReason::Step);
    assert_eq!(current_line(&session), 20);

    assert_eq!(session.step_over().expect("step"), StopReason::Step);
    assert_eq!(current_line(&session), 21);
    assert_eq!(session.state(), SessionState::Stopped);

    let ip = session.registers().instr_addr();
    assert!(!(f_start..f_end).contains(&ip));

    // temporary breakpoints are gone
    let enabled = session
        .breakpoints()
        .enabled()
        .map(|bk| bk.addr())
        .collect::<Vec<_>>();
    assert_eq!(enabled, [main]);
    assert_eq!(session.user_breakpoints().collect::<Vec<_>>(), [main]);
}

#[test]
fn step_into_call_and_out() {
    let exe = compile_debuggee("calls.c", false);
    let mut session = launch(&exe);

    run_to_main(&mut session);
    let (f_start, _) = function_bounds(&session, "f");

    session.step_over().expect("step");
    assert_eq!(current_line(&session), 20);

    assert_eq!(session.step_into().expect("step"), StopReason::Step);
    assert_eq!(session.registers().instr_addr(), f_start);
    assert_eq!(session.current_function().map(|f| f.name.as_str()), Some("f"));

    // run the body of `f`, then return into `main`
    for _ in 0..4 {
        session.step_into().expect("step");

        if session.current_function().is_some_and(|f| f.name == "main") {
            break;
        }
    }

    assert_eq!(session.current_function().map(|f| f.name.as_str()), Some("main"));
    assert_eq!(current_line(&session), 21);
    assert_eq!(session.breakpoints().enabled().count(), 1);
}

#[test]
fn step_over_lines_of_a_loop() {
    let exe = compile_debuggee("loop.c", false);
    let mut session = launch(&exe);

    run_to_main(&mut session);

    let mut lines = Vec::new();

    let stop = loop {
        match session.step_over().expect("step") {
            StopReason::Step => lines.push(current_line(&session)),
            stop => break stop,
        }

        assert!(lines.len() < 32, "stepping does not progress: {lines:?}");
    };

    assert_eq!(stop, StopReason::Exited(3));
    assert!(lines.iter().all(|l| (5..=8).contains(l)), "{lines:?}");
    assert_eq!(lines.iter().filter(|&&l| l == 6).count(), 3, "{lines:?}");
    assert!(lines.contains(&7));
    assert!(session.has_exited());
}

#[test]
fn single_step_over_breakpoint() {
    let exe = compile_debuggee("calls.c", false);
    let mut session = launch(&exe);

    let main = run_to_main(&mut session);

    assert_eq!(session.single_step().expect("step"), StopReason::Step);
    assert_ne!(session.registers().instr_addr(), main);
    assert_eq!(session.state(), SessionState::Stopped);

    // the breakpoint got re-armed, but stays hidden from memory reads
    assert!(session.breakpoints().find_enabled_at(main).is_some());
    assert_eq!(session.peek(main).expect("peek") & 0xff, u64::from(TRAP_OPCODE));
    assert_ne!(session.read_memory(main, 1).expect("read"), [TRAP_OPCODE]);

    let insns = session.disassemble(main, 2).expect("disassemble");
    assert_eq!(insns.len(), 2);
    assert_eq!(insns[0].address, main);
    assert_ne!(insns[0].mnemonic, "int3");
}

#[test]
fn breakpoint_on_unknown_function() {
    let exe = compile_debuggee("calls.c", false);
    let mut session = launch(&exe);

    assert!(session.break_at_function("nope").expect("break").is_empty());
    assert_eq!(session.breakpoints().enabled().count(), 1);
}

#[test]
fn breakpoint_on_line() {
    let exe = compile_debuggee("calls.c", false);
    let mut session = launch(&exe);

    let addr = session
        .break_at_line(Some(Path::new("calls.c")), 21)
        .expect("break")
        .expect("line 21 has code");

    assert_eq!(session.break_at_line(None, 2).expect("break"), None);

    run_to_main(&mut session);

    assert_eq!(
        session.continue_execution().expect("continue"),
        StopReason::Breakpoint(addr)
    );
    assert_eq!(current_line(&session), 21);

    session.delete_breakpoint(addr).expect("delete");
    assert!(matches!(
        session.delete_breakpoint(addr),
        Err(Error::UnknownBreakpoint(a)) if a == addr
    ));

    assert_eq!(
        session.continue_execution().expect("continue"),
        StopReason::Exited(0)
    );
}

#[test]
fn locals_of_function() {
    let exe = compile_debuggee("calls.c", false);
    let mut session = launch(&exe);

    let addrs = session.break_at_function("add").expect("break");
    assert_eq!(addrs.len(), 1);

    run_to_main(&mut session);

    assert_eq!(
        session.continue_execution().expect("continue"),
        StopReason::Breakpoint(addrs[0])
    );

    // past the prologue, then past the assignment of `sum`
    session.step_over().expect("step");
    assert_eq!(current_line(&session), 10);
    session.step_over().expect("step");

    let locals = session.locals().expect("locals");
    let value_of = |name: &str| {
        let local = locals.iter().find(|l| l.name == name).expect(name);
        assert!(local.address.is_some());
        local.value.map(|v| v as u32)
    };

    assert_eq!(value_of("a"), Some(2));
    assert_eq!(value_of("b"), Some(3));
    assert_eq!(value_of("sum"), Some(5));

    let parameters = locals
        .iter()
        .filter(|l| l.kind == VariableKind::Parameter)
        .count();
    assert_eq!(parameters, 2);
}

#[test]
fn snapshot_at_main() {
    let exe = compile_debuggee("calls.c", false);
    let mut session = launch(&exe);

    let main = run_to_main(&mut session);
    session.step_over().expect("step");

    let ip = session.registers().instr_addr();
    let snapshot = session.snapshot(8).expect("snapshot");

    assert_eq!(snapshot.function.as_deref(), Some("main"));
    assert_eq!(snapshot.breakpoints, [main]);
    assert_eq!(snapshot.breakpoint_lines.len(), 1);
    assert_eq!(snapshot.registers.instr_addr(), ip);
    assert!(snapshot.disassembly.len() <= 8);
    assert!(snapshot.disassembly.iter().any(|insn| insn.address == ip));

    let location = snapshot.location.expect("location");
    assert_eq!(location.line, 20);
    assert!(location.path.ends_with("calls.c"));
    assert_eq!(location.text.as_deref().map(str::trim), Some("f();"));
}

#[test]
fn exit_and_restart() {
    let exe = compile_debuggee("calls.c", false);
    let mut session = launch(&exe);

    let main = run_to_main(&mut session);

    assert_eq!(
        session.continue_execution().expect("continue"),
        StopReason::Exited(0)
    );
    assert_eq!(session.state(), SessionState::Exited);
    assert!(session.breakpoints().enabled().next().is_none());

    assert!(matches!(session.continue_execution(), Err(Error::DebuggeeExited)));
    assert!(matches!(session.step_over(), Err(Error::DebuggeeExited)));
    assert!(matches!(session.single_step(), Err(Error::DebuggeeExited)));
    assert!(matches!(session.break_at_address(main), Err(Error::DebuggeeExited)));

    session.restart().expect("restart");
    assert_eq!(session.state(), SessionState::Stopped);

    run_to_main(&mut session);
}

#[test]
fn fault_signal() {
    let exe = compile_debuggee("fault.c", false);
    let mut session = launch(&exe);

    run_to_main(&mut session);

    assert_eq!(
        session.continue_execution().expect("continue"),
        StopReason::Signal(Signal::SIGSEGV)
    );
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(current_line(&session), 4);

    // the signal is delivered on resumption
    assert_eq!(
        session.continue_execution().expect("continue"),
        StopReason::Killed(Signal::SIGSEGV)
    );
    assert!(session.has_exited());
}

#[test]
fn position_independent_executable() {
    let exe = compile_debuggee("calls.c", true);
    let mut session = launch(&exe);

    assert!(session.debug_info().is_pie());
    assert_ne!(session.debug_info().load_bias(), 0);

    let main = run_to_main(&mut session);

    session.step_over().expect("step");
    assert_eq!(current_line(&session), 20);

    // breakpoints follow the new load address
    session.restart().expect("restart");
    assert_eq!(session.user_breakpoints().collect::<Vec<_>>(), [main]);
    run_to_main(&mut session);
}

#[test]
fn write_registers() {
    let exe = compile_debuggee("calls.c", false);
    let mut session = launch(&exe);

    run_to_main(&mut session);

    let mut regs = *session.registers();
    assert!(regs.set("r11", 0xdead_beef));
    assert!(!regs.set("nope", 0));
    session.set_registers(regs).expect("set registers");

    session.single_step().expect("step");
    assert_eq!(session.registers().get("r11"), Some(0xdead_beef));
}

#[test]
fn missing_entry_symbol() {
    let exe = compile_debuggee("calls.c", false);

    let options = LaunchOptions {
        entry_symbol: Some("nope".to_owned()),
        ..LaunchOptions::default()
    };

    let res = Session::launch(&exe, Vec::<String>::new(), options);

    assert!(matches!(
        res,
        Err(Error::Symbol(trapline_symbol::Error::MissingEntryPoint(_)))
    ));
}

#[test]
fn step_over_recursive_call() {
    let exe = compile_debuggee("fact.c", false);
    let mut session = launch(&exe);

    let addrs = session.break_at_function("fact").expect("break");
    assert_eq!(addrs.len(), 1);

    run_to_main(&mut session);

    assert_eq!(
        session.continue_execution().expect("continue"),
        StopReason::Breakpoint(addrs[0])
    );

    // deeper calls must not stop on the user breakpoint
    session.delete_breakpoint(addrs[0]).expect("delete");

    step_over_to_line(&mut session, 6);

    let frame = frame_address(&session);
    assert_eq!(local_value(&session, "n"), Some(4));

    for _ in 0..2 {
        assert_eq!(session.step_over().expect("step"), StopReason::Step);

        assert_eq!(session.current_function().map(|f| f.name.as_str()), Some("fact"));
        assert_eq!(frame_address(&session), frame);
        assert_eq!(local_value(&session, "n"), Some(4));

        if current_line(&session) != 6 {
            break;
        }
    }

    assert_eq!(current_line(&session), 7);
    assert_eq!(session.breakpoints().enabled().count(), 1);

    assert_eq!(
        session.continue_execution().expect("continue"),
        StopReason::Exited(0)
    );
}

#[test]
fn step_through_function_pointer() {
    let exe = compile_debuggee("fptr.c", false);
    let mut session = launch(&exe);

    let addr = session
        .break_at_line(Some(Path::new("fptr.c")), 12)
        .expect("break")
        .expect("line 12 has code");

    run_to_main(&mut session);

    assert_eq!(
        session.continue_execution().expect("continue"),
        StopReason::Breakpoint(addr)
    );

    // the callee of an indirect call is unknown
    let err = session.step_into().expect_err("indirect call");
    assert!(matches!(err, Error::IndirectControlTransfer { .. }), "{err}");
    assert!(err.is_fatal());

    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.registers().instr_addr(), addr);
    assert_eq!(session.breakpoints().enabled().count(), 2);

    // stepping over it only needs its return address
    assert_eq!(session.step_over().expect("step"), StopReason::Step);
    assert_eq!(current_line(&session), 13);
    assert_eq!(session.current_function().map(|f| f.name.as_str()), Some("main"));

    assert_eq!(
        session.continue_execution().expect("continue"),
        StopReason::Exited(1)
    );
}

#[test]
fn step_into_call_without_debug_info() {
    let exe = compile_debuggee("libc.c", false);
    let mut session = launch(&exe);

    let (main_start, main_end) = function_bounds(&session, "main");

    run_to_main(&mut session);
    step_over_to_line(&mut session, 5);

    // `printf` is run to completion
    assert_eq!(session.step_into().expect("step"), StopReason::Step);

    let ip = session.registers().instr_addr();
    assert!((main_start..main_end).contains(&ip), "{ip:#x}");
    assert!(session.debug_info().unit_containing(ip).is_some());
    assert_eq!(session.breakpoints().enabled().count(), 1);

    if current_line(&session) == 5 {
        assert_eq!(session.step_into().expect("step"), StopReason::Step);
    }

    assert_eq!(current_line(&session), 6);

    assert_eq!(
        session.continue_execution().expect("continue"),
        StopReason::Exited(0)
    );
}
