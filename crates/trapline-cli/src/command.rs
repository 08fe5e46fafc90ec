use std::path::PathBuf;

/// Error while parsing an operator command.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command name.
    #[error("unknown command `{0}` (try `help`)")]
    Unknown(String),

    /// A required argument is absent.
    #[error("missing {0}")]
    MissingArgument(&'static str),

    /// Malformed address.
    #[error("invalid address `{0}`")]
    InvalidAddress(String),

    /// Malformed line number or length.
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
}

/// Where to set a breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakLocation {
    /// Absolute address.
    Address(u64),

    /// Entry of every function with this name.
    Function(String),

    /// First instruction of a source line, optionally in a given file.
    Line(Option<PathBuf>, u64),
}

impl BreakLocation {
    /// Parses an address (decimal or `0x`-prefixed hexadecimal), a
    /// `[file]:line` location, or a function name.
    pub fn parse(s: &str) -> Result<Self, CommandError> {
        if let Some(addr) = parse_address(s) {
            return Ok(Self::Address(addr));
        }

        if let Some((file, line)) = s.rsplit_once(':') {
            let line = line
                .parse()
                .map_err(|_| CommandError::InvalidNumber(line.to_owned()))?;

            let file = (!file.is_empty()).then(|| PathBuf::from(file));

            return Ok(Self::Line(file, line));
        }

        if s.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(CommandError::InvalidAddress(s.to_owned()));
        }

        Ok(Self::Function(s.to_owned()))
    }
}

/// Command entered by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Sets a breakpoint.
    Break(BreakLocation),

    /// Deletes the breakpoint at an address.
    Delete(u64),

    /// Lists the breakpoints.
    Breakpoints,

    /// Resumes the debuggee.
    Continue,

    /// Executes one instruction.
    StepInstruction,

    /// Executes one source line, entering calls.
    StepInto,

    /// Executes one source line, over calls.
    StepOver,

    /// Shows the registers.
    Registers,

    /// Writes a register.
    SetRegister(String, u64),

    /// Shows the parameters and local variables.
    Locals,

    /// Disassembles at an address, or at the instruction pointer.
    Disassemble(Option<u64>),

    /// Shows the source around the current line.
    List,

    /// Dumps a number of bytes of memory.
    Memory(u64, usize),

    /// Relaunches the program.
    Restart,

    /// Shows the command summary.
    Help,

    /// Kills the debuggee and exits.
    Quit,
}

impl Command {
    /// Parses a line entered by the operator.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut words = line.split_whitespace();

        let Some(name) = words.next() else {
            return Err(CommandError::MissingArgument("command"));
        };

        let cmd = match name {
            "b" | "break" => {
                let location = words.next().ok_or(CommandError::MissingArgument("location"))?;
                Self::Break(BreakLocation::parse(location)?)
            }
            "d" | "delete" => Self::Delete(address_arg(words.next())?),
            "bl" | "breakpoints" => Self::Breakpoints,
            "c" | "continue" => Self::Continue,
            "si" | "stepi" => Self::StepInstruction,
            "s" | "step" => Self::StepInto,
            "n" | "next" => Self::StepOver,
            "r" | "regs" => match words.next() {
                None => Self::Registers,
                Some(reg) => Self::SetRegister(reg.to_owned(), address_arg(words.next())?),
            },
            "l" | "locals" => Self::Locals,
            "disas" | "disassemble" => Self::Disassemble(words.next().map(address).transpose()?),
            "list" => Self::List,
            "x" | "memory" => {
                let addr = address_arg(words.next())?;
                let len = match words.next() {
                    Some(len) => len
                        .parse()
                        .map_err(|_| CommandError::InvalidNumber(len.to_owned()))?,
                    None => 16,
                };
                Self::Memory(addr, len)
            }
            "restart" => Self::Restart,
            "h" | "help" => Self::Help,
            "q" | "quit" | "exit" => Self::Quit,
            other => return Err(CommandError::Unknown(other.to_owned())),
        };

        Ok(cmd)
    }
}

/// Summary of the commands.
pub const HELP: &str = "\
break <addr|function|[file]:line>  set a breakpoint
delete <addr>                      delete a breakpoint
breakpoints                        list breakpoints
continue                           resume until the next stop
stepi                              execute one instruction
step                               execute one source line, entering calls
next                               execute one source line, over calls
regs [<name> <value>]              show or set registers
locals                             show local variables
disassemble [<addr>]               show instructions
list                               show the source around the current line
memory <addr> [<len>]              dump memory
restart                            relaunch the program
quit                               kill the program and exit";

/// Parses an address entered by the operator: decimal, or hexadecimal with a
/// `0x` prefix.
pub fn parse_address(s: &str) -> Option<u64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn address(s: &str) -> Result<u64, CommandError> {
    parse_address(s).ok_or_else(|| CommandError::InvalidAddress(s.to_owned()))
}

fn address_arg(s: Option<&str>) -> Result<u64, CommandError> {
    address(s.ok_or(CommandError::MissingArgument("address"))?)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{BreakLocation, Command, CommandError, parse_address};

    #[test]
    fn addresses() {
        assert_eq!(parse_address("4198710"), Some(4198710));
        assert_eq!(parse_address("0x401136"), Some(0x401136));
        assert_eq!(parse_address("0X401136"), Some(0x401136));
        assert_eq!(parse_address("0x"), None);
        assert_eq!(parse_address("401136h"), None);
        assert_eq!(parse_address("-1"), None);
        assert_eq!(parse_address("main"), None);
    }

    #[test]
    fn break_locations() {
        assert_eq!(
            BreakLocation::parse("0x401136"),
            Ok(BreakLocation::Address(0x401136))
        );
        assert_eq!(
            BreakLocation::parse("main"),
            Ok(BreakLocation::Function("main".to_owned()))
        );
        assert_eq!(
            BreakLocation::parse("calls.c:21"),
            Ok(BreakLocation::Line(Some(PathBuf::from("calls.c")), 21))
        );
        assert_eq!(
            BreakLocation::parse(":21"),
            Ok(BreakLocation::Line(None, 21))
        );
        assert_eq!(
            BreakLocation::parse("calls.c:x"),
            Err(CommandError::InvalidNumber("x".to_owned()))
        );
        assert_eq!(
            BreakLocation::parse("0xzz"),
            Err(CommandError::InvalidAddress("0xzz".to_owned()))
        );
    }

    #[test]
    fn commands() {
        assert_eq!(
            Command::parse("break add"),
            Ok(Command::Break(BreakLocation::Function("add".to_owned())))
        );
        assert_eq!(Command::parse("  c "), Ok(Command::Continue));
        assert_eq!(Command::parse("next"), Ok(Command::StepOver));
        assert_eq!(Command::parse("step"), Ok(Command::StepInto));
        assert_eq!(Command::parse("delete 0x10"), Ok(Command::Delete(0x10)));
        assert_eq!(Command::parse("regs"), Ok(Command::Registers));
        assert_eq!(
            Command::parse("regs rax 0xff"),
            Ok(Command::SetRegister("rax".to_owned(), 0xff))
        );
        assert_eq!(Command::parse("disas"), Ok(Command::Disassemble(None)));
        assert_eq!(Command::parse("x 0x1000"), Ok(Command::Memory(0x1000, 16)));
        assert_eq!(Command::parse("x 0x1000 4"), Ok(Command::Memory(0x1000, 4)));

        assert_eq!(
            Command::parse("break"),
            Err(CommandError::MissingArgument("location"))
        );
        assert_eq!(
            Command::parse("delete main"),
            Err(CommandError::InvalidAddress("main".to_owned()))
        );
        assert_eq!(
            Command::parse("frobnicate"),
            Err(CommandError::Unknown("frobnicate".to_owned()))
        );
    }
}
