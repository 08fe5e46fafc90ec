use std::path::Path;

use miette::{IntoDiagnostic, WrapErr};
use trapline_debugger::LaunchOptions;

use crate::command::BreakLocation;

/// Configuration of a debugging session.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct DebugConfig {
    /// Number of instructions shown around the instruction pointer.
    #[knus(child, default = 16, unwrap(argument))]
    pub disasm_window: usize,

    /// Function on which the debuggee first stops.
    #[knus(child, default = "main".to_owned(), unwrap(argument))]
    pub entry_symbol: String,

    /// Whether a breakpoint is set on the entry symbol.
    #[knus(child, default = true, unwrap(argument))]
    pub break_at_entry: bool,

    /// Whether address space layout randomization is disabled.
    #[knus(child, default = true, unwrap(argument))]
    pub no_aslr: bool,

    /// Breakpoints set at launch.
    #[knus(children(name = "break"))]
    pub breakpoints: Vec<BreakConfig>,
}

/// Breakpoint set at launch.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct BreakConfig {
    /// Address, function name, or `file:line` location.
    #[knus(argument)]
    pub location: String,
}

impl DebugConfig {
    /// Loads the configuration given on the command line.
    ///
    /// The argument is either the path of a `.kdl` file or KDL content. The
    /// defaults apply without an argument.
    pub fn load(arg: Option<&str>) -> miette::Result<Self> {
        let config = match arg {
            None => knus::parse("<default>", "")?,
            Some(path) if Path::new(path).extension().is_some_and(|ext| ext == "kdl") => {
                let content = std::fs::read_to_string(path)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("cannot read config file {path}"))?;

                knus::parse(path, &content)?
            }
            Some(content) => knus::parse("<inline>", content)?,
        };

        Ok(config)
    }

    /// Options for launching the debuggee.
    ///
    /// The entry symbol is dropped when no breakpoint is set on it.
    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            entry_symbol: self.break_at_entry.then(|| self.entry_symbol.clone()),
            no_aslr: self.no_aslr,
        }
    }

    /// Parses the locations of the breakpoints set at launch.
    pub fn break_locations(&self) -> miette::Result<Vec<BreakLocation>> {
        self.breakpoints
            .iter()
            .map(|bk| {
                BreakLocation::parse(&bk.location)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("invalid breakpoint `{}`", bk.location))
            })
            .collect()
    }
}
