use std::io::Write;
use std::path::Path;

use miette::IntoDiagnostic;
use trapline_symbol::{DebugInfo, VariableKind, VariableLocation};

/// Runs the subcommand for dumping the debug information of a program.
pub fn evaluate_info(program: &Path, mut output: impl Write) -> miette::Result<()> {
    let debug_info = DebugInfo::load(program).into_diagnostic()?;

    writeln!(
        output,
        "{} ({})",
        debug_info.path().display(),
        if debug_info.is_pie() { "pie" } else { "no-pie" }
    )
    .into_diagnostic()?;

    writeln!(output, "\ncompile units:").into_diagnostic()?;

    for unit in debug_info.units() {
        let ranges = if unit.has_ranges {
            unit.ranges
                .iter()
                .map(|r| format!("{:#x}..{:#x}", r.start, r.end))
                .collect::<Vec<_>>()
                .join(", ")
        } else {
            format!("{:#x}..{:#x}", unit.low_pc, unit.high_pc)
        };

        writeln!(output, "  {} [{ranges}]", unit.name).into_diagnostic()?;
    }

    writeln!(output, "\nfunctions:").into_diagnostic()?;

    for function in debug_info.functions() {
        writeln!(
            output,
            "  {:#x}..{:#x} {}",
            function.low_pc, function.high_pc, function.name
        )
        .into_diagnostic()?;

        for var in function.variables.iter() {
            let kind = match var.kind {
                VariableKind::Parameter => "param",
                VariableKind::Local => "local",
            };

            let location = match var.location {
                VariableLocation::FrameOffset(offset) => format!("cfa{offset:+}"),
                VariableLocation::Unresolved => "?".to_owned(),
            };

            writeln!(output, "    {kind} {} @ {location}", var.name).into_diagnostic()?;
        }
    }

    writeln!(output, "\nline table:").into_diagnostic()?;

    for entry in debug_info.line_table().entries() {
        let file = debug_info
            .source_of(entry)
            .map_or_else(|| "??".into(), |s| s.path().display().to_string());

        writeln!(output, "  {:#x} {file}:{}", entry.address, entry.line).into_diagnostic()?;
    }

    Ok(())
}
