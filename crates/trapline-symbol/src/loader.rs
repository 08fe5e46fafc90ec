use std::collections::HashMap;
use std::path::PathBuf;

use gimli::{
    AttributeValue, DebuggingInformationEntry, Dwarf, EndianSlice, LineProgramHeader, Operation,
    RunTimeEndian, Unit,
};

use crate::elf::ElfImage;
use crate::line::LineTable;
use crate::model::{CompileUnit, Function, Variable, VariableKind, VariableLocation};
use crate::source::SourceFiles;

type Reader<'a> = EndianSlice<'a, RunTimeEndian>;

/// Attributes that are read elsewhere, or deliberately ignored.
const KNOWN_ATTRIBUTES: &[gimli::DwAt] = &[
    gimli::DW_AT_name,
    gimli::DW_AT_low_pc,
    gimli::DW_AT_high_pc,
    gimli::DW_AT_ranges,
    gimli::DW_AT_frame_base,
    gimli::DW_AT_location,
    gimli::DW_AT_type,
    gimli::DW_AT_declaration,
    gimli::DW_AT_producer,
    gimli::DW_AT_comp_dir,
    gimli::DW_AT_stmt_list,
    gimli::DW_AT_language,
    gimli::DW_AT_decl_file,
    gimli::DW_AT_decl_line,
    gimli::DW_AT_decl_column,
    gimli::DW_AT_prototyped,
    gimli::DW_AT_external,
    gimli::DW_AT_call_all_calls,
    gimli::DW_AT_call_all_tail_calls,
    gimli::DW_AT_GNU_all_call_sites,
    gimli::DW_AT_GNU_all_tail_call_sites,
    gimli::DW_AT_sibling,
];

/// Debug information extracted from the DWARF sections.
#[derive(Default)]
pub(crate) struct LoadedDwarf {
    pub units: Vec<CompileUnit>,
    pub functions: Vec<Function>,
    pub lines: LineTable,
    pub sources: SourceFiles,
}

enum Scope {
    Unit,
    Function(Option<usize>),
    Block,
    Other,
}

/// Parses the DWARF sections of the given executable.
pub(crate) fn load_dwarf(image: &ElfImage) -> crate::Result<LoadedDwarf> {
    if image.section_data(".debug_info").is_none_or(<[u8]>::is_empty) {
        return Err(crate::Error::MissingDebugInfo);
    }

    let endian = image.endian();

    let dwarf = Dwarf::load(|id| {
        let data = image.section_data(id.name()).unwrap_or_default();
        Ok::<_, gimli::Error>(EndianSlice::new(data, endian))
    })?;

    let mut loaded = LoadedDwarf::default();

    let mut headers = dwarf.units();
    while let Some(header) = headers.next()? {
        let unit = dwarf.unit(header)?;
        load_unit(&dwarf, &unit, &mut loaded)?;
    }

    loaded.lines.finish();

    tracing::debug!(
        units = loaded.units.len(),
        functions = loaded.functions.len(),
        lines = loaded.lines.entries().len(),
        sources = loaded.sources.len(),
        "parsed dwarf"
    );

    Ok(loaded)
}

fn load_unit(
    dwarf: &Dwarf<Reader<'_>>,
    unit: &Unit<Reader<'_>>,
    loaded: &mut LoadedDwarf,
) -> crate::Result<()> {
    let mut depth = 0isize;
    let mut scopes = Vec::<(isize, Scope)>::new();
    let mut unit_index = None;

    let mut cursor = unit.entries();

    while let Some((delta, entry)) = cursor.next_dfs()? {
        depth += delta;

        while scopes.last().is_some_and(|(d, _)| *d >= depth) {
            scopes.pop();
        }

        let scope = match entry.tag() {
            gimli::DW_TAG_compile_unit | gimli::DW_TAG_partial_unit => {
                log_unhandled_attributes(entry)?;

                let cu = parse_compile_unit(dwarf, unit, entry)?;
                tracing::debug!(
                    name = %cu.name,
                    low_pc = format_args!("{:#x}", cu.low_pc),
                    high_pc = format_args!("{:#x}", cu.high_pc),
                    has_ranges = cu.has_ranges,
                    "compile unit"
                );

                loaded.units.push(cu);
                unit_index = Some(loaded.units.len() - 1);

                load_line_program(dwarf, unit, loaded)?;

                Scope::Unit
            }
            gimli::DW_TAG_subprogram => {
                log_unhandled_attributes(entry)?;

                let function = unit_index
                    .map(|unit_index| parse_function(dwarf, unit, entry, unit_index))
                    .transpose()?
                    .flatten();

                Scope::Function(function.map(|f| {
                    loaded.functions.push(f);
                    loaded.functions.len() - 1
                }))
            }
            gimli::DW_TAG_lexical_block => Scope::Block,
            tag @ (gimli::DW_TAG_variable | gimli::DW_TAG_formal_parameter) => {
                let owner = scopes.iter().rev().find_map(|(_, scope)| match scope {
                    Scope::Block => None,
                    Scope::Function(f) => Some(*f),
                    Scope::Unit | Scope::Other => Some(None),
                });

                if let Some(Some(function)) = owner {
                    log_unhandled_attributes(entry)?;

                    let kind = if tag == gimli::DW_TAG_formal_parameter {
                        VariableKind::Parameter
                    } else {
                        VariableKind::Local
                    };

                    if let Some(var) = parse_variable(dwarf, unit, entry, kind)? {
                        loaded.functions[function].variables.push(var);
                    }
                }

                Scope::Other
            }
            _ => Scope::Other,
        };

        if entry.has_children() {
            scopes.push((depth, scope));
        }
    }

    Ok(())
}

fn parse_compile_unit(
    dwarf: &Dwarf<Reader<'_>>,
    unit: &Unit<Reader<'_>>,
    entry: &DebuggingInformationEntry<'_, '_, Reader<'_>>,
) -> crate::Result<CompileUnit> {
    let name = entry_name(dwarf, unit, entry)?.unwrap_or_default();

    if let Some(attr) = entry.attr_value(gimli::DW_AT_ranges)? {
        let mut ranges = Vec::new();

        if let Some(mut iter) = dwarf.attr_ranges(unit, attr)? {
            while let Some(range) = iter.next()? {
                if range.begin < range.end {
                    ranges.push(range.begin..range.end);
                }
            }
        }

        let low_pc = ranges.iter().map(|r| r.start).min().unwrap_or_default();
        let high_pc = ranges.iter().map(|r| r.end).max().unwrap_or_default();

        return Ok(CompileUnit {
            name,
            low_pc,
            high_pc,
            has_ranges: true,
            ranges,
        });
    }

    let (low_pc, high_pc) = entry_bounds(dwarf, unit, entry)?.unwrap_or_default();

    Ok(CompileUnit {
        name,
        low_pc,
        high_pc,
        has_ranges: false,
        ranges: Vec::new(),
    })
}

fn parse_function(
    dwarf: &Dwarf<Reader<'_>>,
    unit: &Unit<Reader<'_>>,
    entry: &DebuggingInformationEntry<'_, '_, Reader<'_>>,
    unit_index: usize,
) -> crate::Result<Option<Function>> {
    if let Some(AttributeValue::Flag(true)) = entry.attr_value(gimli::DW_AT_declaration)? {
        return Ok(None);
    }

    let name = entry_name(dwarf, unit, entry)?.unwrap_or_else(|| "<unnamed>".to_owned());

    let bounds = if let Some(attr) = entry.attr_value(gimli::DW_AT_ranges)? {
        let mut bounds: Option<(u64, u64)> = None;

        if let Some(mut iter) = dwarf.attr_ranges(unit, attr)? {
            while let Some(r) = iter.next()? {
                bounds = Some(match bounds {
                    Some((low, high)) => (low.min(r.begin), high.max(r.end)),
                    None => (r.begin, r.end),
                });
            }
        }

        bounds
    } else {
        entry_bounds(dwarf, unit, entry)?
    };

    let Some((low_pc, high_pc)) = bounds else {
        tracing::debug!(name = %name, "function without code");
        return Ok(None);
    };

    let frame_base_is_cfa = match entry.attr_value(gimli::DW_AT_frame_base)? {
        Some(AttributeValue::Exprloc(expr)) => {
            let mut ops = expr.operations(unit.encoding());

            match (ops.next()?, ops.next()?) {
                (Some(Operation::CallFrameCFA), None) => true,
                _ => return Err(crate::Error::UnsupportedFrameBase(name)),
            }
        }
        Some(_) => return Err(crate::Error::UnsupportedFrameBase(name)),
        None => false,
    };

    Ok(Some(Function {
        name,
        low_pc,
        high_pc,
        frame_base_is_cfa,
        variables: Vec::new(),
        unit: unit_index,
    }))
}

fn parse_variable(
    dwarf: &Dwarf<Reader<'_>>,
    unit: &Unit<Reader<'_>>,
    entry: &DebuggingInformationEntry<'_, '_, Reader<'_>>,
    kind: VariableKind,
) -> crate::Result<Option<Variable>> {
    let Some(name) = entry_name(dwarf, unit, entry)? else {
        tracing::debug!(offset = format_args!("{:#x}", die_offset(unit, entry)), "unnamed variable");
        return Ok(None);
    };

    let type_offset = match entry.attr_value(gimli::DW_AT_type)? {
        Some(AttributeValue::UnitRef(offset)) => {
            offset.to_debug_info_offset(&unit.header).map(|o| o.0)
        }
        Some(AttributeValue::DebugInfoRef(offset)) => Some(offset.0),
        _ => None,
    };

    let location = match entry.attr_value(gimli::DW_AT_location)? {
        Some(AttributeValue::Exprloc(expr)) => {
            let mut ops = expr.operations(unit.encoding());

            match (ops.next()?, ops.next()?) {
                (Some(Operation::FrameOffset { offset }), None) => {
                    VariableLocation::FrameOffset(offset)
                }
                _ => VariableLocation::Unresolved,
            }
        }
        _ => VariableLocation::Unresolved,
    };

    if location == VariableLocation::Unresolved {
        tracing::debug!(name = %name, "unresolved variable location");
    }

    Ok(Some(Variable {
        name,
        type_offset,
        location,
        kind,
    }))
}

fn load_line_program(
    dwarf: &Dwarf<Reader<'_>>,
    unit: &Unit<Reader<'_>>,
    loaded: &mut LoadedDwarf,
) -> crate::Result<()> {
    let Some(program) = unit.line_program.clone() else {
        return Ok(());
    };

    let mut files = HashMap::<u64, Option<usize>>::new();
    let mut sequence = Vec::<(u64, u64, usize)>::new();

    let mut rows = program.rows();

    while let Some((header, row)) = rows.next_row()? {
        if row.end_sequence() {
            loaded.lines.push_sequence(&sequence, row.address());
            sequence.clear();
            continue;
        }

        // line 0: no source line
        let Some(line) = row.line() else {
            continue;
        };

        let file = match files.get(&row.file_index()) {
            Some(file) => *file,
            None => {
                let file = file_path(dwarf, unit, header, row.file_index())?
                    .map(|path| loaded.sources.intern(path));

                if file.is_none() {
                    tracing::warn!(index = row.file_index(), "invalid line program file index");
                }

                files.insert(row.file_index(), file);
                file
            }
        };

        if let Some(file) = file {
            sequence.push((row.address(), line.get(), file));
        }
    }

    Ok(())
}

fn file_path(
    dwarf: &Dwarf<Reader<'_>>,
    unit: &Unit<Reader<'_>>,
    header: &LineProgramHeader<Reader<'_>>,
    index: u64,
) -> crate::Result<Option<PathBuf>> {
    let Some(file) = header.file(index) else {
        return Ok(None);
    };

    let mut path = PathBuf::new();

    if let Some(comp_dir) = unit.comp_dir {
        path.push(comp_dir.to_string_lossy().as_ref());
    }

    // absolute components replace what precedes them
    if let Some(dir) = file.directory(header) {
        path.push(dwarf.attr_string(unit, dir)?.to_string_lossy().as_ref());
    }

    path.push(
        dwarf
            .attr_string(unit, file.path_name())?
            .to_string_lossy()
            .as_ref(),
    );

    Ok(Some(path))
}

enum HighPc {
    Address(u64),
    Offset(u64),
}

/// Returns the `[low_pc, high_pc)` bounds of the entry.
///
/// Having only one of the two attributes is an error.
fn entry_bounds(
    dwarf: &Dwarf<Reader<'_>>,
    unit: &Unit<Reader<'_>>,
    entry: &DebuggingInformationEntry<'_, '_, Reader<'_>>,
) -> crate::Result<Option<(u64, u64)>> {
    let low = match entry.attr_value(gimli::DW_AT_low_pc)? {
        Some(value) => dwarf.attr_address(unit, value)?,
        None => None,
    };

    let high = match entry.attr(gimli::DW_AT_high_pc)? {
        Some(attr) => match dwarf.attr_address(unit, attr.value())? {
            Some(addr) => Some(HighPc::Address(addr)),
            None => attr.udata_value().map(HighPc::Offset),
        },
        None => None,
    };

    match (low, high) {
        (Some(low), Some(HighPc::Address(high))) => Ok(Some((low, high))),
        (Some(low), Some(HighPc::Offset(len))) => Ok(Some((low, low.wrapping_add(len)))),
        (None, None) => Ok(None),
        _ => Err(crate::Error::IncompleteBounds {
            tag: entry.tag(),
            offset: die_offset(unit, entry),
        }),
    }
}

fn entry_name(
    dwarf: &Dwarf<Reader<'_>>,
    unit: &Unit<Reader<'_>>,
    entry: &DebuggingInformationEntry<'_, '_, Reader<'_>>,
) -> crate::Result<Option<String>> {
    let Some(value) = entry.attr_value(gimli::DW_AT_name)? else {
        return Ok(None);
    };

    let name = dwarf.attr_string(unit, value)?;
    Ok(Some(name.to_string_lossy().into_owned()))
}

fn die_offset(
    unit: &Unit<Reader<'_>>,
    entry: &DebuggingInformationEntry<'_, '_, Reader<'_>>,
) -> usize {
    entry
        .offset()
        .to_debug_info_offset(&unit.header)
        .map(|o| o.0)
        .unwrap_or_default()
}

fn log_unhandled_attributes(
    entry: &DebuggingInformationEntry<'_, '_, Reader<'_>>,
) -> crate::Result<()> {
    let mut attrs = entry.attrs();

    while let Some(attr) = attrs.next()? {
        if !KNOWN_ATTRIBUTES.contains(&attr.name()) {
            tracing::trace!(tag = %entry.tag(), attr = %attr.name(), "unhandled attribute");
        }
    }

    Ok(())
}
