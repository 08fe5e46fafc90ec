use std::path::PathBuf;

use nix::libc::{AT_ENTRY, AT_NULL};
use nix::unistd::Pid;

use scroll::Pread;

/// Reads the `(type, value)` pairs of the auxiliary vector of the process.
fn auxv_entries(pid: Pid) -> crate::sys::Result<Vec<(u64, u64)>> {
    let path: PathBuf = format!("/proc/{pid}/auxv").into();

    let bytes = std::fs::read(&path).map_err(|e| crate::sys::Error::File(path, e))?;

    let mut entries = Vec::new();
    let mut offset = 0;

    while offset + 2 * size_of::<u64>() <= bytes.len() {
        let ty: u64 = bytes.gread_with(&mut offset, scroll::NATIVE)?;
        let val: u64 = bytes.gread_with(&mut offset, scroll::NATIVE)?;

        if ty == AT_NULL {
            break;
        }

        entries.push((ty, val));
    }

    Ok(entries)
}

/// Computes the load bias of a position-independent executable, given its
/// link-time entry point.
pub fn load_bias(pid: Pid, link_entry: u64) -> crate::sys::Result<u64> {
    let entry_addr = auxv_entries(pid)?
        .into_iter()
        .find_map(|(ty, val)| (ty == AT_ENTRY).then_some(val))
        .ok_or(crate::sys::Error::MissingAuxv)?;

    let bias = entry_addr.wrapping_sub(link_entry);

    tracing::debug!(
        entry = format_args!("{entry_addr:#x}"),
        bias = format_args!("{bias:#x}"),
        "computed load bias"
    );

    Ok(bias)
}
