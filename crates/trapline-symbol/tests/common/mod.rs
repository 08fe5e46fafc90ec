use std::path::{Path, PathBuf};
use std::process::Command;

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn compile_fixture(name: &str, is_pie: bool) -> tempfile::TempPath {
    let out_file = tempfile::NamedTempFile::new().expect("tempfile");

    let mut gcc = Command::new("gcc");
    gcc.args(["-g", "-O0", "-fno-omit-frame-pointer"])
        .arg(fixture(name))
        .arg("-o")
        .arg(out_file.path());

    if is_pie {
        gcc.args(["-fPIE", "-pie"]);
    } else {
        gcc.arg("-no-pie");
    }

    println!("running: {gcc:?}");

    let gcc = gcc.output().expect("gcc");

    if !gcc.status.success() {
        let msg = String::from_utf8_lossy(&gcc.stderr);
        panic!("{msg}");
    }

    out_file.into_temp_path()
}
