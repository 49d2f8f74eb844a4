use crate::engine::error::VirialError;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// `<name><n>`, the prefix of every file a run writes.
pub fn run_prefix(name: &str, n: usize) -> String {
    format!("{name}{n}")
}

pub fn weights_path(dir: &Path, name: &str, n: usize) -> PathBuf {
    dir.join(format!("{}_weights.dat", run_prefix(name, n)))
}

pub fn raw_path(dir: &Path, name: &str, n: usize, run: u32) -> PathBuf {
    dir.join(format!("{}_run{run}_raw.dat", run_prefix(name, n)))
}

/// Creates the first `<name><n>_run<k>_raw.dat` in `dir` that does not exist yet.
///
/// Creation is exclusive, so concurrent runs never share or overwrite a file.
pub fn create_run_file(dir: &Path, name: &str, n: usize) -> Result<(PathBuf, File), VirialError> {
    let mut run = 1;
    loop {
        let path = raw_path(dir, name, n, run);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => run += 1,
            Err(e) => return Err(VirialError::io(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn paths_follow_naming_scheme() {
        let dir = Path::new("out");
        assert_eq!(weights_path(dir, "hs", 4), dir.join("hs4_weights.dat"));
        assert_eq!(raw_path(dir, "hs", 4, 2), dir.join("hs4_run2_raw.dat"));
    }

    #[test]
    fn create_run_file_never_overwrites() {
        let dir = tempdir().unwrap();
        let existing = raw_path(dir.path(), "hs", 3, 1);
        fs::write(&existing, "keep").unwrap();

        let (first, _) = create_run_file(dir.path(), "hs", 3).unwrap();
        let (second, _) = create_run_file(dir.path(), "hs", 3).unwrap();
        assert_eq!(first, raw_path(dir.path(), "hs", 3, 2));
        assert_eq!(second, raw_path(dir.path(), "hs", 3, 3));
        assert_eq!(fs::read_to_string(existing).unwrap(), "keep");
    }

    #[test]
    fn create_run_file_reports_missing_directory() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(create_run_file(&missing, "hs", 3).is_err());
    }
}
