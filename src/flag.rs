// Copyright (c) 2026 Release Engineering and/or applicable contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The error-flag store (§4.A).
//!
//! A single file whose presence means "device in error". The state
//! machine is the only component permitted to clear it; the verification
//! subprocess and this crate both only ever set it. Writes go through a
//! temp-file-plus-rename so a crash between write and the next tick can't
//! leave a half-written flag lying around.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub struct ErrorFlag {
    path: PathBuf,
}

impl ErrorFlag {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        ErrorFlag { path: path.into() }
    }

    pub fn is_set(&self) -> bool {
        self.path.is_file()
    }

    /// Writes `reason` to the flag file, creating it if absent. Durable
    /// against a crash mid-write: we write to a sibling temp file and
    /// rename it into place.
    pub fn set(&self, reason: &str) -> Result<()> {
        let tmp_path = self.path.with_extension("flg.tmp");
        {
            let mut tmp = File::create(&tmp_path).map_err(|e| Error::Io(tmp_path.clone(), e))?;
            tmp.write_all(reason.as_bytes())
                .map_err(|e| Error::Io(tmp_path.clone(), e))?;
            tmp.sync_all().map_err(|e| Error::Io(tmp_path.clone(), e))?;
        }
        fs::rename(&tmp_path, &self.path).map_err(|e| Error::Io(self.path.clone(), e))?;
        Ok(())
    }

    /// Removes the flag file if present. Does not fail if it is already
    /// gone.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(self.path.clone(), e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn starts_unset() {
        let dir = tempdir().unwrap();
        let flag = ErrorFlag::new(dir.path().join("error.flg"));
        assert!(!flag.is_set());
    }

    #[test]
    fn set_then_is_set_then_clear() {
        let dir = tempdir().unwrap();
        let flag = ErrorFlag::new(dir.path().join("error.flg"));

        flag.set("device would not boot").unwrap();
        assert!(flag.is_set());
        assert_eq!(
            fs::read_to_string(flag.path()).unwrap(),
            "device would not boot"
        );

        flag.clear().unwrap();
        assert!(!flag.is_set());
    }

    #[test]
    fn clear_on_already_absent_flag_is_a_no_op() {
        let dir = tempdir().unwrap();
        let flag = ErrorFlag::new(dir.path().join("error.flg"));
        flag.clear().unwrap();
        flag.clear().unwrap();
    }

    #[test]
    fn set_overwrites_previous_reason() {
        let dir = tempdir().unwrap();
        let flag = ErrorFlag::new(dir.path().join("error.flg"));
        flag.set("first").unwrap();
        flag.set("second").unwrap();
        assert_eq!(fs::read_to_string(flag.path()).unwrap(), "second");
    }
}
