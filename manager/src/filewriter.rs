use common::{Error, Result};
#[cfg(test)]
use mockall::automock;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Sub directory holding files that only live for the duration of a workflow
pub static TEMP_DIR: &str = "generated";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteOptions {
    /// Kept after the workflow, written at the top of the output directory
    pub persistent: bool,
    pub permission: u32,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            persistent: false,
            permission: 0o644,
        }
    }
}

impl WriteOptions {
    #[must_use]
    pub fn persistent(permission: u32) -> Self {
        Self {
            persistent: true,
            permission,
        }
    }
}

#[cfg_attr(test, automock)]
pub trait FileWriter: Send + Sync {
    /// Write `content` and return the path of the written file
    fn write(&self, file_name: &str, content: &[u8], options: WriteOptions) -> Result<PathBuf>;
    /// A writer rooted in a sub directory, created if missing
    fn with_dir(&self, dir: &str) -> Result<Box<dyn FileWriter>>;
    fn dir(&self) -> PathBuf;
    fn clean_up_temp(&self) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct DirWriter {
    dir: PathBuf,
}

impl DirWriter {
    pub fn new(dir: impl AsRef<Path>) -> Result<DirWriter> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join(TEMP_DIR)).map_err(Error::Stdio)?;
        Ok(DirWriter { dir })
    }
}

#[cfg(unix)]
fn set_permission(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(Error::Stdio)
}

#[cfg(not(unix))]
fn set_permission(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

impl FileWriter for DirWriter {
    fn write(&self, file_name: &str, content: &[u8], options: WriteOptions) -> Result<PathBuf> {
        let path = if options.persistent {
            self.dir.join(file_name)
        } else {
            self.dir.join(TEMP_DIR).join(file_name)
        };
        fs::write(&path, content).map_err(Error::Stdio)?;
        set_permission(&path, options.permission)?;
        tracing::debug!(path = %path.display(), "Wrote file");
        Ok(path)
    }

    fn with_dir(&self, dir: &str) -> Result<Box<dyn FileWriter>> {
        Ok(Box::new(DirWriter::new(self.dir.join(dir))?))
    }

    fn dir(&self) -> PathBuf {
        self.dir.clone()
    }

    fn clean_up_temp(&self) -> Result<()> {
        let temp = self.dir.join(TEMP_DIR);
        if temp.exists() {
            fs::remove_dir_all(&temp).map_err(Error::Stdio)?;
        }
        Ok(())
    }
}
