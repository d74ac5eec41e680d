//! Where incoming files are written while they are assembled and until they are printed.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Storage for incoming files.
pub trait Spool {
    type Sink: Write;

    /// Open a new sink for a peer-supplied (already sanitized) file name.
    /// Returns the sink and the absolute path the finished file will have.
    fn create(&mut self, name: &str) -> io::Result<(Self::Sink, PathBuf)>;

    /// Remove a file that will never be printed.
    fn discard(&mut self, path: &Path) -> io::Result<()>;
}

/// Spool in a directory on disk. Each file gets a unique prefix so two peers sending
/// `part.gcode` at the same time never share a sink.
#[derive(Debug, Clone)]
pub struct DirSpool {
    dir: PathBuf,
}

impl DirSpool {
    /// Create the directory if needed and resolve it to an absolute path.
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: fs::canonicalize(dir)?,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Spool for DirSpool {
    type Sink = BufWriter<File>;

    fn create(&mut self, name: &str) -> io::Result<(Self::Sink, PathBuf)> {
        let path = self
            .dir
            .join(format!("{}-{}", uuid::Uuid::new_v4().simple(), name));
        let file = File::create(&path)?;
        Ok((BufWriter::new(file), path))
    }

    fn discard(&mut self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Reduce a peer-supplied file name to its last path component.
/// `None` for names that would not name a regular file in the spool.
pub fn sanitize_filename(name: &str) -> Option<&str> {
    let last = Path::new(name).file_name()?.to_str()?;
    if last.is_empty() || last == "." || last == ".." {
        return None;
    }
    Some(last)
}
