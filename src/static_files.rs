//! Serves files relative to a base directory handle.
//!
//! The path is walked one segment at a time with `openat(2)`, each segment
//! opened relative to the directory handle reached so far. Nothing is
//! resolved through the process working directory once the base is open.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::path::{Path, PathBuf};

use crate::error::ResolveError;

/// An open base directory.
#[derive(Debug)]
pub struct StaticFiles {
    base: File,
    root: PathBuf,
}

impl StaticFiles {
    /// Opens `root` as a directory handle.
    pub fn open<P: AsRef<Path>>(root: P) -> io::Result<StaticFiles> {
        let root = root.as_ref();
        let base = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECTORY | libc::O_CLOEXEC)
            .open(root)?;

        Ok(StaticFiles {
            base,
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads the file `path` names, relative to the base directory.
    ///
    /// Empty segments are skipped. A regular file ends the walk even if
    /// segments remain after it. Ending on a directory, a missing entry,
    /// a special file such as a FIFO, or a `..` segment are all errors.
    pub fn resolve(&self, path: &str) -> Result<Vec<u8>, ResolveError> {
        let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
        if segments.peek().is_none() {
            return Err(ResolveError::EmptyPath);
        }

        // `None` means the base directory, which is only ever borrowed.
        let mut current: Option<File> = None;
        let mut walked = PathBuf::new();

        for segment in segments {
            if segment == ".." {
                return Err(ResolveError::Traversal(path.to_string()));
            }

            let dir = current.as_ref().unwrap_or(&self.base);
            let file = open_at(dir, segment).map_err(|source| ResolveError::Open {
                segment: segment.to_string(),
                source,
            })?;
            walked.push(segment);

            let file_type = file.metadata()?.file_type();
            if file_type.is_dir() {
                // replacing drops the previous non-base handle
                current = Some(file);
                continue;
            }
            if !file_type.is_file() {
                return Err(ResolveError::NotRegular(walked));
            }

            return read_all(file);
        }

        Err(ResolveError::Directory(walked))
    }
}

fn open_at(dir: &File, name: &str) -> io::Result<File> {
    let name = CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // O_NONBLOCK keeps a FIFO from blocking the open
    let flags = libc::O_RDONLY | libc::O_NONBLOCK | libc::O_CLOEXEC;

    // SAFETY: `dir` is a live descriptor and `name` is NUL-terminated.
    let fd = unsafe { libc::openat(dir.as_raw_fd(), name.as_ptr(), flags) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: `fd` was just returned by openat and is owned by nobody else.
    Ok(unsafe { File::from_raw_fd(fd) })
}

fn read_all(mut file: File) -> Result<Vec<u8>, ResolveError> {
    let size = file.metadata()?.len() as usize;
    let mut content = Vec::with_capacity(size);
    file.read_to_end(&mut content)?;
    log::debug!("Resource size: {}", content.len());
    Ok(content)
}
