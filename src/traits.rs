use std::{
    future::Future,
    io,
    path::Path,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, ReadBuf};

/// What the harness needs to know about a file. Snapshot, taken once per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,
}

impl From<std::fs::Metadata> for FileMetadata {
    fn from(m: std::fs::Metadata) -> Self {
        Self { size: m.len() }
    }
}

/// An abstraction over the filesystem the harness reads from. `tokio::fs` is the default, but
/// it can be swapped for anything that can open, stat and stream files.
///
/// Tests use a mock filesystem.
pub trait FileSystem: Send + Sync + 'static {
    type Handle: FileHandle;

    fn open<'a>(
        &'a self,
        path: &'a Path,
    ) -> impl Future<Output = io::Result<Self::Handle>> + Send + 'a;

    fn stat<'a>(
        &'a self,
        path: &'a Path,
    ) -> impl Future<Output = io::Result<FileMetadata>> + Send + 'a;
}

/// An exclusively owned open file. Reading it yields the file's bytes in order.
///
/// `close` consumes the handle, so it can be released at most once. Dropping a handle
/// that was never closed must release it too (that's what happens when an iteration
/// is cancelled or times out).
pub trait FileHandle: AsyncRead + Send + Unpin + 'static {
    fn metadata(&self) -> impl Future<Output = io::Result<FileMetadata>> + Send + '_;

    fn close(self) -> impl Future<Output = io::Result<()>> + Send;
}

#[derive(Default, Clone, Copy, Debug)]
pub struct TokioFileSystem {}

impl FileSystem for TokioFileSystem {
    type Handle = TokioFileHandle;

    async fn open<'a>(&'a self, path: &'a Path) -> io::Result<TokioFileHandle> {
        let file = tokio::fs::File::open(path).await?;
        Ok(TokioFileHandle { file })
    }

    async fn stat<'a>(&'a self, path: &'a Path) -> io::Result<FileMetadata> {
        tokio::fs::metadata(path).await.map(FileMetadata::from)
    }
}

pub struct TokioFileHandle {
    file: tokio::fs::File,
}

impl AsyncRead for TokioFileHandle {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

impl FileHandle for TokioFileHandle {
    async fn metadata(&self) -> io::Result<FileMetadata> {
        self.file.metadata().await.map(FileMetadata::from)
    }

    /// On unix the descriptor is closed with `close(2)` and its error (EIO, EBADF, ..)
    /// is returned. Elsewhere the file is dropped and closing can't fail.
    async fn close(self) -> io::Result<()> {
        // Waits for any in-flight blocking operation on the file to finish, so the
        // descriptor is really gone when this returns.
        let std_file = self.file.into_std().await;
        close_std_file(std_file)
    }
}

#[cfg(unix)]
fn close_std_file(file: std::fs::File) -> io::Result<()> {
    use std::os::fd::IntoRawFd;

    let fd = file.into_raw_fd();
    // SAFETY: into_raw_fd() gave us sole ownership of fd, nothing else will close it.
    unsafe { close_fd(fd) }
}

#[cfg(not(unix))]
fn close_std_file(file: std::fs::File) -> io::Result<()> {
    drop(file);
    Ok(())
}

/// # Safety
/// `fd` must be owned by the caller and not used after this call.
#[cfg(unix)]
unsafe fn close_fd(fd: std::os::fd::RawFd) -> io::Result<()> {
    // Not retried on EINTR: on Linux the descriptor is released regardless.
    if unsafe { libc::close(fd) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
