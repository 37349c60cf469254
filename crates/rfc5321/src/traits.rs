use std::fmt::Debug;
use std::os::fd::{AsRawFd, FromRawFd};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

pub trait AsyncReadAndWrite: AsyncRead + AsyncWrite + Debug + Unpin + Send {
    /// Optionally clone a TcpStream that represents the same underlying
    /// stream as this one.
    /// This only has an impl that returns Some for TcpStream.
    fn try_dup(&self) -> Option<TcpStream> {
        None
    }
}

impl AsyncReadAndWrite for TcpStream {
    fn try_dup(&self) -> Option<TcpStream> {
        let fd = self.as_raw_fd();
        // SAFETY: dup creates a new fd without affecting the state
        // of other descriptors
        let duplicate = unsafe { libc::dup(fd) };
        if duplicate == -1 {
            None
        } else {
            // SAFETY: we're wrapping the new duplicate from above,
            // which is fine, and provides a destructor for that fd
            // when the TcpStream is dropped
            let duplicate_stream = unsafe { std::net::TcpStream::from_raw_fd(duplicate) };
            TcpStream::from_std(duplicate_stream).ok()
        }
    }
}

pub type BoxedAsyncReadAndWrite = Box<dyn AsyncReadAndWrite>;
