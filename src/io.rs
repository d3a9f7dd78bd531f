//! Non-blocking I/O Outcomes
//!
//! The one place that maps platform error codes onto the relay's view of a
//! socket call: data, "would block", peer closed, or a real failure.

use std::io;

/// Returns true when a non-blocking call failed only because it would have blocked.
pub fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

/// Result of a single non-blocking read attempt
#[derive(Debug)]
pub enum ReadOutcome {
    /// `n > 0` bytes were read into the buffer
    Data(usize),
    /// Nothing available right now; not an error
    WouldBlock,
    /// The call was interrupted by a signal and should be retried
    Interrupted,
    /// Zero-length read, the peer shut down its side
    Closed,
    /// Any other error; the connection is unusable
    Failed(io::Error),
}

impl ReadOutcome {
    /// Classify the raw result of `Read::read`
    pub fn classify(result: io::Result<usize>) -> Self {
        match result {
            Ok(0) => ReadOutcome::Closed,
            Ok(n) => ReadOutcome::Data(n),
            Err(ref e) if would_block(e) => ReadOutcome::WouldBlock,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => ReadOutcome::Interrupted,
            Err(e) => ReadOutcome::Failed(e),
        }
    }
}

/// Result of a single best-effort write of one chunk
#[derive(Debug)]
pub enum WriteOutcome {
    /// The whole chunk was accepted by the kernel
    Complete,
    /// Only `written` bytes were accepted; the rest is dropped
    Short { written: usize },
    /// The target's send buffer is full; the chunk is dropped
    WouldBlock,
    /// The target is unreachable or reset
    Failed(io::Error),
}

impl WriteOutcome {
    /// Classify the raw result of `Write::write` for a chunk of `len` bytes
    pub fn classify(result: io::Result<usize>, len: usize) -> Self {
        match result {
            Ok(n) if n >= len => WriteOutcome::Complete,
            Ok(0) => WriteOutcome::Failed(io::Error::new(
                io::ErrorKind::WriteZero,
                "peer accepted zero bytes",
            )),
            Ok(written) => WriteOutcome::Short { written },
            Err(ref e) if would_block(e) => WriteOutcome::WouldBlock,
            Err(e) => WriteOutcome::Failed(e),
        }
    }

    /// Bytes of the chunk that did not reach the target
    pub fn dropped(&self, len: usize) -> usize {
        match self {
            WriteOutcome::Complete => 0,
            WriteOutcome::Short { written } => len - written,
            WriteOutcome::WouldBlock | WriteOutcome::Failed(_) => len,
        }
    }

    /// True for errors that mean the target is gone, not merely congested
    pub fn is_failure(&self) -> bool {
        matches!(self, WriteOutcome::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_would_block_is_not_an_error() {
        let err = io::Error::from(io::ErrorKind::WouldBlock);
        assert!(would_block(&err));
        assert!(matches!(ReadOutcome::classify(Err(err)), ReadOutcome::WouldBlock));
    }

    #[test]
    fn test_real_errors_are_not_would_block() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::ConnectionAborted,
        ] {
            let err = io::Error::from(kind);
            assert!(!would_block(&err));
            assert!(matches!(ReadOutcome::classify(Err(err)), ReadOutcome::Failed(_)));
        }
    }

    #[test]
    fn test_zero_length_read_is_close() {
        assert!(matches!(ReadOutcome::classify(Ok(0)), ReadOutcome::Closed));
        assert!(matches!(ReadOutcome::classify(Ok(17)), ReadOutcome::Data(17)));
    }

    #[test]
    fn test_interrupted_read_is_retried() {
        let err = io::Error::from(io::ErrorKind::Interrupted);
        assert!(matches!(ReadOutcome::classify(Err(err)), ReadOutcome::Interrupted));
    }

    #[test]
    fn test_write_classification() {
        assert!(matches!(WriteOutcome::classify(Ok(5), 5), WriteOutcome::Complete));

        let short = WriteOutcome::classify(Ok(2), 5);
        assert!(matches!(short, WriteOutcome::Short { written: 2 }));
        assert_eq!(short.dropped(5), 3);
        assert!(!short.is_failure());

        let congested = WriteOutcome::classify(Err(io::ErrorKind::WouldBlock.into()), 5);
        assert_eq!(congested.dropped(5), 5);
        assert!(!congested.is_failure());

        let gone = WriteOutcome::classify(Err(io::ErrorKind::BrokenPipe.into()), 5);
        assert!(gone.is_failure());
        assert_eq!(gone.dropped(5), 5);
    }

    #[test]
    fn test_zero_byte_write_is_failure() {
        assert!(WriteOutcome::classify(Ok(0), 5).is_failure());
    }
}
