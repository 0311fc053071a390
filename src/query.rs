//! Buffered queries against primitives that negotiate their output size.
//!
//! A [`BufferQuery`] fills a caller buffer or reports how large the buffer
//! must be. [`run_query`] probes with a fixed stack buffer and, if that is
//! too small, retries exactly once with a heap buffer of exactly the size the
//! probe reported.

use crate::errno::SysErrorCode;
use crate::error::{Error, Result};

/// Default stack buffer size for the probe attempt.
pub const DEFAULT_PROBE_SIZE: usize = 1024;

/// Outcome of one primitive invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// The buffer was filled with `len` bytes.
    Filled(usize),
    /// The buffer was too small; `required` bytes are needed.
    Insufficient {
        /// Exact size the primitive needs.
        required: usize,
    },
    /// The primitive failed.
    Failed(SysErrorCode),
}

/// A system primitive following the size-negotiation protocol.
pub trait BufferQuery {
    /// Fill `buf`, or report the size it needs.
    fn query(&self, buf: &mut [u8]) -> QueryStatus;
}

impl<F> BufferQuery for F
where
    F: Fn(&mut [u8]) -> QueryStatus,
{
    fn query(&self, buf: &mut [u8]) -> QueryStatus {
        self(buf)
    }
}

enum Phase {
    Probe,
    Resize { required: usize },
    Done(Vec<u8>),
    Fail(Error),
}

/// Run `q` with the default probe size.
pub fn run_query<Q: BufferQuery + ?Sized>(q: &Q) -> Result<Vec<u8>> {
    run_query_with::<DEFAULT_PROBE_SIZE, Q>(q)
}

/// Run `q` with an `N`-byte probe buffer.
///
/// Returns exactly the bytes the primitive reported as written.
pub fn run_query_with<const N: usize, Q: BufferQuery + ?Sized>(q: &Q) -> Result<Vec<u8>> {
    let mut phase = Phase::Probe;
    loop {
        phase = match phase {
            Phase::Probe => {
                let mut stack = [0u8; N];
                match q.query(&mut stack) {
                    QueryStatus::Filled(len) => accept(&stack, len),
                    QueryStatus::Insufficient { required } => {
                        tracing::debug!(probe = N, required, "probe buffer too small, resizing");
                        Phase::Resize { required }
                    }
                    QueryStatus::Failed(code) => Phase::Fail(Error::system(code)),
                }
            }
            Phase::Resize { required } => {
                let mut heap = Vec::new();
                if heap.try_reserve_exact(required).is_err() {
                    Phase::Fail(Error::OutOfMemory {
                        requested: required,
                    })
                } else {
                    heap.resize(required, 0);
                    match q.query(&mut heap) {
                        QueryStatus::Filled(len) if len <= heap.len() => {
                            heap.truncate(len);
                            Phase::Done(heap)
                        }
                        QueryStatus::Filled(_) => {
                            Phase::Fail(Error::system(SysErrorCode::InvalidArgument))
                        }
                        // The size changed between attempts; no second retry.
                        QueryStatus::Insufficient { .. } => {
                            Phase::Fail(Error::system(SysErrorCode::NoBufferSpace))
                        }
                        QueryStatus::Failed(code) => Phase::Fail(Error::system(code)),
                    }
                }
            }
            Phase::Done(bytes) => return Ok(bytes),
            Phase::Fail(err) => return Err(err),
        };
    }
}

fn accept(buf: &[u8], len: usize) -> Phase {
    match buf.get(..len) {
        Some(bytes) => Phase::Done(bytes.to_vec()),
        None => Phase::Fail(Error::system(SysErrorCode::InvalidArgument)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Writes `payload` if it fits, recording every buffer size it was handed.
    struct Fixed {
        payload: Vec<u8>,
        seen: RefCell<Vec<usize>>,
    }

    impl Fixed {
        fn new(payload: &[u8]) -> Self {
            Self {
                payload: payload.to_vec(),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl BufferQuery for Fixed {
        fn query(&self, buf: &mut [u8]) -> QueryStatus {
            self.seen.borrow_mut().push(buf.len());
            if buf.len() < self.payload.len() {
                return QueryStatus::Insufficient {
                    required: self.payload.len(),
                };
            }
            buf[..self.payload.len()].copy_from_slice(&self.payload);
            QueryStatus::Filled(self.payload.len())
        }
    }

    #[test]
    fn test_fits_in_probe() {
        let q = Fixed::new(b"/usr/bin/fsx");
        let out = run_query(&q).unwrap();
        assert_eq!(out, b"/usr/bin/fsx");
        assert_eq!(*q.seen.borrow(), vec![DEFAULT_PROBE_SIZE]);
    }

    #[test]
    fn test_resize_allocates_exactly_required() {
        let payload: Vec<u8> = (0..200u8).collect();
        let q = Fixed::new(&payload);

        let out = run_query_with::<16, _>(&q).unwrap();
        assert_eq!(out.len(), 200);
        assert_eq!(out, payload);
        assert_eq!(*q.seen.borrow(), vec![16, 200]);
    }

    #[test]
    fn test_probe_failure_does_not_retry() {
        let calls = RefCell::new(0);
        let q = |_buf: &mut [u8]| {
            *calls.borrow_mut() += 1;
            QueryStatus::Failed(SysErrorCode::AccessDenied)
        };

        let err = run_query(&q).unwrap_err();
        assert_eq!(err.sys_code(), Some(SysErrorCode::AccessDenied));
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn test_second_insufficient_is_terminal() {
        let calls = RefCell::new(0);
        let q = |buf: &mut [u8]| {
            *calls.borrow_mut() += 1;
            QueryStatus::Insufficient {
                required: buf.len() + 1,
            }
        };

        let err = run_query_with::<8, _>(&q).unwrap_err();
        assert_eq!(err.sys_code(), Some(SysErrorCode::NoBufferSpace));
        assert_eq!(*calls.borrow(), 2);
    }

    #[test]
    fn test_retry_failure_is_surfaced() {
        let calls = RefCell::new(0);
        let q = |_buf: &mut [u8]| {
            let mut n = calls.borrow_mut();
            *n += 1;
            if *n == 1 {
                QueryStatus::Insufficient { required: 64 }
            } else {
                QueryStatus::Failed(SysErrorCode::Io)
            }
        };

        let err = run_query_with::<8, _>(&q).unwrap_err();
        assert_eq!(err.sys_code(), Some(SysErrorCode::Io));
    }

    #[test]
    fn test_allocation_failure_is_distinct() {
        let q = |_buf: &mut [u8]| QueryStatus::Insufficient {
            required: usize::MAX,
        };

        let err = run_query_with::<8, _>(&q).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { requested } if requested == usize::MAX));
        assert_eq!(err.sys_code(), None);
    }

    #[test]
    fn test_overreported_length_is_rejected() {
        let q = |buf: &mut [u8]| QueryStatus::Filled(buf.len() + 1);
        let err = run_query_with::<8, _>(&q).unwrap_err();
        assert_eq!(err.sys_code(), Some(SysErrorCode::InvalidArgument));
    }
}
