//! mio-based event loop implementation.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS). One
//! thread multiplexes every connection.

mod event_loop;

pub use event_loop::EventLoop;
