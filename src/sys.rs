//! Thin libc wrappers: the handful of socket/signal knobs this crate needs
//! that `std::net` doesn't expose (OOBINLINE, SIGURG ownership, SIGPIPE and
//! SIGCHLD disposition).

use std::io;
use std::net::TcpStream;
use std::os::unix::io::AsRawFd;

/// Ignore `SIGPIPE` (writes to a closed socket surface as `EPIPE` instead
/// of killing the process) and `SIGCHLD` (the ERQ child becomes a
/// zombie-free detached process on exit).
pub fn ignore_lifecycle_signals() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        libc::signal(libc::SIGCHLD, libc::SIG_IGN);
    }
}

/// Enable receipt of out-of-band (urgent) data inline in the regular read
/// stream, so `POLLPRI` readiness corresponds to real urgent bytes the
/// telnet machine can see.
pub fn enable_oob_inline(stream: &TcpStream) -> io::Result<()> {
    let fd = stream.as_raw_fd();
    let enable: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_OOBINLINE,
            &enable as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Poll readiness flags the scheduler cares about for one descriptor:
/// ordinary readability and urgent/out-of-band data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub urgent: bool,
}

/// Poll a set of file descriptors for read and urgent (`POLLPRI`)
/// readiness, waiting up to `timeout_ms` (0 means return immediately).
/// Returns readiness in the same order as `fds`.
pub fn poll_readiness(fds: &[i32], timeout_ms: i32) -> io::Result<Vec<Readiness>> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN | libc::POLLPRI,
            revents: 0,
        })
        .collect();

    let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(fds.iter().map(|_| Readiness::default()).collect());
        }
        return Err(err);
    }

    Ok(pollfds
        .iter()
        .map(|pfd| Readiness {
            readable: pfd.revents & libc::POLLIN != 0,
            urgent: pfd.revents & libc::POLLPRI != 0,
        })
        .collect())
}

/// Put a listening or connected socket into non-blocking mode.
pub fn set_nonblocking(fd: i32) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
