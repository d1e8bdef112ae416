// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! An in-process "pipe", constructed using `socketpair(2)`, that stands in for the rpmsg
//! transport endpoint in tests: writes on one end show up as reads on the other, with the same
//! ordering and framing guarantees the specification assumes of the real transport.

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

pub struct Endpoint {
    fd: std::os::fd::OwnedFd,
}

pub fn pipe() -> std::io::Result<(Endpoint, Endpoint)> {
    let (a, b) = socketpair(
        AddressFamily::Unix,
        SockType::Datagram,
        None,
        SockFlag::empty(),
    )?;

    Ok((Endpoint { fd: a }, Endpoint { fd: b }))
}

impl Endpoint {
    /// Clone the underlying descriptor so the endpoint can be driven from another thread
    /// (e.g. a reader thread alongside a writer thread) without an external `Mutex`.
    pub fn try_clone(&self) -> std::io::Result<Self> {
        Ok(Self {
            fd: nix::unistd::dup(&self.fd)?,
        })
    }
}

impl std::io::Read for Endpoint {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(nix::unistd::read(&self.fd, buf)?)
    }
}

impl std::io::Write for Endpoint {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(nix::unistd::write(&self.fd, buf)?)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
