//! Native builtin calls.
//!
//! A fixed table of host-backed routines indexed by small integer id,
//! reachable from bytecode through `ncall`. Arguments arrive as raw stack
//! slots in push order and are interpreted per the POSIX prototype of each
//! routine; pointer arguments are VM RAM offsets and are translated to host
//! slices before the call. Ids at or past the end of the table fault, as do
//! arity mismatches.
//!
//! Each routine produces its result through the VM return helper, which
//! performs the same unwind as `ret`; the executor drives that after the
//! routine returns its value.

use crate::instr::Mode;
use crate::value::Value;
use crate::vm::{Fault, Vm};
use std::ffi::CString;

pub type NativeCall = fn(&mut Vm, &[Value]) -> Result<Value, Fault>;

pub struct Builtin {
    pub name: &'static str,
    /// The `__`-prefixed define the assembler installs for this id.
    pub sym: &'static str,
    pub run: NativeCall,
}

macro_rules! builtin_table {
    ($( $name:ident ),* $(,)?) => {
        static BUILTINS: &[Builtin] = &[
            $( Builtin {
                name: stringify!($name),
                sym: concat!("__", stringify!($name)),
                run: $name,
            }, )*
        ];
    };
}

builtin_table! {
    read, write, open, close, stat, fstat, lstat, poll, lseek, pipe,
    select, dup, dup2, getpid, sendfile, socket, connect, accept, sendto,
    recvfrom, shutdown, bind, listen, getsockname, getpeername, fcntl,
    flock, fsync, getcwd, chdir, rename, mkdir, rmdir, creat, link,
    unlink, symlink,
}

/// All builtins in id order. Index `i` is the `ncall` id of entry `i`.
pub fn all() -> &'static [Builtin] {
    BUILTINS
}

pub fn lookup(id: u64) -> Option<&'static Builtin> {
    BUILTINS.get(id as usize)
}

fn want(name: &'static str, args: &[Value], n: usize) -> Result<(), Fault> {
    if args.len() != n {
        return Err(Fault::NativeCall {
            name,
            message: format!("requires {} arguments, got {}", n, args.len()),
        });
    }
    Ok(())
}

fn want_between(name: &'static str, args: &[Value], lo: usize, hi: usize) -> Result<(), Fault> {
    if args.len() < lo || args.len() > hi {
        return Err(Fault::NativeCall {
            name,
            message: format!(
                "requires {} to {} arguments, got {}",
                lo,
                hi,
                args.len()
            ),
        });
    }
    Ok(())
}

/// Borrows `len` bytes of VM RAM at guest address `addr`.
fn region<'a>(
    vm: &'a mut Vm,
    name: &'static str,
    addr: u64,
    len: u64,
) -> Result<&'a mut [u8], Fault> {
    vm.ram_mut()
        .slice_mut(addr, len)
        .map_err(|_| Fault::NativeCall {
            name,
            message: format!("invalid buffer [{}; {}]", addr, len),
        })
}

/// Raw host pointer to `len` bytes of RAM, or null when `addr` is 0.
fn opt_region_ptr(
    vm: &mut Vm,
    name: &'static str,
    addr: u64,
    len: u64,
) -> Result<*mut u8, Fault> {
    if addr == 0 {
        Ok(std::ptr::null_mut())
    } else {
        Ok(region(vm, name, addr, len)?.as_mut_ptr())
    }
}

/// Copies the NUL-terminated guest string at `addr` into a host `CString`.
fn c_string(vm: &Vm, name: &'static str, addr: u64) -> Result<CString, Fault> {
    let mut bytes = Vec::new();
    let mut at = addr;
    loop {
        let byte = vm
            .ram()
            .read_uint(at, Mode::Byte)
            .map_err(|_| Fault::NativeCall {
                name,
                message: format!("unterminated string at {}", addr),
            })?;
        if byte == 0 {
            break;
        }
        bytes.push(byte as u8);
        at += 1;
    }
    CString::new(bytes).map_err(|_| Fault::NativeCall {
        name,
        message: format!("invalid string at {}", addr),
    })
}

fn ret(value: i64) -> Result<Value, Fault> {
    Ok(Value::from(value))
}

fn read(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("read", args, 3)?;

    let fd = args[0].i() as libc::c_int;
    let size = args[2].i() as usize;
    let buf = region(vm, "read", args[1].u(), size as u64)?;

    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, size) };
    ret(n as i64)
}

fn write(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("write", args, 3)?;

    let fd = args[0].i() as libc::c_int;
    let size = args[2].i() as usize;
    let buf = region(vm, "write", args[1].u(), size as u64)?;

    let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, size) };
    ret(n as i64)
}

fn open(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want_between("open", args, 2, 3)?;

    let path = c_string(vm, "open", args[0].u())?;
    let flags = args[1].i() as libc::c_int;
    let mode = if args.len() == 3 {
        args[2].i() as libc::c_int
    } else {
        0o640
    };

    let fd = unsafe { libc::open(path.as_ptr(), flags, mode) };
    ret(i64::from(fd))
}

fn close(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("close", args, 1)?;

    let fd = unsafe { libc::close(args[0].i() as libc::c_int) };
    ret(i64::from(fd))
}

fn stat(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("stat", args, 2)?;

    let path = c_string(vm, "stat", args[0].u())?;
    let buf = region(
        vm,
        "stat",
        args[1].u(),
        std::mem::size_of::<libc::stat>() as u64,
    )?;

    let r = unsafe { libc::stat(path.as_ptr(), buf.as_mut_ptr() as *mut libc::stat) };
    ret(i64::from(r))
}

fn fstat(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("fstat", args, 2)?;

    let fd = args[0].i() as libc::c_int;
    let buf = region(
        vm,
        "fstat",
        args[1].u(),
        std::mem::size_of::<libc::stat>() as u64,
    )?;

    let r = unsafe { libc::fstat(fd, buf.as_mut_ptr() as *mut libc::stat) };
    ret(i64::from(r))
}

fn lstat(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("lstat", args, 2)?;

    let path = c_string(vm, "lstat", args[0].u())?;
    let buf = region(
        vm,
        "lstat",
        args[1].u(),
        std::mem::size_of::<libc::stat>() as u64,
    )?;

    let r = unsafe { libc::lstat(path.as_ptr(), buf.as_mut_ptr() as *mut libc::stat) };
    ret(i64::from(r))
}

fn poll(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("poll", args, 3)?;

    let nfds = args[1].u();
    let timeout = args[2].i() as libc::c_int;
    let fds = region(
        vm,
        "poll",
        args[0].u(),
        nfds * std::mem::size_of::<libc::pollfd>() as u64,
    )?;

    let r = unsafe {
        libc::poll(
            fds.as_mut_ptr() as *mut libc::pollfd,
            nfds as libc::nfds_t,
            timeout,
        )
    };
    ret(i64::from(r))
}

fn lseek(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("lseek", args, 3)?;

    let r = unsafe {
        libc::lseek(
            args[0].i() as libc::c_int,
            args[1].i() as libc::off_t,
            args[2].i() as libc::c_int,
        )
    };
    ret(r as i64)
}

fn pipe(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("pipe", args, 1)?;

    let fds = region(vm, "pipe", args[0].u(), 2 * std::mem::size_of::<libc::c_int>() as u64)?;

    let r = unsafe { libc::pipe(fds.as_mut_ptr() as *mut libc::c_int) };
    ret(i64::from(r))
}

fn select(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("select", args, 5)?;

    let nfds = args[0].i() as libc::c_int;
    let set_size = std::mem::size_of::<libc::fd_set>() as u64;
    let readfds = opt_region_ptr(vm, "select", args[1].u(), set_size)?;
    let writefds = opt_region_ptr(vm, "select", args[2].u(), set_size)?;
    let exceptfds = opt_region_ptr(vm, "select", args[3].u(), set_size)?;
    let timeout = opt_region_ptr(
        vm,
        "select",
        args[4].u(),
        std::mem::size_of::<libc::timeval>() as u64,
    )?;

    let r = unsafe {
        libc::select(
            nfds,
            readfds as *mut libc::fd_set,
            writefds as *mut libc::fd_set,
            exceptfds as *mut libc::fd_set,
            timeout as *mut libc::timeval,
        )
    };
    ret(i64::from(r))
}

fn dup(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("dup", args, 1)?;

    let fd = unsafe { libc::dup(args[0].i() as libc::c_int) };
    ret(i64::from(fd))
}

fn dup2(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("dup2", args, 2)?;

    let fd = unsafe { libc::dup2(args[0].i() as libc::c_int, args[1].i() as libc::c_int) };
    ret(i64::from(fd))
}

fn getpid(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("getpid", args, 0)?;

    ret(i64::from(unsafe { libc::getpid() }))
}

fn sendfile(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("sendfile", args, 4)?;

    let out_fd = args[0].i() as libc::c_int;
    let in_fd = args[1].i() as libc::c_int;
    let count = args[3].u() as usize;
    let offset = opt_region_ptr(
        vm,
        "sendfile",
        args[2].u(),
        std::mem::size_of::<libc::off_t>() as u64,
    )?;

    let r = unsafe { libc::sendfile(out_fd, in_fd, offset as *mut libc::off_t, count) };
    ret(r as i64)
}

fn socket(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("socket", args, 3)?;

    let fd = unsafe {
        libc::socket(
            args[0].i() as libc::c_int,
            args[1].i() as libc::c_int,
            args[2].i() as libc::c_int,
        )
    };
    ret(i64::from(fd))
}

fn connect(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("connect", args, 3)?;

    let fd = args[0].i() as libc::c_int;
    let addrlen = args[2].u();
    let addr = region(vm, "connect", args[1].u(), addrlen)?;

    let r = unsafe {
        libc::connect(
            fd,
            addr.as_ptr() as *const libc::sockaddr,
            addrlen as libc::socklen_t,
        )
    };
    ret(i64::from(r))
}

/// Reads the `socklen_t` the guest points `addrlen` at.
fn guest_socklen(vm: &Vm, name: &'static str, addr: u64) -> Result<u64, Fault> {
    vm.ram()
        .read_uint(addr, Mode::Word)
        .map_err(|_| Fault::NativeCall {
            name,
            message: format!("invalid socklen pointer {}", addr),
        })
}

fn accept(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("accept", args, 3)?;

    let fd = args[0].i() as libc::c_int;
    let addrlen_ptr = args[2].u();
    let addr = if args[1].u() == 0 {
        std::ptr::null_mut()
    } else {
        let len = guest_socklen(vm, "accept", addrlen_ptr)?;
        region(vm, "accept", args[1].u(), len)?.as_mut_ptr()
    };
    let lenp = opt_region_ptr(vm, "accept", addrlen_ptr, 4)?;

    let r = unsafe {
        libc::accept(
            fd,
            addr as *mut libc::sockaddr,
            lenp as *mut libc::socklen_t,
        )
    };
    ret(i64::from(r))
}

fn sendto(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("sendto", args, 6)?;

    let sock = args[0].i() as libc::c_int;
    let length = args[2].u() as usize;
    let flags = args[3].i() as libc::c_int;
    let addrlen = args[5].u();
    let message = region(vm, "sendto", args[1].u(), length as u64)?.as_ptr();
    let addr = opt_region_ptr(vm, "sendto", args[4].u(), addrlen)?;

    let r = unsafe {
        libc::sendto(
            sock,
            message as *const libc::c_void,
            length,
            flags,
            addr as *const libc::sockaddr,
            addrlen as libc::socklen_t,
        )
    };
    ret(r as i64)
}

fn recvfrom(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("recvfrom", args, 6)?;

    let sock = args[0].i() as libc::c_int;
    let length = args[2].u() as usize;
    let flags = args[3].i() as libc::c_int;
    let addrlen_ptr = args[5].u();
    let message = region(vm, "recvfrom", args[1].u(), length as u64)?.as_mut_ptr();
    let addr = if args[4].u() == 0 {
        std::ptr::null_mut()
    } else {
        let len = guest_socklen(vm, "recvfrom", addrlen_ptr)?;
        region(vm, "recvfrom", args[4].u(), len)?.as_mut_ptr()
    };
    let lenp = opt_region_ptr(vm, "recvfrom", addrlen_ptr, 4)?;

    let r = unsafe {
        libc::recvfrom(
            sock,
            message as *mut libc::c_void,
            length,
            flags,
            addr as *mut libc::sockaddr,
            lenp as *mut libc::socklen_t,
        )
    };
    ret(r as i64)
}

fn shutdown(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("shutdown", args, 2)?;

    let r = unsafe { libc::shutdown(args[0].i() as libc::c_int, args[1].i() as libc::c_int) };
    ret(i64::from(r))
}

fn bind(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("bind", args, 3)?;

    let fd = args[0].i() as libc::c_int;
    let addrlen = args[2].u();
    let addr = region(vm, "bind", args[1].u(), addrlen)?;

    let r = unsafe {
        libc::bind(
            fd,
            addr.as_ptr() as *const libc::sockaddr,
            addrlen as libc::socklen_t,
        )
    };
    ret(i64::from(r))
}

fn listen(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("listen", args, 2)?;

    let r = unsafe { libc::listen(args[0].i() as libc::c_int, args[1].i() as libc::c_int) };
    ret(i64::from(r))
}

fn getsockname(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("getsockname", args, 3)?;

    let fd = args[0].i() as libc::c_int;
    let addrlen_ptr = args[2].u();
    let len = guest_socklen(vm, "getsockname", addrlen_ptr)?;
    let addr = region(vm, "getsockname", args[1].u(), len)?.as_mut_ptr();
    let lenp = opt_region_ptr(vm, "getsockname", addrlen_ptr, 4)?;

    let r = unsafe {
        libc::getsockname(
            fd,
            addr as *mut libc::sockaddr,
            lenp as *mut libc::socklen_t,
        )
    };
    ret(i64::from(r))
}

fn getpeername(vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want("getpeername", args, 3)?;

    let fd = args[0].i() as libc::c_int;
    let addrlen_ptr = args[2].u();
    let len = guest_socklen(vm, "getpeername", addrlen_ptr)?;
    let addr = region(vm, "getpeername", args[1].u(), len)?.as_mut_ptr();
    let lenp = opt_region_ptr(vm, "getpeername", addrlen_ptr, 4)?;

    let r = unsafe {
        libc::getpeername(
            fd,
            addr as *mut libc::sockaddr,
            lenp as *mut libc::socklen_t,
        )
    };
    ret(i64::from(r))
}

fn fcntl(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    want_between("fcntl", args, 2, 3)?;

    let fd = args[0].i() as libc::c_int;
    let cmd = args[1].i() as libc::c_int;
    let r = if args.len() == 3 {
        unsafe { libc::fcntl(fd, cmd, args[2].i() as libc::c_int) }
    } else {
        unsafe { libc::fcntl(fd, cmd) }
    };
    ret(i64::from(r))
}

macro_rules! unimplemented_builtins {
    ($( $name:ident ),* $(,)?) => {
        $(
            fn $name(_vm: &mut Vm, _args: &[Value]) -> Result<Value, Fault> {
                Err(Fault::NativeCall {
                    name: stringify!($name),
                    message: "not implemented".to_owned(),
                })
            }
        )*
    };
}

unimplemented_builtins! {
    flock, fsync, getcwd, chdir, rename, mkdir, rmdir, creat, link,
    unlink, symlink,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_indexed_by_id() {
        assert_eq!(lookup(0).unwrap().name, "read");
        assert_eq!(lookup(1).unwrap().name, "write");
        assert_eq!(lookup(25).unwrap().name, "fcntl");
        assert_eq!(lookup(36).unwrap().name, "symlink");
        assert!(lookup(37).is_none());
    }
}
