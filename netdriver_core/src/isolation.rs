use crate::config::DriverSettings;
use crate::error::DriverError;
use log::info;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationOutcome {
    /// Namespaces were entered by this call.
    Entered,
    /// A previous call already entered them; nothing was done.
    AlreadyEntered,
    /// The platform has no namespace support; running unisolated.
    Unsupported,
    /// Isolation was switched off in the settings.
    Disabled,
}

/// The "namespaces already entered" flag.
///
/// Set before the first attempt runs, never reset. A failed attempt is fatal,
/// so it is never retried either.
#[derive(Debug, Default)]
pub struct IsolationState {
    entered: AtomicBool,
}

static PROCESS_ISOLATION: IsolationState = IsolationState::new();

impl IsolationState {
    pub const fn new() -> Self {
        Self {
            entered: AtomicBool::new(false),
        }
    }

    pub fn is_entered(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }

    /// Runs `enter` on the first call only.
    pub fn ensure_with<F>(&self, enter: F) -> Result<IsolationOutcome, DriverError>
    where
        F: FnOnce() -> Result<IsolationOutcome, DriverError>,
    {
        if self.entered.swap(true, Ordering::SeqCst) {
            return Ok(IsolationOutcome::AlreadyEntered);
        }
        enter()
    }

    pub fn ensure_isolated(&self, tmpfs_path: &Path) -> Result<IsolationOutcome, DriverError> {
        self.ensure_with(|| enter_namespaces(tmpfs_path))
    }
}

/// Isolates the whole process once, according to `settings`: fresh user,
/// network, mount, IPC and UTS namespaces, `lo` up and a tmpfs on `/tmp`.
///
/// Must run before the server thread starts; `unshare(CLONE_NEWUSER)` is
/// refused once the process has more than one thread.
pub fn ensure_isolated(settings: &DriverSettings) -> Result<IsolationOutcome, DriverError> {
    if !settings.isolate {
        info!(
            "Net driver (pid={}): namespace isolation disabled by configuration",
            std::process::id()
        );
        return Ok(IsolationOutcome::Disabled);
    }
    PROCESS_ISOLATION.ensure_isolated(&settings.tmpfs_path)
}

#[cfg(target_os = "linux")]
fn enter_namespaces(tmpfs_path: &Path) -> Result<IsolationOutcome, DriverError> {
    linux::enter_namespaces(tmpfs_path)?;
    info!(
        "Net driver (pid={}): entered private namespaces, 'lo' is up, tmpfs mounted at {:?}",
        std::process::id(),
        tmpfs_path
    );
    Ok(IsolationOutcome::Entered)
}

#[cfg(not(target_os = "linux"))]
fn enter_namespaces(_tmpfs_path: &Path) -> Result<IsolationOutcome, DriverError> {
    log::warn!(
        "Net driver (pid={}): namespaces are not supported on this platform, running unisolated",
        std::process::id()
    );
    Ok(IsolationOutcome::Unsupported)
}

#[cfg(target_os = "linux")]
mod linux {
    use crate::error::DriverError;
    use log::warn;
    use nix::mount::{MsFlags, mount};
    use nix::sched::{CloneFlags, unshare};
    use nix::unistd::{getgid, getuid};
    use socket2::{Domain, Socket, Type};
    use std::io;
    use std::os::fd::AsRawFd;
    use std::path::Path;

    fn step_failed(step: &'static str) -> impl FnOnce(io::Error) -> DriverError {
        move |source| DriverError::Isolation { step, source }
    }

    pub(super) fn enter_namespaces(tmpfs_path: &Path) -> Result<(), DriverError> {
        let uid = getuid();
        let gid = getgid();

        unshare(
            CloneFlags::CLONE_NEWUSER
                | CloneFlags::CLONE_NEWNET
                | CloneFlags::CLONE_NEWNS
                | CloneFlags::CLONE_NEWIPC
                | CloneFlags::CLONE_NEWUTS,
        )
        .map_err(io::Error::from)
        .map_err(step_failed(
            "unshare(CLONE_NEWUSER|CLONE_NEWNET|CLONE_NEWNS|CLONE_NEWIPC|CLONE_NEWUTS)",
        ))?;

        // Kernels older than 3.19 have no setgroups file.
        match std::fs::write("/proc/self/setgroups", "deny") {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("/proc/self/setgroups is missing, leaving setgroups() allowed");
            }
            other => other.map_err(step_failed("write /proc/self/setgroups"))?,
        }
        std::fs::write("/proc/self/uid_map", format!("{uid} {uid} 1"))
            .map_err(step_failed("write /proc/self/uid_map"))?;
        std::fs::write("/proc/self/gid_map", format!("{gid} {gid} 1"))
            .map_err(step_failed("write /proc/self/gid_map"))?;

        iface_up("lo").map_err(step_failed("bring up interface 'lo'"))?;

        mount(
            Some("tmpfs"),
            tmpfs_path,
            Some("tmpfs"),
            MsFlags::empty(),
            None::<&str>,
        )
        .map_err(io::Error::from)
        .map_err(step_failed("mount tmpfs"))?;

        Ok(())
    }

    fn iface_up(name: &str) -> io::Result<()> {
        if name.len() >= libc::IFNAMSIZ {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("interface name '{name}' is too long"),
            ));
        }
        let sock = Socket::new(Domain::IPV4, Type::DGRAM, None)?;

        // SAFETY: ifreq is a plain C struct for which all-zero is a valid value.
        let mut req: libc::ifreq = unsafe { std::mem::zeroed() };
        for (dst, src) in req.ifr_name.iter_mut().zip(name.as_bytes()) {
            *dst = *src as libc::c_char;
        }

        // SAFETY: `req` is a live, NUL-terminated ifreq for the duration of both calls.
        unsafe {
            if libc::ioctl(
                sock.as_raw_fd(),
                libc::SIOCGIFFLAGS,
                &mut req as *mut libc::ifreq,
            ) == -1
            {
                return Err(io::Error::last_os_error());
            }
            req.ifr_ifru.ifru_flags |= (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;
            if libc::ioctl(
                sock.as_raw_fd(),
                libc::SIOCSIFFLAGS,
                &mut req as *mut libc::ifreq,
            ) == -1
            {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }
}
