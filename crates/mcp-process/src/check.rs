//! Non-blocking process liveness probing.

/// Check whether a process with the given PID is alive.
///
/// Never fails: a PID we cannot observe is reported as dead. On Unix this is
/// a `kill(pid, 0)` probe; permission-denied (`EPERM`) also maps to `false`
/// because a process we cannot signal is not one we supervise. On Windows it
/// is `OpenProcess` + `GetExitCodeProcess`.
pub fn is_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        is_alive_unix(pid)
    }

    #[cfg(windows)]
    {
        is_alive_windows(pid)
    }
}

#[cfg(unix)]
fn is_alive_unix(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // PID 0 addresses the caller's process group and values beyond i32 are
    // not representable; neither names a process we could supervise.
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }

    // Signal 0 performs the existence check without delivering anything.
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(windows)]
fn is_alive_windows(pid: u32) -> bool {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    const STILL_ACTIVE: u32 = 259;

    unsafe {
        let handle = match OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) {
            Ok(h) => h,
            Err(_) => return false,
        };

        let mut exit_code: u32 = 0;
        let alive = GetExitCodeProcess(handle, &mut exit_code).is_ok() && exit_code == STILL_ACTIVE;
        let _ = CloseHandle(handle);
        alive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn pid_zero_is_never_alive() {
        assert!(!is_alive(0));
    }

    #[test]
    fn foreign_pid_does_not_panic() {
        // An absurdly high PID is either unused or not ours; either way the
        // probe must return a bool, not panic.
        let _ = is_alive(u32::MAX - 1);
    }
}
