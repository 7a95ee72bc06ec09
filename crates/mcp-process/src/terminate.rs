//! Cross-platform process termination primitives.

use mcp_common::{OrchestrationError, OrchestrationResult};

/// Ask a process to terminate (SIGTERM on Unix, TerminateProcess on Windows).
///
/// Returns `Ok(())` when the process is already gone; double-stop must not
/// surface as an error.
pub fn terminate_gracefully(name: &str, pid: u32) -> OrchestrationResult<()> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if pid == 0 || pid > i32::MAX as u32 {
            return Ok(());
        }
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(OrchestrationError::stop_failed(
                name,
                format!("SIGTERM to pid {} failed: {}", pid, e),
            )),
        }
    }

    #[cfg(windows)]
    {
        // Windows has no polite termination signal for console-less children;
        // TerminateProcess serves both the graceful and forced paths.
        kill_windows(name, pid)
    }
}

/// Force-kill a process (SIGKILL on Unix, TerminateProcess on Windows).
pub fn force_kill(name: &str, pid: u32) -> OrchestrationResult<()> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if pid == 0 || pid > i32::MAX as u32 {
            return Ok(());
        }
        match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(OrchestrationError::stop_failed(
                name,
                format!("SIGKILL to pid {} failed: {}", pid, e),
            )),
        }
    }

    #[cfg(windows)]
    {
        kill_windows(name, pid)
    }
}

#[cfg(windows)]
fn kill_windows(name: &str, pid: u32) -> OrchestrationResult<()> {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};

    unsafe {
        let handle = match OpenProcess(PROCESS_TERMINATE, false, pid) {
            Ok(h) if !h.is_invalid() => h,
            // Process already gone (or never ours): treat as stopped.
            _ => return Ok(()),
        };

        let result = TerminateProcess(handle, 1);
        let _ = CloseHandle(handle);

        result.map_err(|e| {
            OrchestrationError::stop_failed(
                name,
                format!("TerminateProcess on pid {} failed: {}", pid, e),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminating_a_dead_pid_is_a_no_op() {
        // PID is from the reserved/very-unlikely range; ESRCH maps to Ok.
        assert!(terminate_gracefully("ghost", 4_000_000).is_ok());
        assert!(force_kill("ghost", 4_000_000).is_ok());
    }
}
