// Execution engine: run controller-supplied command text as a shell pipeline
// and capture its output.
//
// Failure to create the process is a normal outcome (the controller sent bad
// command text), reported with the -1 sentinel status rather than an error;
// the connection stays open and the worker keeps serving commands.

use anvil_sdk::TraceWriter;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

/// Shell used for command text.
pub const SHELL: &str = "/bin/sh";

/// Sentinel status for commands that could not be started or died on a signal.
pub const STATUS_FAILED: i32 = -1;

/// Run `command` through the shell with `workdir` as its working directory,
/// returning the exit status and the captured standard output.
///
/// The command bytes reach the shell unmodified on unix, including non-UTF-8
/// sequences. stderr is inherited so it lands in the worker's own diagnostic
/// stream; stdin is closed. Blocks the session until the child exits (one
/// command at a time, by design).
pub async fn execute(command: &[u8], workdir: &Path, trace: &dyn TraceWriter) -> (i32, Vec<u8>) {
    trace.verbose(&format!(
        "running command: {}",
        String::from_utf8_lossy(command)
    ));
    let start = Instant::now();

    #[cfg(unix)]
    let command_text: &OsStr = {
        use std::os::unix::ffi::OsStrExt;
        OsStr::from_bytes(command)
    };
    #[cfg(not(unix))]
    let lossy = String::from_utf8_lossy(command).into_owned();
    #[cfg(not(unix))]
    let command_text: &OsStr = OsStr::new(&lossy);

    let child = Command::new(SHELL)
        .arg("-c")
        .arg(command_text)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => {
            trace.warning(&format!("failed to start {SHELL}: {e}"));
            return (STATUS_FAILED, Vec::new());
        }
    };

    match child.wait_with_output().await {
        Ok(output) => {
            let status = output.status.code().unwrap_or(STATUS_FAILED);
            trace.verbose(&format!(
                "command finished with status {} and {} output bytes in {:.2?}",
                status,
                output.stdout.len(),
                start.elapsed()
            ));
            (status, output.stdout)
        }
        Err(e) => {
            trace.warning(&format!("failed to collect command output: {e}"));
            (STATUS_FAILED, Vec::new())
        }
    }
}
