// Wire codec for the controller protocol.
//
// Requests and replies are newline-terminated text lines; `work` and `put`
// carry a raw binary payload of a declared byte length after the line. The
// codec is pure: it never touches the transport, the session reads payloads
// after decoding the header line.

use crate::resources::ResourceSnapshot;

/// Maximum accepted request line length in bytes.
pub const REQUEST_LINE_MAX: usize = 4096;

/// Reply sent for a request that matched no command form.
pub const REPLY_ERROR: &str = "error\n";

/// Reply sent when a `get` target cannot be opened.
pub const REPLY_NOT_FOUND: &str = "-1\n";

/// A decoded request line.
///
/// Decoding priority is first syntactic match: `work`, `put`, `get`, exact
/// `exit`, anything else is `Unrecognized`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `work <byte_length>` — run the payload as a shell command.
    Work { length: u64 },
    /// `put <filename> <byte_length> <mode_octal>` — inbound file write.
    Put {
        filename: String,
        length: u64,
        mode: u32,
    },
    /// `get <filename>` — outbound file read.
    Get { filename: String },
    /// Exact text `exit` — terminate the worker.
    Exit,
    /// Anything else; answered with `error`, connection stays open.
    Unrecognized,
}

/// Decode one request line (without its terminator).
///
/// Trailing extra tokens on `work`/`put`/`get` are ignored; a missing or
/// malformed field makes the line `Unrecognized`.
pub fn parse_request(line: &str) -> Request {
    let mut tokens = line.split_whitespace();
    let keyword = match tokens.next() {
        Some(k) => k,
        None => return Request::Unrecognized,
    };

    match keyword {
        "work" => match tokens.next().and_then(|t| t.parse::<u64>().ok()) {
            Some(length) => Request::Work { length },
            None => Request::Unrecognized,
        },
        "put" => {
            let filename = tokens.next();
            let length = tokens.next().and_then(|t| t.parse::<u64>().ok());
            let mode = tokens.next().and_then(|t| u32::from_str_radix(t, 8).ok());
            match (filename, length, mode) {
                (Some(filename), Some(length), Some(mode)) => Request::Put {
                    filename: filename.to_string(),
                    length,
                    mode,
                },
                _ => Request::Unrecognized,
            }
        }
        "get" => match tokens.next() {
            Some(filename) => Request::Get {
                filename: filename.to_string(),
            },
            None => Request::Unrecognized,
        },
        "exit" if tokens.next().is_none() => Request::Exit,
        _ => Request::Unrecognized,
    }
}

/// Format the readiness advertisement sent whenever the worker is free:
/// `ready <hostname> <cpus> <mem_avail> <mem_total> <disk_avail> <disk_total>`.
pub fn format_ready(resources: &ResourceSnapshot) -> String {
    format!(
        "ready {} {} {} {} {} {}\n",
        resources.hostname,
        resources.cpus,
        resources.memory_avail,
        resources.memory_total,
        resources.disk_avail,
        resources.disk_total
    )
}

/// Format the reply header for a completed `work` command:
/// `result <exit_status> <output_byte_length>`.
pub fn format_result(status: i32, output_len: usize) -> String {
    format!("result {status} {output_len}\n")
}

/// Format the success reply header for a `get` command.
pub fn format_file_size(size: u64) -> String {
    format!("{size}\n")
}
