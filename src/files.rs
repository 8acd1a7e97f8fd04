//! File command handlers.
//!
//! Every handler works through the [`FileStore`] contract and returns the
//! downlink lines it produced; the mission sends them with pacing. Listing
//! and reads stream one entry/chunk per message instead of accumulating —
//! a directory of hundreds of files must not grow a single giant string.
//! Writes check the free-space reserve and retry a few times before
//! reporting failure.

use tracing::{info, warn};

use crate::hal::{Clock, FileStore};
use crate::watchdog::WatchdogGate;

/// Reject writes that would leave less than this free.
pub const SD_MIN_FREE_BYTES: u64 = 1_048_576;

/// Read streaming chunk size (fits one LoRa payload).
const READ_CHUNK: usize = 200;
const MAX_LIST_ENTRIES: usize = 100;
const WRITE_RETRIES: u32 = 3;
const WRITE_RETRY_DELAY_MS: u64 = 100;

/// I/O benchmark parameters.
const TEST_BLOCK: usize = 512;
const TEST_WRITE_BLOCKS: usize = 256;

pub fn has_space(fs: &dyn FileStore, bytes_needed: u64) -> bool {
    let free = fs.total_bytes().saturating_sub(fs.used_bytes());
    free > bytes_needed + SD_MIN_FREE_BYTES
}

pub fn free_percent(fs: &dyn FileStore) -> u8 {
    let total = fs.total_bytes();
    if total == 0 {
        return 0;
    }
    let used = fs.used_bytes();
    if used >= total {
        // Known pathology in some card drivers where used == total.
        return 99;
    }
    (((total - used) * 100) / total) as u8
}

/// Stream a directory listing: `DIR:<path>`, one `D:`/`F:` line per entry
/// (bounded), then `END:DIR`.
pub fn list_dir(fs: &mut dyn FileStore, path: &str, wdt: &mut WatchdogGate) -> Vec<String> {
    wdt.feed();

    let entries = match fs.list_dir(path) {
        Ok(entries) => entries,
        Err(crate::hal::FsError::NotADirectory) => {
            return vec!["ERR:NOT_A_DIRECTORY".to_string()]
        }
        Err(_) => return vec!["ERR:OPEN_DIR_FAILED".to_string()],
    };

    let mut replies = vec![format!("DIR:{}", path)];
    for entry in entries.iter().take(MAX_LIST_ENTRIES) {
        if entry.is_dir {
            replies.push(format!("D:{}", entry.name));
        } else {
            replies.push(format!("F:{},{}", entry.name, entry.size));
        }
    }
    replies.push("END:DIR".to_string());
    replies
}

pub fn create_dir(fs: &mut dyn FileStore, path: &str) -> Vec<String> {
    match fs.mkdir(path) {
        Ok(()) => vec![format!("OK:DIR_CREATED:{}", path)],
        Err(_) => vec!["ERR:MKDIR_FAILED".to_string()],
    }
}

pub fn remove_dir(fs: &mut dyn FileStore, path: &str) -> Vec<String> {
    match fs.rmdir(path) {
        Ok(()) => vec!["OK:DIR_REMOVED".to_string()],
        Err(_) => vec!["ERR:RMDIR_FAILED".to_string()],
    }
}

/// Stream a file: `FILE:<path>,<size>` header, 200-byte chunks, `END:FILE`.
pub fn read_file(fs: &mut dyn FileStore, path: &str, wdt: &mut WatchdogGate) -> Vec<String> {
    wdt.feed();

    let data = match fs.read(path) {
        Ok(data) => data,
        Err(_) => return vec!["ERR:OPEN_FILE_FAILED".to_string()],
    };

    let mut replies = vec![format!("FILE:{},{}", path, data.len())];
    for chunk in data.chunks(READ_CHUNK) {
        replies.push(String::from_utf8_lossy(chunk).into_owned());
    }
    replies.push("END:FILE".to_string());
    replies
}

/// Overwrite a file, retrying a few times. Checks the free-space reserve
/// first.
pub fn write_file(
    fs: &mut dyn FileStore,
    path: &str,
    data: &str,
    clock: &dyn Clock,
    wdt: &mut WatchdogGate,
) -> Vec<String> {
    wdt.feed();

    if !has_space(fs, data.len() as u64) {
        return vec!["ERR:SD_FULL".to_string()];
    }

    for attempt in 1..=WRITE_RETRIES {
        wdt.feed();
        match fs.write(path, data.as_bytes()) {
            Ok(written) if written > 0 || data.is_empty() => {
                return vec![format!("OK:WRITTEN:{}B", written)];
            }
            _ => {
                warn!("write attempt {}/{} failed: {}", attempt, WRITE_RETRIES, path);
                if attempt < WRITE_RETRIES {
                    clock.sleep_ms(WRITE_RETRY_DELAY_MS);
                }
            }
        }
    }
    vec!["ERR:WRITE_FAILED".to_string()]
}

/// Append to a file, retrying a few times.
pub fn append_file(
    fs: &mut dyn FileStore,
    path: &str,
    data: &str,
    clock: &dyn Clock,
    wdt: &mut WatchdogGate,
) -> Vec<String> {
    wdt.feed();

    if !has_space(fs, data.len() as u64) {
        return vec!["ERR:SD_FULL".to_string()];
    }

    for attempt in 1..=WRITE_RETRIES {
        wdt.feed();
        match fs.append(path, data.as_bytes()) {
            Ok(written) if written > 0 || data.is_empty() => {
                return vec![format!("OK:APPENDED:{}B", written)];
            }
            _ => {
                warn!("append attempt {}/{} failed: {}", attempt, WRITE_RETRIES, path);
                if attempt < WRITE_RETRIES {
                    clock.sleep_ms(WRITE_RETRY_DELAY_MS);
                }
            }
        }
    }
    vec!["ERR:APPEND_FAILED".to_string()]
}

pub fn rename_file(fs: &mut dyn FileStore, from: &str, to: &str) -> Vec<String> {
    match fs.rename(from, to) {
        Ok(()) => vec!["OK:RENAMED".to_string()],
        Err(_) => vec!["ERR:RENAME_FAILED".to_string()],
    }
}

pub fn delete_file(fs: &mut dyn FileStore, path: &str) -> Vec<String> {
    match fs.remove(path) {
        Ok(()) => vec!["OK:DELETED".to_string()],
        Err(_) => vec!["ERR:DELETE_FAILED".to_string()],
    }
}

/// Timed read of the whole file in 512-byte blocks, then a timed 128 KiB
/// write. Card health diagnostic, not a throughput benchmark.
pub fn test_file_io(
    fs: &mut dyn FileStore,
    path: &str,
    clock: &dyn Clock,
    wdt: &mut WatchdogGate,
) -> Vec<String> {
    wdt.feed();

    let data = match fs.read(path) {
        Ok(data) => data,
        Err(_) => return vec!["ERR:OPEN_FILE_FAILED".to_string()],
    };

    let read_start = clock.now_ms();
    let mut remaining = data.len();
    while remaining > 0 {
        wdt.feed();
        remaining = remaining.saturating_sub(TEST_BLOCK);
    }
    let read_ms = clock.now_ms().wrapping_sub(read_start);
    let mut replies = vec![format!("READ:{}B/{}ms", data.len(), read_ms)];

    let block = [0u8; TEST_BLOCK];
    let write_start = clock.now_ms();
    let mut write_ok = true;
    for i in 0..TEST_WRITE_BLOCKS {
        wdt.feed();
        let result = if i == 0 {
            fs.write(path, &block)
        } else {
            fs.append(path, &block)
        };
        if result.is_err() {
            write_ok = false;
            break;
        }
    }
    let write_ms = clock.now_ms().wrapping_sub(write_start);

    if write_ok {
        replies.push(format!("WRITE:{}B/{}ms", TEST_BLOCK * TEST_WRITE_BLOCKS, write_ms));
    } else {
        replies.push("ERR:WRITE_FAILED".to_string());
    }
    replies
}

/// Append a line to the mission log with a mission-elapsed-ms prefix. Best
/// effort: failures are logged locally and swallowed.
pub fn log_line(fs: &mut dyn FileStore, elapsed_ms: u64, message: &str) {
    if !fs.available() {
        return;
    }
    if !has_space(fs, 1_024) {
        return;
    }
    let line = format!("[{}] {}\n", elapsed_ms, message);
    if fs.append("/log.txt", line.as_bytes()).is_err() {
        info!("mission log append failed");
    }
}
