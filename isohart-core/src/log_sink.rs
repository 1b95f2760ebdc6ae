//! Destinations for the lines written by the isolation monitor.

use std::fmt::Debug;
use std::fs::File;
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// The two logs the isolation monitor writes to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum LogChannel {
    /// Accesses to watched ranges.
    Isolation,
    /// Configuration events and protected region faults.
    Module,
}

/// Sink for isolation monitor output. Every line is appended as a whole, without its trailing
/// newline.
pub trait LogSink: Debug + Send {
    fn append(&mut self, channel: LogChannel, line: &str) -> io::Result<()>;
}

/// Discards everything.
impl LogSink for io::Sink {
    fn append(&mut self, _channel: LogChannel, _line: &str) -> io::Result<()> {
        Ok(())
    }
}

/// Writes each channel to its own file in a directory: `pcl-profile{hart_id}.txt` and
/// `pcl-profile-module{hart_id}.txt`.
///
/// Files are created (truncating existing ones) on the first line written to them, and stay open
/// until the log is closed or dropped.
#[derive(Debug)]
pub struct FileLog {
    directory: PathBuf,
    hart_id: u64,
    isolation: Option<LineWriter<File>>,
    module: Option<LineWriter<File>>,
}

impl FileLog {
    pub fn new(directory: impl Into<PathBuf>, hart_id: u64) -> Self {
        Self {
            directory: directory.into(),
            hart_id,
            isolation: None,
            module: None,
        }
    }

    /// Returns the path of the file `channel` is written to.
    pub fn path(&self, channel: LogChannel) -> PathBuf {
        let name = match channel {
            LogChannel::Isolation => format!("pcl-profile{}.txt", self.hart_id),
            LogChannel::Module => format!("pcl-profile-module{}.txt", self.hart_id),
        };
        self.directory.join(name)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Flushes and closes both files. Writing again afterwards reopens (and truncates) them.
    pub fn close(&mut self) -> io::Result<()> {
        for writer in [self.isolation.take(), self.module.take()].into_iter().flatten() {
            writer.into_inner().map_err(|err| err.into_error())?.sync_all()?;
        }
        Ok(())
    }
}

impl LogSink for FileLog {
    fn append(&mut self, channel: LogChannel, line: &str) -> io::Result<()> {
        let path = self.path(channel);
        let slot = match channel {
            LogChannel::Isolation => &mut self.isolation,
            LogChannel::Module => &mut self.module,
        };
        let writer = match slot.take() {
            Some(writer) => writer,
            None => LineWriter::new(File::create(path)?),
        };
        writeln!(slot.insert(writer), "{line}")
    }
}

/// Keeps all lines in memory. Clones share the same lines, so a clone can be handed to a hart
/// while the original is used to inspect the output.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    lines: Arc<Mutex<Vec<(LogChannel, String)>>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all lines written so far, in order.
    pub fn lines(&self) -> Vec<(LogChannel, String)> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the lines written to `channel` so far, in order.
    pub fn channel(&self, channel: LogChannel) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, line)| line.clone())
            .collect()
    }
}

impl LogSink for MemoryLog {
    fn append(&mut self, channel: LogChannel, line: &str) -> io::Result<()> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((channel, line.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("isohart-{}-{name}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_memory_log_is_shared() {
        let log = MemoryLog::new();
        let mut sink: Box<dyn LogSink> = Box::new(log.clone());
        sink.append(LogChannel::Isolation, "first").unwrap();
        sink.append(LogChannel::Module, "second").unwrap();
        assert_eq!(
            vec![
                (LogChannel::Isolation, String::from("first")),
                (LogChannel::Module, String::from("second")),
            ],
            log.lines()
        );
        assert_eq!(vec![String::from("second")], log.channel(LogChannel::Module));
    }

    #[test]
    fn test_file_log_opens_lazily() {
        let dir = temp_dir("lazy");
        let mut log = FileLog::new(&dir, 7);
        assert_eq!(dir.join("pcl-profile7.txt"), log.path(LogChannel::Isolation));
        assert_eq!(dir.join("pcl-profile-module7.txt"), log.path(LogChannel::Module));
        let _ = fs::remove_file(log.path(LogChannel::Module));

        log.append(LogChannel::Isolation, "a").unwrap();
        log.append(LogChannel::Isolation, "b").unwrap();
        log.close().unwrap();

        assert_eq!("a\nb\n", fs::read_to_string(log.path(LogChannel::Isolation)).unwrap());
        assert!(!log.path(LogChannel::Module).exists());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_file_log_reports_errors() {
        let mut log = FileLog::new("/nonexistent/isohart/directory", 0);
        assert!(log.append(LogChannel::Module, "line").is_err());
    }
}
