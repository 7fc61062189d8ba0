//! Reading the time and sequence range of a journal file.

use crate::file::ArchivedName;
use crate::registry::FileRegistry;
use journal_common::reader::Result as ReaderResult;
use journal_common::{ReaderError, ReaderFactory};
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

/// First and last entry of a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    pub first_ut: u64,
    pub last_ut: u64,
    pub first_seqnum: u64,
    pub last_seqnum: u64,
    pub first_writer: Option<Uuid>,
    pub last_writer: Option<Uuid>,
}

impl Header {
    fn read(factory: &dyn ReaderFactory, path: &str) -> ReaderResult<Self> {
        let mut reader = factory.open(Path::new(path))?;
        let mut header = Header::default();

        reader.seek_head()?;
        if reader.next()? {
            header.first_ut = reader.realtime_usec().unwrap_or(0);
            if let Some(info) = reader.seqnum() {
                header.first_seqnum = info.seqnum;
                header.first_writer = Some(info.writer);
            }
        }

        reader.seek_tail()?;
        if reader.previous()? {
            header.last_ut = reader.realtime_usec().unwrap_or(0);
            if let Some(info) = reader.seqnum() {
                header.last_seqnum = info.seqnum;
                header.last_writer = Some(info.writer);
            }
        }

        header.normalize(path);
        Ok(header)
    }

    fn normalize(&mut self, path: &str) {
        if self.first_ut > self.last_ut {
            std::mem::swap(&mut self.first_ut, &mut self.last_ut);
        }

        if self.first_seqnum > self.last_seqnum {
            std::mem::swap(&mut self.first_seqnum, &mut self.last_seqnum);
            std::mem::swap(&mut self.first_writer, &mut self.last_writer);
        }

        if self.first_seqnum == 0 || self.first_ut == 0 {
            if let Some(name) = ArchivedName::parse(path) {
                if self.first_seqnum == 0 {
                    if let Some(seqnum) = name.head_seqnum {
                        self.first_seqnum = seqnum;
                        self.first_writer = self.first_writer.or(name.writer);
                    }
                }
                if self.first_ut == 0 {
                    self.first_ut = name.head_realtime;
                }
            }
        }
    }

    /// Entries between the first and last seqnum. Only meaningful when the
    /// same writer produced both.
    pub fn messages(&self, path: &str) -> u64 {
        if self.last_seqnum <= self.first_seqnum {
            return 0;
        }

        if self.first_writer != self.last_writer {
            debug!(
                path,
                first_writer = ?self.first_writer,
                last_writer = ?self.last_writer,
                "journal file written by more than one writer, message count unknown"
            );
            return 0;
        }

        self.last_seqnum - self.first_seqnum + 1
    }
}

impl FileRegistry {
    /// Re-read the header of `path` unless it is current for the file's mtime.
    ///
    /// The file is opened without holding the registry lock. The result is
    /// discarded if a newer header was stored in the meantime.
    pub fn update_header(&self, path: &str) {
        let Some(file) = self.get(path) else {
            return;
        };

        if file.header_is_current() {
            return;
        }

        let stamp = file.file_last_modified_ut;
        let result = Header::read(self.inner.factory.as_ref(), path);
        self.apply_header(path, stamp, result);
    }

    fn apply_header(&self, path: &str, stamp: u64, result: Result<Header, ReaderError>) {
        let mut files = self.inner.files.write();
        let Some(file) = files.get_mut(path) else {
            return;
        };

        if file.last_scan_header_vs_last_modified_ut > stamp {
            return;
        }

        match result {
            Ok(header) => {
                file.msg_first_ut = header.first_ut;
                file.msg_last_ut = header.last_ut;
                file.first_seqnum = header.first_seqnum;
                file.last_seqnum = header.last_seqnum;
                file.first_writer_id = header.first_writer;
                file.last_writer_id = header.last_writer;
                file.messages_in_file = header.messages(path);
                file.failed_modified_ut = None;
            }
            Err(e) => {
                if !file.logged_failure {
                    warn!(path, error = %e, "cannot open journal file to read its header");
                    file.logged_failure = true;
                }
                file.msg_first_ut = 0;
                file.msg_last_ut = file.file_last_modified_ut;
                file.failed_modified_ut = Some(stamp);
            }
        }

        file.last_scan_header_vs_last_modified_ut = stamp;
    }

    /// Exclude `path` from queries until its mtime changes.
    pub fn mark_unreadable(&self, path: &str, error: &ReaderError) {
        let mut files = self.inner.files.write();
        let Some(file) = files.get_mut(path) else {
            return;
        };

        if !file.logged_failure {
            warn!(path, error = %error, "cannot open journal file");
            file.logged_failure = true;
        }
        file.failed_modified_ut = Some(file.file_last_modified_ut);
    }
}
