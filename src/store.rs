//! Append-only traffic logs
//!
//! Public messages, private messages and login/logout events each go to
//! their own plain-text file, one file per calendar day:
//!
//! ```text
//! <root>/public_2024-03-09.log   [2024-03-09 10:15:00][PUBLIC][alice] hi
//! <root>/private_2024-03-09.log  [2024-03-09 10:15:07][PRIVATE][alice->bob] psst
//! <root>/login_2024-03-09.log    [2024-03-09 10:14:58] LOGIN alice from 10.0.0.2:51234
//! ```
//!
//! Files are opened lazily on the first write of a day. One lock covers all
//! three files and every line is flushed as soon as it is written.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::AppError;
use crate::types::{LOG_DATE_FORMAT, LOG_TIME_FORMAT};

/// Log file category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Public,
    Private,
    Login,
}

impl LogCategory {
    /// File name prefix
    pub fn prefix(self) -> &'static str {
        match self {
            LogCategory::Public => "public",
            LogCategory::Private => "private",
            LogCategory::Login => "login",
        }
    }

    fn slot(self) -> usize {
        match self {
            LogCategory::Public => 0,
            LogCategory::Private => 1,
            LogCategory::Login => 2,
        }
    }
}

#[derive(Debug)]
struct Inner {
    /// Date the open handles belong to
    date: Option<NaiveDate>,
    files: [Option<File>; 3],
}

/// Date-partitioned message log
#[derive(Debug)]
pub struct MessageStore {
    root: PathBuf,
    inner: Mutex<Inner>,
}

impl MessageStore {
    /// Create a store rooted at `root`; nothing touches the disk until the first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            inner: Mutex::new(Inner {
                date: None,
                files: [None, None, None],
            }),
        }
    }

    /// Path of the log file for a category and day
    pub fn log_path(&self, category: LogCategory, date: NaiveDate) -> PathBuf {
        let name = format!("{}_{}.log", category.prefix(), date.format(LOG_DATE_FORMAT));
        self.root.join(name)
    }

    pub fn record_public(&self, sender: &str, text: &str) -> Result<(), AppError> {
        self.record_public_at(Local::now(), sender, text)
    }

    pub fn record_private(&self, sender: &str, receiver: &str, text: &str) -> Result<(), AppError> {
        self.record_private_at(Local::now(), sender, receiver, text)
    }

    pub fn record_login(&self, username: &str, peer: &str, is_login: bool) -> Result<(), AppError> {
        self.record_login_at(Local::now(), username, peer, is_login)
    }

    fn record_public_at(
        &self,
        now: DateTime<Local>,
        sender: &str,
        text: &str,
    ) -> Result<(), AppError> {
        let line = format!(
            "[{}][PUBLIC][{}] {}",
            now.format(LOG_TIME_FORMAT),
            single_line(sender),
            single_line(text)
        );
        self.append(LogCategory::Public, now, &line)
    }

    fn record_private_at(
        &self,
        now: DateTime<Local>,
        sender: &str,
        receiver: &str,
        text: &str,
    ) -> Result<(), AppError> {
        let line = format!(
            "[{}][PRIVATE][{}->{}] {}",
            now.format(LOG_TIME_FORMAT),
            single_line(sender),
            single_line(receiver),
            single_line(text)
        );
        self.append(LogCategory::Private, now, &line)
    }

    fn record_login_at(
        &self,
        now: DateTime<Local>,
        username: &str,
        peer: &str,
        is_login: bool,
    ) -> Result<(), AppError> {
        let action = if is_login { "LOGIN" } else { "LOGOUT" };
        let line = format!(
            "[{}] {} {} from {}",
            now.format(LOG_TIME_FORMAT),
            action,
            single_line(username),
            peer
        );
        self.append(LogCategory::Login, now, &line)
    }

    /// Write one line to today's file for `category`
    ///
    /// A handle that fails is dropped so the next write reopens it.
    fn append(
        &self,
        category: LogCategory,
        now: DateTime<Local>,
        line: &str,
    ) -> Result<(), AppError> {
        let today = now.date_naive();
        let path = self.log_path(category, today);
        let mut inner = self.inner.lock();

        if inner.date != Some(today) {
            inner.files = [None, None, None];
            inner.date = Some(today);
        }

        let slot = &mut inner.files[category.slot()];
        if slot.is_none() {
            *slot = Some(self.open(&path)?);
            debug!("Opened log file {}", path.display());
        }

        let written = match slot.as_mut() {
            Some(file) => writeln!(file, "{}", line).and_then(|_| file.flush()),
            None => Ok(()),
        };

        if let Err(source) = written {
            *slot = None;
            return Err(AppError::Storage { path, source });
        }
        Ok(())
    }

    fn open(&self, path: &Path) -> Result<File, AppError> {
        let storage_err = |source| AppError::Storage {
            path: path.to_path_buf(),
            source,
        };
        fs::create_dir_all(&self.root).map_err(storage_err)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(storage_err)
    }

    /// Recent lines from today's logs, most recent first
    ///
    /// Without `user2` this reads the public log. With `user2` it reads the
    /// private log and keeps lines mentioning both users (plain substring
    /// match). At most `limit` lines are returned.
    pub fn history(
        &self,
        user1: &str,
        user2: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, AppError> {
        self.history_on(Local::now().date_naive(), user1, user2, limit)
    }

    fn history_on(
        &self,
        date: NaiveDate,
        user1: &str,
        user2: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, AppError> {
        let category = match user2 {
            Some(_) => LogCategory::Private,
            None => LogCategory::Public,
        };
        let path = self.log_path(category, date);
        if limit == 0 {
            return Ok(Vec::new());
        }

        // Readers share the writers' lock so they never see a half-written line
        let _guard = self.inner.lock();

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(AppError::Storage { path, source }),
        };

        // Only the newest `limit` matches are kept while scanning
        let mut recent = VecDeque::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| AppError::Storage {
                path: path.clone(),
                source,
            })?;
            let keep = match user2 {
                Some(other) => line.contains(user1) && line.contains(other),
                None => true,
            };
            if !keep {
                continue;
            }
            if recent.len() == limit {
                recent.pop_front();
            }
            recent.push_back(line);
        }

        Ok(recent.into_iter().rev().collect())
    }
}

/// Keep one entry on one line
fn single_line(text: &str) -> String {
    text.replace(&['\r', '\n'][..], " ")
}
