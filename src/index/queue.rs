//! The single-writer serialized queue that fronts the index database.
//!
//! Mirrors this codebase's write-ahead-log dispatch thread
//! (`crate::util::thread`, `wral::journals`): one dedicated OS thread owns
//! the `rusqlite::Connection`; every caller submits a unit of work and blocks
//! on a channel response. No in-process locking is required on the
//! connection because only the queue's own thread ever touches it.

use rusqlite::Connection;

use std::{any::Any, path::PathBuf};

use crate::{util::thread, Error, Result};

type BoxedAny = Box<dyn Any + Send>;
type Job = Box<dyn FnOnce(&Connection) -> Result<BoxedAny> + Send>;

pub enum Req {
    Exec(Job),
}

pub enum Res {
    Done(Result<BoxedAny>),
}

/// A handle to the single-writer SQLite queue.
///
/// Cloning shares the same worker thread; dropping the last handle joins
/// the thread, committing or rolling back whatever transaction is
/// in-flight per the connection's own drop semantics.
pub struct SqliteQueue {
    thread: thread::Thread<Req, Res>,
}

impl SqliteQueue {
    /// Spawn the writer thread, opening `path` on it. Opening happens on
    /// the worker thread itself so the `Connection`, which is not `Sync`,
    /// never has to cross a thread boundary after creation.
    pub fn start(path: PathBuf) -> Result<SqliteQueue> {
        let thread = thread::Thread::new("imgr-writer", move |rx: thread::Rx<Req, Res>| {
            move || {
                let conn = match Connection::open(&path) {
                    Ok(conn) => conn,
                    Err(err) => {
                        log::error!(target: "imgr  ", "failed to open {:?}: {}", path, err);
                        return;
                    }
                };

                let main_loop = MainLoop { conn, rx };
                main_loop.run()
            }
        });

        Ok(SqliteQueue { thread })
    }

    /// Submit a unit of work to run on the writer thread and block for its
    /// result. `f` receives a `&Connection`; use `conn.transaction()` inside
    /// it for multi-statement atomicity.
    pub fn submit<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let job: Job = Box::new(move |conn| f(conn).map(|v| Box::new(v) as BoxedAny));
        match self.thread.to_tx().request(Req::Exec(job))? {
            Res::Done(result) => {
                let boxed = result?;
                Ok(*boxed
                    .downcast::<T>()
                    .expect("SqliteQueue::submit: response type mismatch"))
            }
        }
    }

    /// Drain the queue and join the worker thread.
    pub fn close(self) -> Result<()> {
        self.thread.join()
    }
}

struct MainLoop {
    conn: Connection,
    rx: thread::Rx<Req, Res>,
}

impl MainLoop {
    fn run(self) {
        for (req, reply) in self.rx.iter() {
            let Req::Exec(job) = req;
            let result = job(&self.conn);
            if let Some(reply) = reply {
                reply.send(Res::Done(result)).ok();
            }
        }
    }
}
