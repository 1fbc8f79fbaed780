//! Resource search service.
//!
//! A small text protocol on its own listener, separate from the
//! control connection: the client sends `SEARCH <query>` and receives
//!
//! ```text
//! FILES\r\n
//! clip1.mp4\r\n
//! clip2.mkv\r\n
//! \r\n
//! ```
//!
//! with names sorted and matched by substring; an empty query lists the
//! whole catalog. Lines that are not SEARCH requests are ignored and
//! the connection stays open for further queries.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::{Result, StreamError};
use crate::media::MediaLibrary;

/// Search listener over a media library's catalog.
pub struct SearchService {
    library: Arc<dyn MediaLibrary>,
    running: Arc<AtomicBool>,
    bind_addr: String,
}

impl SearchService {
    pub fn new(bind_addr: &str, library: Arc<dyn MediaLibrary>) -> Self {
        Self {
            library,
            running: Arc::new(AtomicBool::new(false)),
            bind_addr: bind_addr.to_string(),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(StreamError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;

        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let library = self.library.clone();

        tracing::info!(addr = %self.bind_addr, "search service listening");

        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        let lib = library.clone();
                        thread::spawn(move || serve_queries(stream, lib));
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(50));
                    }
                    Err(e) => {
                        if running.load(Ordering::SeqCst) {
                            tracing::warn!(error = %e, "search accept error");
                        }
                    }
                }
            }
            tracing::debug!("search accept loop exited");
        });

        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn serve_queries(stream: TcpStream, library: Arc<dyn MediaLibrary>) {
    let reader_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    };
    let mut writer = stream;
    let reader = BufReader::new(reader_stream);

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        let Some(query) = line.strip_prefix("SEARCH") else {
            // Not a search request; keep the connection open.
            continue;
        };
        let query = query.trim();

        let names = library.list(query);
        tracing::debug!(query, hits = names.len(), "search");

        let mut response = String::from("FILES\r\n");
        for name in &names {
            response.push_str(name);
            response.push_str("\r\n");
        }
        response.push_str("\r\n");

        if writer.write_all(response.as_bytes()).is_err() {
            break;
        }
    }
}

/// One search round trip from the client side.
pub fn search(addr: &str, query: &str) -> Result<Vec<String>> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    stream.write_all(format!("SEARCH {query}\r\n").as_bytes())?;

    let mut reader = BufReader::new(stream);
    let mut names = Vec::new();
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            if saw_header {
                break;
            }
            continue;
        }
        if line == "FILES" {
            saw_header = true;
            continue;
        }
        names.push(line.to_string());
    }

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::synthetic::SyntheticLibrary;

    #[test]
    fn search_round_trip() {
        let library: Arc<dyn MediaLibrary> = Arc::new(SyntheticLibrary::new(
            vec!["alpha.mp4".into(), "beta.mkv".into(), "gamma.mp4".into()],
            30,
            30,
        ));
        let mut service = SearchService::new("127.0.0.1:18571", library);
        service.start().unwrap();

        assert_eq!(
            search("127.0.0.1:18571", "").unwrap(),
            vec!["alpha.mp4", "beta.mkv", "gamma.mp4"]
        );
        assert_eq!(
            search("127.0.0.1:18571", "mp4").unwrap(),
            vec!["alpha.mp4", "gamma.mp4"]
        );
        assert!(search("127.0.0.1:18571", "zeta").unwrap().is_empty());

        service.stop();
    }
}
