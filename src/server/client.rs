//! Client for connecting to the index server daemon

use crate::index::types::Terminology;
use crate::server::get_socket_path;
use crate::server::protocol::{
    Request, Response, SearchResponse, StatusResponse, read_message, write_message,
};
use std::io::{BufReader, BufWriter};
use std::os::unix::net::UnixStream;
use std::time::Duration;
use thiserror::Error;

/// Read/write timeout
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Index server is not running")]
    NotRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Invalid response from server")]
    InvalidResponse,
}

/// Issues search ids and recognises answers to superseded searches.
///
/// Workers never cancel a search, so a caller that fires a new search
/// before the previous one is answered must drop the older answer itself.
#[derive(Debug, Default)]
pub struct RequestTracker {
    latest: u64,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for a new search; every earlier id becomes stale
    pub fn issue(&mut self) -> u64 {
        self.latest += 1;
        self.latest
    }

    pub fn latest(&self) -> u64 {
        self.latest
    }

    pub fn is_current(&self, id: u64) -> bool {
        id == self.latest
    }

    /// Keep the response only if it answers the latest search
    pub fn accept(&self, response: SearchResponse) -> Option<SearchResponse> {
        self.is_current(response.id).then_some(response)
    }
}

/// Client for the index server
pub struct IndexClient {
    reader: BufReader<UnixStream>,
    writer: BufWriter<UnixStream>,
    tracker: RequestTracker,
}

impl IndexClient {
    /// Try to connect to the running daemon
    /// Returns None if daemon is not running (allowing fallback to direct mode)
    pub fn connect() -> Option<Self> {
        let socket_path = get_socket_path();

        // Quick check if socket exists
        if !socket_path.exists() {
            return None;
        }

        let stream = UnixStream::connect(&socket_path).ok()?;

        let _ = stream.set_read_timeout(Some(IO_TIMEOUT));
        let _ = stream.set_write_timeout(Some(IO_TIMEOUT));

        let reader = BufReader::new(stream.try_clone().ok()?);
        let writer = BufWriter::new(stream);

        Some(Self {
            reader,
            writer,
            tracker: RequestTracker::new(),
        })
    }

    /// Connect or return an error (for when daemon is required)
    pub fn connect_required() -> ClientResult<Self> {
        Self::connect().ok_or(ClientError::NotRunning)
    }

    /// Send a search without waiting for the answer. Returns its id.
    pub fn send_search(&mut self, terminology: Terminology, words: &[String]) -> ClientResult<u64> {
        let id = self.tracker.issue();
        let request = Request::Search {
            terminology,
            words: words.to_vec(),
            id,
        };
        write_message(&mut self.writer, &request)?;
        Ok(id)
    }

    /// Read the next search answer. Stale answers come back as `None`.
    pub fn next_search(&mut self) -> ClientResult<Option<SearchResponse>> {
        let response: Response = read_message(&mut self.reader)?;
        match response {
            Response::Search(sr) => Ok(self.tracker.accept(sr)),
            Response::Error { message } => Err(ClientError::Server(message)),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Search and wait for the answer to this search
    pub fn search(
        &mut self,
        terminology: Terminology,
        words: &[String],
    ) -> ClientResult<SearchResponse> {
        self.send_search(terminology, words)?;
        loop {
            if let Some(response) = self.next_search()? {
                return Ok(response);
            }
        }
    }

    pub fn autocomplete(
        &mut self,
        terminology: Terminology,
        prefix: &str,
        limit: Option<usize>,
    ) -> ClientResult<Vec<String>> {
        let request = Request::Autocomplete {
            terminology,
            prefix: prefix.to_string(),
            limit,
        };

        write_message(&mut self.writer, &request)?;

        let response: Response = read_message(&mut self.reader)?;

        match response {
            Response::Autocomplete { words, .. } => Ok(words),
            Response::Error { message } => Err(ClientError::Server(message)),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Get server status
    pub fn status(&mut self) -> ClientResult<StatusResponse> {
        write_message(&mut self.writer, &Request::Status)?;

        let response: Response = read_message(&mut self.reader)?;

        match response {
            Response::Status(status) => Ok(status),
            Response::Error { message } => Err(ClientError::Server(message)),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Request snapshot reload
    pub fn reload(&mut self, terminology: Option<Terminology>) -> ClientResult<(bool, String)> {
        write_message(&mut self.writer, &Request::Reload { terminology })?;

        let response: Response = read_message(&mut self.reader)?;

        match response {
            Response::Reloaded { success, message } => Ok((success, message)),
            Response::Error { message } => Err(ClientError::Server(message)),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Request graceful shutdown
    pub fn shutdown(&mut self) -> ClientResult<()> {
        write_message(&mut self.writer, &Request::Shutdown)?;

        let response: Response = read_message(&mut self.reader)?;

        match response {
            Response::ShuttingDown => Ok(()),
            Response::Error { message } => Err(ClientError::Server(message)),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Ping the server
    pub fn ping(&mut self) -> ClientResult<()> {
        write_message(&mut self.writer, &Request::Ping)?;

        let response: Response = read_message(&mut self.reader)?;

        match response {
            Response::Pong => Ok(()),
            Response::Error { message } => Err(ClientError::Server(message)),
            _ => Err(ClientError::InvalidResponse),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::search::{SearchOutcome, SearchResult};

    fn response(id: u64) -> SearchResponse {
        SearchResponse {
            terminology: Terminology::Snomed,
            id,
            outcome: SearchOutcome::Matches(SearchResult::default()),
            duration_ms: 0.0,
            cached: false,
        }
    }

    #[test]
    fn test_tracker_discards_stale_responses() {
        let mut tracker = RequestTracker::new();
        let first = tracker.issue();
        let second = tracker.issue();

        assert!(tracker.accept(response(first)).is_none());
        assert_eq!(tracker.accept(response(second)).map(|r| r.id), Some(second));
        assert_eq!(tracker.latest(), second);
    }

    #[test]
    fn test_tracker_ids_increase() {
        let mut tracker = RequestTracker::new();
        assert!(!tracker.is_current(0) || tracker.latest() == 0);
        let a = tracker.issue();
        let b = tracker.issue();
        assert!(b > a);
        assert!(tracker.is_current(b));
        assert!(!tracker.is_current(a));
    }
}
