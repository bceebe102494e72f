//! Protocol messages for client-server communication
//!
//! Uses a simple length-prefixed JSON protocol:
//! - 4 bytes (little-endian u32): message length
//! - N bytes: JSON-encoded message

use crate::index::types::Terminology;
use crate::query::search::SearchOutcome;
use crate::server::worker::WorkerEvent;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::PathBuf;

/// Largest message either side will accept
const MAX_MESSAGE_LEN: usize = 100 * 1024 * 1024;

/// Request from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Search one terminology for concepts matching the words
    Search {
        terminology: Terminology,
        words: Vec<String>,
        /// Echoed in the response so callers can drop stale answers
        id: u64,
    },

    /// Complete a word prefix from the terminology's vocabulary
    Autocomplete {
        terminology: Terminology,
        prefix: String,
        /// Falls back to the server's configured limit
        #[serde(default)]
        limit: Option<usize>,
    },

    /// Check server health and get stats
    Status,

    /// Swap in the latest snapshot of one terminology, or of all of them
    Reload { terminology: Option<Terminology> },

    /// Graceful shutdown request
    Shutdown,

    /// Ping for connection testing
    Ping,
}

/// Response from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Search(SearchResponse),

    Autocomplete {
        terminology: Terminology,
        prefix: String,
        words: Vec<String>,
    },

    /// Server status
    Status(StatusResponse),

    /// Reload completed
    Reloaded { success: bool, message: String },

    /// Shutdown acknowledged
    ShuttingDown,

    /// Pong response
    Pong,

    /// Error response
    Error { message: String },
}

/// Search results response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub terminology: Terminology,
    pub id: u64,
    pub outcome: SearchOutcome,
    /// Time taken in milliseconds
    pub duration_ms: f64,
    /// Whether the outcome came from the worker's cache
    pub cached: bool,
}

/// State of one terminology worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub terminology: Terminology,
    pub snapshot: PathBuf,
    pub state: Option<WorkerEvent>,
}

/// Server status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Server uptime in seconds
    pub uptime_secs: u64,
    /// Total queries served
    pub queries_served: u64,
    /// Cache hit rate (0.0 - 1.0)
    pub cache_hit_rate: f32,
    pub workers: Vec<WorkerStatus>,
}

/// Write a message to a stream with length prefix
pub fn write_message<W: Write>(writer: &mut W, msg: &impl Serialize) -> std::io::Result<()> {
    let json = serde_json::to_vec(msg).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e)
    })?;

    let len = json.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&json)?;
    writer.flush()?;

    Ok(())
}

/// Read a message from a stream with length prefix
pub fn read_message<R: Read, T: for<'de> Deserialize<'de>>(reader: &mut R) -> std::io::Result<T> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Message too large",
        ));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;

    serde_json::from_slice(&buf).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::search::SearchResult;
    use std::io::Cursor;

    #[test]
    fn test_roundtrip_request() {
        let req = Request::Search {
            terminology: Terminology::Readv2,
            words: vec!["aspirin".to_string(), "disprin".to_string()],
            id: 42,
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &req).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: Request = read_message(&mut cursor).unwrap();

        match decoded {
            Request::Search { terminology, words, id } => {
                assert_eq!(terminology, Terminology::Readv2);
                assert_eq!(words, vec!["aspirin", "disprin"]);
                assert_eq!(id, 42);
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_roundtrip_response() {
        let mut result = SearchResult::default();
        result.concepts.insert("A".to_string(), "Aspirin".to_string());
        let resp = Response::Search(SearchResponse {
            terminology: Terminology::Snomed,
            id: 3,
            outcome: SearchOutcome::Matches(result),
            duration_ms: 1.5,
            cached: false,
        });

        let mut buf = Vec::new();
        write_message(&mut buf, &resp).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: Response = read_message(&mut cursor).unwrap();

        match decoded {
            Response::Search(sr) => {
                assert_eq!(sr.id, 3);
                assert_eq!(sr.outcome.result().unwrap().concepts["A"], "Aspirin");
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_autocomplete_limit_is_optional() {
        let json = br#"{"type": "Autocomplete", "terminology": "ctv3", "prefix": "asp"}"#;
        let mut buf = (json.len() as u32).to_le_bytes().to_vec();
        buf.extend_from_slice(json);

        let decoded: Request = read_message(&mut Cursor::new(buf)).unwrap();
        assert!(matches!(
            decoded,
            Request::Autocomplete { terminology: Terminology::Ctv3, limit: None, .. }
        ));
    }

    #[test]
    fn test_oversized_message_rejected() {
        let buf = u32::MAX.to_le_bytes().to_vec();
        let result: std::io::Result<Request> = read_message(&mut Cursor::new(buf));
        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::InvalidData);
    }
}
