//! istream — the stream reassembler: consume bytes until a delimiter or
//! a byte count, then emit an event to the owning gobj.
//!
//! The assembled frame does not travel inside the kw (kw is pure JSON):
//! the emitted event carries `frame_len`, and the owner pops the frame
//! with `extract_matched_data()`. Typical use keeps the IStream in the
//! owner's priv data, taken out while consuming.

use log::error;

use crate::error::{GResult, GobjError};
use crate::kw::Kw;
use crate::runtime::{GobjId, Runtime};

#[derive(Debug)]
pub struct IStream {
    gobj: GobjId,
    buf: Vec<u8>,
    matched: Option<Vec<u8>>,
    max_size: usize,
    event_name: String,
    delimiter: Option<Vec<u8>>,
    num_bytes: usize,
    completed: bool,
}

impl IStream {
    pub fn new(gobj: GobjId, max_size: usize) -> IStream {
        IStream {
            gobj,
            buf: Vec::new(),
            matched: None,
            max_size,
            event_name: String::new(),
            delimiter: None,
            num_bytes: 0,
            completed: false,
        }
    }

    /// Fire `event` when the accumulated buffer ends with `delimiter`.
    pub fn read_until_delimiter(&mut self, delimiter: &[u8], event: &str) -> GResult<()> {
        if delimiter.is_empty() {
            error!("istream: delimiter_size is <= 0");
            return Err(GobjError::Param("empty delimiter".to_string()));
        }
        self.delimiter = Some(delimiter.to_vec());
        self.num_bytes = 0;
        self.event_name = event.to_string();
        self.completed = false;
        Ok(())
    }

    /// Fire `event` when the buffer reaches `num_bytes`.
    pub fn read_until_num_bytes(&mut self, num_bytes: usize, event: &str) -> GResult<()> {
        if num_bytes == 0 {
            return Err(GobjError::Param("num_bytes is 0".to_string()));
        }
        self.num_bytes = num_bytes;
        self.delimiter = None;
        self.event_name = event.to_string();
        self.completed = false;
        Ok(())
    }

    /// Append input. Returns the number of bytes consumed; on completion
    /// the frame moves aside, a fresh buffer starts, and the configured
    /// event (if any) is sent to the owner carrying `frame_len`.
    pub fn consume(&mut self, rt: &mut Runtime, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }
        let mut consumed = 0usize;

        if self.num_bytes > 0 {
            let accumulated = self.buf.len();
            let needed = self.num_bytes.saturating_sub(accumulated);
            if needed > data.len() {
                if !self.check_room(data.len()) {
                    return 0;
                }
                self.buf.extend_from_slice(data);
                return data.len();
            }
            if needed > 0 {
                self.buf.extend_from_slice(&data[..needed]);
                consumed = needed;
            }
            self.completed = true;
        } else if let Some(delim) = self.delimiter.clone() {
            for &c in data {
                if !self.check_room(1) {
                    return consumed;
                }
                self.buf.push(c);
                consumed += 1;
                if self.buf.len() >= delim.len() && self.buf.ends_with(&delim) {
                    self.completed = true;
                    break;
                }
            }
        }

        if self.completed {
            let frame = std::mem::take(&mut self.buf);
            let frame_len = frame.len();
            self.matched = Some(frame);
            if !self.event_name.is_empty() {
                let mut kw = Kw::new();
                kw.insert("frame_len".to_string(), serde_json::json!(frame_len));
                let event = self.event_name.clone();
                rt.send_event(self.gobj, &event, kw, Some(self.gobj));
            }
        }

        consumed
    }

    fn check_room(&self, more: usize) -> bool {
        if self.max_size > 0 && self.buf.len() + more > self.max_size {
            error!("istream: buffer FULL (max_size {})", self.max_size);
            return false;
        }
        true
    }

    /// Pop the completed frame; clears the completed flag.
    pub fn extract_matched_data(&mut self) -> Option<Vec<u8>> {
        if !self.completed {
            return None;
        }
        self.completed = false;
        self.matched.take()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Bytes accumulated so far (the pending, not-yet-fired buffer).
    pub fn length(&self) -> usize {
        self.buf.len()
    }

    pub fn owner(&self) -> GobjId {
        self.gobj
    }

    /// Reset the pending buffer and any completed frame.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.matched = None;
        self.completed = false;
    }
}
