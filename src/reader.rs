//! A buffered reader layered on top of a [`ChunkStream`]: `read_exact`
//! and `read_until`, the realization of the framing primitives a
//! coroutine body needs.

use bytes::{Bytes, BytesMut};

use crate::coroutine::ChunkStream;

pub struct BufferedReader {
    stream: ChunkStream,
    leftover: BytesMut,
}

impl BufferedReader {
    pub fn new(stream: ChunkStream) -> Self {
        Self {
            stream,
            leftover: BytesMut::new(),
        }
    }

    /// Pulls chunks until `leftover` holds at least `n` bytes, then
    /// returns the first `n`, retaining the rest. `None` if the
    /// stream ends first.
    pub async fn read_exact(&mut self, n: usize) -> Option<Bytes> {
        while self.leftover.len() < n {
            match self.stream.next().await {
                Some(chunk) => self.leftover.extend_from_slice(&chunk),
                None => return None,
            }
        }
        Some(self.leftover.split_to(n).freeze())
    }

    /// Pulls chunks until `delimiter` is found, then returns everything
    /// up to and including it, retaining the rest. `None` if the
    /// stream ends first.
    pub async fn read_until(&mut self, delimiter: &[u8]) -> Option<Bytes> {
        let mut search_from = 0usize;

        loop {
            if let Some(relative) = find(&self.leftover[search_from..], delimiter) {
                let end = search_from + relative + delimiter.len();
                return Some(self.leftover.split_to(end).freeze());
            }

            search_from = self.leftover.len().saturating_sub(delimiter.len().saturating_sub(1));

            match self.stream.next().await {
                Some(chunk) => self.leftover.extend_from_slice(&chunk),
                None => return None,
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::Socket;

    #[test]
    fn read_exact_accumulates_across_chunks() {
        let socket = std::rc::Rc::new(std::cell::RefCell::new(Socket::new(
            1,
            true,
            std::rc::Rc::new(crate::driver::testing::FakeDriver::new()),
        )));
        let log = std::rc::Rc::new(std::cell::RefCell::new(None));
        let log2 = log.clone();

        crate::coroutine::bind_coroutine::<_, ()>(&socket, move |stream| async move {
            let mut reader = BufferedReader::new(stream);
            let got = reader.read_exact(5).await;
            *log2.borrow_mut() = Some(got);
        });

        Socket::dispatch_data(&socket, b"he");
        Socket::dispatch_data(&socket, b"llo");

        assert_eq!(log.borrow().clone().flatten().as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn read_until_finds_delimiter_across_chunk_boundary() {
        let socket = std::rc::Rc::new(std::cell::RefCell::new(Socket::new(
            1,
            true,
            std::rc::Rc::new(crate::driver::testing::FakeDriver::new()),
        )));
        let log = std::rc::Rc::new(std::cell::RefCell::new(None));
        let log2 = log.clone();

        crate::coroutine::bind_coroutine::<_, ()>(&socket, move |stream| async move {
            let mut reader = BufferedReader::new(stream);
            let got = reader.read_until(b"\r\n").await;
            *log2.borrow_mut() = Some(got);
        });

        Socket::dispatch_data(&socket, b"GET / HTTP/1.1\r");
        Socket::dispatch_data(&socket, b"\nrest");

        assert_eq!(
            log.borrow().clone().flatten().as_deref(),
            Some(&b"GET / HTTP/1.1\r\n"[..])
        );
    }

    #[test]
    fn read_exact_returns_none_on_early_close() {
        let socket = std::rc::Rc::new(std::cell::RefCell::new(Socket::new(
            1,
            true,
            std::rc::Rc::new(crate::driver::testing::FakeDriver::new()),
        )));
        let log = std::rc::Rc::new(std::cell::RefCell::new(None));
        let log2 = log.clone();

        crate::coroutine::bind_coroutine::<_, ()>(&socket, move |stream| async move {
            let mut reader = BufferedReader::new(stream);
            let got = reader.read_exact(100).await;
            *log2.borrow_mut() = Some(got);
        });

        Socket::dispatch_data(&socket, b"short");
        Socket::dispatch_close(&socket);

        assert_eq!(log.borrow().clone().flatten(), None);
    }
}
