//! Per-connection outbound stream.
//!
//! ```text
//!   enqueue(doc) ──► [ bounded channel ] ──► drain thread ──► <Envelope attr=".."
//!   (never blocks)                                             <doc/>   flush
//!                                                              <doc/>   flush
//!   close()      ──► Close ────────────────────────────────►  </Envelope>  shutdown
//! ```
//!
//! The envelope start tag is flushed before its closing `>`, so the peer sees
//! the tag name and attributes as soon as the connection opens.

use std::io::{self, BufWriter, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread;

use quorum_markup::{write_document, Document, MarkupWriter, WriteError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::QueueError;

/// Byte sink at the far end of a queue.
pub trait Sink: Write + Send + 'static {
    /// Called once after the envelope has been ended and flushed.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Sink for TcpStream {
    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

enum Outbound {
    Document(Arc<dyn Document>),
    Close,
}

/// Bounded FIFO of documents written by a dedicated thread.
pub struct OutboundQueue {
    envelope: String,
    capacity: usize,
    sender: mpsc::Sender<Outbound>,
    drain: thread::JoinHandle<()>,
}

impl OutboundQueue {
    /// Start the drain thread. It writes the declaration and the envelope
    /// start tag with `attributes` before taking anything off the queue.
    pub fn open<S: Sink>(
        sink: S,
        envelope: &str,
        attributes: &[(&str, &str)],
        capacity: usize,
    ) -> io::Result<Self> {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let name = envelope.to_string();
        let attributes: Vec<(String, String)> = attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let drain = thread::Builder::new()
            .name(format!("quorum-drain-{envelope}"))
            .spawn(move || run_drain(sink, name, attributes, receiver))?;
        Ok(Self {
            envelope: envelope.to_string(),
            capacity,
            sender,
            drain,
        })
    }

    pub fn envelope(&self) -> &str {
        &self.envelope
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Documents waiting to be written.
    pub fn pending(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    /// True once the drain thread has stopped taking documents.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn enqueue(&self, doc: Arc<dyn Document>) -> Result<(), QueueError> {
        self.sender
            .try_send(Outbound::Document(doc))
            .map_err(|e| match e {
                TrySendError::Full(_) => QueueError::Full,
                TrySendError::Closed(_) => QueueError::Closed,
            })
    }

    pub fn send<D: Document>(&self, doc: D) -> Result<(), QueueError> {
        self.enqueue(Arc::new(doc))
    }

    /// End the envelope once everything already queued is written, then
    /// close the sink. Join the returned handle to wait for that.
    pub fn close(self) -> thread::JoinHandle<()> {
        // A full queue still ends the stream: dropping the sender lets the
        // drain thread finish the backlog and then close.
        if let Err(TrySendError::Full(_)) = self.sender.try_send(Outbound::Close) {
            log::debug!("<{}> queue full at close", self.envelope);
        }
        self.drain
    }
}

impl std::fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundQueue")
            .field("envelope", &self.envelope)
            .field("capacity", &self.capacity)
            .field("pending", &self.pending())
            .finish()
    }
}

fn open_envelope<W: Write>(
    writer: &mut MarkupWriter<W>,
    envelope: &str,
    attributes: &[(String, String)],
) -> Result<(), WriteError> {
    writer.start_element(envelope)?;
    for (name, value) in attributes {
        writer.write_attribute(name, value)?;
    }
    writer.flush()
}

fn close_sink<S: Sink>(writer: &mut MarkupWriter<BufWriter<S>>, envelope: &str) {
    if let Err(e) = writer.get_mut().get_mut().close() {
        log::debug!("Closing <{envelope}> sink: {e}");
    }
}

fn run_drain<S: Sink>(
    sink: S,
    envelope: String,
    attributes: Vec<(String, String)>,
    mut receiver: mpsc::Receiver<Outbound>,
) {
    let mut writer = match MarkupWriter::new(BufWriter::new(sink)) {
        Ok(writer) => writer,
        Err(e) => {
            log::error!("Failed to start <{envelope}> stream: {e}");
            return;
        }
    };
    if let Err(e) = open_envelope(&mut writer, &envelope, &attributes) {
        log::error!("Failed to start <{envelope}> stream: {e}");
        close_sink(&mut writer, &envelope);
        return;
    }

    let mut written = 0u64;
    while let Some(item) = receiver.blocking_recv() {
        match item {
            Outbound::Document(doc) => {
                let result = write_document(doc.as_ref(), &mut writer).and_then(|_| writer.flush());
                if let Err(e) = result {
                    log::error!("Write to <{envelope}> stream failed: {e}");
                    close_sink(&mut writer, &envelope);
                    return;
                }
                written += 1;
            }
            Outbound::Close => break,
        }
    }
    receiver.close();

    if let Err(e) = writer.end_element(&envelope).and_then(|_| writer.flush()) {
        log::debug!("Ending <{envelope}> stream: {e}");
    }
    close_sink(&mut writer, &envelope);
    log::debug!("<{envelope}> stream closed after {written} documents");
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_core::{standard_registry, Requests, Response, TimesUp};
    use quorum_markup::writer::DECLARATION;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Sink for SharedBuffer {}

    /// Blocks the first write until the gate opens.
    struct GatedSink {
        gate: std::sync::mpsc::Receiver<()>,
        opened: bool,
        out: SharedBuffer,
    }

    impl Write for GatedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if !self.opened {
                let _ = self.gate.recv();
                self.opened = true;
            }
            self.out.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Sink for GatedSink {}

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Sink for BrokenSink {}

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !done() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_start_tag_flushed_before_any_document() {
        let out = SharedBuffer::default();
        let queue = OutboundQueue::open(out.clone(), "UserResponses", &[("user", "bob")], 4).unwrap();
        let expected = format!("{DECLARATION}<UserResponses user=\"bob\"");
        wait_until(|| out.text() == expected);
        assert_eq!(out.text(), expected);
        queue.close().join().unwrap();
        assert!(out.text().ends_with("/>\n"));
    }

    #[test]
    fn test_documents_written_as_children() {
        let out = SharedBuffer::default();
        let queue = OutboundQueue::open(out.clone(), "Requests", &[], 4).unwrap();
        queue.send(TimesUp).unwrap();
        queue.send(quorum_core::ErrorReport::new("Duplicate user.")).unwrap();
        queue.close().join().unwrap();

        let parsed = standard_registry().parse_str(&out.text()).unwrap();
        let requests = parsed.downcast_ref::<Requests>().unwrap();
        assert_eq!(requests.requests.len(), 2);
    }

    #[test]
    fn test_full_queue_rejects_without_blocking() {
        let (open, gate) = std::sync::mpsc::channel();
        let out = SharedBuffer::default();
        let sink = GatedSink {
            gate,
            opened: false,
            out: out.clone(),
        };
        let queue = OutboundQueue::open(sink, "Requests", &[], 2).unwrap();
        assert_eq!(queue.send(TimesUp), Ok(()));
        assert_eq!(queue.send(TimesUp), Ok(()));
        assert_eq!(queue.pending(), 2);
        assert_eq!(queue.send(TimesUp), Err(QueueError::Full));

        open.send(()).unwrap();
        queue.close().join().unwrap();
        let text = out.text();
        assert_eq!(text.matches("<ResponseTimeDone/>").count(), 2);
        assert!(text.ends_with("</Requests>\n"));
    }

    #[test]
    fn test_write_failure_closes_queue() {
        let queue = OutboundQueue::open(BrokenSink, "Requests", &[], 2).unwrap();
        wait_until(|| queue.is_closed());
        assert_eq!(
            queue.send(Response::new("amy", "late")),
            Err(QueueError::Closed)
        );
        queue.close().join().unwrap();
    }
}
