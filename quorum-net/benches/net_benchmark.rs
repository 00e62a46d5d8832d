use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use quorum_core::{standard_registry, Question, Response, TimesUp};
use quorum_markup::Document;
use quorum_net::{EnvelopeReader, OutboundQueue, QueueError, Sink};
use std::hint::black_box;
use std::io::{self, Write};
use std::sync::Arc;

/// Discards everything written to it.
struct NullSink;

impl Write for NullSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Sink for NullSink {}

fn question() -> Arc<dyn Document> {
    Arc::new(Question::choice(
        "Which planet is closest to the sun?",
        ["Venus", "Mercury", "Mars", "Earth"],
    ))
}

fn bench_queue_1k_questions(c: &mut Criterion) {
    let doc = question();

    c.bench_function("queue_1k_questions", |b| {
        b.iter(|| {
            let queue = OutboundQueue::open(NullSink, "Requests", &[], 64).unwrap();
            let mut sent = 0;
            while sent < 1000 {
                match queue.enqueue(doc.clone()) {
                    Ok(()) => sent += 1,
                    Err(QueueError::Full) => std::thread::yield_now(),
                    Err(QueueError::Closed) => break,
                }
            }
            queue.close().join().unwrap();
            black_box(sent);
        })
    });
}

fn bench_broadcast_fanout_100(c: &mut Criterion) {
    let doc = question();

    c.bench_function("broadcast_fanout_100_queues", |b| {
        b.iter_batched(
            || {
                (0..100)
                    .map(|_| OutboundQueue::open(NullSink, "Requests", &[], 10).unwrap())
                    .collect::<Vec<_>>()
            },
            |queues| {
                let delivered = queues
                    .iter()
                    .filter(|q| q.enqueue(black_box(doc.clone())).is_ok())
                    .count();
                for queue in queues {
                    queue.close().join().unwrap();
                }
                black_box(delivered);
            },
            BatchSize::PerIteration,
        )
    });
}

fn bench_read_100_responses(c: &mut Criterion) {
    let registry = Arc::new(standard_registry());
    let mut text = String::from("<UserResponses user=\"bench\">\n");
    for i in 0..100 {
        text.push_str(&quorum_markup::to_markup_string(&Response::new("bench", format!("answer {i}"))).unwrap());
    }
    text.push_str(&quorum_markup::to_markup_string(&TimesUp).unwrap());
    text.push_str("</UserResponses>\n");

    c.bench_function("read_100_responses", |b| {
        b.iter(|| {
            let mut reader =
                EnvelopeReader::new(registry.clone(), black_box(text.as_bytes()), "UserResponses");
            reader.read_open().unwrap();
            reader.read_attribute("user").unwrap();
            reader.finish_start_tag().unwrap();
            let mut count = 0;
            while let Some(doc) = reader.next_document().unwrap() {
                count += doc.is::<Response>() as usize;
            }
            black_box(count);
        })
    });
}

criterion_group!(
    benches,
    bench_queue_1k_questions,
    bench_broadcast_fanout_100,
    bench_read_100_responses,
);
criterion_main!(benches);
