use criterion::{black_box, criterion_group, criterion_main, Criterion};
use completion_bridge::stream::TranslationPipeline;

fn sample_stream(records: usize) -> String {
    let mut stream = String::new();
    for index in 0..records {
        if index % 4 == 0 {
            stream.push_str(
                r#"data: {"id":"b","created":1,"model":"m","choices":[{"index":0,"delta":{"content":"","reasoning_content":"considering the edit"}}]}"#,
            );
        } else {
            stream.push_str(&format!(
                r#"data: {{"id":"b","created":1,"model":"m","choices":[{{"index":0,"delta":{{"content":"let x_{index} = {index};\n"}},"finish_reason":null}}]}}"#
            ));
        }
        stream.push_str("\n\n");
    }
    stream.push_str(
        r#"data: {"id":"b","created":1,"model":"m","choices":[],"usage":{"prompt_tokens":512,"completion_tokens":256,"total_tokens":768}}"#,
    );
    stream.push_str("\n\ndata: [DONE]\n\n");
    stream
}

fn translate_in_chunks(stream: &[u8], chunk_size: usize) -> usize {
    let mut pipeline = TranslationPipeline::new();
    let mut emitted = 0;
    let mut out = Vec::with_capacity(1024);
    for chunk in stream.chunks(chunk_size) {
        out.clear();
        pipeline
            .push_chunk(chunk, &mut out)
            .expect("bench stream is well formed");
        emitted += out.len();
    }
    out.clear();
    pipeline.finish(&mut out).expect("bench stream is well formed");
    emitted + out.len()
}

fn bench_translate(c: &mut Criterion) {
    let stream = sample_stream(256);
    let bytes = stream.as_bytes();

    c.bench_function("translate_256_records_one_chunk", |b| {
        b.iter(|| translate_in_chunks(black_box(bytes), bytes.len()));
    });

    c.bench_function("translate_256_records_1k_chunks", |b| {
        b.iter(|| translate_in_chunks(black_box(bytes), 1024));
    });

    c.bench_function("translate_256_records_16b_chunks", |b| {
        b.iter(|| translate_in_chunks(black_box(bytes), 16));
    });
}

criterion_group!(benches, bench_translate);
criterion_main!(benches);
