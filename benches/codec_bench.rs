//! Method call encoding/decoding overhead benchmarking.

use std::fmt;
use std::time::Duration;

use rpcdist::codec::{decode, encode};
use rpcdist::{MethodCall, RpcDistError};

use criterion::{
    black_box, criterion_group, criterion_main, BenchmarkId, Criterion,
};

static LABEL_SIZES: [usize; 4] = [0, 64, 1024, 16 * 1024];

struct BenchId(&'static str, usize);

impl fmt::Display for BenchId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.0, self.1)
    }
}

fn encode_decode(call: &MethodCall) -> Result<(), RpcDistError> {
    let buf = encode(call)?;
    let decoded = decode(&buf)?;
    black_box(decoded);
    Ok(())
}

fn codec_bench_group(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_bench");
    group
        .sample_size(50)
        .warm_up_time(Duration::from_millis(100))
        .measurement_time(Duration::from_secs(3));

    let small_calls = [
        ("get", MethodCall::get()),
        ("get_key", MethodCall::get_key(i64::MAX)),
        ("put", MethodCall::put(12345)),
        ("set_sync", MethodCall::set_sync(true)),
    ];
    for (name, call) in &small_calls {
        group.bench_with_input(
            BenchmarkId::from_parameter(BenchId(*name, 0)),
            call,
            |b, call| {
                b.iter(|| encode_decode(call));
            },
        );
    }

    for size in LABEL_SIZES {
        let call = MethodCall::start(7, vec![b'x'; size]);
        group.bench_with_input(
            BenchmarkId::from_parameter(BenchId("start", size)),
            &call,
            |b, call| {
                b.iter(|| encode_decode(call));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, codec_bench_group);
criterion_main!(benches);
