use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use nodeflow_core::{
    AsyncFlow, AsyncGraph, AsyncNode, DefaultAction, Flow, FlowResult, Graph, Node, Params,
};

#[derive(Debug, Default)]
struct BenchContext {
    counter: AtomicUsize,
}

struct Increment;

impl Node<BenchContext> for Increment {
    type Prep = ();
    type Exec = ();

    fn post(
        &self,
        ctx: &BenchContext,
        _params: &Params,
        _prep: (),
        _exec: (),
    ) -> FlowResult<Option<DefaultAction>> {
        ctx.counter.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }
}

struct AsyncIncrement;

#[async_trait]
impl AsyncNode<BenchContext> for AsyncIncrement {
    type Prep = ();
    type Exec = ();

    async fn post(
        &self,
        ctx: &BenchContext,
        _params: &Params,
        _prep: (),
        _exec: (),
    ) -> FlowResult<Option<DefaultAction>> {
        ctx.counter.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }
}

fn sync_chain(len: usize) -> Flow<BenchContext> {
    let mut graph: Graph<BenchContext> = Graph::new();
    let ids: Vec<_> = (0..len).map(|_| graph.add_node(Increment)).collect();
    for pair in ids.windows(2) {
        graph.connect(pair[0], pair[1]).unwrap();
    }
    Flow::new(graph, ids[0]).unwrap()
}

fn async_chain(len: usize) -> AsyncFlow<BenchContext> {
    let mut graph: AsyncGraph<BenchContext> = AsyncGraph::new();
    let ids: Vec<_> = (0..len).map(|_| graph.add_node(AsyncIncrement)).collect();
    for pair in ids.windows(2) {
        graph.connect(pair[0], pair[1]).unwrap();
    }
    AsyncFlow::new(graph, ids[0]).unwrap()
}

fn benchmark_chain_traversal(c: &mut Criterion) {
    let mut group = c.benchmark_group("workflow_execution");
    group.measurement_time(Duration::from_secs(10));

    for len in [1usize, 10, 100] {
        let flow = sync_chain(len);
        group.bench_with_input(BenchmarkId::new("sync_chain", len), &len, |b, _| {
            let ctx = BenchContext::default();
            b.iter(|| flow.run(&ctx).unwrap())
        });

        let flow = async_chain(len);
        let runtime = tokio::runtime::Runtime::new().unwrap();
        group.bench_with_input(BenchmarkId::new("async_chain", len), &len, |b, _| {
            let ctx = BenchContext::default();
            b.to_async(&runtime).iter(|| async { flow.run(&ctx).await.unwrap() })
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_chain_traversal);
criterion_main!(benches);
