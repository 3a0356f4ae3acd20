use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use super::{push, strings};
use crate::action::DefaultAction;
use crate::batch::{BatchFlow, BatchFlowHooks};
use crate::context::SharedStore;
use crate::error::{FlowError, FlowResult};
use crate::flow::Flow;
use crate::graph::Graph;
use crate::node::Node;
use crate::params::Params;
use crate::retry::{with_retry, Delay, NoDelay, RetryPolicy};

struct Record(&'static str);

impl Node<SharedStore> for Record {
    type Prep = ();
    type Exec = ();

    fn name(&self) -> &str {
        self.0
    }

    fn post(
        &self,
        ctx: &SharedStore,
        _params: &Params,
        _prep: (),
        _exec: (),
    ) -> FlowResult<Option<DefaultAction>> {
        push(ctx, "path", self.0);
        Ok(None)
    }
}

struct AddOne;

impl Node<SharedStore> for AddOne {
    type Prep = i64;
    type Exec = i64;

    fn prep(&self, ctx: &SharedStore, _params: &Params) -> FlowResult<i64> {
        Ok(ctx.get("value")?.unwrap_or(0))
    }

    fn exec(&self, value: &i64) -> FlowResult<i64> {
        Ok(value + 1)
    }

    fn post(
        &self,
        ctx: &SharedStore,
        _params: &Params,
        _prep: i64,
        exec: i64,
    ) -> FlowResult<Option<DefaultAction>> {
        ctx.insert("value", exec)?;
        Ok(None)
    }
}

struct Double;

impl Node<SharedStore> for Double {
    type Prep = i64;
    type Exec = i64;

    fn prep(&self, ctx: &SharedStore, _params: &Params) -> FlowResult<i64> {
        Ok(ctx.get("value")?.unwrap_or(0))
    }

    fn exec(&self, value: &i64) -> FlowResult<i64> {
        Ok(value * 2)
    }

    fn post(
        &self,
        ctx: &SharedStore,
        _params: &Params,
        _prep: i64,
        exec: i64,
    ) -> FlowResult<Option<DefaultAction>> {
        ctx.insert("value", exec)?;
        Ok(None)
    }
}

/// Routes on whether the stored value exceeds a threshold.
struct Decide {
    threshold: i64,
}

impl Node<SharedStore> for Decide {
    type Prep = i64;
    type Exec = DefaultAction;

    fn prep(&self, ctx: &SharedStore, _params: &Params) -> FlowResult<i64> {
        Ok(ctx.get("value")?.unwrap_or(0))
    }

    fn exec(&self, value: &i64) -> FlowResult<DefaultAction> {
        Ok(if *value > self.threshold { "high".into() } else { "low".into() })
    }

    fn post(
        &self,
        _ctx: &SharedStore,
        _params: &Params,
        _prep: i64,
        action: DefaultAction,
    ) -> FlowResult<Option<DefaultAction>> {
        Ok(Some(action))
    }
}

struct Visit {
    limit: i64,
}

impl Node<SharedStore> for Visit {
    type Prep = ();
    type Exec = ();

    fn post(
        &self,
        ctx: &SharedStore,
        _params: &Params,
        _prep: (),
        _exec: (),
    ) -> FlowResult<Option<DefaultAction>> {
        let visits = ctx.update("visits", |v| (v.and_then(Value::as_i64).unwrap_or(0) + 1).into());
        if visits.as_i64().unwrap_or(0) < self.limit {
            Ok(Some("again".into()))
        } else {
            Ok(None)
        }
    }
}

/// Fails until the `succeed_on`-th call; the fallback stores 0.
struct Flaky {
    calls: Arc<AtomicUsize>,
    fallbacks: Arc<AtomicUsize>,
    succeed_on: usize,
    policy: RetryPolicy,
}

impl Flaky {
    fn new(succeed_on: usize, policy: RetryPolicy) -> Self {
        Flaky {
            calls: Arc::default(),
            fallbacks: Arc::default(),
            succeed_on,
            policy,
        }
    }
}

impl Node<SharedStore> for Flaky {
    type Prep = ();
    type Exec = usize;

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    fn exec(&self, _prep: &()) -> FlowResult<usize> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call < self.succeed_on {
            Err(FlowError::node_execution("flaky", format!("failure #{call}")))
        } else {
            Ok(call)
        }
    }

    fn exec_fallback(&self, _prep: &(), _error: FlowError) -> FlowResult<usize> {
        self.fallbacks.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    fn post(
        &self,
        ctx: &SharedStore,
        _params: &Params,
        _prep: (),
        exec: usize,
    ) -> FlowResult<Option<DefaultAction>> {
        ctx.insert("result", exec)?;
        Ok(None)
    }
}

struct AlwaysFails;

impl Node<SharedStore> for AlwaysFails {
    type Prep = ();
    type Exec = ();

    fn exec(&self, _prep: &()) -> FlowResult<()> {
        Err(FlowError::node_execution("always_fails", "boom"))
    }
}

/// Reads its document from params and never succeeds; the fallback keeps
/// what it was handed.
#[derive(Default)]
struct Summarize {
    calls: AtomicUsize,
    fallbacks: Arc<Mutex<Vec<(String, FlowError)>>>,
}

impl Node<SharedStore> for Summarize {
    type Prep = String;
    type Exec = String;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::attempts(3)
    }

    fn prep(&self, _ctx: &SharedStore, params: &Params) -> FlowResult<String> {
        Ok(params.get("doc")?.unwrap_or_default())
    }

    fn exec(&self, _doc: &String) -> FlowResult<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Err(FlowError::node_execution("summarize", format!("failure #{call}")))
    }

    fn exec_fallback(&self, doc: &String, error: FlowError) -> FlowResult<String> {
        self.fallbacks.lock().unwrap().push((doc.clone(), error));
        Ok(format!("no summary for {doc}"))
    }

    fn post(
        &self,
        ctx: &SharedStore,
        _params: &Params,
        _prep: String,
        exec: String,
    ) -> FlowResult<Option<DefaultAction>> {
        ctx.insert("summary", exec)?;
        Ok(None)
    }
}

#[derive(Clone, Default)]
struct RecordingDelay(Arc<Mutex<Vec<Duration>>>);

impl Delay for RecordingDelay {
    fn wait(&self, dur: Duration) {
        self.0.lock().unwrap().push(dur);
    }
}

#[test]
fn test_increment_then_double_yields_two() {
    let mut graph: Graph<SharedStore> = Graph::new();
    let x = graph.add_node(AddOne);
    let y = graph.add_node(Double);
    graph.connect(x, y).unwrap();

    let ctx = SharedStore::new();
    ctx.insert("value", 0).unwrap();
    Flow::new(graph, x).unwrap().run(&ctx).unwrap();
    // doubling first would leave 1
    assert_eq!(ctx.get::<i64>("value").unwrap(), Some(2));
}

#[test]
fn test_decision_routes_high_and_low() {
    let mut graph: Graph<SharedStore> = Graph::new();
    let decide = graph.add_node(Decide { threshold: 10 });
    let high = graph.add_node(Record("high"));
    let low = graph.add_node(Record("low"));
    graph.add_successor(decide, high, "high").unwrap();
    graph.add_successor(decide, low, "low").unwrap();
    let flow = Flow::new(graph, decide).unwrap();

    for (value, expected) in [(5, "low"), (15, "high")] {
        let ctx = SharedStore::new();
        ctx.insert("value", value).unwrap();
        flow.run(&ctx).unwrap();
        assert_eq!(strings(&ctx, "path"), vec![expected]);
    }
}

#[test]
fn test_chain_runs_in_order() {
    let mut graph: Graph<SharedStore> = Graph::new();
    let a = graph.add_node(Record("a"));
    let b = graph.add_node(Record("b"));
    let c = graph.add_node(Record("c"));
    graph.connect(a, b).unwrap();
    graph.connect(b, c).unwrap();

    let ctx = SharedStore::new();
    let flow = Flow::new(graph, a).unwrap();
    flow.run(&ctx).unwrap();
    assert_eq!(strings(&ctx, "path"), vec!["a", "b", "c"]);

    // the topology is reusable
    flow.run(&ctx).unwrap();
    assert_eq!(strings(&ctx, "path").len(), 6);
}

#[test]
fn test_self_cycle_runs_until_node_stops_it() {
    let mut graph: Graph<SharedStore> = Graph::new();
    let visit = graph.add_node(Visit { limit: 3 });
    let done = graph.add_node(Record("done"));
    graph.add_successor(visit, visit, "again").unwrap();
    graph.connect(visit, done).unwrap();

    let ctx = SharedStore::new();
    Flow::new(graph, visit).unwrap().run(&ctx).unwrap();
    assert_eq!(ctx.get::<i64>("visits").unwrap(), Some(3));
    assert_eq!(strings(&ctx, "path"), vec!["done"]);
}

#[test]
fn test_reregistered_edge_wins_during_traversal() {
    let mut graph: Graph<SharedStore> = Graph::new();
    let a = graph.add_node(Record("a"));
    let b = graph.add_node(Record("b"));
    let c = graph.add_node(Record("c"));
    graph.connect(a, b).unwrap();
    assert_eq!(graph.connect(a, c).unwrap(), Some(b));

    let ctx = SharedStore::new();
    Flow::new(graph, a).unwrap().run(&ctx).unwrap();
    assert_eq!(strings(&ctx, "path"), vec!["a", "c"]);
}

#[test]
fn test_unmatched_action_ends_flow_quietly() {
    let mut graph: Graph<SharedStore> = Graph::new();
    let decide = graph.add_node(Decide { threshold: 10 });
    let low = graph.add_node(Record("low"));
    graph.add_successor(decide, low, "low").unwrap();

    let ctx = SharedStore::new();
    ctx.insert("value", 50).unwrap();
    assert_eq!(Flow::new(graph, decide).unwrap().run(&ctx).unwrap(), None);
    assert!(strings(&ctx, "path").is_empty());
}

#[test]
fn test_retry_succeeds_on_last_allowed_attempt() {
    let node = Flaky::new(3, RetryPolicy::new(3, Duration::from_millis(10)));
    let (calls, fallbacks) = (node.calls.clone(), node.fallbacks.clone());
    let mut graph: Graph<SharedStore> = Graph::new();
    let id = graph.add_node(node);

    let delay = RecordingDelay::default();
    let ctx = SharedStore::new();
    Flow::new(graph, id)
        .unwrap()
        .with_delay(delay.clone())
        .run(&ctx)
        .unwrap();

    assert_eq!(ctx.get::<usize>("result").unwrap(), Some(3));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(fallbacks.load(Ordering::SeqCst), 0);
    assert_eq!(*delay.0.lock().unwrap(), vec![Duration::from_millis(10); 2]);
}

#[test]
fn test_exhausted_retries_call_fallback_once() {
    let node = Flaky::new(usize::MAX, RetryPolicy::attempts(2));
    let (calls, fallbacks) = (node.calls.clone(), node.fallbacks.clone());
    let mut graph: Graph<SharedStore> = Graph::new();
    let id = graph.add_node(node);

    let ctx = SharedStore::new();
    Flow::new(graph, id).unwrap().run(&ctx).unwrap();

    assert_eq!(ctx.get::<usize>("result").unwrap(), Some(0));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(fallbacks.load(Ordering::SeqCst), 1);
}

#[test]
fn test_fallback_sees_prep_and_last_error() {
    let node = Summarize::default();
    let fallbacks = node.fallbacks.clone();
    let mut graph: Graph<SharedStore> = Graph::new();
    let id = graph.add_node(node);

    let ctx = SharedStore::new();
    Flow::new(graph, id)
        .unwrap()
        .with_delay(NoDelay)
        .with_params(Params::new().with("doc", "notes.md"))
        .run(&ctx)
        .unwrap();

    assert_eq!(
        *fallbacks.lock().unwrap(),
        vec![(
            "notes.md".to_string(),
            FlowError::node_execution("summarize", "failure #3")
        )]
    );
    assert_eq!(
        ctx.get::<String>("summary").unwrap().as_deref(),
        Some("no summary for notes.md")
    );
}

#[test]
fn test_fallback_error_stops_the_flow() {
    let mut graph: Graph<SharedStore> = Graph::new();
    let failing = graph.add_node(with_retry(AlwaysFails, RetryPolicy::attempts(3)));
    let after = graph.add_node(Record("after"));
    graph.connect(failing, after).unwrap();

    let ctx = SharedStore::new();
    let err = Flow::new(graph, failing)
        .unwrap()
        .with_delay(NoDelay)
        .run(&ctx)
        .unwrap_err();
    assert_eq!(err, FlowError::node_execution("always_fails", "boom"));
    assert!(strings(&ctx, "path").is_empty());
}

#[test]
fn test_nested_flow_continues_in_parent() {
    let mut inner: Graph<SharedStore> = Graph::new();
    let a = inner.add_node(Record("a"));
    let b = inner.add_node(Record("b"));
    inner.connect(a, b).unwrap();
    let sub = Flow::new(inner, a).unwrap().with_name("sub");

    let mut outer: Graph<SharedStore> = Graph::new();
    let start = outer.add_node(Record("start"));
    let sub = outer.add_step(sub);
    let end = outer.add_node(Record("end"));
    outer.connect(start, sub).unwrap();
    outer.connect(sub, end).unwrap();

    let ctx = SharedStore::new();
    Flow::new(outer, start).unwrap().run(&ctx).unwrap();
    assert_eq!(strings(&ctx, "path"), vec!["start", "a", "b", "end"]);
}

struct Greet;

impl Node<SharedStore> for Greet {
    type Prep = String;
    type Exec = ();

    fn prep(&self, _ctx: &SharedStore, params: &Params) -> FlowResult<String> {
        let greeting: String = params.get("greeting")?.unwrap_or_default();
        let name: String = params.get("name")?.unwrap_or_default();
        Ok(format!("{greeting} {name}"))
    }

    fn post(
        &self,
        ctx: &SharedStore,
        _params: &Params,
        prep: String,
        _exec: (),
    ) -> FlowResult<Option<DefaultAction>> {
        push(ctx, "greetings", prep);
        Ok(None)
    }
}

#[test]
fn test_flow_params_merge_over_node_defaults() {
    let mut graph: Graph<SharedStore> = Graph::new();
    let greet = graph.add_node(Greet);
    graph
        .set_params(greet, Params::new().with("greeting", "hi").with("name", "node"))
        .unwrap();
    let flow = Flow::new(graph, greet)
        .unwrap()
        .with_params(Params::new().with("name", "flow"));

    let ctx = SharedStore::new();
    flow.run(&ctx).unwrap();
    flow.run_with_params(&ctx, &Params::new().with("name", "caller"))
        .unwrap();

    assert_eq!(strings(&ctx, "greetings"), vec!["hi flow", "hi caller"]);
    // the node's stored defaults are never rewritten
    assert_eq!(
        flow.graph().params(greet).unwrap().get::<String>("name").unwrap().as_deref(),
        Some("node")
    );
}

struct PerFile;

impl BatchFlowHooks<SharedStore> for PerFile {
    fn prep(&self, _ctx: &SharedStore, _params: &Params) -> FlowResult<Vec<Params>> {
        Ok(["a.txt", "b.txt", "c.txt"]
            .into_iter()
            .map(|file| Params::new().with("name", file))
            .collect())
    }

    fn post(
        &self,
        ctx: &SharedStore,
        _params: &Params,
        sets: Vec<Params>,
    ) -> FlowResult<Option<DefaultAction>> {
        let names: Vec<String> = sets
            .iter()
            .map(|set| set.get("name"))
            .collect::<FlowResult<Option<Vec<String>>>>()?
            .unwrap_or_default();
        ctx.insert("sets", names)?;
        Ok(None)
    }
}

#[test]
fn test_batch_flow_runs_once_per_param_set() {
    let mut graph: Graph<SharedStore> = Graph::new();
    let greet = graph.add_node(Greet);
    let flow = BatchFlow::new(graph, greet, PerFile)
        .unwrap()
        .with_params(Params::new().with("greeting", "read"));

    let ctx = SharedStore::new();
    flow.run(&ctx).unwrap();

    assert_eq!(
        strings(&ctx, "greetings"),
        vec!["read a.txt", "read b.txt", "read c.txt"]
    );
    assert_eq!(strings(&ctx, "sets"), vec!["a.txt", "b.txt", "c.txt"]);
}

#[test]
fn test_run_node_ignores_successors() {
    let mut graph: Graph<SharedStore> = Graph::new();
    let a = graph.add_node(Record("a"));
    let b = graph.add_node(Record("b"));
    graph.connect(a, b).unwrap();

    let ctx = SharedStore::new();
    assert_eq!(graph.run_node(a, &ctx).unwrap(), None);
    assert_eq!(strings(&ctx, "path"), vec!["a"]);
}
