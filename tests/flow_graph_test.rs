use flowgraph::nodes::{MapNode, PassThroughNode};
use flowgraph::{
  Egress, FailureReport, FlowGraph, FlowGraphConfig, GraphState, MsgRef, Node, NodeParams,
  OrderingViolation, ParamsEvent, ParamsEventKind, RuntimeError, TimeTickedFlowGraph, Timestamp,
  Timestamped, TryRecvError,
};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

fn init_tracing() {
  let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn msg(value: i64, tick: u64) -> MsgRef {
  Arc::new(Timestamped::new(value, Timestamp::new(tick)))
}

fn value(msg: &MsgRef) -> i64 {
  *msg
    .downcast_ref::<Timestamped<i64>>()
    .expect("i64 payload")
    .payload()
}

/// A node applying `f` to the payload of every input, keeping its tick.
fn map_i64(name: &str, f: impl Fn(i64) -> i64 + Send + 'static) -> Box<dyn Node> {
  Box::new(MapNode::new(name, move |inputs: Vec<MsgRef>| {
    inputs
      .iter()
      .map(|m| msg(f(value(m)), m.time_tick().as_u64()))
      .collect()
  }))
}

async fn next(egress: &mut Egress) -> MsgRef {
  timeout(WAIT, egress.recv())
    .await
    .expect("output within timeout")
    .expect("egress open")
}

async fn next_failure(failures: &mut UnboundedReceiver<FailureReport>) -> FailureReport {
  timeout(WAIT, failures.recv())
    .await
    .expect("failure within timeout")
    .expect("failure channel open")
}

// ============================================================================
// Pipelines
// ============================================================================

#[tokio::test]
async fn test_chain_squares_then_adds_two() {
  init_tracing();
  let mut graph = TimeTickedFlowGraph::new("chain");
  graph.add_node(map_i64("pow", |a| a * a)).unwrap();
  graph.add_node(map_i64("add", |a| a + 2)).unwrap();
  graph.set_edges("pow", ["add"]).unwrap();

  let ingress = graph.ingress("pow").unwrap();
  let mut egress = graph.take_egress("add").unwrap();
  graph.start().unwrap();

  for a in 1..=10 {
    ingress.send(msg(a, a as u64)).await.unwrap();
  }
  let mut results = Vec::new();
  for _ in 0..10 {
    results.push(value(&next(&mut egress).await));
  }
  assert_eq!(results, vec![3, 6, 11, 18, 27, 38, 51, 66, 83, 102]);

  graph.close().await.unwrap();
  assert_eq!(graph.state(), GraphState::Closed);
}

#[tokio::test]
async fn test_count_conservation_and_graceful_drain() {
  init_tracing();
  let mut graph = FlowGraph::new("conservation");
  for name in ["p1", "p2", "p3", "p4"] {
    graph.add_node(Box::new(PassThroughNode::new(name))).unwrap();
  }
  graph.set_edges("p1", ["p2"]).unwrap();
  graph.set_edges("p2", ["p3"]).unwrap();
  graph.set_edges("p3", ["p4"]).unwrap();

  let ingress = graph.ingress("p1").unwrap();
  let mut egress = graph.take_egress("p4").unwrap();
  graph.start().unwrap();

  let mut rng = rand::thread_rng();
  let sent: Vec<i64> = (0..100).map(|_| rng.gen_range(0..1_000_000)).collect();
  let producer = {
    let sent = sent.clone();
    tokio::spawn(async move {
      for (i, v) in sent.into_iter().enumerate() {
        ingress.send(msg(v, i as u64)).await.unwrap();
      }
      // Dropping the last ingress handle ends the stream.
    })
  };

  let mut received = Vec::new();
  while let Some(m) = timeout(WAIT, egress.recv()).await.expect("drain within timeout") {
    received.push(value(&m));
  }
  producer.await.unwrap();

  assert_eq!(received, sent);
  timeout(WAIT, graph.wait_for_completion())
    .await
    .expect("workers finish")
    .unwrap();
  assert_eq!(graph.state(), GraphState::Closed);
}

#[tokio::test]
async fn test_broadcast_fan_out_shares_messages() {
  init_tracing();
  let mut graph = FlowGraph::new("broadcast");
  graph.add_node(Box::new(PassThroughNode::new("s"))).unwrap();
  graph.add_node(Box::new(PassThroughNode::new("x"))).unwrap();
  graph.add_node(Box::new(PassThroughNode::new("y"))).unwrap();
  graph.set_edges("s", ["x", "y"]).unwrap();

  let ingress = graph.ingress("s").unwrap();
  let mut x = graph.take_egress("x").unwrap();
  let mut y = graph.take_egress("y").unwrap();
  graph.start().unwrap();

  for i in 1..=5 {
    ingress.send(msg(i, i as u64)).await.unwrap();
  }
  for i in 1..=5 {
    let from_x = next(&mut x).await;
    let from_y = next(&mut y).await;
    assert_eq!(value(&from_x), i);
    assert!(Arc::ptr_eq(&from_x, &from_y));
  }
  graph.close().await.unwrap();
}

// ============================================================================
// Backpressure and Liveness
// ============================================================================

#[tokio::test]
async fn test_full_queues_block_the_producer() {
  init_tracing();
  const CAPACITY: usize = 2;
  let mut graph = FlowGraph::new("backpressure");
  graph
    .add_node(Box::new(
      PassThroughNode::new("n").with_max_queue_length(CAPACITY),
    ))
    .unwrap();
  let ingress = graph.ingress("n").unwrap();
  let mut egress = graph.take_egress("n").unwrap();
  graph.start().unwrap();

  // Egress full, one message held by the worker, ingress full.
  for i in 0..(2 * CAPACITY + 1) as i64 {
    timeout(WAIT, ingress.send(msg(i, 0)))
      .await
      .expect("room in the pipeline")
      .unwrap();
  }
  assert!(
    timeout(Duration::from_millis(100), ingress.send(msg(99, 0)))
      .await
      .is_err()
  );

  assert_eq!(value(&next(&mut egress).await), 0);
  timeout(WAIT, ingress.send(msg(100, 0)))
    .await
    .expect("draining egress frees a slot")
    .unwrap();

  graph.close().await.unwrap();
}

#[tokio::test]
async fn test_send_beyond_queue_capacity_blocks() {
  init_tracing();
  const CAPACITY: usize = 3;
  let mut graph = FlowGraph::new("edge-bound");
  graph
    .add_node(Box::new(
      PassThroughNode::new("n").with_max_queue_length(CAPACITY),
    ))
    .unwrap();
  let ingress = graph.ingress("n").unwrap();
  let mut egress = graph.take_egress("n").unwrap();
  // Paused workers never pull, so only the ingress queue holds messages.
  graph.pause().unwrap();
  graph.start().unwrap();

  for i in 0..CAPACITY as i64 {
    timeout(WAIT, ingress.send(msg(i, 0)))
      .await
      .expect("room in the queue")
      .unwrap();
  }
  assert_eq!(ingress.capacity(), 0);
  assert!(
    timeout(Duration::from_millis(100), ingress.send(msg(99, 0)))
      .await
      .is_err()
  );

  graph.resume().unwrap();
  assert_eq!(value(&next(&mut egress).await), 0);
  timeout(WAIT, ingress.send(msg(100, 0)))
    .await
    .expect("draining frees a slot")
    .unwrap();

  graph.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_gives_up_on_a_blocked_operate_after_grace_period() {
  init_tracing();
  let finished = Arc::new(AtomicBool::new(false));
  let config = FlowGraphConfig::default().with_close_grace_period(Duration::from_millis(50));
  let mut graph = FlowGraph::with_config("stuck", config);
  let done = Arc::clone(&finished);
  graph
    .add_node(Box::new(MapNode::new("slow", move |inputs: Vec<MsgRef>| {
      std::thread::sleep(Duration::from_millis(500));
      done.store(true, Ordering::SeqCst);
      inputs
    })))
    .unwrap();
  let ingress = graph.ingress("slow").unwrap();
  graph.start().unwrap();

  ingress.send(msg(1, 1)).await.unwrap();
  tokio::time::sleep(Duration::from_millis(50)).await;

  timeout(Duration::from_millis(400), graph.close())
    .await
    .expect("close returns after the grace period")
    .unwrap();
  assert!(!finished.load(Ordering::SeqCst));

  tokio::time::sleep(Duration::from_millis(700)).await;
  assert!(finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_close_interrupts_blocked_fan_in() {
  init_tracing();
  let mut graph = FlowGraph::new("liveness");
  graph.add_node(Box::new(PassThroughNode::new("a"))).unwrap();
  graph.add_node(Box::new(PassThroughNode::new("b"))).unwrap();
  graph.add_node(Box::new(PassThroughNode::new("j"))).unwrap();
  graph.set_edges("a", ["j"]).unwrap();
  graph.set_edges("b", ["j"]).unwrap();

  let a = graph.ingress("a").unwrap();
  let _b = graph.ingress("b").unwrap();
  graph.start().unwrap();

  a.send(msg(1, 1)).await.unwrap();
  tokio::time::sleep(Duration::from_millis(20)).await;

  timeout(WAIT, graph.close())
    .await
    .expect("close completes while j waits on b")
    .unwrap();
  assert!(graph.is_cancelled());
  assert!(a.is_closed());
}

#[tokio::test]
async fn test_fan_in_waits_for_every_edge_and_retains_early_arrivals() {
  init_tracing();
  let rounds = Arc::new(AtomicUsize::new(0));
  let mut graph = FlowGraph::new("barrier");
  graph.add_node(Box::new(PassThroughNode::new("a"))).unwrap();
  graph.add_node(Box::new(PassThroughNode::new("b"))).unwrap();
  let counter = Arc::clone(&rounds);
  graph
    .add_node(Box::new(MapNode::new("j", move |inputs: Vec<MsgRef>| {
      counter.fetch_add(1, Ordering::SeqCst);
      inputs
    })))
    .unwrap();
  graph.set_edges("a", ["j"]).unwrap();
  graph.set_edges("b", ["j"]).unwrap();

  let a = graph.ingress("a").unwrap();
  let b = graph.ingress("b").unwrap();
  let mut egress = graph.take_egress("j").unwrap();
  graph.start().unwrap();

  for i in 1..=3 {
    a.send(msg(i, i as u64)).await.unwrap();
  }
  tokio::time::sleep(Duration::from_millis(50)).await;
  assert_eq!(rounds.load(Ordering::SeqCst), 0);
  assert_eq!(egress.try_recv().unwrap_err(), TryRecvError::Empty);

  b.send(msg(100, 1)).await.unwrap();
  assert_eq!(value(&next(&mut egress).await), 1);
  assert_eq!(value(&next(&mut egress).await), 100);
  assert_eq!(rounds.load(Ordering::SeqCst), 1);

  b.send(msg(200, 2)).await.unwrap();
  b.send(msg(300, 3)).await.unwrap();
  let mut rest = Vec::new();
  for _ in 0..4 {
    rest.push(value(&next(&mut egress).await));
  }
  assert_eq!(rest, vec![2, 200, 3, 300]);
  assert_eq!(rounds.load(Ordering::SeqCst), 3);

  graph.close().await.unwrap();
}

// ============================================================================
// Time Ticks
// ============================================================================

#[tokio::test]
async fn test_tick_regression_is_reported_and_cancels() {
  init_tracing();
  let mut graph = TimeTickedFlowGraph::new("regression");
  graph.add_node(Box::new(PassThroughNode::new("n"))).unwrap();
  let mut failures = graph.take_failures().unwrap();
  let ingress = graph.ingress("n").unwrap();
  let _egress = graph.take_egress("n").unwrap();
  graph.start().unwrap();

  ingress.send(msg(0, 5)).await.unwrap();
  ingress.send(msg(0, 3)).await.unwrap();

  let report = next_failure(&mut failures).await;
  assert_eq!(report.graph, "regression");
  assert_eq!(report.node, "n");
  assert_eq!(
    report.error,
    RuntimeError::Ordering(OrderingViolation::Regression {
      edge: "ingress -> n".into(),
      previous: Timestamp::new(5),
      current: Timestamp::new(3),
    })
  );
  timeout(WAIT, graph.cancelled())
    .await
    .expect("graph cancelled after a fault");
  assert_eq!(graph.state(), GraphState::Closed);
  assert!(graph.pause().is_err());
  assert!(graph.resume().is_err());
  timeout(WAIT, graph.close())
    .await
    .expect("workers already stopping")
    .unwrap();
  assert_eq!(graph.state(), GraphState::Closed);
}

#[tokio::test]
async fn test_emitting_ahead_of_watermark_is_reported() {
  init_tracing();
  let mut graph = TimeTickedFlowGraph::new("ahead");
  graph.add_node(Box::new(PassThroughNode::new("a"))).unwrap();
  graph.add_node(Box::new(PassThroughNode::new("b"))).unwrap();
  graph.add_node(Box::new(PassThroughNode::new("j"))).unwrap();
  graph.set_edges("a", ["j"]).unwrap();
  graph.set_edges("b", ["j"]).unwrap();
  let mut failures = graph.take_failures().unwrap();
  let a = graph.ingress("a").unwrap();
  let b = graph.ingress("b").unwrap();
  graph.start().unwrap();

  a.send(msg(0, 7)).await.unwrap();
  b.send(msg(0, 4)).await.unwrap();

  let report = next_failure(&mut failures).await;
  assert_eq!(report.node, "j");
  assert_eq!(
    report.error,
    RuntimeError::Ordering(OrderingViolation::AheadOfWatermark {
      emitted: Timestamp::new(7),
      watermark: Timestamp::new(4),
    })
  );
  graph.close().await.unwrap();
}

#[tokio::test]
async fn test_watermark_is_min_of_round_inputs() {
  init_tracing();
  let mut graph = FlowGraph::new("watermark");
  graph.add_node(Box::new(PassThroughNode::new("a"))).unwrap();
  graph.add_node(Box::new(PassThroughNode::new("b"))).unwrap();
  graph.add_node(Box::new(PassThroughNode::new("j"))).unwrap();
  graph.set_edges("a", ["j"]).unwrap();
  graph.set_edges("b", ["j"]).unwrap();
  let a = graph.ingress("a").unwrap();
  let b = graph.ingress("b").unwrap();
  let mut egress = graph.take_egress("j").unwrap();
  let watermark = graph.watermark("j").unwrap();
  assert_eq!(watermark.get(), Timestamp::MIN);
  graph.start().unwrap();

  a.send(msg(0, 7)).await.unwrap();
  b.send(msg(0, 4)).await.unwrap();
  next(&mut egress).await;
  next(&mut egress).await;

  assert_eq!(watermark.get(), Timestamp::new(4));
  assert_eq!(graph.watermark("a").unwrap().get(), Timestamp::new(7));
  assert!(watermark.less_than(Timestamp::new(5)));
  graph.close().await.unwrap();
}

// ============================================================================
// Parameters, Pause and Faults
// ============================================================================

struct ScaleNode {
  factor: i64,
  events: Arc<Mutex<Vec<ParamsEvent>>>,
}

impl Node for ScaleNode {
  fn name(&self) -> &str {
    "scale"
  }

  fn operate(&mut self, inputs: Vec<MsgRef>) -> Vec<MsgRef> {
    inputs
      .iter()
      .map(|m| msg(value(m) * self.factor, m.time_tick().as_u64()))
      .collect()
  }

  fn on_params(&mut self, params: &NodeParams, events: &[ParamsEvent]) {
    self.factor = params.parse("factor").unwrap_or(1);
    self.events.lock().unwrap().extend_from_slice(events);
  }
}

#[tokio::test]
async fn test_params_apply_between_rounds() {
  init_tracing();
  let events = Arc::new(Mutex::new(Vec::new()));
  let mut graph = FlowGraph::new("params");
  graph
    .add_node(Box::new(ScaleNode {
      factor: 1,
      events: Arc::clone(&events),
    }))
    .unwrap();
  let publisher = graph.params("scale").unwrap();
  let ingress = graph.ingress("scale").unwrap();
  let mut egress = graph.take_egress("scale").unwrap();

  publisher.set("factor", "3");
  graph.start().unwrap();
  ingress.send(msg(2, 1)).await.unwrap();
  assert_eq!(value(&next(&mut egress).await), 6);

  publisher.set("factor", "5");
  ingress.send(msg(2, 2)).await.unwrap();
  assert_eq!(value(&next(&mut egress).await), 10);

  publisher.remove("factor");
  ingress.send(msg(2, 3)).await.unwrap();
  assert_eq!(value(&next(&mut egress).await), 2);

  let kinds: Vec<_> = events.lock().unwrap().iter().map(|e| e.kind).collect();
  assert_eq!(
    kinds,
    vec![
      ParamsEventKind::Created,
      ParamsEventKind::Updated,
      ParamsEventKind::Deleted
    ]
  );
  graph.close().await.unwrap();
}

#[tokio::test]
async fn test_pause_holds_rounds_until_resume() {
  init_tracing();
  let mut graph = FlowGraph::new("pause");
  graph.add_node(Box::new(PassThroughNode::new("n"))).unwrap();
  let ingress = graph.ingress("n").unwrap();
  let mut egress = graph.take_egress("n").unwrap();
  graph.pause().unwrap();
  graph.start().unwrap();

  ingress.send(msg(1, 1)).await.unwrap();
  tokio::time::sleep(Duration::from_millis(50)).await;
  assert_eq!(egress.try_recv().unwrap_err(), TryRecvError::Empty);

  graph.resume().unwrap();
  assert_eq!(value(&next(&mut egress).await), 1);
  graph.close().await.unwrap();
}

#[tokio::test]
async fn test_close_while_paused() {
  init_tracing();
  let mut graph = FlowGraph::new("paused-close");
  graph.add_node(Box::new(PassThroughNode::new("n"))).unwrap();
  let _ingress = graph.ingress("n").unwrap();
  graph.pause().unwrap();
  graph.start().unwrap();
  timeout(WAIT, graph.close())
    .await
    .expect("close completes while paused")
    .unwrap();
}

#[tokio::test]
async fn test_panic_in_operate_is_reported() {
  init_tracing();
  let mut graph = FlowGraph::new("panic");
  graph
    .add_node(Box::new(MapNode::new("unlucky", |inputs: Vec<MsgRef>| {
      if inputs.iter().any(|m| value(m) == 13) {
        panic!("unlucky number");
      }
      inputs
    })))
    .unwrap();
  let mut failures = graph.take_failures().unwrap();
  let ingress = graph.ingress("unlucky").unwrap();
  let mut egress = graph.take_egress("unlucky").unwrap();
  graph.start().unwrap();

  ingress.send(msg(1, 1)).await.unwrap();
  assert_eq!(value(&next(&mut egress).await), 1);
  ingress.send(msg(13, 2)).await.unwrap();

  let report = next_failure(&mut failures).await;
  assert_eq!(report.node, "unlucky");
  assert_eq!(
    report.error,
    RuntimeError::NodePanicked("unlucky number".into())
  );
  timeout(WAIT, graph.cancelled()).await.unwrap();
  graph.close().await.unwrap();
}

struct HookNode {
  started: Arc<AtomicUsize>,
  closed: Arc<AtomicUsize>,
}

impl Node for HookNode {
  fn name(&self) -> &str {
    "hooks"
  }

  fn operate(&mut self, inputs: Vec<MsgRef>) -> Vec<MsgRef> {
    inputs
  }

  fn on_start(&mut self) {
    self.started.fetch_add(1, Ordering::SeqCst);
  }

  fn on_close(&mut self) {
    self.closed.fetch_add(1, Ordering::SeqCst);
  }
}

#[tokio::test]
async fn test_hooks_run_once_around_rounds() {
  init_tracing();
  let started = Arc::new(AtomicUsize::new(0));
  let closed = Arc::new(AtomicUsize::new(0));
  let mut graph = FlowGraph::new("hooks");
  graph
    .add_node(Box::new(HookNode {
      started: Arc::clone(&started),
      closed: Arc::clone(&closed),
    }))
    .unwrap();
  let ingress = graph.ingress("hooks").unwrap();
  graph.start().unwrap();

  ingress.send(msg(1, 1)).await.unwrap();
  drop(ingress);
  timeout(WAIT, graph.wait_for_completion())
    .await
    .expect("source drains after ingress is dropped")
    .unwrap();

  assert_eq!(started.load(Ordering::SeqCst), 1);
  assert_eq!(closed.load(Ordering::SeqCst), 1);
}
