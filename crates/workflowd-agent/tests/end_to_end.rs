// ABOUTME: End-to-end tests running a real dispatcher and agent over gRPC on localhost.
// ABOUTME: Covers completion, setup failure, concurrent tasks and agent cancellation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use workflowd_agent::{
    AgentError, AgentRuntime, ExecEvent, ExecSpec, Executor, ProcessExecutor,
    ProcessExecutorConfig, RuntimeExit,
};
use workflowd_grpc::ChannelConfig;
use workflowd_server::{CommandSpec, DispatchSettings, Dispatcher};

struct TestServer {
    dispatcher: Arc<Dispatcher>,
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start(settings: DispatchSettings) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dispatcher = Dispatcher::new(settings);
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(workflowd_server::server::serve(
            listener,
            dispatcher.clone(),
            async move {
                let _ = rx.await;
            },
        ));
        Self {
            dispatcher,
            addr,
            shutdown: Some(tx),
            handle,
        }
    }

    fn channel_config(&self) -> ChannelConfig {
        ChannelConfig::new(self.addr.to_string()).with_connect_timeout(Duration::from_secs(2))
    }

    async fn wait_for_connection(&self) -> String {
        for _ in 0..200 {
            if let Some(id) = self.dispatcher.connections().into_iter().next() {
                return id;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("agent never registered");
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

fn spawn_agent(
    executor: Arc<dyn Executor>,
    config: ChannelConfig,
    cancel: CancellationToken,
) -> JoinHandle<Result<RuntimeExit, AgentError>> {
    tokio::spawn(async move { AgentRuntime::new(executor).run(&config, cancel).await })
}

async fn join_agent(
    agent: JoinHandle<Result<RuntimeExit, AgentError>>,
) -> Result<RuntimeExit, AgentError> {
    tokio::time::timeout(Duration::from_secs(5), agent)
        .await
        .expect("agent did not stop")
        .unwrap()
}

/// Emits some output, then holds the result back until a permit is released.
struct GatedExecutor {
    gate: Arc<Semaphore>,
}

impl GatedExecutor {
    fn new() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (Arc::new(Self { gate: gate.clone() }), gate)
    }
}

#[async_trait]
impl Executor for GatedExecutor {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn execute(&self, _spec: &ExecSpec) -> BoxStream<'static, ExecEvent> {
        let gate = self.gate.clone();
        let head = stream::iter(vec![
            ExecEvent::Started,
            ExecEvent::Output("a".to_string()),
            ExecEvent::Output("b".to_string()),
        ]);
        let tail = stream::once(async move {
            match gate.acquire_owned().await {
                Ok(permit) => permit.forget(),
                Err(_) => return ExecEvent::failed("gate closed"),
            }
            ExecEvent::Finished {
                success: true,
                message: "done".to_string(),
            }
        });
        Box::pin(head.chain(tail))
    }
}

fn settings_with(executable: &str, args: &[&str]) -> DispatchSettings {
    DispatchSettings {
        initial_command: CommandSpec::new(executable, args.iter().map(|a| a.to_string()).collect()),
        ..DispatchSettings::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connection_done_only_after_completed() {
    let server = TestServer::start(DispatchSettings::default()).await;
    let (executor, gate) = GatedExecutor::new();
    let agent = spawn_agent(executor, server.channel_config(), CancellationToken::new());

    let connection_id = server.wait_for_connection().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.dispatcher.connections(), vec![connection_id]);
    assert!(!agent.is_finished());

    gate.add_permits(1);
    assert_eq!(join_agent(agent).await.unwrap(), RuntimeExit::StreamClosed);
    assert!(server.dispatcher.connections().is_empty());

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_real_process_runs_to_completion() {
    let server = TestServer::start(settings_with("sh", &["-c", "echo a; echo b"])).await;
    let executor = Arc::new(ProcessExecutor::new(ProcessExecutorConfig::default()));
    let agent = spawn_agent(executor, server.channel_config(), CancellationToken::new());

    assert_eq!(join_agent(agent).await.unwrap(), RuntimeExit::StreamClosed);
    assert!(server.dispatcher.connections().is_empty());

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_setup_failure_ends_connection() {
    let server = TestServer::start(settings_with("/nonexistent/workflowd-test-binary", &[])).await;
    let executor = Arc::new(ProcessExecutor::new(ProcessExecutorConfig::default()));
    let agent = spawn_agent(executor, server.channel_config(), CancellationToken::new());

    assert_eq!(join_agent(agent).await.unwrap(), RuntimeExit::StreamClosed);
    assert!(server.dispatcher.connections().is_empty());

    server.stop().await;
}

/// Gated for every command except `hang`, which starts and never finishes.
struct HangOnRequestExecutor {
    gated: Arc<GatedExecutor>,
}

#[async_trait]
impl Executor for HangOnRequestExecutor {
    fn name(&self) -> &'static str {
        "hang-on-request"
    }

    async fn execute(&self, spec: &ExecSpec) -> BoxStream<'static, ExecEvent> {
        if spec.executable == "hang" {
            Box::pin(stream::iter(vec![ExecEvent::Started]).chain(stream::pending()))
        } else {
            self.gated.execute(spec).await
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_initial_task_ends_connection_while_extra_task_runs() {
    let server = TestServer::start(DispatchSettings::default()).await;
    let (gated, gate) = GatedExecutor::new();
    let executor = Arc::new(HangOnRequestExecutor { gated });
    let cancel = CancellationToken::new();
    let agent = spawn_agent(executor, server.channel_config(), cancel.clone());

    let connection_id = server.wait_for_connection().await;
    server
        .dispatcher
        .send_command(&connection_id, CommandSpec::new("hang", vec![]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    gate.add_permits(1);
    for _ in 0..200 {
        if server.dispatcher.connections().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(server.dispatcher.connections().is_empty());

    // The agent still waits on its own runner until told to stop.
    assert!(!agent.is_finished());
    cancel.cancel();
    assert_eq!(join_agent(agent).await.unwrap(), RuntimeExit::Cancelled);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dispatcher_shutdown_ends_agent_stream() {
    let server = TestServer::start(DispatchSettings::default()).await;
    let (executor, _gate) = GatedExecutor::new();
    let agent = spawn_agent(executor, server.channel_config(), CancellationToken::new());
    server.wait_for_connection().await;

    let dispatcher = server.dispatcher.clone();
    server.stop().await;

    // The agent sees the trailing status as a stream error.
    assert!(matches!(
        join_agent(agent).await,
        Err(AgentError::Receive(_))
    ));
    assert!(dispatcher.connections().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_agent_cancel_releases_connection() {
    let server = TestServer::start(DispatchSettings::default()).await;
    let (executor, _gate) = GatedExecutor::new();
    let cancel = CancellationToken::new();
    let agent = spawn_agent(executor, server.channel_config(), cancel.clone());
    server.wait_for_connection().await;

    cancel.cancel();
    assert_eq!(join_agent(agent).await.unwrap(), RuntimeExit::Cancelled);

    for _ in 0..200 {
        if server.dispatcher.connections().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(server.dispatcher.connections().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_unreachable_dispatcher_is_fatal() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ChannelConfig::new(addr.to_string()).with_connect_timeout(Duration::from_secs(1));
    let executor = Arc::new(ProcessExecutor::new(ProcessExecutorConfig::default()));
    let result = AgentRuntime::new(executor)
        .run(&config, CancellationToken::new())
        .await;
    assert!(matches!(result, Err(AgentError::Connect(_))));
}
