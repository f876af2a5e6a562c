use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use dagcron::dag::{ExecRequest, KillRequest};
use dagcron::engine::RuntimeEvent;
use dagcron::exec::ExecutorBackend;
use dagcron::errors::Result;

/// Decides the exit status of a dispatched run. `None` leaves it running
/// until something else reports it.
pub type ExitPolicy = Arc<dyn Fn(&ExecRequest) -> Option<i32> + Send + Sync>;

/// A fake executor that:
/// - records every dispatched request and kill
/// - reports `ActionExited` right away using its exit policy
/// - reports status -1 for killed runs, as a signalled process would.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<ExecRequest>>>,
    killed: Arc<Mutex<Vec<KillRequest>>>,
    policy: ExitPolicy,
}

impl FakeExecutor {
    /// Every run succeeds.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self::with_policy(runtime_tx, Arc::new(|_: &ExecRequest| Some(0)))
    }

    pub fn with_policy(runtime_tx: mpsc::Sender<RuntimeEvent>, policy: ExitPolicy) -> Self {
        Self {
            runtime_tx,
            executed: Arc::new(Mutex::new(Vec::new())),
            killed: Arc::new(Mutex::new(Vec::new())),
            policy,
        }
    }

    /// Shared record of dispatched requests, in dispatch order.
    pub fn executed(&self) -> Arc<Mutex<Vec<ExecRequest>>> {
        Arc::clone(&self.executed)
    }

    pub fn killed(&self) -> Arc<Mutex<Vec<KillRequest>>> {
        Arc::clone(&self.killed)
    }
}

impl ExecutorBackend for FakeExecutor {
    fn dispatch(
        &mut self,
        requests: Vec<ExecRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);
        let policy = Arc::clone(&self.policy);

        Box::pin(async move {
            for request in requests {
                let status = policy(&request);
                executed.lock().unwrap().push(request.clone());

                if let Some(status) = status {
                    // Report from a separate task; the runtime is busy
                    // executing this very command.
                    let tx = tx.clone();
                    let run = request.run.clone();
                    tokio::spawn(async move {
                        let _ = tx.send(RuntimeEvent::ActionExited { run, status }).await;
                    });
                }
            }
            Ok(())
        })
    }

    fn kill(
        &mut self,
        requests: Vec<KillRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let killed = Arc::clone(&self.killed);

        Box::pin(async move {
            for request in requests {
                killed.lock().unwrap().push(request.clone());
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _ = tx
                        .send(RuntimeEvent::ActionExited {
                            run: request.run,
                            status: -1,
                        })
                        .await;
                });
            }
            Ok(())
        })
    }
}
